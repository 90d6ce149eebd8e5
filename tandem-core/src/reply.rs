//! Reply continuations.
//!
//! A [`Reply`] is the typed replacement for a trailing callback argument: a
//! single-use handle that delivers one value to whoever is waiting on it.
//! Dropping a reply without sending is allowed; the receiver simply never
//! hears back (or sees a closed channel, for [`Reply::channel`]).

use std::fmt;

use tokio::sync::oneshot;

/// Single-use continuation receiving a value of type `R`.
pub struct Reply<R> {
    deliver: Box<dyn FnOnce(R) + Send + 'static>,
}

impl<R: 'static> Reply<R> {
    /// Wrap a closure as a reply.
    pub fn new(f: impl FnOnce(R) + Send + 'static) -> Self {
        Self {
            deliver: Box::new(f),
        }
    }

    /// A reply that discards whatever it receives.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// A reply paired with a oneshot receiver, for callers that prefer to
    /// `.await` the value.
    pub fn channel() -> (Self, oneshot::Receiver<R>)
    where
        R: Send,
    {
        let (tx, rx) = oneshot::channel();
        let reply = Self::new(move |value| {
            // Receiver may have given up; nothing to do then.
            let _ = tx.send(value);
        });
        (reply, rx)
    }

    /// Deliver the value, consuming the reply.
    pub fn send(self, value: R) {
        (self.deliver)(value)
    }

    /// Adapt this reply to accept another type.
    pub fn map<U: 'static>(self, f: impl FnOnce(U) -> R + Send + 'static) -> Reply<U> {
        Reply::new(move |value| self.send(f(value)))
    }
}

impl<R> fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_send_invokes_closure() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let reply = Reply::new(move |v: u32| *sink.lock().unwrap() = Some(v));
        reply.send(7);
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn test_map_converts_before_delivery() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let reply = Reply::new(move |v: String| *sink.lock().unwrap() = v);
        let numeric: Reply<u8> = reply.map(|n: u8| format!("n={n}"));
        numeric.send(3);
        assert_eq!(*seen.lock().unwrap(), "n=3");
    }

    #[tokio::test]
    async fn test_channel_reply() {
        let (reply, rx) = Reply::channel();
        reply.send("done");
        assert_eq!(rx.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_dropped_channel_reply_closes_receiver() {
        let (reply, rx) = Reply::<u8>::channel();
        drop(reply);
        assert!(rx.await.is_err());
    }
}
