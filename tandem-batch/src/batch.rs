//! Batch records handed to a downstream handler.

use serde_json::Value;
use tandem_core::Reply;

/// One individual call inside a [`Batch`].
#[derive(Debug)]
pub struct BatchedCall<R> {
    pub subject: Option<Value>,
    pub args: Vec<Value>,
    pub replies: Vec<Reply<R>>,
}

/// The calls collected during one window.
///
/// The three sequences are positionally aligned: index `i` of `subjects`,
/// `args` and `replies` always belongs to the same original call, in arrival
/// order. Matching results back to positions is the handler's job.
#[derive(Debug)]
pub struct Batch<R> {
    pub subjects: Vec<Option<Value>>,
    pub args: Vec<Vec<Value>>,
    pub replies: Vec<Vec<Reply<R>>>,
}

impl<R> Default for Batch<R> {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            args: Vec::new(),
            replies: Vec::new(),
        }
    }
}

impl<R> Batch<R> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            subjects: Vec::with_capacity(capacity),
            args: Vec::with_capacity(capacity),
            replies: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, call: BatchedCall<R>) {
        self.subjects.push(call.subject);
        self.args.push(call.args);
        self.replies.push(call.replies);
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Split the batch back into individual calls, in arrival order.
    pub fn into_calls(self) -> impl Iterator<Item = BatchedCall<R>> {
        self.subjects
            .into_iter()
            .zip(self.args)
            .zip(self.replies)
            .map(|((subject, args), replies)| BatchedCall {
                subject,
                args,
                replies,
            })
    }
}

impl<R> FromIterator<BatchedCall<R>> for Batch<R> {
    fn from_iter<I: IntoIterator<Item = BatchedCall<R>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut batch = Batch::with_capacity(iter.size_hint().0);
        for call in iter {
            batch.push(call);
        }
        batch
    }
}

/// Downstream consumer of a window's worth of calls.
///
/// Invoked exactly once per non-empty window, outside any batcher lock, so a
/// handler may immediately issue new calls on the same batcher; they start a
/// fresh window.
pub trait BatchHandler<R>: Send + Sync + 'static {
    fn handle(&self, batch: Batch<R>);
}

impl<R, F> BatchHandler<R> for F
where
    F: Fn(Batch<R>) + Send + Sync + 'static,
{
    fn handle(&self, batch: Batch<R>) {
        self(batch)
    }
}
