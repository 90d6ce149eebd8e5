//! Continuations registered on a pipe.

use crate::slots::Slots;

/// What a continuation asks the pipe to do after it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Stay registered and fire again on later satisfying runs.
    #[default]
    Continue,
    /// Unregister this continuation only.
    RemoveSelf,
    /// Unregister every continuation and finish the pipe.
    TerminateAll,
}

pub(crate) type Callback = Box<dyn FnMut(&Slots) -> Flow + Send + 'static>;

/// A callback plus the slots it waits for and an optional fire budget.
pub struct Continuation {
    pub(crate) requires: Vec<String>,
    pub(crate) remaining: Option<usize>,
    pub(crate) callback: Callback,
}

impl Continuation {
    /// A continuation with no requirements, firing on every run.
    pub fn new(callback: impl FnMut(&Slots) -> Flow + Send + 'static) -> Self {
        Self {
            requires: Vec::new(),
            remaining: None,
            callback: Box::new(callback),
        }
    }

    /// Fire only once every named slot is filled (or ignored).
    pub fn requires<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(slots.into_iter().map(Into::into));
        self
    }

    /// Fire at most `times` times, then unregister. Zero means unlimited.
    pub fn max_fires(mut self, times: usize) -> Self {
        self.remaining = (times > 0).then_some(times);
        self
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("requires", &self.requires)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}
