//! Join synchronizer.
//!
//! A [`Pipe`] holds continuations in registration order and a set of named
//! slots. Each [`Pipe::run`] walks the continuations in that order and fires
//! every one whose required slots are all filled or ignored. Slots are filled
//! through single-use [`Filler`] handles, each of which triggers a run.
//!
//! Continuations execute without the pipe's lock held, so a continuation may
//! fill slots, register continuations or run the same pipe re-entrantly. A
//! continuation is never invoked re-entrantly from inside itself.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tandem_core::Reply;

use crate::continuation::{Callback, Continuation, Flow};
use crate::slots::Slots;

/// Which requirements a fill waives on later runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IgnorePolicy {
    #[default]
    None,
    /// Waive the slot being filled.
    SelfSlot,
    /// Waive the named slots.
    Slots(Vec<String>),
    /// Skip the continuation that was running when the filler was created.
    CurrentContinuation,
}

struct Entry {
    id: u64,
    requires: Vec<String>,
    remaining: Option<usize>,
    /// `None` while the callback is executing.
    callback: Option<Callback>,
}

#[derive(Default)]
struct PipeState {
    entries: Vec<Entry>,
    slots: Slots,
    ignored_slots: HashSet<String>,
    ignored_entries: HashSet<u64>,
    /// Continuation currently executing, innermost first.
    running: Vec<u64>,
    next_id: u64,
    finished: bool,
}

impl PipeState {
    fn satisfied(&self, entry: &Entry, filled: &HashSet<String>) -> bool {
        entry
            .requires
            .iter()
            .all(|slot| self.ignored_slots.contains(slot) || filled.contains(slot))
    }

    /// Claim the next continuation after `after` that should fire.
    fn claim_next(&mut self, after: Option<u64>, filled: &HashSet<String>) -> Option<(u64, Callback, bool)> {
        let index = self.entries.iter().position(|entry| {
            after.map_or(true, |after| entry.id > after)
                && entry.callback.is_some()
                && !self.ignored_entries.contains(&entry.id)
                && self.satisfied(entry, filled)
        })?;

        let entry = &mut self.entries[index];
        let id = entry.id;
        let callback = entry.callback.take()?;
        let exhausted = match entry.remaining.as_mut() {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            self.entries.remove(index);
        }
        Some((id, callback, exhausted))
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }
}

/// Join synchronizer over named slots.
///
/// Cloning yields another handle onto the same pipe.
#[derive(Clone, Default)]
pub struct Pipe {
    state: Arc<Mutex<PipeState>>,
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Pipe")
            .field("continuations", &state.entries.len())
            .field("slots", &state.slots)
            .field("finished", &state.finished)
            .finish()
    }
}

impl Pipe {
    pub fn new() -> Self {
        Self::default()
    }

    // Callbacks never run under this lock, so poisoning can only come from a
    // panic in the pipe's own bookkeeping; the state is still usable.
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a continuation after all existing ones.
    pub fn add(&self, continuation: Continuation) -> &Self {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push(Entry {
            id,
            requires: continuation.requires,
            remaining: continuation.remaining,
            callback: Some(continuation.callback),
        });
        self
    }

    /// Register several continuations, in order.
    pub fn add_all(&self, continuations: impl IntoIterator<Item = Continuation>) -> &Self {
        for continuation in continuations {
            self.add(continuation);
        }
        self
    }

    /// Create a handle that fills `slot` and runs the pipe.
    ///
    /// The ignore policy takes effect immediately, not when the filler fires.
    pub fn fill(&self, slot: impl Into<String>, ignore: IgnorePolicy) -> Filler {
        let slot = slot.into();
        {
            let mut state = self.lock();
            match ignore {
                IgnorePolicy::None => {}
                IgnorePolicy::SelfSlot => {
                    state.ignored_slots.insert(slot.clone());
                }
                IgnorePolicy::Slots(names) => state.ignored_slots.extend(names),
                IgnorePolicy::CurrentContinuation => {
                    if let Some(&id) = state.running.last() {
                        state.ignored_entries.insert(id);
                    }
                }
            }
        }
        Filler {
            pipe: self.clone(),
            slot,
            subject: None,
        }
    }

    /// Evaluate every registered continuation in registration order.
    ///
    /// Returns how many continuations fired during this run. Requirements are
    /// checked against the slots filled when the run began.
    pub fn run(&self) -> usize {
        let filled: HashSet<String> = {
            let state = self.lock();
            if state.finished {
                return 0;
            }
            state.slots.names().map(str::to_string).collect()
        };

        let mut fired = 0;
        let mut cursor = None;
        loop {
            let (id, mut callback, exhausted, slots) = {
                let mut state = self.lock();
                if state.finished {
                    break;
                }
                let Some((id, callback, exhausted)) = state.claim_next(cursor, &filled) else {
                    break;
                };
                state.running.push(id);
                (id, callback, exhausted, state.slots.clone())
            };
            cursor = Some(id);

            let flow = callback(&slots);
            fired += 1;

            let mut state = self.lock();
            state.running.retain(|running| *running != id);
            match flow {
                Flow::TerminateAll => {
                    tracing::debug!(continuation = id, "Pipe terminated");
                    state.entries.clear();
                    state.finished = true;
                    break;
                }
                Flow::RemoveSelf => {
                    if let Some(index) = state.position(id) {
                        state.entries.remove(index);
                    }
                }
                Flow::Continue if !exhausted => {
                    if let Some(index) = state.position(id) {
                        state.entries[index].callback = Some(callback);
                    }
                }
                Flow::Continue => {}
            }
        }

        tracing::trace!(fired, "Pipe run complete");
        fired
    }

    /// Forget what was delivered into `slots`, so continuations requiring
    /// them wait for a fresh fill.
    pub fn invalidate<I, S>(&self, slots: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.lock();
        for slot in slots {
            state.slots.invalidate(slot.as_ref());
        }
    }

    /// Whether a continuation has terminated the pipe.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Number of registered continuations.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current slot contents.
    pub fn slots(&self) -> Slots {
        self.lock().slots.clone()
    }

    fn deliver(&self, slot: &str, args: Vec<Value>, subject: Option<Value>) -> usize {
        self.lock().slots.store(slot, args, subject);
        self.run()
    }
}

/// Single-use handle delivering into one pipe slot.
#[derive(Debug)]
pub struct Filler {
    pipe: Pipe,
    slot: String,
    subject: Option<Value>,
}

impl Filler {
    /// Attach a call-context value delivered alongside the arguments.
    pub fn with_subject(mut self, subject: Value) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Store `args` in the slot and run the pipe. Returns the fired count.
    pub fn send(self, args: Vec<Value>) -> usize {
        self.pipe.deliver(&self.slot, args, self.subject)
    }

    /// Adapt this filler into a typed reply; the value is stored as the
    /// slot's single argument.
    pub fn into_reply<R: Serialize + 'static>(self) -> Reply<R> {
        Reply::new(move |value: R| match serde_json::to_value(value) {
            Ok(arg) => {
                self.send(vec![arg]);
            }
            Err(e) => {
                tracing::warn!(error = %e, slot = %self.slot, "Failed to serialize slot value");
            }
        })
    }
}
