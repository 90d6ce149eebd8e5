//! TANDEM Pipe - Join Synchronization over Named Slots
//!
//! Asynchronous producers deliver into named slots of a [`Pipe`] through
//! [`Filler`] handles; registered [`Continuation`]s fire once every slot they
//! require has been filled. Continuations may fire repeatedly, a bounded
//! number of times, or end the whole pipe via [`Flow`].
//!
//! # Example
//!
//! ```ignore
//! use tandem_pipe::{Continuation, Flow, IgnorePolicy, Pipe};
//!
//! let pipe = Pipe::new();
//! pipe.add(
//!     Continuation::new(|slots| {
//!         render(slots.first("user"), slots.first("stream"));
//!         Flow::TerminateAll
//!     })
//!     .requires(["user", "stream"]),
//! );
//!
//! users.call(args, vec![pipe.fill("user", IgnorePolicy::None).into_reply()])?;
//! streams.call(args, vec![pipe.fill("stream", IgnorePolicy::None).into_reply()])?;
//! ```

pub mod continuation;
pub mod pipe;
pub mod slots;

pub use continuation::{Continuation, Flow};
pub use pipe::{Filler, IgnorePolicy, Pipe};
pub use slots::Slots;
