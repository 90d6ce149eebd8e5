//! TANDEM Batch - Time-Window Call Coalescing
//!
//! A [`Batcher`] collects individual calls that arrive close together and
//! hands them to a [`BatchHandler`] as one positionally aligned [`Batch`].
//! It sits beneath a getter or stands alone in front of any downstream
//! operation that is cheaper to invoke once for many inputs.

pub mod batch;
pub mod batcher;

pub use batch::{Batch, BatchHandler, BatchedCall};
pub use batcher::Batcher;
