//! TANDEM Getter - Coalescing, Caching, Throttled Calls
//!
//! A [`Getter`] wraps a producing [`Operation`] so identical concurrent calls
//! share one underlying invocation, results are optionally cached, and the
//! number of simultaneously running operations is optionally bounded by a
//! shared [`Throttle`].
//!
//! # Example
//!
//! ```ignore
//! use tandem_core::{json, GetterConfig, Reply};
//! use tandem_getter::{Call, CallStatus, Getter};
//!
//! let getter = Getter::new(
//!     |call: Call<String>| spawn_request(call.args, call.replies),
//!     GetterConfig::default().with_throttle("api").with_throttle_size(4),
//! )?;
//!
//! let status = getter.call(vec![json!("user"), json!(42)], vec![Reply::noop()])?;
//! assert_eq!(status, CallStatus::Started);
//! ```

pub mod getter;
pub mod throttle;

pub use getter::{CachedReply, Call, CallStatus, Getter, GetterBuilder, Operation};
pub use throttle::{Throttle, ThrottleRegistry};
