//! Outbound message dispatch.
//!
//! All streams share one [`Dispatcher`]. It paces attempts to a minimum
//! interval and retries transient [`SendError`]s with jittered exponential
//! backoff before handing a terminal [`DispatchError`] back to the caller.

mod backoff;
mod dispatcher;

pub use backoff::{BackoffPolicy, FixedJitter, JitterSource, RandomJitter};
pub use dispatcher::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_INTERVAL, DispatchError, DispatchReceipt, DispatchRequest,
    Dispatcher, DispatcherConfig, MessageSender, SendError,
};
