//! Failsafe mechanisms for outbound metadata requests

mod retry;

pub use retry::{RetryPolicy, Transient, with_retry};
