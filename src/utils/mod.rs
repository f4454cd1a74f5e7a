pub mod retry;

pub use retry::{with_timeout_retry, AttemptError};
