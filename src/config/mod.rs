//! Configuration models for the dispatch queue, worker pool and retries.

pub mod dispatcher;

pub use dispatcher::{DispatcherConfig, QueueConfig, RetryConfig, ENV_PREFIX};
