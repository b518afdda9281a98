//! Retry classification over error chains, plus the outer retry loop the
//! dispatcher wraps around persistence and notification calls.
//!
//! Classification never looks at message text. An error is reduced to the
//! ordered list of distinct [`ErrorKind`] tags found by following
//! `Error::source` to the end of the chain, and that list is tested against a
//! caller-supplied set of retryable kinds.

use std::collections::HashSet;
use std::error::Error;
use std::hash::Hash;
use std::io;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::core::{SchedulerError, StoreError, TransportError};

/// Stable tag for one link of an error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `SchedulerError::InvalidArgument`.
    InvalidArgument,
    /// `SchedulerError::QueueFull`.
    QueueFull,
    /// `SchedulerError::NotFound`.
    NotFound,
    /// `SchedulerError::Persistence`.
    Persistence,
    /// `SchedulerError::Transport`.
    Transport,
    /// `SchedulerError::PoolShutdown`.
    PoolShutdown,
    /// `SchedulerError::InvalidConfig`.
    InvalidConfig,
    /// `SchedulerError::Internal`.
    Internal,
    /// `StoreError::Connection`.
    StoreConnection,
    /// `StoreError::Timeout`.
    StoreTimeout,
    /// `StoreError::Constraint`.
    StoreConstraint,
    /// `StoreError::Query`.
    StoreQuery,
    /// `TransportError::NotConnected`.
    TransportNotConnected,
    /// `TransportError::Naming`.
    TransportNaming,
    /// `TransportError::Disconnected`.
    TransportDisconnected,
    /// `TransportError::Encoding`.
    TransportEncoding,
    /// A `std::io::Error` of the given kind.
    Io(io::ErrorKind),
    /// Any error type this crate does not know.
    Other,
}

/// Tag a single error by its concrete type and variant.
pub fn classify(err: &(dyn Error + 'static)) -> ErrorKind {
    if let Some(e) = err.downcast_ref::<SchedulerError>() {
        return match e {
            SchedulerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SchedulerError::QueueFull(_) => ErrorKind::QueueFull,
            SchedulerError::NotFound(_) => ErrorKind::NotFound,
            SchedulerError::Persistence { .. } => ErrorKind::Persistence,
            SchedulerError::Transport(_) => ErrorKind::Transport,
            SchedulerError::PoolShutdown => ErrorKind::PoolShutdown,
            SchedulerError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            SchedulerError::Internal(_) => ErrorKind::Internal,
        };
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return match e {
            StoreError::Connection(_) => ErrorKind::StoreConnection,
            StoreError::Timeout => ErrorKind::StoreTimeout,
            StoreError::Constraint(_) => ErrorKind::StoreConstraint,
            StoreError::Query(_) => ErrorKind::StoreQuery,
        };
    }
    if let Some(e) = err.downcast_ref::<TransportError>() {
        return match e {
            TransportError::NotConnected => ErrorKind::TransportNotConnected,
            TransportError::Naming(_) => ErrorKind::TransportNaming,
            TransportError::Disconnected(_) => ErrorKind::TransportDisconnected,
            TransportError::Encoding(_) => ErrorKind::TransportEncoding,
        };
    }
    if let Some(e) = err.downcast_ref::<io::Error>() {
        return ErrorKind::Io(e.kind());
    }
    ErrorKind::Other
}

/// Distinct tags along the chain of `err`, outermost first.
pub fn error_kinds<K, F>(err: &(dyn Error + 'static), classify: F) -> Vec<K>
where
    K: PartialEq,
    F: Fn(&(dyn Error + 'static)) -> K,
{
    let mut kinds = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        let kind = classify(e);
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
        current = e.source();
    }
    kinds
}

/// Whether any of `kinds` is in `retryable`. An exhausted chain is not
/// retryable.
pub fn is_retryable<K: Eq + Hash>(kinds: &[K], retryable: &HashSet<K>) -> bool {
    kinds.iter().any(|kind| retryable.contains(kind))
}

/// Decides whether a failed operation may be attempted again.
pub trait RetryPredicate: Send + Sync {
    /// `true` if `err` is transient.
    fn test(&self, err: &(dyn Error + 'static)) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync,
{
    fn test(&self, err: &(dyn Error + 'static)) -> bool {
        self(err)
    }
}

/// Predicate matching the chain's [`ErrorKind`]s against a fixed set.
#[derive(Debug, Clone)]
pub struct KindSetPredicate {
    retryable: HashSet<ErrorKind>,
}

impl KindSetPredicate {
    /// Predicate retrying on any of `kinds`.
    pub fn new(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            retryable: kinds.into_iter().collect(),
        }
    }

    /// Connection loss and timeouts in the store, and broker disconnects.
    pub fn transient() -> Self {
        Self::new([
            ErrorKind::StoreConnection,
            ErrorKind::StoreTimeout,
            ErrorKind::TransportDisconnected,
            ErrorKind::Io(io::ErrorKind::ConnectionReset),
            ErrorKind::Io(io::ErrorKind::ConnectionAborted),
            ErrorKind::Io(io::ErrorKind::TimedOut),
        ])
    }
}

impl RetryPredicate for KindSetPredicate {
    fn test(&self, err: &(dyn Error + 'static)) -> bool {
        is_retryable(&error_kinds(err, classify), &self.retryable)
    }
}

/// Bounded exponential backoff for [`retry_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    /// Pause after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for the pause.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy from configuration.
    pub const fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }

    /// Pause before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. The last error is returned.
///
/// # Errors
///
/// The error of the final attempt.
pub fn retry_with<T, E, F>(policy: &RetryPolicy, predicate: &dyn RetryPredicate, mut op: F) -> Result<T, E>
where
    E: Error + 'static,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && predicate.test(&err) => {
                let pause = policy.backoff(attempt);
                warn!(attempt, error = %err, pause_ms = pause.as_millis(), "transient failure, retrying");
                thread::sleep(pause);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
