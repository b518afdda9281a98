//! Error types for dispatch operations.

use thiserror::Error;

/// Errors produced by dispatch components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A constructor or operation received an out-of-range argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Queue is full for the target pool.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The addressed record does not exist or is not in a removable state.
    #[error("not found: {0}")]
    NotFound(String),
    /// The persistence layer failed underneath an operation.
    #[error("persistence error: {message}")]
    Persistence {
        /// What was being attempted.
        message: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// The notification transport failed.
    #[error("transport error")]
    Transport(#[from] TransportError),
    /// The worker pool has been shut down.
    #[error("pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (worker thread could not start, channel closed).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Shorthand for [`SchedulerError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wrap a store failure with context.
    pub fn persistence(msg: impl Into<String>, source: StoreError) -> Self {
        Self::Persistence {
            message: msg.into(),
            source,
        }
    }
}

/// Failures reported by action store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The connection to the store was lost or could not be opened.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The statement did not complete in time.
    #[error("store operation timed out")]
    Timeout,
    /// A constraint rejected the statement.
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// The statement itself was invalid.
    #[error("query failed: {0}")]
    Query(String),
}

/// Failures reported by notification transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No connection has been created, or it has been closed.
    #[error("connection not initialized")]
    NotConnected,
    /// Connection properties were incomplete or invalid.
    #[error("invalid connection properties: {0}")]
    Naming(String),
    /// The peer went away.
    #[error("broker disconnected: {0}")]
    Disconnected(String),
    /// A message could not be encoded.
    #[error("message encoding failed: {0}")]
    Encoding(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display() {
        assert_eq!(
            SchedulerError::invalid("priority must be >= 0").to_string(),
            "invalid argument: priority must be >= 0"
        );
        assert_eq!(SchedulerError::PoolShutdown.to_string(), "pool has been shut down");
        assert_eq!(
            SchedulerError::NotFound("action-1".into()).to_string(),
            "not found: action-1"
        );
    }

    #[test]
    fn test_sources_are_chained() {
        let err = SchedulerError::persistence("delete action", StoreError::Timeout);
        assert_eq!(err.to_string(), "persistence error: delete action");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "store operation timed out");

        let err: SchedulerError = TransportError::NotConnected.into();
        assert!(err.source().is_some());
    }

    #[test]
    fn test_into_anyhow() {
        fn fails() -> AppResult<()> {
            Err(SchedulerError::persistence("load", StoreError::Query("syntax".into())).into())
        }
        let err = fails().unwrap_err();
        assert!(err.downcast_ref::<SchedulerError>().is_some());
    }
}
