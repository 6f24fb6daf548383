//! Error types, one enum per layer.

use super::ids::TaskId;
use super::state::TaskStatus;

/// Failures of the persistence layer. Fatal to a worker run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {id} is {from}, expected {expected}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        expected: TaskStatus,
    },

    #[error("storage backend: {0}")]
    Backend(String),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// What a stage reports when a task could not be handled.
///
/// `Transient` goes through the retry budget and counts toward the circuit
/// breaker. `Permanent` fails the task at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    pub fn permanent(message: impl std::fmt::Display) -> Self {
        Self::Permanent(message.to_string())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Failures reported by external collaborators (feed, scraper, search).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Bot detection or an access wall on the remote side.
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Response could not be understood, or the request was rejected as malformed.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl From<ProviderError> for HandlerError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(_) | ProviderError::Invalid(_) => {
                HandlerError::Permanent(err.to_string())
            }
            ProviderError::Blocked(_)
            | ProviderError::RateLimited(_)
            | ProviderError::Unavailable(_) => HandlerError::Transient(err.to_string()),
        }
    }
}

/// Errors that abort a worker run.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stage setup failed: {0}")]
    Setup(HandlerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(ProviderError::NotFound("x".into()), true)]
    #[case::invalid(ProviderError::Invalid("x".into()), true)]
    #[case::blocked(ProviderError::Blocked("x".into()), false)]
    #[case::rate_limited(ProviderError::RateLimited("x".into()), false)]
    #[case::unavailable(ProviderError::Unavailable("x".into()), false)]
    fn provider_errors_classify(#[case] err: ProviderError, #[case] permanent: bool) {
        assert_eq!(HandlerError::from(err).is_permanent(), permanent);
    }

    #[test]
    fn store_errors_are_retryable_for_handlers() {
        let err: HandlerError = StoreError::Backend("disk full".into()).into();
        assert_eq!(err, HandlerError::Transient("storage backend: disk full".into()));
    }
}
