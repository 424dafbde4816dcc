use std::time::Duration;

use loreminer_state::CheckpointError;
use loreminer_state::JobType;

/// Error raised by a provider transport for a single wire attempt.
///
/// Retryable kinds are absorbed by the execution adapter's retry loop and
/// only surface once the retry attempts are spent; fatal kinds surface
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Timeout(_)
                | ProviderError::Server(_)
                | ProviderError::Network(_)
        )
    }

    /// Stable tag persisted in the call ledger's `error_kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Auth(_) => "auth",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Server(_) => "server_error",
            ProviderError::Network(_) => "network",
        }
    }
}

/// Ledger tag for calls abandoned by cancellation.
pub const CANCELLED_ERROR_KIND: &str = "cancelled";

/// Terminal outcome of one adapter call, after retries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("provider {provider} is not configured")]
    UnknownProvider { provider: String },
    #[error("call failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
    #[error("call rejected: {source}")]
    Fatal {
        #[source]
        source: ProviderError,
    },
    #[error("call cancelled")]
    Cancelled,
    #[error("tracking store error: {0}")]
    Tracking(String),
}

pub type CallResult = Result<serde_json::Value, CallError>;

/// Failure reported by a job executor. The orchestrator only looks at the
/// variant, never the message: `Retryable` and `Fatal` both fail the run
/// (`Retryable` means a fresh run may be worth creating), `Cancelled` parks it.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Fatal(String),
    #[error("{0}")]
    Retryable(String),
    #[error("cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }
}

impl From<CallError> for ExecutorError {
    fn from(value: CallError) -> Self {
        match value {
            CallError::Cancelled => ExecutorError::Cancelled,
            CallError::Fatal { .. } | CallError::UnknownProvider { .. } => {
                ExecutorError::Fatal(value.to_string())
            }
            CallError::Exhausted { .. } | CallError::Tracking(_) => {
                ExecutorError::Retryable(value.to_string())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("job {0} already has a running run")]
    AlreadyRunning(String),
    #[error("no executor registered for job type {0}")]
    ExecutorMissing(JobType),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
