use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

use super::epoch_seconds_to_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ok,
    Error,
}

impl CallStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CallStatus::Ok => "ok",
            CallStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            _ => Err(anyhow::anyhow!("invalid call status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt: Option<i64>,
    pub completion: Option<i64>,
}

/// Audit record for one dispatched provider call attempt. Retries create a
/// fresh request row per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequestRecord {
    pub id: String,
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_digest: String,
    pub attempt: i64,
    pub issued_at: DateTime<Utc>,
}

/// Terminal outcome for a request row. Every dispatched request gets exactly
/// one of these, including cancellations.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponseRecord {
    pub id: String,
    pub request_id: String,
    pub status: CallStatus,
    pub error_kind: Option<String>,
    pub body: Option<String>,
    pub token_counts: TokenCounts,
    pub latency_ms: i64,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RequestCreateParams {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_digest: String,
    pub attempt: i64,
}

#[derive(Debug, Clone)]
pub struct ResponseCreateParams {
    pub request_id: String,
    pub status: CallStatus,
    pub error_kind: Option<String>,
    pub body: Option<String>,
    pub token_counts: TokenCounts,
    pub latency_ms: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LlmRequestRow {
    pub(crate) id: String,
    pub(crate) run_id: String,
    pub(crate) provider: String,
    pub(crate) model: String,
    pub(crate) prompt_digest: String,
    pub(crate) attempt: i64,
    pub(crate) issued_at: i64,
}

impl TryFrom<LlmRequestRow> for LlmRequestRecord {
    type Error = anyhow::Error;

    fn try_from(value: LlmRequestRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            run_id: value.run_id,
            provider: value.provider,
            model: value.model,
            prompt_digest: value.prompt_digest,
            attempt: value.attempt,
            issued_at: epoch_seconds_to_datetime(value.issued_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LlmResponseRow {
    pub(crate) id: String,
    pub(crate) request_id: String,
    pub(crate) status: String,
    pub(crate) error_kind: Option<String>,
    pub(crate) body: Option<String>,
    pub(crate) prompt_tokens: Option<i64>,
    pub(crate) completion_tokens: Option<i64>,
    pub(crate) latency_ms: i64,
    pub(crate) received_at: i64,
}

impl TryFrom<LlmResponseRow> for LlmResponseRecord {
    type Error = anyhow::Error;

    fn try_from(value: LlmResponseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            request_id: value.request_id,
            status: CallStatus::parse(value.status.as_str())?,
            error_kind: value.error_kind,
            body: value.body,
            token_counts: TokenCounts {
                prompt: value.prompt_tokens,
                completion: value.completion_tokens,
            },
            latency_ms: value.latency_ms,
            received_at: epoch_seconds_to_datetime(value.received_at)?,
        })
    }
}
