mod checkpoint;
mod job;
mod llm_call;
mod run;

pub use checkpoint::CHECKPOINT_SCHEMA_VERSION;
pub use checkpoint::Checkpoint;
pub use checkpoint::CheckpointError;
pub(crate) use checkpoint::CheckpointRow;
pub use job::Job;
pub use job::JobCreateParams;
pub(crate) use job::JobRow;
pub use job::JobType;
pub use llm_call::CallStatus;
pub use llm_call::LlmRequestRecord;
pub(crate) use llm_call::LlmRequestRow;
pub use llm_call::LlmResponseRecord;
pub(crate) use llm_call::LlmResponseRow;
pub use llm_call::RequestCreateParams;
pub use llm_call::ResponseCreateParams;
pub use llm_call::TokenCounts;
pub use run::JobRun;
pub(crate) use run::JobRunRow;
pub use run::RunStatus;

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

pub(crate) fn epoch_seconds_to_datetime(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid unix timestamp: {secs}"))
}
