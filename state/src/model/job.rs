use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::epoch_seconds_to_datetime;

/// Kinds of work the orchestrator knows how to dispatch. Executors are
/// registered per type at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Transcribe,
    Mine,
    Evaluate,
    Pipeline,
}

impl JobType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobType::Transcribe => "transcribe",
            JobType::Mine => "mine",
            JobType::Evaluate => "evaluate",
            JobType::Pipeline => "pipeline",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "transcribe" => Ok(Self::Transcribe),
            "mine" => Ok(Self::Mine),
            "evaluate" => Ok(Self::Evaluate),
            "pipeline" => Ok(Self::Pipeline),
            _ => Err(anyhow::anyhow!("invalid job type: {value}")),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested unit of work. Immutable after creation; execution attempts are
/// tracked as separate [`super::JobRun`] rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub input_reference: String,
    pub config: Value,
    pub auto_chain_next: Option<JobType>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobCreateParams {
    pub id: String,
    pub job_type: JobType,
    pub input_reference: String,
    pub config: Value,
    pub auto_chain_next: Option<JobType>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub(crate) id: String,
    pub(crate) job_type: String,
    pub(crate) input_reference: String,
    pub(crate) config_json: String,
    pub(crate) auto_chain_next: Option<String>,
    pub(crate) created_at: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(value: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            job_type: JobType::parse(value.job_type.as_str())?,
            input_reference: value.input_reference,
            config: serde_json::from_str(value.config_json.as_str())?,
            auto_chain_next: value
                .auto_chain_next
                .as_deref()
                .map(JobType::parse)
                .transpose()?,
            created_at: epoch_seconds_to_datetime(value.created_at)?,
        })
    }
}
