use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

use super::epoch_seconds_to_datetime;

/// Bump when the checkpoint payload layout changes. Loads that see a
/// different version fail closed instead of resuming with stale state.
pub const CHECKPOINT_SCHEMA_VERSION: i64 = 1;

/// Durable partial-progress marker for one job run. The cursor and payload
/// are opaque to the engine; executors own their format.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub run_id: String,
    pub job_id: String,
    pub cursor: String,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error(
        "checkpoint for run {run_id} has schema version {found}, expected {expected}; refusing to resume"
    )]
    Corrupt {
        run_id: String,
        found: i64,
        expected: i64,
    },
    #[error("checkpoint payload for run {run_id} is not valid JSON: {source}")]
    Malformed {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CheckpointRow {
    pub(crate) run_id: String,
    pub(crate) job_id: String,
    pub(crate) schema_version: i64,
    pub(crate) cursor: String,
    pub(crate) payload_json: String,
    pub(crate) updated_at: i64,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = CheckpointError;

    fn try_from(value: CheckpointRow) -> Result<Self, Self::Error> {
        if value.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return Err(CheckpointError::Corrupt {
                run_id: value.run_id,
                found: value.schema_version,
                expected: CHECKPOINT_SCHEMA_VERSION,
            });
        }
        let payload =
            serde_json::from_str(value.payload_json.as_str()).map_err(|source| {
                CheckpointError::Malformed {
                    run_id: value.run_id.clone(),
                    source,
                }
            })?;
        let updated_at = epoch_seconds_to_datetime(value.updated_at).map_err(|_| {
            CheckpointError::Corrupt {
                run_id: value.run_id.clone(),
                found: value.schema_version,
                expected: CHECKPOINT_SCHEMA_VERSION,
            }
        })?;
        Ok(Self {
            run_id: value.run_id,
            job_id: value.job_id,
            cursor: value.cursor,
            payload,
            updated_at,
        })
    }
}
