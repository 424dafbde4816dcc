use std::sync::Arc;

use loreminer_state::Checkpoint;
use loreminer_state::CheckpointError;
use loreminer_state::StateRuntime;
use serde_json::Value;
use tracing::debug;

/// Handle an executor uses to persist and reload progress for its run.
///
/// Saves are scoped to one run but loads may come from an earlier run of the
/// same job: a retry run picks up where the failed run left off.
pub struct CheckpointStore {
    state: Arc<StateRuntime>,
    run_id: String,
    job_id: String,
}

impl CheckpointStore {
    pub fn new(state: Arc<StateRuntime>, run_id: String, job_id: String) -> Self {
        Self {
            state,
            run_id,
            job_id,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn save(&self, cursor: &str, payload: &Value) -> anyhow::Result<()> {
        debug!(run_id = %self.run_id, cursor, "saving checkpoint");
        self.state
            .save_checkpoint(&self.run_id, &self.job_id, cursor, payload)
            .await
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        self.state.load_checkpoint(&self.run_id).await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.state.clear_checkpoint(&self.run_id).await
    }
}
