use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loreminer_state::Checkpoint;
use loreminer_state::Job;
use loreminer_state::JobType;
use tokio_util::sync::CancellationToken;

use crate::adapter::LlmExecutionAdapter;
use crate::checkpoint::CheckpointStore;
use crate::error::ExecutorError;

/// Everything an executor gets for one run: the job row, the shared call
/// adapter, a checkpoint handle scoped to this run, the checkpoint (if any)
/// the run should resume from, and the cancellation token for the run.
pub struct ExecutorContext {
    pub job: Job,
    pub run_id: String,
    pub adapter: Arc<LlmExecutionAdapter>,
    pub checkpoints: CheckpointStore,
    pub resume: Option<Checkpoint>,
    pub cancel: CancellationToken,
}

/// One registered job type's work loop. Implementations own their domain
/// semantics; the orchestrator owns run lifecycle and persistence.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutorContext) -> Result<(), ExecutorError>;

    /// Checks a job config against this executor's expected shape before the
    /// job row is created. The default accepts anything.
    fn validate_config(&self, _config: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: JobType, executor: Arc<dyn JobExecutor>) {
        self.executors.insert(job_type, executor);
    }

    pub fn get(&self, job_type: JobType) -> Option<&Arc<dyn JobExecutor>> {
        self.executors.get(&job_type)
    }
}
