use std::sync::Arc;

use loreminer_state::Job;
use loreminer_state::JobCreateParams;
use loreminer_state::JobRun;
use loreminer_state::JobSnapshot;
use loreminer_state::JobType;
use loreminer_state::RunStatus;
use loreminer_state::StateRuntime;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::adapter::LlmExecutionAdapter;
use crate::checkpoint::CheckpointStore;
use crate::error::ExecutorError;
use crate::error::OrchestratorError;
use crate::executor::ExecutorContext;
use crate::executor::ExecutorRegistry;

/// Outcome of one `process_job` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub error_message: Option<String>,
    /// Id of the follow-up job created by auto-chaining, when the run
    /// succeeded and the job asked for one.
    pub chained_job_id: Option<String>,
}

/// Owns the job lifecycle: creating jobs, driving runs through their state
/// machine, dispatching to the registered executor per job type, and
/// translating executor outcomes into terminal run states.
pub struct JobOrchestrator {
    state: Arc<StateRuntime>,
    adapter: Arc<LlmExecutionAdapter>,
    registry: ExecutorRegistry,
}

impl JobOrchestrator {
    pub fn new(
        state: Arc<StateRuntime>,
        adapter: Arc<LlmExecutionAdapter>,
        registry: ExecutorRegistry,
    ) -> Self {
        Self {
            state,
            adapter,
            registry,
        }
    }

    /// Validate and persist a new job. The config is immutable afterwards.
    pub async fn create_job(
        &self,
        job_type: JobType,
        input_reference: &str,
        config: Value,
        auto_chain_next: Option<JobType>,
    ) -> Result<Job, OrchestratorError> {
        self.validate_config(job_type, &config)?;
        if auto_chain_next == Some(job_type) {
            return Err(OrchestratorError::Validation(format!(
                "auto_chain_next would chain {job_type} into itself"
            )));
        }
        let job = self
            .state
            .create_job(&JobCreateParams {
                id: Uuid::new_v4().to_string(),
                job_type,
                input_reference: input_reference.to_string(),
                config,
                auto_chain_next,
            })
            .await?;
        info!(job_id = %job.id, job_type = %job_type, "job created");
        Ok(job)
    }

    /// Run a job to a terminal (or paused) state. Long-running; the token is
    /// the unit of cancellation for everything underneath.
    pub async fn process_job(
        &self,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<JobResult, OrchestratorError> {
        let job = self
            .state
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        let executor = self
            .registry
            .get(job.job_type)
            .ok_or(OrchestratorError::ExecutorMissing(job.job_type))?
            .clone();

        let run = self.create_or_resume_run(&job).await?;
        let resume = match self.state.latest_checkpoint_for_job(&job.id).await {
            Ok(found) => found,
            Err(err) => {
                // A corrupt checkpoint fails the run rather than silently
                // restarting work from scratch.
                error!(job_id = %job.id, run_id = %run.id, %err, "checkpoint unusable");
                self.state.mark_run_running(&run.id).await?;
                self.state
                    .mark_run_failed(&run.id, &err.to_string())
                    .await?;
                return Err(err.into());
            }
        };

        if !self.state.mark_run_running(&run.id).await? {
            return Err(OrchestratorError::AlreadyRunning(job.id.clone()));
        }
        info!(
            job_id = %job.id,
            run_id = %run.id,
            job_type = %job.job_type,
            resuming = resume.is_some(),
            "run started"
        );

        let ctx = ExecutorContext {
            job: job.clone(),
            run_id: run.id.clone(),
            adapter: self.adapter.clone(),
            checkpoints: CheckpointStore::new(self.state.clone(), run.id.clone(), job.id.clone()),
            resume,
            cancel,
        };
        let outcome = executor.execute(&ctx).await;
        self.settle_run(&job, &run.id, outcome).await
    }

    /// Read-only view of a job and its latest run.
    pub async fn get_job_status(
        &self,
        job_id: &str,
    ) -> Result<JobSnapshot, OrchestratorError> {
        self.state
            .job_snapshot(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Reuse a paused or pending run when one exists, otherwise create a
    /// fresh one. Creation is refused while another run is already active.
    async fn create_or_resume_run(&self, job: &Job) -> Result<JobRun, OrchestratorError> {
        if let Some(resumable) = self.state.find_resumable_run(&job.id).await? {
            return Ok(resumable);
        }
        self.state
            .create_run(&job.id)
            .await?
            .ok_or_else(|| OrchestratorError::AlreadyRunning(job.id.clone()))
    }

    async fn settle_run(
        &self,
        job: &Job,
        run_id: &str,
        outcome: Result<(), ExecutorError>,
    ) -> Result<JobResult, OrchestratorError> {
        match outcome {
            Ok(()) => {
                self.state.mark_run_succeeded(run_id).await?;
                self.state.clear_checkpoints_for_job(&job.id).await?;
                let chained_job_id = self.chain_next(job).await?;
                info!(job_id = %job.id, run_id, "run succeeded");
                Ok(JobResult {
                    job_id: job.id.clone(),
                    run_id: run_id.to_string(),
                    status: RunStatus::Succeeded,
                    error_message: None,
                    chained_job_id,
                })
            }
            Err(ExecutorError::Cancelled) => {
                self.state.mark_run_paused(run_id).await?;
                info!(job_id = %job.id, run_id, "run paused");
                Ok(JobResult {
                    job_id: job.id.clone(),
                    run_id: run_id.to_string(),
                    status: RunStatus::Paused,
                    error_message: None,
                    chained_job_id: None,
                })
            }
            Err(err) => {
                let message = err.to_string();
                self.state.mark_run_failed(run_id, &message).await?;
                warn!(job_id = %job.id, run_id, error = %message, "run failed");
                Ok(JobResult {
                    job_id: job.id.clone(),
                    run_id: run_id.to_string(),
                    status: RunStatus::Failed,
                    error_message: Some(message),
                    chained_job_id: None,
                })
            }
        }
    }

    async fn chain_next(&self, job: &Job) -> Result<Option<String>, OrchestratorError> {
        let Some(next_type) = job.auto_chain_next else {
            return Ok(None);
        };
        let next = self
            .state
            .create_job(&JobCreateParams {
                id: Uuid::new_v4().to_string(),
                job_type: next_type,
                input_reference: job.input_reference.clone(),
                config: job.config.clone(),
                auto_chain_next: None,
            })
            .await?;
        info!(job_id = %job.id, next_job_id = %next.id, next_type = %next_type, "chained follow-up job");
        Ok(Some(next.id))
    }

    /// Shape checks happen at creation so a bad config never reaches a run.
    /// The registered executor supplies the per-type schema; unregistered
    /// types only get the structural check, since their executor may be
    /// registered by the process that eventually runs them.
    fn validate_config(&self, job_type: JobType, config: &Value) -> Result<(), OrchestratorError> {
        if !config.is_object() {
            return Err(OrchestratorError::Validation(format!(
                "config for {job_type} job must be a JSON object"
            )));
        }
        if let Some(executor) = self.registry.get(job_type) {
            executor.validate_config(config).map_err(|reason| {
                OrchestratorError::Validation(format!("config for {job_type} job: {reason}"))
            })?;
        }
        Ok(())
    }
}
