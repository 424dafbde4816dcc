use super::*;

const RUN_COLUMNS: &str = r#"
    id,
    job_id,
    status,
    started_at,
    ended_at,
    error_message,
    created_at,
    updated_at
"#;

impl StateRuntime {
    /// Create a fresh pending run for `job_id`. Returns `None` when another
    /// run for the same job is currently running; the insert and the guard
    /// are a single statement so concurrent callers cannot both win.
    pub async fn create_run(&self, job_id: &str) -> anyhow::Result<Option<JobRun>> {
        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
INSERT INTO job_runs (id, job_id, status, started_at, ended_at, error_message, created_at, updated_at)
SELECT ?1, ?2, ?3, NULL, NULL, NULL, ?4, ?4
WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?2)
  AND NOT EXISTS (
    SELECT 1 FROM job_runs WHERE job_id = ?2 AND status = ?5
  )
            "#,
        )
        .bind(run_id.as_str())
        .bind(job_id)
        .bind(RunStatus::Pending.as_str())
        .bind(now)
        .bind(RunStatus::Running.as_str())
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_run(run_id.as_str()).await
    }

    pub async fn get_run(&self, run_id: &str) -> anyhow::Result<Option<JobRun>> {
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?"
        ))
        .bind(run_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(JobRun::try_from).transpose()
    }

    pub async fn latest_run_for_job(&self, job_id: &str) -> anyhow::Result<Option<JobRun>> {
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ? ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(JobRun::try_from).transpose()
    }

    /// The run to pick up instead of creating a new one: the most recent
    /// paused or pending run, if any. Pending runs are reused so that a
    /// caller who lost the creation race does not leave an orphan row.
    pub async fn find_resumable_run(&self, job_id: &str) -> anyhow::Result<Option<JobRun>> {
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ? AND status IN (?, ?) ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(job_id)
        .bind(RunStatus::Paused.as_str())
        .bind(RunStatus::Pending.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(JobRun::try_from).transpose()
    }

    pub async fn list_runs_for_job(&self, job_id: &str) -> anyhow::Result<Vec<JobRun>> {
        let rows = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(job_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(JobRun::try_from).collect()
    }

    /// Transition a pending or paused run to running. Guarded so that a job
    /// never has two running runs, even with racing callers.
    pub async fn mark_run_running(&self, run_id: &str) -> anyhow::Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
UPDATE job_runs
SET
    status = ?1,
    started_at = COALESCE(started_at, ?2),
    ended_at = NULL,
    error_message = NULL,
    updated_at = ?2
WHERE id = ?3
  AND status IN (?4, ?5)
  AND NOT EXISTS (
    SELECT 1 FROM job_runs other
    WHERE other.job_id = job_runs.job_id AND other.status = ?1 AND other.id != ?3
  )
            "#,
        )
        .bind(RunStatus::Running.as_str())
        .bind(now)
        .bind(run_id)
        .bind(RunStatus::Pending.as_str())
        .bind(RunStatus::Paused.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_run_succeeded(&self, run_id: &str) -> anyhow::Result<bool> {
        self.finish_run(run_id, RunStatus::Succeeded, None).await
    }

    pub async fn mark_run_failed(&self, run_id: &str, error_message: &str) -> anyhow::Result<bool> {
        self.finish_run(run_id, RunStatus::Failed, Some(error_message))
            .await
    }

    /// Park a running run so a later `process_job` can pick it back up. The
    /// checkpoint, if any, stays in place.
    pub async fn mark_run_paused(&self, run_id: &str) -> anyhow::Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
UPDATE job_runs
SET status = ?, updated_at = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(RunStatus::Paused.as_str())
        .bind(now)
        .bind(run_id)
        .bind(RunStatus::Running.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
UPDATE job_runs
SET status = ?, ended_at = ?, updated_at = ?, error_message = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .bind(error_message)
        .bind(run_id)
        .bind(RunStatus::Running.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
