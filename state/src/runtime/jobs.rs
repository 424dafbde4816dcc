use super::*;

/// Read-only status view: the job, its most recent run, and how many provider
/// calls the current run family has issued.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job: Job,
    pub latest_run: Option<JobRun>,
    pub request_count: i64,
}

impl StateRuntime {
    pub async fn create_job(&self, params: &JobCreateParams) -> anyhow::Result<Job> {
        let now = Utc::now().timestamp();
        let config_json = serde_json::to_string(&params.config)?;
        sqlx::query(
            r#"
INSERT INTO jobs (id, job_type, input_reference, config_json, auto_chain_next, created_at)
VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(params.id.as_str())
        .bind(params.job_type.as_str())
        .bind(params.input_reference.as_str())
        .bind(config_json)
        .bind(params.auto_chain_next.map(JobType::as_str))
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        let job_id = params.id.as_str();
        self.get_job(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("failed to load created job {job_id}"))
    }

    pub async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
SELECT id, job_type, input_reference, config_json, auto_chain_next, created_at
FROM jobs
WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Job::try_from).transpose()
    }

    pub async fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
SELECT id, job_type, input_reference, config_json, auto_chain_next, created_at
FROM jobs
ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Remove a job and, via foreign keys, its runs, call ledger rows, and
    /// checkpoints.
    pub async fn delete_job(&self, job_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn job_snapshot(&self, job_id: &str) -> anyhow::Result<Option<JobSnapshot>> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(None);
        };
        let latest_run = self.latest_run_for_job(job_id).await?;
        let request_count = self.count_requests_for_job(job_id).await?;
        Ok(Some(JobSnapshot {
            job,
            latest_run,
            request_count,
        }))
    }
}
