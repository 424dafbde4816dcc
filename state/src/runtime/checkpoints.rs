use super::*;
use crate::model::CHECKPOINT_SCHEMA_VERSION;
use serde_json::Value;

const CHECKPOINT_COLUMNS: &str = r#"
    run_id,
    job_id,
    schema_version,
    cursor,
    payload_json,
    updated_at
"#;

impl StateRuntime {
    /// Upsert the checkpoint for a run. The INSERT OR REPLACE is a single
    /// statement, so a concurrent reader sees either the old or the new row,
    /// never a torn write.
    pub async fn save_checkpoint(
        &self,
        run_id: &str,
        job_id: &str,
        cursor: &str,
        payload: &Value,
    ) -> anyhow::Result<()> {
        let payload_json = serde_json::to_string(payload)?;
        let now = Utc::now().timestamp();
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO checkpoints ({CHECKPOINT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(run_id)
        .bind(job_id)
        .bind(CHECKPOINT_SCHEMA_VERSION)
        .bind(cursor)
        .bind(payload_json)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn load_checkpoint(
        &self,
        run_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE run_id = ?"
        ))
        .bind(run_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Checkpoint::try_from).transpose()
    }

    /// Most recent checkpoint across all runs of a job. A retry run created
    /// after a failure resumes from the failed run's checkpoint through this.
    pub async fn latest_checkpoint_for_job(
        &self,
        job_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE job_id = ? ORDER BY updated_at DESC, run_id DESC LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Checkpoint::try_from).transpose()
    }

    pub async fn clear_checkpoint(&self, run_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE run_id = ?")
            .bind(run_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// Drop every checkpoint in the job's run family; called on terminal
    /// success so a later rerun starts clean.
    pub async fn clear_checkpoints_for_job(&self, job_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE job_id = ?")
            .bind(job_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}
