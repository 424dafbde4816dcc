use super::*;

const REQUEST_COLUMNS: &str = r#"
    id,
    run_id,
    provider,
    model,
    prompt_digest,
    attempt,
    issued_at
"#;

const RESPONSE_COLUMNS: &str = r#"
    id,
    request_id,
    status,
    error_kind,
    body,
    prompt_tokens,
    completion_tokens,
    latency_ms,
    received_at
"#;

impl StateRuntime {
    pub async fn record_request(
        &self,
        params: &RequestCreateParams,
    ) -> anyhow::Result<LlmRequestRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(&format!(
            "INSERT INTO llm_requests ({REQUEST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(id.as_str())
        .bind(params.run_id.as_str())
        .bind(params.provider.as_str())
        .bind(params.model.as_str())
        .bind(params.prompt_digest.as_str())
        .bind(params.attempt)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        let row = sqlx::query_as::<_, LlmRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM llm_requests WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;
        LlmRequestRecord::try_from(row)
    }

    pub async fn record_response(
        &self,
        params: &ResponseCreateParams,
    ) -> anyhow::Result<LlmResponseRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(&format!(
            "INSERT INTO llm_responses ({RESPONSE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(id.as_str())
        .bind(params.request_id.as_str())
        .bind(params.status.as_str())
        .bind(params.error_kind.as_deref())
        .bind(params.body.as_deref())
        .bind(params.token_counts.prompt)
        .bind(params.token_counts.completion)
        .bind(params.latency_ms)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        let row = sqlx::query_as::<_, LlmResponseRow>(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM llm_responses WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;
        LlmResponseRecord::try_from(row)
    }

    pub async fn count_requests_for_run(&self, run_id: &str) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM llm_requests WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_requests_for_job(&self, job_id: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            r#"
SELECT COUNT(*) AS n
FROM llm_requests q
JOIN job_runs r ON r.id = q.run_id
WHERE r.job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Latest successful response body for any request with this digest in
    /// the job's run family. Drives resume idempotency: an already-answered
    /// payload is never re-dispatched.
    pub async fn find_ok_response_body(
        &self,
        job_id: &str,
        prompt_digest: &str,
    ) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            r#"
SELECT p.body
FROM llm_responses p
JOIN llm_requests q ON q.id = p.request_id
JOIN job_runs r ON r.id = q.run_id
WHERE r.job_id = ? AND q.prompt_digest = ? AND p.status = ?
ORDER BY p.received_at DESC, p.id DESC
LIMIT 1
            "#,
        )
        .bind(job_id)
        .bind(prompt_digest)
        .bind(CallStatus::Ok.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let body: Option<String> = row.try_get("body")?;
        Ok(body)
    }

    pub async fn job_id_for_run(&self, run_id: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT job_id FROM job_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let job_id: String = row.try_get("job_id")?;
        Ok(Some(job_id))
    }

    /// Audit trail for one run: every request attempt, paired with its
    /// terminal response when one exists.
    pub async fn list_calls_for_run(
        &self,
        run_id: &str,
    ) -> anyhow::Result<Vec<(LlmRequestRecord, Option<LlmResponseRecord>)>> {
        let requests = sqlx::query_as::<_, LlmRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM llm_requests WHERE run_id = ? ORDER BY issued_at ASC, id ASC"
        ))
        .bind(run_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut out = Vec::with_capacity(requests.len());
        for row in requests {
            let request = LlmRequestRecord::try_from(row)?;
            let response = sqlx::query_as::<_, LlmResponseRow>(&format!(
                "SELECT {RESPONSE_COLUMNS} FROM llm_responses WHERE request_id = ?"
            ))
            .bind(request.id.as_str())
            .fetch_optional(self.pool.as_ref())
            .await?
            .map(LlmResponseRecord::try_from)
            .transpose()?;
            out.push((request, response));
        }
        Ok(out)
    }
}
