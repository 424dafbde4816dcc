use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tracing::info;

use crate::error::CallError;
use crate::error::ExecutorError;
use crate::executor::ExecutorContext;
use crate::executor::JobExecutor;

/// Job config understood by [`BatchedCallExecutor`]. Every built-in job type
/// is a variation of "run each input item through a model", so they share
/// this shape.
#[derive(Debug, Deserialize)]
struct BatchedCallSpec {
    provider: String,
    model: String,
    items: Vec<Value>,
    /// Tolerate individual item failures instead of failing the run.
    #[serde(default)]
    best_effort: bool,
    /// Where to write the collected outputs as a JSON array, if anywhere.
    /// The ledger keeps the raw responses either way.
    #[serde(default)]
    output_path: Option<PathBuf>,
}

/// Generic executor for jobs whose work is a list of items fed through one
/// model. Progress is checkpointed after every completed batch; the cursor
/// is the count of finished items, so a resumed run continues from item
/// `cursor` with already-answered items served from the ledger.
pub struct BatchedCallExecutor;

#[async_trait]
impl JobExecutor for BatchedCallExecutor {
    async fn execute(&self, ctx: &ExecutorContext) -> Result<(), ExecutorError> {
        let spec: BatchedCallSpec = serde_json::from_value(ctx.job.config.clone())
            .map_err(|err| ExecutorError::fatal(format!("invalid job config: {err}")))?;
        let chunk_size = ctx
            .adapter
            .batch_size(&spec.provider)
            .ok_or_else(|| ExecutorError::fatal(format!("unknown provider {}", spec.provider)))?;

        let mut outputs = resume_outputs(ctx, spec.items.len())?;
        if !outputs.is_empty() {
            info!(
                job_id = %ctx.job.id,
                completed = outputs.len(),
                total = spec.items.len(),
                "resuming from checkpoint"
            );
        }

        while outputs.len() < spec.items.len() {
            if ctx.cancel.is_cancelled() {
                save_progress(ctx, &outputs).await?;
                return Err(ExecutorError::Cancelled);
            }
            let end = (outputs.len() + chunk_size).min(spec.items.len());
            let chunk = &spec.items[outputs.len()..end];
            let results = ctx
                .adapter
                .call_batch(&spec.provider, &spec.model, chunk, &ctx.run_id, &ctx.cancel)
                .await;
            for result in results {
                match result {
                    Ok(value) => outputs.push(value),
                    Err(CallError::Cancelled) => {
                        save_progress(ctx, &outputs).await?;
                        return Err(ExecutorError::Cancelled);
                    }
                    Err(err) if spec.best_effort => {
                        outputs.push(json!({ "error": err.to_string() }));
                    }
                    Err(err) => {
                        save_progress(ctx, &outputs).await?;
                        return Err(err.into());
                    }
                }
            }
            save_progress(ctx, &outputs).await?;
        }

        if let Some(path) = &spec.output_path {
            let rendered = serde_json::to_vec_pretty(&outputs)
                .map_err(|err| ExecutorError::fatal(format!("serializing outputs: {err}")))?;
            tokio::fs::write(path, rendered)
                .await
                .map_err(|err| ExecutorError::retryable(format!("writing {}: {err}", path.display())))?;
        }
        Ok(())
    }

    fn validate_config(&self, config: &Value) -> Result<(), String> {
        let spec: BatchedCallSpec =
            serde_json::from_value(config.clone()).map_err(|err| err.to_string())?;
        if spec.items.is_empty() {
            return Err("items must not be empty".to_string());
        }
        Ok(())
    }
}

fn resume_outputs(ctx: &ExecutorContext, total: usize) -> Result<Vec<Value>, ExecutorError> {
    let Some(checkpoint) = &ctx.resume else {
        return Ok(Vec::new());
    };
    let cursor: usize = checkpoint
        .cursor
        .parse()
        .map_err(|_| ExecutorError::fatal(format!("bad checkpoint cursor {:?}", checkpoint.cursor)))?;
    let outputs: Vec<Value> = checkpoint
        .payload
        .get("outputs")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ExecutorError::fatal("checkpoint payload missing outputs".to_string()))?;
    if outputs.len() != cursor || cursor > total {
        return Err(ExecutorError::fatal(format!(
            "checkpoint cursor {cursor} does not match recorded outputs ({} of {total})",
            outputs.len()
        )));
    }
    Ok(outputs)
}

async fn save_progress(ctx: &ExecutorContext, outputs: &[Value]) -> Result<(), ExecutorError> {
    ctx.checkpoints
        .save(&outputs.len().to_string(), &json!({ "outputs": outputs }))
        .await
        .map_err(|err| ExecutorError::retryable(format!("saving checkpoint: {err}")))
}
