use std::sync::Arc;
use std::time::Instant;

use loreminer_state::CallStatus;
use loreminer_state::RequestCreateParams;
use loreminer_state::ResponseCreateParams;
use loreminer_state::StateRuntime;
use loreminer_state::TokenCounts;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::backoff::backoff;
use crate::batch::decode_batch;
use crate::batch::encode_batch;
use crate::context::ExecutionContext;
use crate::context::ProviderEntry;
use crate::error::CANCELLED_ERROR_KIND;
use crate::error::CallError;
use crate::error::CallResult;
use crate::error::ProviderError;
use crate::limits::PoolClass;
use crate::provider::ProviderClass;

/// Single choke point for every model call in the process.
///
/// Each call acquires a concurrency slot for the provider's class, then a
/// rate token per attempt, records a request row, dispatches with a bounded
/// timeout, retries transient failures with jittered backoff, and records
/// exactly one terminal response row. Already-answered payloads (same job,
/// same digest) are served from the ledger without dispatching.
pub struct LlmExecutionAdapter {
    context: Arc<ExecutionContext>,
    state: Arc<StateRuntime>,
}

impl LlmExecutionAdapter {
    pub fn new(context: Arc<ExecutionContext>, state: Arc<StateRuntime>) -> Arc<Self> {
        Arc::new(Self { context, state })
    }

    pub fn state(&self) -> &Arc<StateRuntime> {
        &self.state
    }

    /// Configured batch size for a provider, if it is known.
    pub fn batch_size(&self, provider: &str) -> Option<usize> {
        self.context
            .provider_config(provider)
            .map(|config| config.batch_size.max(1))
    }

    pub async fn call(
        &self,
        provider: &str,
        model: &str,
        payload: &Value,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> CallResult {
        let Some(entry) = self.context.provider(provider) else {
            return Err(CallError::UnknownProvider {
                provider: provider.to_string(),
            });
        };
        let digest = prompt_digest(model, payload);
        let job_id = self
            .state
            .job_id_for_run(run_id)
            .await
            .map_err(tracking)?
            .ok_or_else(|| CallError::Tracking(format!("run {run_id} not found")))?;

        // Resume idempotency: an item the run family already answered is
        // never re-dispatched or re-billed.
        if let Some(body) = self
            .state
            .find_ok_response_body(&job_id, &digest)
            .await
            .map_err(tracking)?
            && let Ok(value) = serde_json::from_str::<Value>(&body)
        {
            debug!(provider, digest = %digest, "reusing recorded response");
            return Ok(value);
        }

        let pool_class = match entry.config.class {
            ProviderClass::Local => PoolClass::Local,
            ProviderClass::Remote => PoolClass::Remote,
        };
        let _permit = self
            .context
            .governor()
            .acquire(pool_class, cancel)
            .await
            .map_err(|_| CallError::Cancelled)?;

        self.dispatch_with_retry(entry, model, payload, run_id, &digest, cancel)
            .await
    }

    /// Bundle payloads into provider-sized chunks, one wire call per chunk,
    /// and demultiplex results back in input order. A chunk whose response
    /// cannot be demultiplexed is retried item by item instead of failing
    /// outright.
    pub async fn call_batch(
        &self,
        provider: &str,
        model: &str,
        payloads: &[Value],
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<CallResult> {
        let chunk_size = match self.batch_size(provider) {
            Some(size) => size,
            None => {
                let err = CallError::UnknownProvider {
                    provider: provider.to_string(),
                };
                return payloads.iter().map(|_| Err(err.clone())).collect();
            }
        };

        let mut results: Vec<CallResult> = Vec::with_capacity(payloads.len());
        for chunk in payloads.chunks(chunk_size) {
            if cancel.is_cancelled() {
                break;
            }
            if chunk.len() == 1 {
                results.push(self.call(provider, model, &chunk[0], run_id, cancel).await);
                continue;
            }
            let combined = encode_batch(chunk);
            match self.call(provider, model, &combined, run_id, cancel).await {
                Ok(response) => match decode_batch(&response, chunk.len()) {
                    Some(items) => results.extend(items.into_iter().map(Ok)),
                    None => {
                        warn!(
                            provider,
                            chunk_len = chunk.len(),
                            "batch response demux failed; falling back to per-item calls"
                        );
                        for payload in chunk {
                            results.push(self.call(provider, model, payload, run_id, cancel).await);
                        }
                    }
                },
                Err(CallError::Cancelled) => break,
                Err(err) => {
                    for _ in chunk {
                        results.push(Err(err.clone()));
                    }
                }
            }
        }
        while results.len() < payloads.len() {
            results.push(Err(CallError::Cancelled));
        }
        results
    }

    async fn dispatch_with_retry(
        &self,
        entry: &ProviderEntry,
        model: &str,
        payload: &Value,
        run_id: &str,
        digest: &str,
        cancel: &CancellationToken,
    ) -> CallResult {
        let config = &entry.config;
        let max_attempts = config.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            entry
                .limiter
                .acquire(cancel)
                .await
                .map_err(|_| CallError::Cancelled)?;

            let request = self
                .state
                .record_request(&RequestCreateParams {
                    run_id: run_id.to_string(),
                    provider: config.name.clone(),
                    model: model.to_string(),
                    prompt_digest: digest.to_string(),
                    attempt: i64::from(attempt),
                })
                .await
                .map_err(tracking)?;

            let started = Instant::now();
            let outcome = tokio::select! {
                sent = tokio::time::timeout(
                    config.request_timeout,
                    entry.transport.send(model, payload, config.request_timeout),
                ) => match sent {
                    Ok(inner) => inner,
                    Err(_) => Err(ProviderError::Timeout(config.request_timeout)),
                },
                _ = cancel.cancelled() => {
                    self.record_cancelled(&request.id, started).await?;
                    return Err(CallError::Cancelled);
                }
            };
            let latency_ms = started.elapsed().as_millis() as i64;

            match outcome {
                Ok(value) => {
                    self.state
                        .record_response(&ResponseCreateParams {
                            request_id: request.id.clone(),
                            status: CallStatus::Ok,
                            error_kind: None,
                            body: serde_json::to_string(&value).ok(),
                            token_counts: token_counts_from(&value),
                            latency_ms,
                        })
                        .await
                        .map_err(tracking)?;
                    return Ok(value);
                }
                Err(err) => {
                    self.state
                        .record_response(&ResponseCreateParams {
                            request_id: request.id.clone(),
                            status: CallStatus::Error,
                            error_kind: Some(err.kind().to_string()),
                            body: None,
                            token_counts: TokenCounts::default(),
                            latency_ms,
                        })
                        .await
                        .map_err(tracking)?;

                    if !err.is_retryable() {
                        return Err(CallError::Fatal { source: err });
                    }
                    if attempt >= max_attempts {
                        return Err(CallError::Exhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = backoff(u64::from(attempt));
                    warn!(
                        provider = %config.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider error; backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(CallError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn record_cancelled(&self, request_id: &str, started: Instant) -> Result<(), CallError> {
        self.state
            .record_response(&ResponseCreateParams {
                request_id: request_id.to_string(),
                status: CallStatus::Error,
                error_kind: Some(CANCELLED_ERROR_KIND.to_string()),
                body: None,
                token_counts: TokenCounts::default(),
                latency_ms: started.elapsed().as_millis() as i64,
            })
            .await
            .map_err(tracking)?;
        Ok(())
    }
}

fn tracking(err: anyhow::Error) -> CallError {
    CallError::Tracking(err.to_string())
}

/// Stable digest identifying a logical call: model plus canonical payload.
fn prompt_digest(model: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Providers report token usage inline; absent or malformed counts are fine.
fn token_counts_from(value: &Value) -> TokenCounts {
    let usage = value.get("usage");
    TokenCounts {
        prompt: usage
            .and_then(|usage| usage.get("prompt_tokens"))
            .and_then(Value::as_i64),
        completion: usage
            .and_then(|usage| usage.get("completion_tokens"))
            .and_then(Value::as_i64),
    }
}

#[cfg(test)]
mod tests;
