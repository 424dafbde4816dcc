#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use loreminer_state::CallStatus;
use loreminer_state::JobCreateParams;
use loreminer_state::JobType;
use loreminer_state::StateRuntime;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::LlmExecutionAdapter;
use crate::context::ExecutionContext;
use crate::error::CallError;
use crate::error::ProviderError;
use crate::limits::GovernorConfig;
use crate::provider::ProviderClass;
use crate::provider::ProviderConfig;
use crate::provider::ProviderTransport;

const PROVIDER: &str = "mock";
const MODEL: &str = "miner-1";

fn test_governor_config() -> GovernorConfig {
    GovernorConfig {
        local_cap: 2,
        remote_cap: 4,
        memory_high_water_bytes: u64::MAX,
        memory_low_water_bytes: u64::MAX,
        sample_interval: Duration::from_secs(3600),
    }
}

fn provider_config(batch_size: usize, max_attempts: u32) -> ProviderConfig {
    ProviderConfig {
        batch_size,
        max_attempts,
        requests_per_minute: 10_000,
        request_timeout: Duration::from_secs(60),
        ..ProviderConfig::new(PROVIDER, ProviderClass::Remote)
    }
}

async fn setup(
    config: ProviderConfig,
    transport: Arc<dyn ProviderTransport>,
) -> (Arc<LlmExecutionAdapter>, Arc<StateRuntime>, String) {
    let mut context = ExecutionContext::new(test_governor_config());
    context.register_provider(config, transport);
    let state = StateRuntime::init_in_memory().await.unwrap();
    let job = state
        .create_job(&JobCreateParams {
            id: Uuid::new_v4().to_string(),
            job_type: JobType::Mine,
            input_reference: "corpus/alpha".to_string(),
            config: json!({}),
            auto_chain_next: None,
        })
        .await
        .unwrap();
    let run = state.create_run(&job.id).await.unwrap().unwrap();
    let adapter = LlmExecutionAdapter::new(Arc::new(context), state.clone());
    (adapter, state, run.id)
}

/// Fails the first `failures` attempts with a retryable error, then
/// succeeds with the canned reply.
struct FlakyTransport {
    remaining_failures: AtomicU32,
    reply: Value,
}

#[async_trait]
impl ProviderTransport for FlakyTransport {
    async fn send(
        &self,
        _model: &str,
        _payload: &Value,
        _timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::RateLimited("throttled".into()));
        }
        Ok(self.reply.clone())
    }
}

/// Echoes payloads back, demultiplexing bundled requests. Counts wire calls.
struct EchoTransport {
    calls: AtomicUsize,
    answer_batches: bool,
}

#[async_trait]
impl ProviderTransport for EchoTransport {
    async fn send(
        &self,
        _model: &str,
        payload: &Value,
        _timeout: Duration,
    ) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(items) = payload.get("batch").and_then(Value::as_array) {
            if !self.answer_batches {
                return Ok(json!({ "mangled": true }));
            }
            let results: Vec<Value> = items.iter().map(|item| json!({ "echo": item })).collect();
            return Ok(json!({ "results": results }));
        }
        Ok(json!({ "echo": payload }))
    }
}

/// Signals when a send begins, then never completes.
struct HangingTransport {
    started: Arc<Notify>,
}

#[async_trait]
impl ProviderTransport for HangingTransport {
    async fn send(
        &self,
        _model: &str,
        _payload: &Value,
        _timeout: Duration,
    ) -> Result<Value, ProviderError> {
        self.started.notify_one();
        std::future::pending().await
    }
}

#[tokio::test]
async fn transient_errors_retry_until_success() {
    let transport = Arc::new(FlakyTransport {
        remaining_failures: AtomicU32::new(2),
        reply: json!({ "text": "ore" }),
    });
    let (adapter, state, run_id) = setup(provider_config(1, 4), transport).await;
    let cancel = CancellationToken::new();

    let value = adapter
        .call(PROVIDER, MODEL, &json!({ "prompt": "dig" }), &run_id, &cancel)
        .await
        .unwrap();
    assert_eq!(value, json!({ "text": "ore" }));

    let calls = state.list_calls_for_run(&run_id).await.unwrap();
    assert_eq!(calls.len(), 3);
    for (i, (request, response)) in calls.iter().enumerate() {
        assert_eq!(request.attempt, i as i64 + 1);
        let response = response.as_ref().unwrap();
        if i < 2 {
            assert_eq!(response.status, CallStatus::Error);
            assert_eq!(response.error_kind.as_deref(), Some("rate_limited"));
        } else {
            assert_eq!(response.status, CallStatus::Ok);
        }
    }
}

#[tokio::test]
async fn retries_exhaust_at_max_attempts() {
    let transport = Arc::new(FlakyTransport {
        remaining_failures: AtomicU32::new(u32::MAX),
        reply: Value::Null,
    });
    let (adapter, state, run_id) = setup(provider_config(1, 3), transport).await;
    let cancel = CancellationToken::new();

    let err = adapter
        .call(PROVIDER, MODEL, &json!({ "prompt": "dig" }), &run_id, &cancel)
        .await
        .unwrap_err();
    match err {
        CallError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(state.count_requests_for_run(&run_id).await.unwrap(), 3);
}

#[tokio::test]
async fn fatal_errors_do_not_retry() {
    struct AuthFailure;
    #[async_trait]
    impl ProviderTransport for AuthFailure {
        async fn send(
            &self,
            _model: &str,
            _payload: &Value,
            _timeout: Duration,
        ) -> Result<Value, ProviderError> {
            Err(ProviderError::Auth("key rejected".into()))
        }
    }

    let (adapter, state, run_id) = setup(provider_config(1, 5), Arc::new(AuthFailure)).await;
    let cancel = CancellationToken::new();

    let err = adapter
        .call(PROVIDER, MODEL, &json!({ "prompt": "dig" }), &run_id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Fatal { .. }));
    assert_eq!(state.count_requests_for_run(&run_id).await.unwrap(), 1);

    let calls = state.list_calls_for_run(&run_id).await.unwrap();
    assert_eq!(calls[0].1.as_ref().unwrap().error_kind.as_deref(), Some("auth"));
}

#[tokio::test]
async fn recorded_response_is_reused_without_dispatching() {
    let transport = Arc::new(EchoTransport {
        calls: AtomicUsize::new(0),
        answer_batches: true,
    });
    let (adapter, state, run_id) = setup(provider_config(1, 2), transport.clone()).await;
    let cancel = CancellationToken::new();
    let payload = json!({ "prompt": "dig" });

    let first = adapter
        .call(PROVIDER, MODEL, &payload, &run_id, &cancel)
        .await
        .unwrap();
    let second = adapter
        .call(PROVIDER, MODEL, &payload, &run_id, &cancel)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.count_requests_for_run(&run_id).await.unwrap(), 1);
}

#[tokio::test]
async fn batch_chunks_at_batch_size_and_preserves_order() {
    let transport = Arc::new(EchoTransport {
        calls: AtomicUsize::new(0),
        answer_batches: true,
    });
    let (adapter, _state, run_id) = setup(provider_config(3, 2), transport.clone()).await;
    let cancel = CancellationToken::new();

    let payloads: Vec<Value> = (0..4).map(|i| json!({ "item": i })).collect();
    let results = adapter
        .call_batch(PROVIDER, MODEL, &payloads, &run_id, &cancel)
        .await;

    assert_eq!(results.len(), 4);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &json!({ "echo": { "item": i } }));
    }
    // batch_size + 1 inputs split into one full chunk and one single call.
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn batch_demux_failure_falls_back_to_single_calls() {
    let transport = Arc::new(EchoTransport {
        calls: AtomicUsize::new(0),
        answer_batches: false,
    });
    let (adapter, _state, run_id) = setup(provider_config(3, 2), transport.clone()).await;
    let cancel = CancellationToken::new();

    let payloads: Vec<Value> = (0..3).map(|i| json!({ "item": i })).collect();
    let results = adapter
        .call_batch(PROVIDER, MODEL, &payloads, &run_id, &cancel)
        .await;

    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &json!({ "echo": { "item": i } }));
    }
    // One mangled bundled call, then three per-item retries.
    assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn cancellation_records_a_terminal_response() {
    let started = Arc::new(Notify::new());
    let transport = Arc::new(HangingTransport {
        started: started.clone(),
    });
    let (adapter, state, run_id) = setup(provider_config(1, 2), transport).await;
    let cancel = CancellationToken::new();

    let call_cancel = cancel.clone();
    let call_run_id = run_id.clone();
    let call_adapter = adapter.clone();
    let handle = tokio::spawn(async move {
        call_adapter
            .call(
                PROVIDER,
                MODEL,
                &json!({ "prompt": "dig" }),
                &call_run_id,
                &call_cancel,
            )
            .await
    });

    started.notified().await;
    cancel.cancel();
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(CallError::Cancelled)));

    let calls = state.list_calls_for_run(&run_id).await.unwrap();
    assert_eq!(calls.len(), 1);
    let response = calls[0].1.as_ref().unwrap();
    assert_eq!(response.status, CallStatus::Error);
    assert_eq!(response.error_kind.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let transport = Arc::new(EchoTransport {
        calls: AtomicUsize::new(0),
        answer_batches: true,
    });
    let (adapter, _state, run_id) = setup(provider_config(1, 2), transport).await;
    let cancel = CancellationToken::new();

    let err = adapter
        .call("nonexistent", MODEL, &json!({}), &run_id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::UnknownProvider { .. }));
}
