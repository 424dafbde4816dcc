use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;

/// Whether a provider burns local hardware or a remote quota. Local calls are
/// bounded by the machine; remote calls by the provider's own rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    Local,
    Remote,
}

/// Per-provider execution knobs. Defaults differ by class: remote providers
/// amortize latency with larger batches and more retries, local providers
/// dispatch one item at a time and lean on hardware parallelism.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub class: ProviderClass,
    pub requests_per_minute: u32,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, class: ProviderClass) -> Self {
        match class {
            ProviderClass::Remote => Self {
                name: name.into(),
                class,
                requests_per_minute: 60,
                batch_size: 8,
                max_attempts: 4,
                request_timeout: Duration::from_secs(120),
            },
            ProviderClass::Local => Self {
                name: name.into(),
                class,
                requests_per_minute: 600,
                batch_size: 1,
                max_attempts: 2,
                request_timeout: Duration::from_secs(600),
            },
        }
    }
}

/// Minimal wire boundary for an LLM backend: send one payload, get one
/// structured response back, or a classified failure. Everything above this
/// trait (concurrency, rate limits, retries, tracking) is provider-agnostic.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(
        &self,
        model: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError>;
}
