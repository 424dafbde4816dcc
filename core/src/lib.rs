//! Orchestration engine for model-driven mining jobs.
//!
//! The pieces layer as: [`JobOrchestrator`] owns job/run lifecycle and
//! dispatches to per-type [`JobExecutor`]s; executors issue every model call
//! through the shared [`LlmExecutionAdapter`], which applies the
//! [`ConcurrencyGovernor`], per-provider [`RateLimiter`], retry with backoff,
//! request bundling, and the durable call ledger in `loreminer-state`.

mod adapter;
mod backoff;
mod batch;
mod checkpoint;
mod config;
mod context;
mod error;
mod executor;
mod executors;
mod limits;
mod orchestrator;
mod provider;
mod transport;

pub use adapter::LlmExecutionAdapter;
pub use checkpoint::CheckpointStore;
pub use config::Config;
pub use config::GovernorOverrides;
pub use config::ProviderDecl;
pub use context::ExecutionContext;
pub use error::CANCELLED_ERROR_KIND;
pub use error::CallError;
pub use error::CallResult;
pub use error::ExecutorError;
pub use error::OrchestratorError;
pub use error::ProviderError;
pub use executor::ExecutorContext;
pub use executor::ExecutorRegistry;
pub use executor::JobExecutor;
pub use executors::BatchedCallExecutor;
pub use limits::AcquireCancelled;
pub use limits::ConcurrencyGovernor;
pub use limits::GovernorConfig;
pub use limits::GovernorPermit;
pub use limits::HardwareTier;
pub use limits::PoolClass;
pub use limits::RateLimiter;
pub use limits::spawn_memory_watcher;
pub use orchestrator::JobOrchestrator;
pub use orchestrator::JobResult;
pub use provider::ProviderClass;
pub use provider::ProviderConfig;
pub use provider::ProviderTransport;
pub use transport::HttpProviderTransport;
