//! SQLite-backed state for the job orchestration engine.
//!
//! This crate owns the durable records the engine needs: jobs, job runs, the
//! LLM request/response audit ledger, and resume checkpoints. Scheduling and
//! provider execution live in `loreminer-core`.

mod model;
mod runtime;

pub use model::CHECKPOINT_SCHEMA_VERSION;
pub use model::CallStatus;
pub use model::Checkpoint;
pub use model::CheckpointError;
pub use model::Job;
pub use model::JobCreateParams;
pub use model::JobRun;
pub use model::JobType;
pub use model::LlmRequestRecord;
pub use model::LlmResponseRecord;
pub use model::RequestCreateParams;
pub use model::ResponseCreateParams;
pub use model::RunStatus;
pub use model::TokenCounts;
pub use runtime::JobSnapshot;
pub use runtime::STATE_DB_FILENAME;
pub use runtime::StateRuntime;
pub use runtime::state_db_path;
