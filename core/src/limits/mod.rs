mod governor;
mod rate;

pub use governor::ConcurrencyGovernor;
pub use governor::GovernorConfig;
pub use governor::GovernorPermit;
pub use governor::HardwareTier;
pub use governor::PoolClass;
pub use governor::spawn_memory_watcher;
pub use rate::RateLimiter;

/// Acquisition aborted because the caller's cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("acquisition cancelled")]
pub struct AcquireCancelled;
