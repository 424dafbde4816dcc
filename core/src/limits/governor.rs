use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::AcquireCancelled;

const REMOTE_CAP: usize = 16;
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Rough machine class, used to size the local inference pool. Local model
/// calls are hardware-bound, so the cap is a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareTier {
    Low,
    Mid,
    High,
}

impl HardwareTier {
    pub fn detect() -> Self {
        let system = sysinfo::System::new_all();
        Self::classify(system.cpus().len(), system.total_memory())
    }

    fn classify(cpu_count: usize, total_memory_bytes: u64) -> Self {
        const GIB: u64 = 1024 * 1024 * 1024;
        if cpu_count < 4 || total_memory_bytes < 8 * GIB {
            HardwareTier::Low
        } else if cpu_count < 12 || total_memory_bytes < 24 * GIB {
            HardwareTier::Mid
        } else {
            HardwareTier::High
        }
    }

    pub const fn local_cap(self) -> usize {
        match self {
            HardwareTier::Low => 1,
            HardwareTier::Mid => 2,
            HardwareTier::High => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolClass {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub local_cap: usize,
    pub remote_cap: usize,
    pub memory_high_water_bytes: u64,
    pub memory_low_water_bytes: u64,
    pub sample_interval: Duration,
}

impl GovernorConfig {
    /// Size pools from the detected hardware tier. Watermarks default to a
    /// share of total RAM (high 70%, low 55%) so recovery has headroom and
    /// the cap does not oscillate around a single threshold.
    pub fn detect() -> Self {
        let system = sysinfo::System::new_all();
        let tier = HardwareTier::classify(system.cpus().len(), system.total_memory());
        let total = system.total_memory();
        Self {
            local_cap: tier.local_cap(),
            remote_cap: REMOTE_CAP,
            memory_high_water_bytes: total / 10 * 7,
            memory_low_water_bytes: total / 20 * 11,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    base_cap: usize,
    effective_cap: usize,
    in_flight: usize,
}

#[derive(Debug)]
struct Pool {
    state: Mutex<PoolState>,
    notify: Notify,
}

impl Pool {
    fn new(cap: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                base_cap: cap.max(1),
                effective_cap: cap.max(1),
                in_flight: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounds simultaneous in-flight provider calls, separately for local
/// (hardware-bound) and remote (network-bound) backends. The local pool
/// shrinks under memory pressure and recovers with hysteresis; permits that
/// are already out are never revoked, the pool just stops issuing new ones
/// until in-flight drops below the reduced cap.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    local: Pool,
    remote: Pool,
}

impl ConcurrencyGovernor {
    pub fn new(config: &GovernorConfig) -> Arc<Self> {
        Arc::new(Self {
            local: Pool::new(config.local_cap),
            remote: Pool::new(config.remote_cap),
        })
    }

    fn pool(&self, class: PoolClass) -> &Pool {
        match class {
            PoolClass::Local => &self.local,
            PoolClass::Remote => &self.remote,
        }
    }

    pub async fn acquire(
        self: &Arc<Self>,
        class: PoolClass,
        cancel: &CancellationToken,
    ) -> Result<GovernorPermit, AcquireCancelled> {
        let pool = self.pool(class);
        loop {
            // Register for wakeups before checking, so a release between the
            // check and the await is not lost.
            let notified = pool.notify.notified();
            {
                let mut state = pool.lock();
                if state.in_flight < state.effective_cap {
                    state.in_flight += 1;
                    return Ok(GovernorPermit {
                        governor: Arc::clone(self),
                        class,
                    });
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(AcquireCancelled),
            }
        }
    }

    /// Flip the local pool between its base cap and the reduced
    /// memory-pressure cap (half the base, floor 1). The remote pool is
    /// network-bound and unaffected.
    pub fn set_memory_pressure(&self, pressured: bool) {
        let mut state = self.local.lock();
        let new_cap = if pressured {
            (state.base_cap / 2).max(1)
        } else {
            state.base_cap
        };
        if new_cap != state.effective_cap {
            debug!(
                old_cap = state.effective_cap,
                new_cap, pressured, "local pool cap adjusted"
            );
            state.effective_cap = new_cap;
            drop(state);
            self.local.notify.notify_waiters();
        }
    }

    pub fn effective_cap(&self, class: PoolClass) -> usize {
        self.pool(class).lock().effective_cap
    }

    pub fn in_flight(&self, class: PoolClass) -> usize {
        self.pool(class).lock().in_flight
    }

    fn release(&self, class: PoolClass) {
        let pool = self.pool(class);
        {
            let mut state = pool.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        pool.notify.notify_waiters();
    }
}

/// RAII slot in one of the governor's pools; released on drop.
pub struct GovernorPermit {
    governor: Arc<ConcurrencyGovernor>,
    class: PoolClass,
}

impl Drop for GovernorPermit {
    fn drop(&mut self) {
        self.governor.release(self.class);
    }
}

/// Sample resident memory and drive the governor's pressure flag. Enters
/// pressure above the high-water mark and leaves it only below the low-water
/// mark, so the cap recovers smoothly instead of oscillating.
pub fn spawn_memory_watcher(
    governor: Arc<ConcurrencyGovernor>,
    config: GovernorConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(pid) = sysinfo::get_current_pid() else {
            warn!("cannot resolve own pid; memory watcher disabled");
            return;
        };
        let mut system = sysinfo::System::new();
        let mut pressured = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.sample_interval) => {}
            }
            system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
            let Some(process) = system.process(pid) else {
                continue;
            };
            let rss = process.memory();
            if !pressured && rss >= config.memory_high_water_bytes {
                pressured = true;
                warn!(
                    rss_bytes = rss,
                    high_water = config.memory_high_water_bytes,
                    "memory pressure: shrinking local pool"
                );
                governor.set_memory_pressure(true);
            } else if pressured && rss <= config.memory_low_water_bytes {
                pressured = false;
                info!(
                    rss_bytes = rss,
                    low_water = config.memory_low_water_bytes,
                    "memory pressure cleared: restoring local pool"
                );
                governor.set_memory_pressure(false);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn config(local_cap: usize) -> GovernorConfig {
        GovernorConfig {
            local_cap,
            remote_cap: REMOTE_CAP,
            memory_high_water_bytes: u64::MAX,
            memory_low_water_bytes: u64::MAX,
            sample_interval: Duration::from_secs(5),
        }
    }

    #[test]
    fn tier_classification() {
        const GIB: u64 = 1024 * 1024 * 1024;
        assert_eq!(HardwareTier::classify(2, 16 * GIB), HardwareTier::Low);
        assert_eq!(HardwareTier::classify(8, 4 * GIB), HardwareTier::Low);
        assert_eq!(HardwareTier::classify(8, 16 * GIB), HardwareTier::Mid);
        assert_eq!(HardwareTier::classify(16, 64 * GIB), HardwareTier::High);
        assert_eq!(HardwareTier::High.local_cap(), 4);
    }

    #[tokio::test]
    async fn local_in_flight_never_exceeds_cap() {
        let governor = ConcurrencyGovernor::new(&config(2));
        let cancel = CancellationToken::new();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let governor = Arc::clone(&governor);
            let cancel = cancel.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire(PoolClass::Local, &cancel).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_pressure_shrinks_and_recovers() {
        let governor = ConcurrencyGovernor::new(&config(4));
        let cancel = CancellationToken::new();
        assert_eq!(governor.effective_cap(PoolClass::Local), 4);

        let p1 = governor.acquire(PoolClass::Local, &cancel).await.unwrap();
        let p2 = governor.acquire(PoolClass::Local, &cancel).await.unwrap();
        let p3 = governor.acquire(PoolClass::Local, &cancel).await.unwrap();

        governor.set_memory_pressure(true);
        assert_eq!(governor.effective_cap(PoolClass::Local), 2);
        // Three permits are out; the shrunk pool must not issue another.
        let blocked =
            tokio::time::timeout(Duration::from_secs(1), governor.acquire(PoolClass::Local, &cancel))
                .await;
        assert!(blocked.is_err());

        // Remote pool is unaffected by local pressure.
        let _remote = governor.acquire(PoolClass::Remote, &cancel).await.unwrap();

        drop(p1);
        drop(p2);
        // 1 in flight < cap 2: a new permit is available again.
        let p4 = governor.acquire(PoolClass::Local, &cancel).await.unwrap();

        governor.set_memory_pressure(false);
        assert_eq!(governor.effective_cap(PoolClass::Local), 4);
        drop(p3);
        drop(p4);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_is_cancellable() {
        let governor = ConcurrencyGovernor::new(&config(1));
        let cancel = CancellationToken::new();
        let _held = governor.acquire(PoolClass::Local, &cancel).await.unwrap();

        let waiter_cancel = cancel.clone();
        let waiter = tokio::spawn({
            let governor = Arc::clone(&governor);
            async move { governor.acquire(PoolClass::Local, &waiter_cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap().err(), Some(AcquireCancelled));
    }

    #[tokio::test]
    async fn permit_release_wakes_waiter() {
        let governor = ConcurrencyGovernor::new(&config(1));
        let cancel = CancellationToken::new();
        let permit = governor.acquire(PoolClass::Local, &cancel).await.unwrap();

        let waiter = tokio::spawn({
            let governor = Arc::clone(&governor);
            let cancel = cancel.clone();
            async move {
                governor
                    .acquire(PoolClass::Local, &cancel)
                    .await
                    .map(|_| ())
            }
        });
        tokio::task::yield_now().await;
        drop(permit);
        waiter.await.unwrap().unwrap();
        assert_eq!(governor.in_flight(PoolClass::Local), 0);
    }
}
