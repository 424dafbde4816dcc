use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::AcquireCancelled;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window request gate for one provider identity. No 60-second
/// window ever observes more grants than the configured ceiling.
///
/// Acquisition waits rather than fails; the only early exit is cancellation.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            grants: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireCancelled> {
        loop {
            let wait = {
                let mut grants = self
                    .grants
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let now = Instant::now();
                while grants.front().is_some_and(|at| *at + WINDOW <= now) {
                    grants.pop_front();
                }
                if (grants.len() as u32) < self.requests_per_minute {
                    grants.push_back(now);
                    return Ok(());
                }
                match grants.front() {
                    Some(oldest) => (*oldest + WINDOW).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(AcquireCancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grants_up_to_ceiling_immediately() {
        let limiter = RateLimiter::new(3);
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_window_slides() {
        let limiter = RateLimiter::new(2);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        // The third acquisition must not be granted inside the same window.
        let early = tokio::time::timeout(Duration::from_secs(59), limiter.acquire(&cancel)).await;
        assert!(early.is_err());

        // After the window slides past the first grant it goes through.
        limiter.acquire(&cancel).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_window_exceeds_ceiling() {
        let limiter = RateLimiter::new(5);
        let cancel = CancellationToken::new();
        let mut grant_times = Vec::new();
        for _ in 0..12 {
            limiter.acquire(&cancel).await.unwrap();
            grant_times.push(Instant::now());
        }
        for (i, start) in grant_times.iter().enumerate() {
            let in_window = grant_times[i..]
                .iter()
                .filter(|at| at.duration_since(*start) < WINDOW)
                .count();
            assert!(in_window <= 5, "window starting at grant {i} saw {in_window} grants");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter = limiter.acquire(&cancel);
        tokio::pin!(waiter);
        tokio::select! {
            _ = &mut waiter => panic!("should still be waiting"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        cancel.cancel();
        assert_eq!(waiter.await, Err(AcquireCancelled));
    }
}
