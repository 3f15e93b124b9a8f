//! QPS throttling for the upload worker pool.
//!
//! ## Why a spacing limiter, not a token bucket?
//!
//! A bucket of depth `qps` lets a freshly started run fire `qps` requests
//! in the same instant, which is exactly the burst that trips relay
//! endpoints like a local PicGo server. Serialising grants at even
//! `1/qps` intervals keeps the *rolling* one-second window at or below
//! `qps` with no instantaneous burst at all, and needs only one timestamp
//! of shared state.
//!
//! A limiter is only ever constructed for `qps > 0`; callers with
//! `qps == 0` bypass throttling entirely (see [`RateLimiter::from_qps`]).

use crate::cancel::CancelToken;
use crate::error::PipelineError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Shared rate limiter: at most `qps` acquisitions per rolling second
/// across all concurrent callers of one instance.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    /// Timestamp of the last granted acquisition. The mutex is held only
    /// for the check-and-claim; sleeping happens outside it.
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Build a limiter for `qps > 0`, or `None` when throttling is off.
    pub fn from_qps(qps: u32) -> Option<Arc<Self>> {
        if qps == 0 {
            return None;
        }
        Some(Arc::new(Self {
            min_interval: Duration::from_secs(1) / qps,
            last_granted: Mutex::new(None),
        }))
    }

    /// The enforced spacing between grants.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until a grant is safe, or until `cancel` fires.
    ///
    /// Multiple waiters may wake from the same sleep; the loop re-checks
    /// the timestamp under the lock so exactly one of them claims the slot
    /// and the rest compute a fresh remainder.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<(), PipelineError> {
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Aborted);
            }

            let wait = {
                let mut last = self
                    .last_granted
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let now = Instant::now();
                match *last {
                    Some(prev) => {
                        let elapsed = now.duration_since(prev);
                        if elapsed >= self.min_interval {
                            *last = Some(now);
                            return Ok(());
                        }
                        self.min_interval - elapsed
                    }
                    None => {
                        *last = Some(now);
                        return Ok(());
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(PipelineError::Aborted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_qps_builds_no_limiter() {
        assert!(RateLimiter::from_qps(0).is_none());
    }

    #[test]
    fn interval_is_one_over_qps() {
        let limiter = RateLimiter::from_qps(4).unwrap();
        assert_eq!(limiter.min_interval(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::from_qps(1).unwrap();
        let cancel = CancelToken::new();
        let before = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert_eq!(Instant::now(), before, "first grant must not sleep");
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced() {
        let limiter = RateLimiter::from_qps(4).unwrap();
        let cancel = CancelToken::new();

        limiter.acquire(&cancel).await.unwrap();
        let t0 = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        let t1 = Instant::now();

        assert!(
            t1.duration_since(t0) >= Duration::from_millis(250),
            "second grant came {:?} after the first",
            t1.duration_since(t0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_qps() {
        let limiter = RateLimiter::from_qps(10).unwrap();
        let cancel = CancelToken::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&cancel).await.unwrap();
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for h in handles {
            grants.push(h.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(100),
                "grants only {gap:?} apart under qps=10"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unblocks_a_waiting_acquire() {
        let limiter = RateLimiter::from_qps(1).unwrap();
        let cancel = CancelToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let waiter = Arc::clone(&limiter);
        let waiter_cancel = cancel.clone();
        let handle = tokio::spawn(async move { waiter.acquire(&waiter_cancel).await });

        // Let the waiter park in its sleep, then abort the run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_fails_fast() {
        let limiter = RateLimiter::from_qps(5).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            limiter.acquire(&cancel).await,
            Err(PipelineError::Aborted)
        ));
    }
}
