use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{LimiterConfig, TierQuota};

/// Calls and units currently counted against the quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub calls_in_window: u32,
    pub units_in_window: u64,
}

#[derive(Debug, Default)]
struct Window {
    grants: VecDeque<(Instant, u64)>,
    units: u64,
}

impl Window {
    fn evict(&mut self, now: Instant, span: Duration) {
        while let Some(&(granted_at, units)) = self.grants.front() {
            if now.duration_since(granted_at) < span {
                break;
            }
            self.grants.pop_front();
            self.units = self.units.saturating_sub(units);
        }
    }

    fn has_headroom(&self, units: u64, quota: &TierQuota) -> bool {
        let calls_ok = quota.requests_per_minute == 0
            || (self.grants.len() as u64) < u64::from(quota.requests_per_minute);
        // An estimate larger than the whole quota can only ever fit an empty window.
        let units_ok = quota.tokens_per_minute == 0
            || self.units.saturating_add(units) <= quota.tokens_per_minute
            || self.grants.is_empty();
        calls_ok && units_ok
    }

    fn next_expiry(&self, span: Duration) -> Option<Instant> {
        self.grants.front().map(|(granted_at, _)| *granted_at + span)
    }
}

/// Two-quota admission gate over a rolling window.
///
/// Waiters queue on a fair mutex, so grants happen in the order `acquire` was
/// called. The head waiter sleeps until the oldest reservation leaves the
/// window; nobody spins.
#[derive(Debug)]
pub struct AdmissionLimiter {
    tier: String,
    quota: TierQuota,
    span: Duration,
    window: Mutex<Window>,
}

impl AdmissionLimiter {
    pub fn new(tier: impl Into<String>, quota: TierQuota, span: Duration) -> Self {
        Self {
            tier: tier.into(),
            quota,
            span,
            window: Mutex::new(Window::default()),
        }
    }

    /// Build the limiter for the tier selected in config. An unknown tier falls
    /// back to the most conservative configured quota.
    pub fn from_config(cfg: &LimiterConfig) -> Self {
        let quota = cfg.selected_quota().unwrap_or_else(|| {
            let fallback = cfg
                .tiers
                .values()
                .min_by_key(|q| q.requests_per_minute)
                .copied()
                .unwrap_or(TierQuota {
                    requests_per_minute: 50,
                    tokens_per_minute: 40_000,
                });
            tracing::warn!(
                tier = %cfg.tier,
                rpm = fallback.requests_per_minute,
                tpm = fallback.tokens_per_minute,
                "unknown service tier; using the most conservative quota"
            );
            fallback
        });
        Self::new(
            cfg.tier.clone(),
            quota,
            Duration::from_secs(cfg.window_secs.max(1)),
        )
    }

    /// A limiter that never waits. Zero quotas mean "no limit" on that axis.
    pub fn unlimited() -> Self {
        Self::new(
            "unlimited",
            TierQuota {
                requests_per_minute: 0,
                tokens_per_minute: 0,
            },
            Duration::from_secs(60),
        )
    }

    pub fn tier(&self) -> &str {
        &self.tier
    }

    pub fn quota(&self) -> TierQuota {
        self.quota
    }

    /// Suspend until both quotas have room for one call of `estimated_units`,
    /// then reserve it.
    pub async fn acquire(&self, estimated_units: u64) {
        let mut window = self.window.lock().await;
        let mut waited = false;
        loop {
            let now = Instant::now();
            window.evict(now, self.span);
            if window.has_headroom(estimated_units, &self.quota) {
                window.grants.push_back((now, estimated_units));
                window.units = window.units.saturating_add(estimated_units);
                if waited {
                    tracing::debug!(tier = %self.tier, estimated_units, "admission granted after wait");
                }
                return;
            }

            let Some(wake_at) = window.next_expiry(self.span) else {
                // Unreachable while has_headroom admits any call into an empty window.
                return;
            };
            if !waited {
                tracing::debug!(
                    tier = %self.tier,
                    estimated_units,
                    calls = window.grants.len(),
                    units = window.units,
                    "admission quota exhausted; waiting for refill"
                );
                waited = true;
            }
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Reserve without waiting. Fails if another caller is queued or there is
    /// no headroom right now.
    pub fn try_acquire(&self, estimated_units: u64) -> bool {
        let Ok(mut window) = self.window.try_lock() else {
            return false;
        };
        let now = Instant::now();
        window.evict(now, self.span);
        if !window.has_headroom(estimated_units, &self.quota) {
            return false;
        }
        window.grants.push_back((now, estimated_units));
        window.units = window.units.saturating_add(estimated_units);
        true
    }

    pub async fn stats(&self) -> LimiterStats {
        let mut window = self.window.lock().await;
        window.evict(Instant::now(), self.span);
        LimiterStats {
            calls_in_window: window.grants.len() as u32,
            units_in_window: window.units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn limiter(rpm: u32, tpm: u64) -> AdmissionLimiter {
        AdmissionLimiter::new(
            "test",
            TierQuota {
                requests_per_minute: rpm,
                tokens_per_minute: tpm,
            },
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_quota_blocks_until_window_rolls() {
        let limiter = limiter(2, 1_000_000);
        let start = Instant::now();

        limiter.acquire(10).await;
        limiter.acquire(10).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire(10).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_quota_blocks_independently() {
        let limiter = limiter(100, 1_000);
        let start = Instant::now();

        limiter.acquire(600).await;
        assert!(!limiter.try_acquire(600));

        limiter.acquire(600).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(
            limiter.stats().await,
            LimiterStats {
                calls_in_window: 1,
                units_in_window: 600,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_admitted_into_empty_window() {
        let limiter = limiter(10, 100);
        limiter.acquire(5_000).await;
        assert!(!limiter.try_acquire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_granted_in_arrival_order() {
        let limiter = Arc::new(limiter(1, 1_000_000));
        limiter.acquire(1).await;

        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(1).await;
                order.lock().unwrap().push(i);
            }));
            // Let this waiter enqueue on the mutex before spawning the next one.
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = AdmissionLimiter::unlimited();
        for _ in 0..1_000 {
            limiter.acquire(1_000_000).await;
        }
        assert!(limiter.try_acquire(u64::MAX));
    }

    #[test]
    fn test_unknown_tier_falls_back_to_smallest_quota() {
        let mut cfg = LimiterConfig::default();
        cfg.tier = "enterprise-plus".to_string();
        let limiter = AdmissionLimiter::from_config(&cfg);
        assert_eq!(limiter.quota().requests_per_minute, 50);
    }
}
