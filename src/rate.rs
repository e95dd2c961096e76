use crate::types::Provider;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Local view of each provider's published request quotas.
///
/// Per-minute limits are token buckets refilled continuously; per-day
/// limits compare against the provider's persisted daily counter.
#[derive(Debug, Clone, Default)]
pub struct QuotaGuard {
    buckets: Arc<DashMap<String, Bucket, ahash::RandomState>>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl QuotaGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one request slot for `provider`, or returns false if either
    /// quota is spent.
    pub fn try_acquire(&self, provider: &Provider) -> bool {
        if let Some(per_day) = provider.rate_limit_per_day {
            if provider.total_requests_today >= u64::from(per_day) {
                return false;
            }
        }
        match provider.rate_limit_per_minute {
            Some(per_minute) => self.check(&provider.name, per_minute, Instant::now()),
            None => true,
        }
    }

    fn check(&self, key: &str, per_minute: u32, now: Instant) -> bool {
        let capacity = f64::from(per_minute);
        let refill_per_sec = capacity / 60.0;
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                capacity,
                last_refill: now,
            });
        if entry.capacity != capacity {
            entry.tokens = entry.tokens.min(capacity);
            entry.capacity = capacity;
        }
        let elapsed = now.saturating_duration_since(entry.last_refill);
        if elapsed > Duration::ZERO {
            let refill = elapsed.as_secs_f64() * refill_per_sec;
            entry.tokens = (entry.tokens + refill).min(capacity);
            entry.last_refill = now;
        }
        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
