use crate::repository::ProviderRepository;
use crate::types::{AggregationBucket, HealthMetricSample, HealthTuning, HealthUpdate, Provider};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SCORE_CEILING: f64 = 100.0;

/// Per-key rotation positions for round-robin selection.
///
/// Advancing is a single atomic update per key. Two callers racing on the
/// same key can both observe the same position; rotation is then uneven
/// for a moment but never out of bounds.
#[derive(Clone, Default)]
pub struct RotationCursors {
    inner: Arc<DashMap<String, AtomicUsize, ahash::RandomState>>,
}

impl RotationCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current position within `len` and moves the cursor on.
    pub fn advance(&self, key: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let previous = entry
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current % len + 1) % len)
            })
            .unwrap_or_else(|current| current);
        previous % len
    }
}

/// Health state shared by the orchestrator and the prober.
#[derive(Clone)]
pub struct HealthStore {
    repository: Arc<dyn ProviderRepository>,
    cursors: RotationCursors,
    tuning: HealthTuning,
}

impl HealthStore {
    pub fn new(repository: Arc<dyn ProviderRepository>, tuning: HealthTuning) -> Self {
        Self {
            repository,
            cursors: RotationCursors::new(),
            tuning,
        }
    }

    pub fn cursors(&self) -> &RotationCursors {
        &self.cursors
    }

    pub fn tuning(&self) -> &HealthTuning {
        &self.tuning
    }

    pub async fn report_success(&self, provider_name: &str, latency_ms: u64) {
        let Some(provider) = self.load(provider_name).await else {
            return;
        };
        let update = success_update(&provider, latency_ms, &self.tuning);
        tracing::debug!(
            provider = provider_name,
            health_score = update.health_score,
            average_latency_ms = update.average_latency_ms,
            "recorded success"
        );
        self.persist(&provider, update, latency_ms, true).await;
    }

    pub async fn report_failure(&self, provider_name: &str, latency_ms: u64, error_message: &str) {
        let Some(provider) = self.load(provider_name).await else {
            return;
        };
        let update = failure_update(&provider, error_message, &self.tuning);
        tracing::debug!(
            provider = provider_name,
            health_score = update.health_score,
            error = error_message,
            "recorded failure"
        );
        self.persist(&provider, update, latency_ms, false).await;
    }

    async fn load(&self, provider_name: &str) -> Option<Provider> {
        match self.repository.find_provider(provider_name).await {
            Ok(Some(provider)) => Some(provider),
            Ok(None) => {
                tracing::warn!(provider = provider_name, "health report for unknown provider");
                None
            }
            Err(err) => {
                tracing::warn!(provider = provider_name, error = %err, "health read failed");
                None
            }
        }
    }

    async fn persist(&self, provider: &Provider, update: HealthUpdate, latency_ms: u64, ok: bool) {
        let sample = attempt_sample(provider, update.checked_at, latency_ms, ok);
        if let Err(err) = self
            .repository
            .update_provider_health(&provider.name, &update)
            .await
        {
            tracing::warn!(provider = %provider.name, error = %err, "health write failed");
        }
        if let Err(err) = self.repository.append_health_metric_sample(sample).await {
            tracing::warn!(provider = %provider.name, error = %err, "metric sample write failed");
        }
    }
}

pub fn success_update(provider: &Provider, latency_ms: u64, tuning: &HealthTuning) -> HealthUpdate {
    let latency = latency_ms as f64;
    let average_latency_ms = if provider.average_latency_ms <= 0.0 {
        latency
    } else {
        blend(provider.average_latency_ms, latency, tuning.latency_smoothing)
    };
    HealthUpdate {
        health_score: clamp_score(provider.health_score + tuning.success_health_step),
        success_rate: clamp_score(provider.success_rate + tuning.success_rate_step),
        average_latency_ms,
        total_requests_today: provider.total_requests_today.saturating_add(1),
        last_error: provider.last_error.clone(),
        checked_at: Utc::now(),
    }
}

/// Latency is left alone on failure so timeouts do not drag the average.
pub fn failure_update(provider: &Provider, error_message: &str, tuning: &HealthTuning) -> HealthUpdate {
    HealthUpdate {
        health_score: clamp_score(provider.health_score - tuning.failure_health_penalty),
        success_rate: clamp_score(provider.success_rate - tuning.failure_rate_penalty),
        average_latency_ms: provider.average_latency_ms,
        total_requests_today: provider.total_requests_today.saturating_add(1),
        last_error: Some(error_message.to_string()),
        checked_at: Utc::now(),
    }
}

fn attempt_sample(
    provider: &Provider,
    recorded_at: DateTime<Utc>,
    latency_ms: u64,
    ok: bool,
) -> HealthMetricSample {
    let bucket_start = recorded_at
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(recorded_at);
    HealthMetricSample {
        sample_id: Uuid::new_v4().to_string(),
        provider_id: provider.id.clone(),
        recorded_at,
        bucket: AggregationBucket::Hour,
        bucket_start,
        request_count: 1,
        success_count: u64::from(ok),
        error_count: u64::from(!ok),
        average_latency_ms: latency_ms as f64,
        total_tokens: 0,
        total_cost_micro: 0,
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, SCORE_CEILING)
}

fn blend(prev: f64, new: f64, alpha: f64) -> f64 {
    prev + (new - prev) * alpha.clamp(0.0, 1.0)
}
