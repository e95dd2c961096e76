use crate::errors::RouterError;
use crate::types::{CatalogDocument, HealthMetricSample, HealthUpdate, Provider, RoutingRule};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_SAMPLE_CAPACITY: usize = 10_000;

/// Storage boundary for provider and routing-rule records.
///
/// Implementations perform no locking across calls: health writes are
/// last-write-wins on the fields they touch.
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// Every provider record, routable or not, in storage order.
    async fn list_providers(&self) -> Result<Vec<Provider>, RouterError>;

    async fn find_provider(&self, name: &str) -> Result<Option<Provider>, RouterError>;

    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>, RouterError>;

    async fn update_provider_health(
        &self,
        name: &str,
        update: &HealthUpdate,
    ) -> Result<(), RouterError>;

    async fn append_health_metric_sample(
        &self,
        sample: HealthMetricSample,
    ) -> Result<(), RouterError>;
}

/// Process-local repository seeded from a catalog document.
///
/// Metric samples are kept in a ring of `sample_capacity` entries; the
/// oldest sample is dropped once it is full.
pub struct InMemoryRepository {
    order: RwLock<Vec<String>>,
    providers: DashMap<String, Provider, ahash::RandomState>,
    rules: ArcSwap<Vec<RoutingRule>>,
    samples: RwLock<VecDeque<HealthMetricSample>>,
    sample_capacity: usize,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl InMemoryRepository {
    pub fn new(providers: Vec<Provider>, rules: Vec<RoutingRule>) -> Self {
        let repo = Self {
            order: RwLock::new(Vec::new()),
            providers: DashMap::with_hasher(ahash::RandomState::new()),
            rules: ArcSwap::from_pointee(rules),
            samples: RwLock::new(VecDeque::new()),
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
        };
        for provider in providers {
            repo.upsert_provider(provider);
        }
        repo
    }

    pub fn from_document(doc: &CatalogDocument) -> Self {
        Self::new(doc.providers.clone(), doc.rules.clone())
    }

    pub fn upsert_provider(&self, provider: Provider) {
        let name = provider.name.clone();
        if self.providers.insert(name.clone(), provider).is_none() {
            self.order.write().push(name);
        }
    }

    pub fn replace_rules(&self, rules: Vec<RoutingRule>) {
        self.rules.store(Arc::new(rules));
    }

    #[must_use]
    pub fn with_sample_capacity(mut self, capacity: usize) -> Self {
        self.sample_capacity = capacity;
        self.samples.get_mut().truncate(capacity);
        self
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> Vec<HealthMetricSample> {
        self.samples.read().iter().cloned().collect()
    }

    /// Hands every retained sample to the caller and empties the ring.
    pub fn drain_samples(&self) -> Vec<HealthMetricSample> {
        self.samples.write().drain(..).collect()
    }
}

#[async_trait]
impl ProviderRepository for InMemoryRepository {
    async fn list_providers(&self) -> Result<Vec<Provider>, RouterError> {
        let order = self.order.read();
        Ok(order
            .iter()
            .filter_map(|name| self.providers.get(name).map(|entry| entry.clone()))
            .collect())
    }

    async fn find_provider(&self, name: &str) -> Result<Option<Provider>, RouterError> {
        Ok(self.providers.get(name).map(|entry| entry.clone()))
    }

    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>, RouterError> {
        Ok(self.rules.load().as_ref().clone())
    }

    async fn update_provider_health(
        &self,
        name: &str,
        update: &HealthUpdate,
    ) -> Result<(), RouterError> {
        let mut entry = self
            .providers
            .get_mut(name)
            .ok_or_else(|| RouterError::Repository(format!("unknown provider {name}")))?;
        update.apply(&mut entry);
        Ok(())
    }

    async fn append_health_metric_sample(
        &self,
        sample: HealthMetricSample,
    ) -> Result<(), RouterError> {
        if self.sample_capacity == 0 {
            return Ok(());
        }
        let mut samples = self.samples.write();
        while samples.len() >= self.sample_capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AggregationBucket;
    use chrono::Utc;

    fn sample(id: usize) -> HealthMetricSample {
        let now = Utc::now();
        HealthMetricSample {
            sample_id: format!("s-{id}"),
            provider_id: "p".into(),
            recorded_at: now,
            bucket: AggregationBucket::Hour,
            bucket_start: now,
            request_count: 1,
            success_count: 1,
            error_count: 0,
            average_latency_ms: 10.0,
            total_tokens: 0,
            total_cost_micro: 0,
        }
    }

    #[tokio::test]
    async fn sample_ring_keeps_only_the_newest() {
        let repo = InMemoryRepository::default().with_sample_capacity(3);
        for id in 0..10 {
            repo.append_health_metric_sample(sample(id)).await.unwrap();
        }
        let ids: Vec<String> = repo.samples().into_iter().map(|s| s.sample_id).collect();
        assert_eq!(ids, vec!["s-7", "s-8", "s-9"]);
    }

    #[tokio::test]
    async fn drained_samples_are_not_returned_twice() {
        let repo = InMemoryRepository::default();
        repo.append_health_metric_sample(sample(1)).await.unwrap();
        repo.append_health_metric_sample(sample(2)).await.unwrap();
        assert_eq!(repo.drain_samples().len(), 2);
        assert!(repo.samples().is_empty());
        assert!(repo.drain_samples().is_empty());
    }

    #[tokio::test]
    async fn zero_capacity_retains_nothing() {
        let repo = InMemoryRepository::default().with_sample_capacity(0);
        repo.append_health_metric_sample(sample(1)).await.unwrap();
        assert!(repo.samples().is_empty());
    }
}
