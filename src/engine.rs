use crate::cache::ClientCache;
use crate::catalog::{apply_explicit_order, match_rule, sort_by_schedule, Catalog};
use crate::client::ProviderClient;
use crate::config::{EngineSettings, RouterConfig};
use crate::errors::{ProviderError, RouterError};
use crate::health::HealthStore;
use crate::prober::{HealthProber, HttpProbe, Probe};
use crate::rate::QuotaGuard;
use crate::repository::{InMemoryRepository, ProviderRepository};
use crate::retry::{backoff_delay, RetryClassifier};
use crate::strategy::{preferred_first, rank, CostTiers, RankContext, Ranking};
use crate::types::*;
use anyhow::Context;
use smallvec::SmallVec;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Routing context constructed once at startup and shared by handle.
pub struct RouterEngine {
    revision: String,
    catalog: Catalog,
    health: HealthStore,
    clients: ClientCache,
    quotas: QuotaGuard,
    classifier: RetryClassifier,
    cost_tiers: CostTiers,
    probe: Arc<dyn Probe>,
    settings: EngineSettings,
}

impl RouterEngine {
    pub fn bootstrap(cfg: &RouterConfig) -> Result<Self, RouterError> {
        let repository = Arc::new(
            InMemoryRepository::from_document(&cfg.catalog)
                .with_sample_capacity(cfg.engine.metric_sample_capacity),
        );
        let probe = Arc::new(HttpProbe::new(
            cfg.engine.probe_path.clone(),
            Duration::from_millis(cfg.engine.probe_timeout_ms),
        ));
        let engine = Self::new(repository, cfg.engine.clone())?
            .with_revision(cfg.catalog.revision.clone())
            .with_cost_tiers(CostTiers::with_overrides(&cfg.catalog.cost_tiers))
            .with_tuning(cfg.catalog.tuning.clone())
            .with_probe(probe);
        tracing::info!(
            revision = %engine.revision,
            providers = cfg.catalog.providers.len(),
            rules = cfg.catalog.rules.len(),
            default_strategy = %engine.settings.default_strategy,
            "router engine ready"
        );
        Ok(engine)
    }

    pub fn new(
        repository: Arc<dyn ProviderRepository>,
        settings: EngineSettings,
    ) -> Result<Self, RouterError> {
        let classifier = RetryClassifier::with_markers(&settings.retryable_markers)
            .context("compile retryable error markers")?;
        Ok(Self {
            revision: String::new(),
            catalog: Catalog::new(repository.clone()),
            health: HealthStore::new(repository, HealthTuning::default()),
            clients: ClientCache::new(Duration::from_millis(settings.client_timeout_ms)),
            quotas: QuotaGuard::new(),
            classifier,
            cost_tiers: CostTiers::default(),
            probe: Arc::new(HttpProbe::default()),
            settings,
        })
    }

    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    #[must_use]
    pub fn with_cost_tiers(mut self, cost_tiers: CostTiers) -> Self {
        self.cost_tiers = cost_tiers;
        self
    }

    #[must_use]
    pub fn with_tuning(mut self, tuning: HealthTuning) -> Self {
        self.health = HealthStore::new(self.catalog.repository().clone(), tuning);
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Ranks the routable providers without executing anything. `None`
    /// means nothing is eligible after exclusions.
    pub async fn select_provider(&self, options: &RouteOptions) -> Option<RoutingDecision> {
        let providers = self.catalog.list_active_providers().await;
        let rules = self.catalog.list_active_rules().await;
        self.decide(providers, &rules, options)
    }

    fn decide(
        &self,
        mut providers: Vec<Provider>,
        rules: &[RoutingRule],
        options: &RouteOptions,
    ) -> Option<RoutingDecision> {
        let requested = options.strategy.unwrap_or(self.settings.default_strategy);
        let rule = match_rule(rules, requested).cloned();
        let strategy = options
            .strategy
            .or_else(|| rule.as_ref().and_then(|rule| rule.load_balance_strategy))
            .unwrap_or(self.settings.default_strategy);

        providers.retain(|provider| !options.exclude_providers.contains(&provider.name));
        if let Some(model) = options.model.as_deref() {
            providers.retain(|provider| provider.serves_model(model));
        }
        if providers.is_empty() {
            tracing::debug!(strategy = %strategy, "no eligible providers after exclusions");
            return None;
        }

        let preferred = options.preferred_provider.as_deref().and_then(|name| {
            let ranking =
                preferred_first(&providers, name, self.health.tuning().preferred_health_floor);
            if ranking.is_none() {
                tracing::debug!(preferred = name, "preferred provider unavailable or unhealthy");
            }
            ranking
        });
        let Ranking {
            ordered, reason, ..
        } = match preferred {
            Some(ranking) => ranking,
            None => {
                if let Some(rule) = &rule {
                    apply_explicit_order(&mut providers, &rule.provider_order);
                }
                let cursor_key = rule
                    .as_ref()
                    .map(|rule| rule.name.as_str())
                    .unwrap_or(strategy.as_str());
                let ctx = RankContext {
                    cost_tiers: &self.cost_tiers,
                    cursors: self.health.cursors(),
                    cursor_key,
                };
                let mut ranking = rank(strategy, &providers, &ctx)?;
                if let Some(rule) = rule.as_ref().filter(|rule| !rule.fallback_chain.is_empty()) {
                    apply_explicit_order(&mut ranking.ordered[1..], &rule.fallback_chain);
                    ranking.reason.push_str(&format!("; fallbacks per rule {}", rule.name));
                }
                ranking
            }
        };

        let mut ordered = ordered.into_iter();
        let primary_provider = ordered.next()?;
        Some(RoutingDecision {
            primary_provider,
            fallback_providers: ordered.collect(),
            rule,
            strategy,
            reason,
        })
    }

    /// Runs `operation` against the chosen provider, retrying transient
    /// failures in place and failing over down the chain. Every attempt is
    /// reported to the health store before moving on.
    pub async fn run<T, F, Fut>(
        &self,
        options: &RouteOptions,
        mut operation: F,
    ) -> Result<RunOutcome<T>, RouterError>
    where
        F: FnMut(Arc<ProviderClient>, Provider) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let decision = self.select_provider(options).await.ok_or_else(|| {
            RouterError::NoProvidersAvailable("no enabled provider matches the request".into())
        })?;
        let rule = decision.rule.as_ref();
        let max_retries = options
            .max_retries
            .or_else(|| rule.and_then(|rule| rule.max_retries))
            .unwrap_or(self.settings.max_retries);
        let retry_delay_ms = options
            .retry_delay_ms
            .or_else(|| rule.and_then(|rule| rule.retry_delay_ms))
            .unwrap_or(self.settings.retry_delay_ms);
        tracing::debug!(
            strategy = %decision.strategy,
            reason = %decision.reason,
            candidates = ?decision.candidate_names(),
            max_retries,
            "routing decision"
        );

        let mut attempted: SmallVec<[String; 4]> = SmallVec::new();
        let mut last_error: Option<RouterError> = None;
        let mut attempts: u32 = 0;

        for provider in decision.candidates() {
            if !self.quotas.try_acquire(provider) {
                tracing::debug!(provider = %provider.name, "local quota spent; skipping");
                last_error = Some(RouterError::QuotaExhausted(provider.name.clone()));
                continue;
            }
            attempted.push(provider.name.clone());

            let client = match self.clients.get_or_build(provider).await {
                Ok(client) => client,
                Err(err) => {
                    attempts += 1;
                    tracing::warn!(provider = %provider.name, error = %err, "client unavailable; failing over");
                    self.health
                        .report_failure(&provider.name, 0, &err.to_string())
                        .await;
                    last_error = Some(err);
                    continue;
                }
            };

            for attempt in 0..=max_retries {
                if attempt > 0 && !self.retry_quota_available(provider).await {
                    tracing::debug!(provider = %provider.name, attempt, "local quota spent; ending retries");
                    last_error = Some(RouterError::QuotaExhausted(provider.name.clone()));
                    break;
                }
                attempts += 1;
                let started = Instant::now();
                let outcome = operation(client.clone(), provider.clone()).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                let err = match outcome {
                    Ok(result) => {
                        self.health.report_success(&provider.name, latency_ms).await;
                        tracing::info!(
                            provider = %provider.name,
                            attempt,
                            latency_ms,
                            "routed call succeeded"
                        );
                        return Ok(RunOutcome {
                            result,
                            provider: provider.clone(),
                            latency_ms,
                            attempts,
                        });
                    }
                    Err(err) => err,
                };

                self.health
                    .report_failure(&provider.name, latency_ms, &err.message)
                    .await;
                let retryable = self.classifier.is_retryable(&err);
                tracing::warn!(
                    provider = %provider.name,
                    attempt,
                    latency_ms,
                    retryable,
                    status = ?err.status,
                    error = %err,
                    "routed call failed"
                );
                let provider_name = provider.name.clone();
                last_error = Some(if retryable {
                    RouterError::RetryableProvider {
                        provider: provider_name,
                        source: err,
                    }
                } else {
                    RouterError::TerminalProvider {
                        provider: provider_name,
                        source: err,
                    }
                });
                if !retryable || attempt >= max_retries {
                    break;
                }
                tokio::time::sleep(backoff_delay(retry_delay_ms, attempt)).await;
            }
        }

        let last = last_error.unwrap_or_else(|| {
            RouterError::NoProvidersAvailable("no candidate could be attempted".into())
        });
        tracing::warn!(attempted = ?attempted, error = %last, "all providers exhausted");
        Err(RouterError::AllProvidersExhausted {
            attempted: attempted.into_vec(),
            last: Box::new(last),
        })
    }

    /// Retries are checked against the live record so the daily counter
    /// includes the attempts already made.
    async fn retry_quota_available(&self, provider: &Provider) -> bool {
        match self.catalog.find_provider(&provider.name).await {
            Some(live) => self.quotas.try_acquire(&live),
            None => self.quotas.try_acquire(provider),
        }
    }

    pub async fn report_success(&self, provider_name: &str, latency_ms: u64) {
        self.health.report_success(provider_name, latency_ms).await;
    }

    pub async fn report_failure(&self, provider_name: &str, latency_ms: u64, error_message: &str) {
        self.health
            .report_failure(provider_name, latency_ms, error_message)
            .await;
    }

    /// Dashboard snapshot of every provider, routable or not.
    pub async fn get_provider_stats(&self) -> Vec<ProviderStats> {
        let mut providers = self.catalog.all_providers().await;
        sort_by_schedule(&mut providers);
        providers.iter().map(ProviderStats::from).collect()
    }

    pub async fn run_health_checks(&self) -> Vec<ProbeOutcome> {
        HealthProber {
            catalog: &self.catalog,
            clients: &self.clients,
            health: &self.health,
            probe: self.probe.as_ref(),
        }
        .run_once()
        .await
    }
}
