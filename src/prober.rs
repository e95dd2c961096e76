use crate::cache::ClientCache;
use crate::catalog::Catalog;
use crate::client::ProviderClient;
use crate::errors::ProviderError;
use crate::health::HealthStore;
use crate::types::{ProbeOutcome, Provider};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::{Duration, Instant};

const MAX_ERROR_BODY: usize = 256;

/// Smallest request that proves a provider is answering.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, client: &ProviderClient, provider: &Provider) -> Result<(), ProviderError>;
}

/// `GET {base_url}{path}`; any 2xx passes.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new("/models", Duration::from_secs(5))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, client: &ProviderClient, _provider: &Provider) -> Result<(), ProviderError> {
        let url = client.endpoint(&self.path)?;
        let response = client.http().get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        let reason = status.canonical_reason().unwrap_or("unexpected status");
        let message = if snippet.is_empty() {
            format!("probe returned {} {reason}", status.as_u16())
        } else {
            format!("probe returned {} {reason}: {snippet}", status.as_u16())
        };
        Err(ProviderError::with_status(status.as_u16(), message))
    }
}

/// One pass of active health checks over the routable providers.
///
/// Holds no state of its own; outcomes flow through the same success and
/// failure reports routed calls use.
pub struct HealthProber<'a> {
    pub catalog: &'a Catalog,
    pub clients: &'a ClientCache,
    pub health: &'a HealthStore,
    pub probe: &'a dyn Probe,
}

impl HealthProber<'_> {
    pub async fn run_once(&self) -> Vec<ProbeOutcome> {
        let providers = self.catalog.list_active_providers().await;
        let outcomes = join_all(providers.iter().map(|provider| self.check(provider))).await;
        let healthy = outcomes.iter().filter(|outcome| outcome.healthy).count();
        tracing::info!(
            providers = outcomes.len(),
            healthy,
            "health check pass complete"
        );
        outcomes
    }

    async fn check(&self, provider: &Provider) -> ProbeOutcome {
        let client = match self.clients.get_or_build(provider).await {
            Ok(client) => client,
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(provider = %provider.name, error = %message, "probe skipped: no client");
                self.health.report_failure(&provider.name, 0, &message).await;
                return ProbeOutcome {
                    provider: provider.name.clone(),
                    healthy: false,
                    latency_ms: 0,
                    error: Some(message),
                };
            }
        };

        let started = Instant::now();
        let result = self.probe.probe(&client, provider).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                self.health.report_success(&provider.name, latency_ms).await;
                ProbeOutcome {
                    provider: provider.name.clone(),
                    healthy: true,
                    latency_ms,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(provider = %provider.name, latency_ms, error = %err, "probe failed");
                self.health
                    .report_failure(&provider.name, latency_ms, &err.message)
                    .await;
                ProbeOutcome {
                    provider: provider.name.clone(),
                    healthy: false,
                    latency_ms,
                    error: Some(err.message),
                }
            }
        }
    }
}
