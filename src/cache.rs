use crate::client::ProviderClient;
use crate::errors::RouterError;
use crate::types::Provider;
use moka::future::Cache;
use std::{sync::Arc, time::Duration};

const MAX_CLIENTS: u64 = 1_024;

/// Built client handles keyed by provider name, kept for the life of the
/// process. Concurrent first lookups for one provider share a single build;
/// failed builds are not cached.
#[derive(Clone)]
pub struct ClientCache {
    inner: Cache<String, Arc<ProviderClient>>,
    timeout: Duration,
}

impl ClientCache {
    pub fn new(timeout: Duration) -> Self {
        let inner = Cache::builder().max_capacity(MAX_CLIENTS).build();
        Self { inner, timeout }
    }

    pub async fn get_or_build(&self, provider: &Provider) -> Result<Arc<ProviderClient>, RouterError> {
        let timeout = self.timeout;
        self.inner
            .try_get_with(provider.name.clone(), async move {
                ProviderClient::build(provider, timeout).map(Arc::new)
            })
            .await
            .map_err(|reason: Arc<String>| RouterError::ClientConstruction {
                provider: provider.name.clone(),
                reason: reason.as_ref().clone(),
            })
    }

    pub async fn get(&self, provider_name: &str) -> Option<Arc<ProviderClient>> {
        self.inner.get(provider_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_are_reused() {
        let cache = ClientCache::new(Duration::from_secs(1));
        let provider = Provider::new("local", "http://127.0.0.1:8080");
        let first = cache.get_or_build(&provider).await.unwrap();
        let second = cache.get_or_build(&provider).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ClientCache::new(Duration::from_secs(1));
        let mut provider = Provider::new("flaky", "::::");
        let err = cache.get_or_build(&provider).await.unwrap_err();
        assert!(matches!(err, RouterError::ClientConstruction { .. }));
        assert!(cache.get("flaky").await.is_none());

        provider.base_url = "http://127.0.0.1:8081".into();
        assert!(cache.get_or_build(&provider).await.is_ok());
    }
}
