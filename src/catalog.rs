use crate::repository::ProviderRepository;
use crate::types::{Provider, RoutingRule, Strategy};
use std::sync::Arc;

/// Read side of the provider and routing-rule records.
///
/// Persistence failures never escape: an unreadable store looks the same
/// as an empty one, which callers treat as "nothing routable right now".
#[derive(Clone)]
pub struct Catalog {
    repository: Arc<dyn ProviderRepository>,
}

impl Catalog {
    pub fn new(repository: Arc<dyn ProviderRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn ProviderRepository> {
        &self.repository
    }

    /// Enabled, active providers ordered by priority ascending then weight
    /// descending.
    pub async fn list_active_providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self
            .all_providers()
            .await
            .into_iter()
            .filter(Provider::is_routable)
            .collect();
        sort_by_schedule(&mut providers);
        providers
    }

    /// Every provider, ordered the same way as the active list.
    pub async fn all_providers(&self) -> Vec<Provider> {
        match self.repository.list_providers().await {
            Ok(providers) => providers,
            Err(err) => {
                tracing::warn!(error = %err, "provider catalog read failed; treating as empty");
                Vec::new()
            }
        }
    }

    pub async fn find_provider(&self, name: &str) -> Option<Provider> {
        match self.repository.find_provider(name).await {
            Ok(provider) => provider,
            Err(err) => {
                tracing::warn!(provider = name, error = %err, "provider read failed");
                None
            }
        }
    }

    pub async fn list_active_rules(&self) -> Vec<RoutingRule> {
        let mut rules: Vec<RoutingRule> = match self.repository.list_routing_rules().await {
            Ok(rules) => rules.into_iter().filter(|rule| rule.is_active).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "routing rule read failed; routing without rules");
                Vec::new()
            }
        };
        rules.sort_by_key(|rule| rule.priority);
        rules
    }
}

pub fn sort_by_schedule(providers: &mut [Provider]) {
    providers.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.weight.total_cmp(&a.weight))
    });
}

/// Picks the rule for a requested strategy from a priority-sorted list:
/// an exact `rule_type` match first, otherwise the lowest-priority rule.
pub fn match_rule(rules: &[RoutingRule], requested: Strategy) -> Option<&RoutingRule> {
    rules
        .iter()
        .filter(|rule| rule.is_active)
        .find(|rule| rule.rule_type.eq_ignore_ascii_case(requested.as_str()))
        .or_else(|| {
            rules
                .iter()
                .filter(|rule| rule.is_active)
                .min_by_key(|rule| rule.priority)
        })
}

/// Reorders `providers` so the names in `order` come first, in that order.
/// Unlisted providers keep their relative position after them.
pub fn apply_explicit_order(providers: &mut [Provider], order: &[String]) {
    if order.is_empty() {
        return;
    }
    providers.sort_by_key(|provider| {
        order
            .iter()
            .position(|name| name == &provider.name)
            .unwrap_or(order.len())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RouterError;
    use crate::repository::InMemoryRepository;
    use crate::types::{HealthMetricSample, HealthUpdate, ProviderStatus};
    use async_trait::async_trait;

    fn provider(name: &str, priority: i32, weight: f64) -> Provider {
        let mut p = Provider::new(name, format!("https://{name}.example/v1"));
        p.priority = priority;
        p.weight = weight;
        p
    }

    fn rule(name: &str, rule_type: &str, priority: i32) -> RoutingRule {
        RoutingRule {
            name: name.into(),
            rule_type: rule_type.into(),
            provider_order: Vec::new(),
            fallback_chain: Vec::new(),
            max_retries: None,
            retry_delay_ms: None,
            load_balance_strategy: None,
            is_active: true,
            priority,
        }
    }

    struct BrokenRepository;

    #[async_trait]
    impl ProviderRepository for BrokenRepository {
        async fn list_providers(&self) -> Result<Vec<Provider>, RouterError> {
            Err(RouterError::Repository("connection refused".into()))
        }
        async fn find_provider(&self, _name: &str) -> Result<Option<Provider>, RouterError> {
            Err(RouterError::Repository("connection refused".into()))
        }
        async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>, RouterError> {
            Err(RouterError::Repository("connection refused".into()))
        }
        async fn update_provider_health(
            &self,
            _name: &str,
            _update: &HealthUpdate,
        ) -> Result<(), RouterError> {
            Err(RouterError::Repository("connection refused".into()))
        }
        async fn append_health_metric_sample(
            &self,
            _sample: HealthMetricSample,
        ) -> Result<(), RouterError> {
            Err(RouterError::Repository("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn active_list_filters_and_orders() {
        let mut disabled = provider("off", 1, 1.0);
        disabled.is_enabled = false;
        let mut degraded = provider("slow", 1, 1.0);
        degraded.status = ProviderStatus::Degraded;
        let repo = InMemoryRepository::new(
            vec![
                provider("c", 20, 1.0),
                disabled,
                provider("a", 10, 1.0),
                degraded,
                provider("b", 10, 5.0),
            ],
            Vec::new(),
        );
        let catalog = Catalog::new(Arc::new(repo));
        let names: Vec<String> = catalog
            .list_active_providers()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn repository_failure_reads_as_empty() {
        let catalog = Catalog::new(Arc::new(BrokenRepository));
        assert!(catalog.list_active_providers().await.is_empty());
        assert!(catalog.list_active_rules().await.is_empty());
    }

    #[test]
    fn exact_rule_type_wins_over_priority() {
        let rules = vec![
            rule("general", "reliability-first", 1),
            rule("cheap", "cost-optimized", 5),
        ];
        let matched = match_rule(&rules, Strategy::CostOptimized).unwrap();
        assert_eq!(matched.name, "cheap");
    }

    #[test]
    fn falls_back_to_lowest_priority_rule() {
        let rules = vec![rule("b", "weighted", 3), rule("a", "weighted", 2)];
        let matched = match_rule(&rules, Strategy::LatencyOptimized).unwrap();
        assert_eq!(matched.name, "a");
        assert!(match_rule(&[], Strategy::Weighted).is_none());
    }

    #[test]
    fn inactive_rules_are_ignored() {
        let mut inactive = rule("old", "round-robin", 0);
        inactive.is_active = false;
        let rules = vec![inactive, rule("new", "weighted", 9)];
        let matched = match_rule(&rules, Strategy::RoundRobin).unwrap();
        assert_eq!(matched.name, "new");
    }

    #[test]
    fn schedule_order_is_total_with_non_finite_weights() {
        let mut providers = vec![
            provider("nan", 1, f64::NAN),
            provider("heavy", 1, 4.0),
            provider("light", 1, 0.5),
            provider("later", 2, f64::INFINITY),
        ];
        sort_by_schedule(&mut providers);
        let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["nan", "heavy", "light", "later"]);
    }

    #[test]
    fn explicit_order_moves_listed_names_first() {
        let mut providers = vec![provider("a", 1, 1.0), provider("b", 2, 1.0), provider("c", 3, 1.0)];
        apply_explicit_order(&mut providers, &["c".to_string(), "a".to_string()]);
        let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
