use async_trait::async_trait;
use provider_router::client::ProviderClient;
use provider_router::config::EngineSettings;
use provider_router::engine::RouterEngine;
use provider_router::errors::{ProviderError, RouterError};
use provider_router::prober::Probe;
use provider_router::repository::{InMemoryRepository, ProviderRepository};
use provider_router::types::{Provider, ProviderStatus, RouteOptions, RoutingRule, Strategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn provider(name: &str, priority: i32) -> Provider {
    let mut p = Provider::new(name, format!("http://{name}.invalid/v1"));
    p.id = format!("id-{name}");
    p.priority = priority;
    p
}

fn rule(name: &str, rule_type: &str) -> RoutingRule {
    RoutingRule {
        name: name.into(),
        rule_type: rule_type.into(),
        provider_order: Vec::new(),
        fallback_chain: Vec::new(),
        max_retries: None,
        retry_delay_ms: None,
        load_balance_strategy: None,
        is_active: true,
        priority: 10,
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        retry_delay_ms: 1,
        ..EngineSettings::default()
    }
}

fn engine_with(
    providers: Vec<Provider>,
    rules: Vec<RoutingRule>,
) -> (RouterEngine, Arc<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::new(providers, rules));
    let engine = RouterEngine::new(repo.clone(), settings()).expect("engine");
    (engine, repo)
}

async fn stored(repo: &InMemoryRepository, name: &str) -> Provider {
    repo.find_provider(name)
        .await
        .expect("repository read")
        .expect("provider present")
}

#[tokio::test]
async fn single_provider_retries_transient_failure_then_exhausts() {
    let (engine, repo) = engine_with(vec![provider("solo", 10)], Vec::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let err = engine
        .run(&RouteOptions::new(), move |_client, _provider| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::with_status(503, "service unavailable"))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.attempted(), Some(&["solo".to_string()][..]));
    assert!(err.last_error().map(RouterError::is_retryable).unwrap_or(false));
    assert_eq!(err.public_message(), "service temporarily unavailable");

    let solo = stored(&repo, "solo").await;
    assert_eq!(solo.health_score, 70.0);
    assert_eq!(solo.success_rate, 97.0);
    assert_eq!(solo.total_requests_today, 3);
    assert_eq!(repo.samples().len(), 3);
}

#[tokio::test]
async fn healthier_provider_is_primary_under_reliability_first() {
    let mut a = provider("a", 10);
    a.health_score = 90.0;
    let mut b = provider("b", 10);
    b.health_score = 40.0;
    let (engine, _repo) = engine_with(vec![b, a], Vec::new());

    let decision = engine
        .select_provider(&RouteOptions::new().with_strategy(Strategy::ReliabilityFirst))
        .await
        .expect("decision");
    assert_eq!(decision.primary_provider.name, "a");
    assert_eq!(decision.candidate_names(), vec!["a", "b"]);
}

#[tokio::test]
async fn unhealthy_preferred_provider_does_not_short_circuit() {
    let mut a = provider("a", 10);
    a.health_score = 90.0;
    let mut b = provider("b", 5);
    b.health_score = 50.0;
    let (engine, _repo) = engine_with(vec![a, b], Vec::new());

    let decision = engine
        .select_provider(&RouteOptions::new().with_preferred("b"))
        .await
        .expect("decision");
    assert_eq!(decision.primary_provider.name, "a");
    assert!(decision.reason.starts_with("reliability-first"));
}

#[tokio::test]
async fn healthy_preferred_provider_leads_with_catalog_order_fallbacks() {
    let mut cheap = provider("groq", 30);
    cheap.health_score = 80.0;
    let (engine, _repo) = engine_with(
        vec![provider("first", 10), provider("second", 20), cheap],
        Vec::new(),
    );

    let decision = engine
        .select_provider(
            &RouteOptions::new()
                .with_strategy(Strategy::CostOptimized)
                .with_preferred("second"),
        )
        .await
        .expect("decision");
    assert_eq!(decision.candidate_names(), vec!["second", "first", "groq"]);
    assert!(decision.reason.starts_with("preferred provider second"));
}

#[tokio::test]
async fn nothing_enabled_means_no_decision_and_no_calls() {
    let mut off = provider("off", 10);
    off.is_enabled = false;
    let mut drained = provider("drained", 10);
    drained.status = ProviderStatus::Disabled;
    let (engine, _repo) = engine_with(vec![off, drained], Vec::new());

    assert!(engine.select_provider(&RouteOptions::new()).await.is_none());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let err = engine
        .run(&RouteOptions::new(), move |_client, _provider| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(())
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoProvidersAvailable(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn terminal_error_fails_over_without_retrying() {
    let (engine, repo) = engine_with(vec![provider("a", 10), provider("b", 20)], Vec::new());
    let calls_a = Arc::new(AtomicUsize::new(0));

    let counter = calls_a.clone();
    let outcome = engine
        .run(&RouteOptions::new(), move |_client, provider| {
            let counter = counter.clone();
            async move {
                if provider.name == "a" {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::with_status(401, "invalid api key"))
                } else {
                    Ok(format!("served by {}", provider.name))
                }
            }
        })
        .await
        .expect("failover succeeds");

    assert_eq!(calls_a.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.provider.name, "b");
    assert_eq!(outcome.result, "served by b");
    assert_eq!(outcome.attempts, 2);
    assert_eq!(stored(&repo, "a").await.health_score, 90.0);
    assert_eq!(stored(&repo, "b").await.total_requests_today, 1);
}

#[tokio::test]
async fn transient_error_retries_same_provider() {
    let (engine, repo) = engine_with(vec![provider("a", 10), provider("b", 20)], Vec::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let outcome = engine
        .run(&RouteOptions::new(), move |client, provider| {
            let counter = counter.clone();
            async move {
                assert_eq!(client.provider(), provider.name);
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::new("upstream Timeout after 30s"))
                } else {
                    Ok(provider.name)
                }
            }
        })
        .await
        .expect("retry succeeds");

    assert_eq!(outcome.result, "a");
    assert_eq!(outcome.attempts, 2);
    let a = stored(&repo, "a").await;
    assert_eq!(a.health_score, 91.0);
    assert_eq!(a.total_requests_today, 2);
    assert_eq!(stored(&repo, "b").await.total_requests_today, 0);
}

#[tokio::test]
async fn first_success_sets_latency_exactly() {
    let (engine, _repo) = engine_with(vec![provider("a", 10)], Vec::new());
    let outcome = engine
        .run(&RouteOptions::new(), |_client, _provider| async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok::<_, ProviderError>(())
        })
        .await
        .expect("success");

    let stats = engine.get_provider_stats().await;
    assert_eq!(stats[0].average_latency_ms, outcome.latency_ms as f64);
}

#[tokio::test]
async fn broken_client_configuration_moves_to_next_candidate() {
    let mut broken = provider("broken", 1);
    broken.base_url = "::::".into();
    let (engine, repo) = engine_with(vec![broken, provider("good", 20)], Vec::new());

    let outcome = engine
        .run(&RouteOptions::new(), |_client, provider| async move {
            Ok::<_, ProviderError>(provider.name)
        })
        .await
        .expect("second provider serves");
    assert_eq!(outcome.result, "good");
    assert_eq!(stored(&repo, "broken").await.health_score, 90.0);
}

#[tokio::test]
async fn exhaustion_names_every_attempted_provider() {
    let (engine, _repo) = engine_with(vec![provider("a", 10), provider("b", 20)], Vec::new());
    let err = engine
        .run(&RouteOptions::new().with_retries(0, 1), |_client, provider| async move {
            Err::<(), _>(ProviderError::with_status(500, format!("{} exploded", provider.name)))
        })
        .await
        .unwrap_err();

    assert_eq!(err.attempted(), Some(&["a".to_string(), "b".to_string()][..]));
    let last = err.last_error().expect("last error");
    assert!(last.to_string().contains("b exploded"));
}

#[tokio::test]
async fn rule_fallback_chain_and_retry_budget_apply() {
    let mut chain = rule("default", "reliability-first");
    chain.fallback_chain = vec!["c".into(), "b".into()];
    chain.max_retries = Some(0);
    let (engine, _repo) = engine_with(
        vec![provider("a", 10), provider("b", 20), provider("c", 30)],
        vec![chain],
    );

    let decision = engine
        .select_provider(&RouteOptions::new())
        .await
        .expect("decision");
    assert_eq!(decision.candidate_names(), vec!["a", "c", "b"]);
    assert_eq!(decision.rule.as_ref().map(|r| r.name.as_str()), Some("default"));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _ = engine
        .run(&RouteOptions::new(), move |_client, _provider| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::with_status(503, "busy"))
            }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rule_strategy_applies_when_caller_does_not_choose() {
    let mut spread = rule("spread", "reliability-first");
    spread.load_balance_strategy = Some(Strategy::RoundRobin);
    spread.provider_order = vec!["c".into(), "a".into(), "b".into()];
    let (engine, _repo) = engine_with(
        vec![provider("a", 10), provider("b", 20), provider("c", 30)],
        vec![spread],
    );

    let mut primaries = Vec::new();
    for _ in 0..3 {
        let decision = engine
            .select_provider(&RouteOptions::new())
            .await
            .expect("decision");
        assert_eq!(decision.strategy, Strategy::RoundRobin);
        primaries.push(decision.primary_provider.name);
    }
    assert_eq!(primaries, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn exclusions_and_model_filter_narrow_candidates() {
    let mut a = provider("a", 10);
    a.models = vec!["gpt-4o".into()];
    let mut b = provider("b", 20);
    b.models = vec!["claude-3-haiku".into()];
    let c = provider("c", 30);
    let (engine, _repo) = engine_with(vec![a, b, c], Vec::new());

    let decision = engine
        .select_provider(&RouteOptions::new().with_model("claude-3-haiku"))
        .await
        .expect("decision");
    assert_eq!(decision.candidate_names(), vec!["b", "c"]);

    let decision = engine
        .select_provider(&RouteOptions::new().excluding("a").excluding("c"))
        .await
        .expect("decision");
    assert_eq!(decision.candidate_names(), vec!["b"]);

    assert!(engine
        .select_provider(&RouteOptions::new().excluding("a").excluding("b").excluding("c"))
        .await
        .is_none());
}

#[tokio::test]
async fn spent_daily_quota_skips_provider() {
    let mut capped = provider("capped", 1);
    capped.rate_limit_per_day = Some(5);
    capped.total_requests_today = 5;
    let (engine, repo) = engine_with(vec![capped, provider("open", 20)], Vec::new());

    let outcome = engine
        .run(&RouteOptions::new(), |_client, provider| async move {
            Ok::<_, ProviderError>(provider.name)
        })
        .await
        .expect("open provider serves");
    assert_eq!(outcome.result, "open");
    assert_eq!(outcome.attempts, 1);
    assert_eq!(stored(&repo, "capped").await.total_requests_today, 5);
}

#[tokio::test]
async fn retries_draw_from_the_per_minute_bucket() {
    let mut capped = provider("capped", 10);
    capped.rate_limit_per_minute = Some(1);
    let (engine, repo) = engine_with(vec![capped], Vec::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let err = engine
        .run(&RouteOptions::new(), move |_client, _provider| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::with_status(503, "service unavailable"))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempted(), Some(&["capped".to_string()][..]));
    assert!(matches!(
        err.last_error(),
        Some(RouterError::QuotaExhausted(name)) if name == "capped"
    ));
    assert_eq!(stored(&repo, "capped").await.total_requests_today, 1);
}

#[tokio::test]
async fn retries_stop_at_the_daily_cap_then_fail_over() {
    let mut capped = provider("capped", 10);
    capped.rate_limit_per_day = Some(2);
    let (engine, repo) = engine_with(vec![capped, provider("spare", 20)], Vec::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let outcome = engine
        .run(&RouteOptions::new().with_retries(5, 1), move |_client, provider| {
            let counter = counter.clone();
            async move {
                if provider.name == "capped" {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::with_status(429, "rate limited"))
                } else {
                    Ok(provider.name)
                }
            }
        })
        .await
        .expect("spare provider serves");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.result, "spare");
    assert_eq!(outcome.attempts, 3);
    assert_eq!(stored(&repo, "capped").await.total_requests_today, 2);
}

#[tokio::test]
async fn preferred_fallbacks_ignore_rule_provider_order() {
    let mut ordered = rule("ordered", "reliability-first");
    ordered.provider_order = vec!["c".into(), "b".into(), "a".into()];
    let (engine, _repo) = engine_with(
        vec![provider("a", 10), provider("b", 20), provider("c", 30)],
        vec![ordered],
    );

    let decision = engine
        .select_provider(&RouteOptions::new().with_preferred("b"))
        .await
        .expect("decision");
    assert_eq!(decision.candidate_names(), vec!["b", "a", "c"]);
    assert_eq!(decision.rule.as_ref().map(|r| r.name.as_str()), Some("ordered"));
}

#[tokio::test]
async fn stats_are_stable_without_traffic() {
    let mut off = provider("off", 5);
    off.is_enabled = false;
    let (engine, _repo) = engine_with(vec![provider("a", 10), off], Vec::new());

    let first = engine.get_provider_stats().await;
    let second = engine.get_provider_stats().await;
    pretty_assertions::assert_eq!(first, second);
    let names: Vec<&str> = first.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["off", "a"]);
}

struct ScriptedProbe {
    failing: Vec<String>,
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, _client: &ProviderClient, provider: &Provider) -> Result<(), ProviderError> {
        if self.failing.contains(&provider.name) {
            Err(ProviderError::with_status(503, "probe rejected"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn health_checks_feed_the_same_reports() {
    let mut off = provider("off", 30);
    off.status = ProviderStatus::Disabled;
    let (engine, repo) = engine_with(vec![provider("up", 10), provider("down", 20), off], Vec::new());
    let engine = engine.with_probe(Arc::new(ScriptedProbe {
        failing: vec!["down".into()],
    }));

    let mut outcomes = engine.run_health_checks().await;
    outcomes.sort_by(|a, b| a.provider.cmp(&b.provider));
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].provider, "down");
    assert!(!outcomes[0].healthy);
    assert_eq!(outcomes[0].error.as_deref(), Some("probe rejected"));
    assert_eq!(outcomes[1].provider, "up");
    assert!(outcomes[1].healthy);

    assert_eq!(stored(&repo, "down").await.health_score, 90.0);
    assert_eq!(stored(&repo, "up").await.total_requests_today, 1);
    assert_eq!(stored(&repo, "off").await.total_requests_today, 0);
}

#[tokio::test]
async fn replaced_rules_take_effect_on_next_selection() {
    let mut a = provider("a", 10);
    a.average_latency_ms = 300.0;
    let mut b = provider("b", 20);
    b.average_latency_ms = 120.0;
    let (engine, repo) = engine_with(vec![a, b], Vec::new());
    assert_eq!(
        engine
            .select_provider(&RouteOptions::new())
            .await
            .expect("decision")
            .primary_provider
            .name,
        "a"
    );

    let mut flipped = rule("flipped", "reliability-first");
    flipped.load_balance_strategy = Some(Strategy::LatencyOptimized);
    repo.replace_rules(vec![flipped]);

    let decision = engine
        .select_provider(&RouteOptions::new())
        .await
        .expect("decision");
    assert_eq!(decision.strategy, Strategy::LatencyOptimized);
    assert_eq!(decision.primary_provider.name, "b");
}
