use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    #[serde(alias = "reliability_first")]
    ReliabilityFirst,
    #[serde(alias = "cost_optimized")]
    CostOptimized,
    #[serde(alias = "latency_optimized")]
    LatencyOptimized,
    #[serde(alias = "round_robin")]
    RoundRobin,
    Weighted,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::ReliabilityFirst,
        Strategy::CostOptimized,
        Strategy::LatencyOptimized,
        Strategy::RoundRobin,
        Strategy::Weighted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ReliabilityFirst => "reliability-first",
            Strategy::CostOptimized => "cost-optimized",
            Strategy::LatencyOptimized => "latency-optimized",
            Strategy::RoundRobin => "round-robin",
            Strategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("unknown routing strategy '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Active,
    Disabled,
    Degraded,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Active => "active",
            ProviderStatus::Disabled => "disabled",
            ProviderStatus::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    #[default]
    Bearer,
    ApiKey,
    None,
}

fn default_score() -> f64 {
    100.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

/// A backend able to service routed requests.
///
/// Everything except the telemetry block is owned by the administrative
/// flow; the engine only rewrites `health_score`, `success_rate`,
/// `average_latency_ms`, `total_requests_today`, `last_error` and
/// `last_checked_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub base_url: String,
    #[serde(default)]
    pub auth_scheme: AuthScheme,
    #[serde(default)]
    pub auth_header: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default = "default_score")]
    pub health_score: f64,
    #[serde(default = "default_score")]
    pub success_rate: f64,
    #[serde(default)]
    pub average_latency_ms: f64,
    #[serde(default)]
    pub total_requests_today: u64,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub rate_limit_per_day: Option<u32>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Provider {
    /// Builds an active, enabled provider with default telemetry.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            display_name: name.clone(),
            name,
            base_url: base_url.into(),
            auth_scheme: AuthScheme::None,
            auth_header: None,
            api_key_env: None,
            models: Vec::new(),
            status: ProviderStatus::Active,
            is_enabled: true,
            is_primary: false,
            health_score: default_score(),
            success_rate: default_score(),
            average_latency_ms: 0.0,
            total_requests_today: 0,
            priority: default_priority(),
            weight: default_weight(),
            rate_limit_per_minute: None,
            rate_limit_per_day: None,
            last_error: None,
            last_checked_at: None,
        }
    }

    pub fn is_routable(&self) -> bool {
        self.is_enabled && self.status == ProviderStatus::Active
    }

    pub fn serves_model(&self, model: &str) -> bool {
        self.models.is_empty()
            || self
                .models
                .iter()
                .any(|entry| entry.eq_ignore_ascii_case(model))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingRule {
    pub name: String,
    pub rule_type: String,
    #[serde(default)]
    pub provider_order: Vec<String>,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub load_balance_strategy: Option<Strategy>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

/// Primary plus ordered fallbacks for one call. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub primary_provider: Provider,
    pub fallback_providers: Vec<Provider>,
    pub rule: Option<RoutingRule>,
    pub strategy: Strategy,
    pub reason: String,
}

impl RoutingDecision {
    pub fn candidates(&self) -> impl Iterator<Item = &Provider> {
        std::iter::once(&self.primary_provider).chain(self.fallback_providers.iter())
    }

    pub fn candidate_names(&self) -> Vec<String> {
        self.candidates().map(|p| p.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationBucket {
    Hour,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthMetricSample {
    pub sample_id: String,
    pub provider_id: String,
    pub recorded_at: DateTime<Utc>,
    pub bucket: AggregationBucket,
    pub bucket_start: DateTime<Utc>,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
    pub total_tokens: u64,
    pub total_cost_micro: u64,
}

/// Telemetry fields written back after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthUpdate {
    pub health_score: f64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub total_requests_today: u64,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthUpdate {
    pub fn apply(&self, provider: &mut Provider) {
        provider.health_score = self.health_score;
        provider.success_rate = self.success_rate;
        provider.average_latency_ms = self.average_latency_ms;
        provider.total_requests_today = self.total_requests_today;
        provider.last_error = self.last_error.clone();
        provider.last_checked_at = Some(self.checked_at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderStats {
    pub name: String,
    pub status: ProviderStatus,
    pub health_score: f64,
    pub average_latency_ms: f64,
    pub success_rate: f64,
    pub total_requests_today: u64,
    pub is_primary: bool,
    pub priority: i32,
}

impl From<&Provider> for ProviderStats {
    fn from(provider: &Provider) -> Self {
        Self {
            name: provider.name.clone(),
            status: provider.status,
            health_score: provider.health_score,
            average_latency_ms: provider.average_latency_ms,
            success_rate: provider.success_rate,
            total_requests_today: provider.total_requests_today,
            is_primary: provider.is_primary,
            priority: provider.priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteOptions {
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    #[serde(default)]
    pub exclude_providers: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_preferred(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn excluding(mut self, provider: impl Into<String>) -> Self {
        self.exclude_providers.push(provider.into());
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay_ms = Some(retry_delay_ms);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome<T> {
    pub result: T,
    pub provider: Provider,
    pub latency_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeOutcome {
    pub provider: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Heuristic step sizes for the health feedback loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthTuning {
    pub success_health_step: f64,
    pub success_rate_step: f64,
    pub failure_health_penalty: f64,
    pub failure_rate_penalty: f64,
    pub latency_smoothing: f64,
    pub preferred_health_floor: f64,
}

impl Default for HealthTuning {
    fn default() -> Self {
        Self {
            success_health_step: 1.0,
            success_rate_step: 0.1,
            failure_health_penalty: 10.0,
            failure_rate_penalty: 1.0,
            latency_smoothing: 0.1,
            preferred_health_floor: 70.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogDocument {
    #[serde(default)]
    pub revision: String,
    #[serde(default = "Vec::new")]
    pub providers: Vec<Provider>,
    #[serde(default = "Vec::new")]
    pub rules: Vec<RoutingRule>,
    #[serde(default)]
    pub cost_tiers: HashMap<String, u8>,
    #[serde(default)]
    pub tuning: HealthTuning,
}
