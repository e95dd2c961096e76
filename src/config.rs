use anyhow::{Context, Result};
use std::str::FromStr;
use std::{env, path::Path, path::PathBuf};

use crate::repository::DEFAULT_SAMPLE_CAPACITY;
use crate::types::{CatalogDocument, Strategy};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_strategy: Strategy,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub client_timeout_ms: u64,
    pub probe_path: String,
    pub probe_timeout_ms: u64,
    /// Zero leaves health checks to whoever calls `run_health_checks`.
    pub health_check_interval_secs: u64,
    pub retryable_markers: Vec<String>,
    /// Metric samples retained in memory before the oldest are dropped.
    pub metric_sample_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::ReliabilityFirst,
            max_retries: 2,
            retry_delay_ms: 1_000,
            client_timeout_ms: 30_000,
            probe_path: "/models".into(),
            probe_timeout_ms: 5_000,
            health_check_interval_secs: 0,
            retryable_markers: Vec::new(),
            metric_sample_capacity: DEFAULT_SAMPLE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub server: ServerConfig,
    pub catalog_path: PathBuf,
    pub engine: EngineSettings,
    pub catalog: CatalogDocument,
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("ROUTER_BIND").unwrap_or_else(|_| "0.0.0.0:9099".to_string());
        let workers = env_parse("ROUTER_WORKERS").unwrap_or_else(num_cpus::get_physical);

        let catalog_path = PathBuf::from(
            env::var("ROUTER_CATALOG_PATH").unwrap_or_else(|_| "./configs/catalog.json".into()),
        );

        let defaults = EngineSettings::default();
        let default_strategy = match env::var("ROUTER_DEFAULT_STRATEGY") {
            Ok(value) if !value.trim().is_empty() => Strategy::from_str(&value)
                .map_err(anyhow::Error::msg)
                .context("parse ROUTER_DEFAULT_STRATEGY")?,
            _ => defaults.default_strategy,
        };
        let retryable_markers = env::var("ROUTER_RETRYABLE_MARKERS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|marker| !marker.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let engine = EngineSettings {
            default_strategy,
            max_retries: env_parse("ROUTER_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay_ms: env_parse("ROUTER_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay_ms),
            client_timeout_ms: env_parse("ROUTER_CLIENT_TIMEOUT_MS")
                .unwrap_or(defaults.client_timeout_ms),
            probe_path: env::var("ROUTER_PROBE_PATH").unwrap_or(defaults.probe_path),
            probe_timeout_ms: env_parse("ROUTER_PROBE_TIMEOUT_MS")
                .unwrap_or(defaults.probe_timeout_ms),
            health_check_interval_secs: env_parse("ROUTER_HEALTH_CHECK_INTERVAL_SECS")
                .unwrap_or(defaults.health_check_interval_secs),
            retryable_markers,
            metric_sample_capacity: env_parse("ROUTER_METRIC_SAMPLE_CAPACITY")
                .unwrap_or(defaults.metric_sample_capacity),
        };

        let catalog = load_catalog(&catalog_path)?;

        Ok(Self {
            server: ServerConfig { bind_addr, workers },
            catalog_path,
            engine,
            catalog,
        })
    }
}

/// Reads a catalog document, accepting JSON or YAML.
pub fn load_catalog(path: &Path) -> Result<CatalogDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read catalog file at {:?}", path))?;
    parse_catalog(&raw)
}

pub fn parse_catalog(raw: &str) -> Result<CatalogDocument> {
    let doc: CatalogDocument = serde_json::from_str(raw)
        .or_else(|_| serde_yaml::from_str(raw))
        .with_context(|| "parse catalog document")?;
    for provider in &doc.providers {
        if provider.name.trim().is_empty() {
            anyhow::bail!("catalog provider {} has an empty name", provider.id);
        }
        let telemetry = [
            ("health_score", provider.health_score),
            ("success_rate", provider.success_rate),
            ("average_latency_ms", provider.average_latency_ms),
            ("weight", provider.weight),
        ];
        if let Some((field, _)) = telemetry.iter().find(|(_, value)| !value.is_finite()) {
            anyhow::bail!("catalog provider {} has a non-finite {field}", provider.name);
        }
    }
    Ok(doc)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
