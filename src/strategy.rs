//! Candidate ranking.
//!
//! Every strategy takes the eligible providers in base order (catalog order,
//! or a rule's explicit order) and returns them reordered: index 0 is the
//! primary, the rest is the fallback chain.

use crate::health::RotationCursors;
use crate::types::{Provider, Strategy};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;

const WORST_COST_TIER: u8 = u8::MAX;

const DEFAULT_COST_TIERS: &[(&str, u8)] = &[
    ("groq", 1),
    ("deepseek", 1),
    ("together", 2),
    ("mistral", 2),
    ("gemini", 2),
    ("google", 2),
    ("openrouter", 3),
    ("openai", 3),
    ("azure", 3),
    ("anthropic", 4),
];

/// Static provider-name to cost-tier lookup; lower is cheaper.
#[derive(Debug, Clone)]
pub struct CostTiers {
    tiers: HashMap<String, u8>,
}

impl Default for CostTiers {
    fn default() -> Self {
        Self {
            tiers: DEFAULT_COST_TIERS
                .iter()
                .map(|(name, tier)| (name.to_string(), *tier))
                .collect(),
        }
    }
}

impl CostTiers {
    /// Default table with `overrides` layered on top.
    pub fn with_overrides(overrides: &HashMap<String, u8>) -> Self {
        let mut tiers = Self::default();
        for (name, tier) in overrides {
            tiers.tiers.insert(name.to_ascii_lowercase(), *tier);
        }
        tiers
    }

    pub fn tier(&self, provider_name: &str) -> u8 {
        self.tiers
            .get(&provider_name.to_ascii_lowercase())
            .copied()
            .unwrap_or(WORST_COST_TIER)
    }
}

pub struct RankContext<'a> {
    pub cost_tiers: &'a CostTiers,
    pub cursors: &'a RotationCursors,
    pub cursor_key: &'a str,
}

#[derive(Debug, Clone)]
pub struct Ranking {
    pub ordered: Vec<Provider>,
    pub reason: String,
    pub preferred: bool,
}

/// Preferred provider wins outright when it is eligible and healthy enough;
/// the remaining providers follow in base order.
pub fn preferred_first(
    providers: &[Provider],
    preferred: &str,
    health_floor: f64,
) -> Option<Ranking> {
    let chosen = providers.iter().position(|provider| {
        provider.name == preferred && provider.is_enabled && provider.health_score >= health_floor
    })?;
    let mut ordered = Vec::with_capacity(providers.len());
    ordered.push(providers[chosen].clone());
    ordered.extend(
        providers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != chosen)
            .map(|(_, provider)| provider.clone()),
    );
    let reason = format!(
        "preferred provider {} (health {:.1})",
        preferred, providers[chosen].health_score
    );
    Some(Ranking {
        ordered,
        reason,
        preferred: true,
    })
}

pub fn rank(strategy: Strategy, providers: &[Provider], ctx: &RankContext<'_>) -> Option<Ranking> {
    if providers.is_empty() {
        return None;
    }
    let mut ordered = providers.to_vec();
    let reason = match strategy {
        Strategy::ReliabilityFirst => {
            rank_reliability(&mut ordered);
            format!(
                "reliability-first: {} score {:.1}{}",
                ordered[0].name,
                reliability_score(&ordered[0]),
                if ordered[0].is_primary { " (primary)" } else { "" }
            )
        }
        Strategy::CostOptimized => {
            rank_cost(&mut ordered, ctx.cost_tiers);
            format!(
                "cost-optimized: {} tier {}",
                ordered[0].name,
                ctx.cost_tiers.tier(&ordered[0].name)
            )
        }
        Strategy::LatencyOptimized => {
            rank_latency(&mut ordered);
            if ordered[0].average_latency_ms > 0.0 {
                format!(
                    "latency-optimized: {} avg {:.0}ms",
                    ordered[0].name, ordered[0].average_latency_ms
                )
            } else {
                format!("latency-optimized: {} (no latency measured yet)", ordered[0].name)
            }
        }
        Strategy::RoundRobin => {
            let position = ctx.cursors.advance(ctx.cursor_key, ordered.len());
            ordered.rotate_left(position);
            format!(
                "round-robin: {} at position {}/{}",
                ordered[0].name,
                position,
                ordered.len()
            )
        }
        Strategy::Weighted => {
            let mut rng = rand::thread_rng();
            match weighted_pick(&ordered, &mut rng) {
                Some(idx) => {
                    let drawn = ordered.remove(idx);
                    let reason = format!(
                        "weighted: drew {} (weight {:.2} of {:.2})",
                        drawn.name,
                        drawn.weight,
                        total_weight(providers)
                    );
                    ordered.insert(0, drawn);
                    reason
                }
                None => format!("weighted: no positive weight, using {}", ordered[0].name),
            }
        }
    };
    Some(Ranking {
        ordered,
        reason,
        preferred: false,
    })
}

pub fn reliability_score(provider: &Provider) -> f64 {
    let priority = f64::from(provider.priority.min(100));
    provider.health_score * 0.5 + provider.success_rate * 0.3 + (100.0 - priority) * 0.2
}

fn rank_reliability(providers: &mut [Provider]) {
    providers.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then_with(|| reliability_score(b).total_cmp(&reliability_score(a)))
    });
}

fn rank_cost(providers: &mut [Provider], tiers: &CostTiers) {
    providers.sort_by(|a, b| {
        tiers
            .tier(&a.name)
            .cmp(&tiers.tier(&b.name))
            .then_with(|| b.health_score.total_cmp(&a.health_score))
    });
}

/// Never-measured providers (average 0) sort after every measured one and
/// among themselves by priority.
fn rank_latency(providers: &mut [Provider]) {
    providers.sort_by(|a, b| {
        let a_measured = a.average_latency_ms > 0.0;
        let b_measured = b.average_latency_ms > 0.0;
        match (a_measured, b_measured) {
            (true, true) => a.average_latency_ms.total_cmp(&b.average_latency_ms),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a.priority.cmp(&b.priority),
        }
    });
}

fn total_weight(providers: &[Provider]) -> f64 {
    providers
        .iter()
        .map(|provider| provider.weight)
        .filter(|weight| *weight > 0.0)
        .sum()
}

/// Cumulative-sum draw over positive weights; `None` when none are positive.
pub fn weighted_pick<R: Rng + ?Sized>(providers: &[Provider], rng: &mut R) -> Option<usize> {
    let total = total_weight(providers);
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let target = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (idx, provider) in providers.iter().enumerate() {
        if provider.weight <= 0.0 {
            continue;
        }
        cumulative += provider.weight;
        last_positive = Some(idx);
        if target < cumulative {
            return Some(idx);
        }
    }
    last_positive
}
