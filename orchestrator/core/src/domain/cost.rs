// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Model Tier & Cost Model
//!
//! Every cycle stage is assigned a reasoning-cost tier. Strategic, high-stakes
//! stages run on the high-cost tier; operational stages run on the standard
//! tier. Token usage priced through the tier table yields the USD figures that
//! feed the monthly spend ledger and the budget gate.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure tier lookup, pricing and budget arithmetic
//! - **Consumers:** `application::cost_allocator`, `application::cycle_engine`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reasoning-cost tier of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    #[serde(alias = "opus", alias = "high")]
    HighCost,
    #[serde(alias = "sonnet", alias = "standard")]
    StandardCost,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::HighCost => "high_cost",
            ModelTier::StandardCost => "standard_cost",
        }
    }

    /// USD per one million tokens.
    pub fn pricing(&self) -> TierPricing {
        match self {
            ModelTier::HighCost => TierPricing {
                input_per_million: 15.0,
                output_per_million: 75.0,
            },
            ModelTier::StandardCost => TierPricing {
                input_per_million: 3.0,
                output_per_million: 15.0,
            },
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Per-stage tier overrides, as stored in `MODEL_TIER_OVERRIDES`.
pub type TierOverrides = HashMap<String, ModelTier>;

/// Token counts reported by (or estimated for) one stage invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn cost_usd(&self, tier: ModelTier) -> f64 {
        let pricing = tier.pricing();
        (self.input_tokens as f64 / 1_000_000.0) * pricing.input_per_million
            + (self.output_tokens as f64 / 1_000_000.0) * pricing.output_per_million
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
    }
}

/// Default allocation: (node, tier, rationale).
const DEFAULT_ALLOCATION: &[(&str, ModelTier, &str)] = &[
    (
        "set_strategy",
        ModelTier::HighCost,
        "Strategic direction has the longest-lived impact on the account portfolio",
    ),
    (
        "collect_intel",
        ModelTier::StandardCost,
        "Research is high-throughput with moderate reasoning depth",
    ),
    (
        "analyze_cycle",
        ModelTier::StandardCost,
        "Pattern recognition over prior metrics needs moderate reasoning only",
    ),
    (
        "plan_content",
        ModelTier::StandardCost,
        "Planning fans out per account and is priced for volume",
    ),
    (
        "approve_plan",
        ModelTier::HighCost,
        "Approval is the quality gate in front of paid production",
    ),
    (
        "human_review_gate",
        ModelTier::HighCost,
        "AI-side processing of a human decision inherits the approval tier",
    ),
    (
        "produce",
        ModelTier::StandardCost,
        "Production orchestration is mostly tool dispatch",
    ),
    (
        "post",
        ModelTier::StandardCost,
        "Publishing is operational",
    ),
    (
        "measure",
        ModelTier::StandardCost,
        "Measurement summarisation is structured output",
    ),
    (
        "reflect",
        ModelTier::StandardCost,
        "Self-reflection is structured output with moderate complexity",
    ),
];

/// Tier for a node. Overrides win; unknown nodes fall back to the standard tier.
pub fn get_model_for_node(node: &str, overrides: &TierOverrides) -> ModelTier {
    if let Some(tier) = overrides.get(node) {
        return *tier;
    }
    DEFAULT_ALLOCATION
        .iter()
        .find(|(name, _, _)| *name == node)
        .map(|(_, tier, _)| *tier)
        .unwrap_or(ModelTier::StandardCost)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeAllocation {
    pub node: String,
    pub tier: ModelTier,
    pub rationale: String,
}

/// Full allocation table with overrides applied.
pub fn model_allocation(overrides: &TierOverrides) -> Vec<NodeAllocation> {
    DEFAULT_ALLOCATION
        .iter()
        .map(|(node, _, rationale)| NodeAllocation {
            node: node.to_string(),
            tier: get_model_for_node(node, overrides),
            rationale: rationale.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCost {
    pub node: String,
    pub tier: ModelTier,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleCostEstimate {
    pub total_cost_usd: f64,
    pub breakdown: Vec<NodeCost>,
}

/// Price per-node token estimates. Breakdown order follows the input order.
pub fn estimate_cycle_cost(
    estimates: &[(String, TokenUsage)],
    overrides: &TierOverrides,
) -> CycleCostEstimate {
    let breakdown: Vec<NodeCost> = estimates
        .iter()
        .map(|(node, usage)| {
            let tier = get_model_for_node(node, overrides);
            NodeCost {
                node: node.clone(),
                tier,
                cost_usd: usage.cost_usd(tier),
            }
        })
        .collect();

    CycleCostEstimate {
        total_cost_usd: breakdown.iter().map(|c| c.cost_usd).sum(),
        breakdown,
    }
}

/// Ledger key of the monthly window containing `at`.
pub fn month_key(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Budget gate predicate: block once projected spend would pass the ceiling.
pub fn exceeds_budget(current_spend: f64, task_cost: f64, monthly_limit: f64) -> bool {
    current_spend + task_cost > monthly_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allocation() {
        let none = TierOverrides::new();
        assert_eq!(get_model_for_node("set_strategy", &none), ModelTier::HighCost);
        assert_eq!(get_model_for_node("approve_plan", &none), ModelTier::HighCost);
        assert_eq!(get_model_for_node("collect_intel", &none), ModelTier::StandardCost);
        assert_eq!(get_model_for_node("not_a_node", &none), ModelTier::StandardCost);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut overrides = TierOverrides::new();
        overrides.insert("set_strategy".into(), ModelTier::StandardCost);
        overrides.insert("unknown".into(), ModelTier::HighCost);
        assert_eq!(get_model_for_node("set_strategy", &overrides), ModelTier::StandardCost);
        assert_eq!(get_model_for_node("unknown", &overrides), ModelTier::HighCost);
    }

    #[test]
    fn test_overrides_parse_legacy_names() {
        let overrides: TierOverrides =
            serde_json::from_str(r#"{"plan_content":"opus","approve_plan":"standard_cost"}"#).unwrap();
        assert_eq!(overrides["plan_content"], ModelTier::HighCost);
        assert_eq!(overrides["approve_plan"], ModelTier::StandardCost);
    }

    #[test]
    fn test_high_cost_strictly_more_expensive() {
        for (input, output) in [(1, 0), (0, 1), (1, 1), (1_000, 250), (2_000_000, 500_000)] {
            let usage = TokenUsage::new(input, output);
            assert!(
                usage.cost_usd(ModelTier::HighCost) > usage.cost_usd(ModelTier::StandardCost),
                "ordering broken for {input}/{output}"
            );
        }
    }

    #[test]
    fn test_estimate_cycle_cost() {
        let estimates = vec![
            ("set_strategy".to_string(), TokenUsage::new(1_000_000, 0)),
            ("collect_intel".to_string(), TokenUsage::new(0, 1_000_000)),
        ];
        let estimate = estimate_cycle_cost(&estimates, &TierOverrides::new());
        assert_eq!(estimate.breakdown.len(), 2);
        assert!((estimate.breakdown[0].cost_usd - 15.0).abs() < 1e-9);
        assert!((estimate.breakdown[1].cost_usd - 15.0).abs() < 1e-9);
        assert!((estimate.total_cost_usd - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_gate_blocks_overrun() {
        assert!(exceeds_budget(2990.0, 15.0, 3000.0));
        assert!(!exceeds_budget(2985.0, 15.0, 3000.0));
    }

    #[test]
    fn test_model_allocation_applies_overrides() {
        let mut overrides = TierOverrides::new();
        overrides.insert("reflect".into(), ModelTier::HighCost);
        let table = model_allocation(&overrides);
        let reflect = table.iter().find(|a| a.node == "reflect").unwrap();
        assert_eq!(reflect.tier, ModelTier::HighCost);
        assert!(!reflect.rationale.is_empty());
    }
}
