//! Usage Accountant (C7, spec §4.7).
//!
//! Translates heterogeneous provider usage records into the canonical shape
//! and turns that into a quota delta via the pricing entry resolved for the
//! request's channel/model (spec §4.6 FINALIZE_QUOTA).

use crate::model::PricingEntry;
use crate::usage::Usage;
use serde::{Deserialize, Serialize};

/// Canonical usage shape every adaptor's final frame is normalized into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Cache-read tokens, already subtracted from `prompt_tokens` for
    /// display but billed at `cached_input_ratio` (spec §4.7 rule a).
    pub cached_prompt_tokens: u32,
    pub cached_completion_tokens: u32,
    /// Cache-write tokens never reduce prompt; recorded separately in log
    /// metadata (spec §4.7 rule b).
    pub cache_write_5m: u32,
    pub cache_write_1h: u32,
    pub tool_invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub quota_cost: i64,
}

impl NormalizedUsage {
    /// Builds the normalized shape from a provider adaptor's raw [`Usage`]
    /// plus whatever tool invocations RECONCILE_USAGE attributed to this
    /// request. No adaptor in the matrix reports cached *completion* tokens
    /// today, so `cached_completion_tokens` stays zero here; it exists on
    /// this struct for billing-log symmetry and a future provider to fill.
    pub fn from_provider_usage(usage: &Usage, tool_invocations: Vec<ToolInvocation>) -> Self {
        NormalizedUsage {
            prompt_tokens: usage.uncached_input_tokens(),
            completion_tokens: usage.output_tokens,
            cached_prompt_tokens: usage.cached_input_tokens,
            cached_completion_tokens: 0,
            cache_write_5m: usage.cache_write_5m_tokens,
            cache_write_1h: usage.cache_write_1h_tokens,
            tool_invocations,
        }
    }
}

/// `FINALIZE_QUOTA` arithmetic (spec §4.6):
/// `actual = prompt*input + completion*completion_ratio + cached_prompt*cached_input_ratio
///          + cache_write_5m*r5m + cache_write_1h*r1h + sum(tool_usd * quota_per_usd)`
pub fn finalize_quota(usage: &NormalizedUsage, pricing: &PricingEntry) -> i64 {
    let input_cost = token_cost(usage.prompt_tokens, pricing.input_ratio);
    let completion_cost = token_cost(usage.completion_tokens, pricing.completion_ratio);
    let cached_cost = token_cost(usage.cached_prompt_tokens, pricing.cached_input_ratio());
    let write_5m_cost = token_cost(usage.cache_write_5m, pricing.cache_write_5m_ratio.unwrap_or(0.0));
    let write_1h_cost = token_cost(usage.cache_write_1h, pricing.cache_write_1h_ratio.unwrap_or(0.0));
    let tool_cost: i64 = usage.tool_invocations.iter().map(|t| t.quota_cost).sum();

    input_cost + completion_cost + cached_cost + write_5m_cost + write_1h_cost + tool_cost
}

/// A ratio-priced token's contribution to the quota delta: `tokens * ratio`,
/// rounded to the nearest integer quota unit (spec §4.6's FINALIZE_QUOTA
/// formula multiplies token counts by ratios directly — `ratio_to_usd_per_million`
/// in [`crate::pricing`] is a separate display/lookup helper, not part of
/// this arithmetic).
fn token_cost(tokens: u32, ratio: f64) -> i64 {
    if tokens == 0 || ratio == 0.0 {
        return 0;
    }
    ((tokens as f64) * ratio).round() as i64
}

/// `PRE_CONSUME` estimate (spec §4.6):
/// `estimated = prompt_estimate*input_ratio + max_completion*completion_ratio + sum(tool_costs_if_declared)`
pub fn estimate_quota(
    prompt_token_estimate: u32,
    configured_max_completion: u32,
    pricing: &PricingEntry,
    declared_tool_costs: &[i64],
) -> i64 {
    token_cost(prompt_token_estimate, pricing.input_ratio)
        + token_cost(configured_max_completion, pricing.completion_ratio)
        + declared_tool_costs.iter().sum::<i64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QUOTA_PER_USD;

    fn pricing(input: f64, completion: f64) -> PricingEntry {
        PricingEntry { input_ratio: input, completion_ratio: completion, ..Default::default() }
    }

    #[test]
    fn tooling_priced_scenario_matches_spec_example() {
        // spec §8 scenario 4: ratio 0.03 input, 0.06 output ~ USD-scaled
        // ratios (>= 0.001), 500/500 tokens, one web_search call at
        // usd_per_call 0.025.
        let usage = NormalizedUsage {
            prompt_tokens: 500,
            completion_tokens: 500,
            tool_invocations: vec![ToolInvocation {
                name: "web_search".into(),
                quota_cost: (0.025 * QUOTA_PER_USD as f64).round() as i64,
            }],
            ..Default::default()
        };
        let price = pricing(0.03, 0.06);
        let actual = finalize_quota(&usage, &price);
        assert_eq!(actual, 15 + 30 + 12500);
    }

    #[test]
    fn quota_pre_consume_refund_scenario() {
        // spec §8 scenario 5: 1/1 ratio, 100 prompt + 50 completion = 150.
        let usage = NormalizedUsage { prompt_tokens: 100, completion_tokens: 50, ..Default::default() };
        let price = pricing(1.0, 1.0);
        assert_eq!(finalize_quota(&usage, &price), 150);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        let usage = NormalizedUsage::default();
        let price = pricing(0.03, 0.06);
        assert_eq!(finalize_quota(&usage, &price), 0);
    }

    #[test]
    fn provider_usage_subtracts_cache_reads_from_prompt_display() {
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 50,
            cached_input_tokens: 400,
            ..Default::default()
        };
        let normalized = NormalizedUsage::from_provider_usage(&usage, vec![]);
        assert_eq!(normalized.prompt_tokens, 600);
        assert_eq!(normalized.cached_prompt_tokens, 400);
    }

    #[test]
    fn cache_write_tokens_never_reduce_prompt() {
        let usage = NormalizedUsage {
            prompt_tokens: 1000,
            cache_write_5m: 200,
            ..Default::default()
        };
        let mut price = pricing(0.03, 0.06);
        price.cache_write_5m_ratio = Some(0.0375);
        let actual = finalize_quota(&usage, &price);
        let prompt_only = finalize_quota(
            &NormalizedUsage { prompt_tokens: 1000, ..Default::default() },
            &price,
        );
        assert!(actual > prompt_only);
    }
}
