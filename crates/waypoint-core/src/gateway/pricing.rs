//! Call pricing for node attempts that report tokens but no explicit cost.
//!
//! Lookup order: configured `[[pricing]]` entries, then a small built-in
//! table, then a conservative fallback rate.

use waypoint_types::config::ModelPricing;

struct PricingEntry {
    model_pattern: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

const DEFAULT_PRICING: &[PricingEntry] = &[
    PricingEntry {
        model_pattern: "claude-sonnet-4",
        input_cost_per_million: 3.0,
        output_cost_per_million: 15.0,
    },
    PricingEntry {
        model_pattern: "claude-opus-4",
        input_cost_per_million: 15.0,
        output_cost_per_million: 75.0,
    },
    PricingEntry {
        model_pattern: "claude-haiku",
        input_cost_per_million: 0.25,
        output_cost_per_million: 1.25,
    },
    PricingEntry {
        model_pattern: "gpt-4o-mini",
        input_cost_per_million: 0.15,
        output_cost_per_million: 0.60,
    },
    PricingEntry {
        model_pattern: "gpt-4o",
        input_cost_per_million: 2.50,
        output_cost_per_million: 10.0,
    },
];

/// Prefix match; a trailing `*` in the pattern is ignored.
fn matches_pattern(model: &str, pattern: &str) -> bool {
    model.starts_with(pattern.trim_end_matches('*'))
}

/// Cost in USD of a call to `model` with the given token counts.
pub fn cost_for(model: &str, tokens_in: u64, tokens_out: u64, overrides: &[ModelPricing]) -> f64 {
    if let Some(p) = overrides
        .iter()
        .find(|p| matches_pattern(model, &p.model_pattern))
    {
        return compute_cost(
            tokens_in,
            tokens_out,
            p.input_cost_per_million,
            p.output_cost_per_million,
        );
    }

    if let Some(entry) = DEFAULT_PRICING
        .iter()
        .find(|e| matches_pattern(model, e.model_pattern))
    {
        return compute_cost(
            tokens_in,
            tokens_out,
            entry.input_cost_per_million,
            entry.output_cost_per_million,
        );
    }

    compute_cost(tokens_in, tokens_out, FALLBACK_INPUT_COST, FALLBACK_OUTPUT_COST)
}

fn compute_cost(
    tokens_in: u64,
    tokens_out: u64,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
) -> f64 {
    let input_cost = (tokens_in as f64 / 1_000_000.0) * input_cost_per_million;
    let output_cost = (tokens_out as f64 / 1_000_000.0) * output_cost_per_million;
    input_cost + output_cost
}

/// Format a cost as a short dollar string (`$0.004`, `$1.25`).
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${cost:.3}")
    } else {
        format!("${cost:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_default_table() {
        let cost = cost_for("claude-sonnet-4-20250514", 1_000_000, 100_000, &[]);
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn override_wins_over_default() {
        let overrides = vec![ModelPricing {
            model_pattern: "claude-sonnet-*".to_string(),
            input_cost_per_million: 1.0,
            output_cost_per_million: 1.0,
        }];
        let cost = cost_for("claude-sonnet-4-20250514", 1_000_000, 1_000_000, &overrides);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn longer_prefix_listed_first_matches_first() {
        let mini = cost_for("gpt-4o-mini-2024", 1_000_000, 0, &[]);
        assert!((mini - 0.15).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        let cost = cost_for("mystery-model", 1_000_000, 1_000_000, &[]);
        assert!((cost - 20.0).abs() < 1e-9);
    }

    #[test]
    fn format_cost_precision() {
        assert_eq!(format_cost(0.004), "$0.004");
        assert_eq!(format_cost(1.254), "$1.25");
    }
}
