//! Canonical usage accounting shape (spec §4.7 Usage Accountant).
//!
//! Every provider reports token counts under its own field names; adaptors
//! deserialize straight into this struct via `serde(alias = ...)` so the
//! orchestrator never branches on provider identity to read usage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(
        alias = "prompt_tokens",
        alias = "input_tokens",
        alias = "prompt_eval_count",
        alias = "promptTokenCount",
        default
    )]
    pub input_tokens: u32,

    #[serde(
        alias = "completion_tokens",
        alias = "output_tokens",
        alias = "eval_count",
        alias = "candidatesTokenCount",
        default
    )]
    pub output_tokens: u32,

    /// Cache-read tokens already counted within `input_tokens` (every
    /// provider in the matrix bills these at `cached_input_ratio` rather
    /// than subtracting them, spec §4.7 rule a). Zero for providers that
    /// don't report cache reads.
    #[serde(alias = "cache_read_input_tokens", alias = "cachedContentTokenCount", default)]
    pub cached_input_tokens: u32,

    /// Anthropic's ephemeral cache-write tokens, split by TTL. Not aliased
    /// from a single provider field name: Anthropic reports one
    /// `cache_creation_input_tokens` total plus a breakdown object, so
    /// adaptors that support cache writes set these directly rather than
    /// relying on `serde` to pick the right key out of a nested shape.
    #[serde(default)]
    pub cache_write_5m_tokens: u32,
    #[serde(default)]
    pub cache_write_1h_tokens: u32,

    /// Set by the streaming token estimator fallback when a provider's final
    /// frame carries no usage block (SPEC_FULL §11).
    #[serde(default)]
    pub estimated: bool,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// `input_tokens` already includes cache reads (OpenAI/Anthropic/Gemini
    /// convention); this is the portion billed at the plain input ratio.
    pub fn uncached_input_tokens(&self) -> u32 {
        self.input_tokens.saturating_sub(self.cached_input_tokens)
    }

    pub fn estimate_from_text(prompt_chars: usize, completion_text: &str) -> Self {
        let completion_tokens = completion_text.split_whitespace().count().max(1) as u32;
        let prompt_tokens = (prompt_chars / 4).max(1) as u32;
        Usage {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
            estimated: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_openai_field_names() {
        let raw = serde_json::json!({"prompt_tokens": 10, "completion_tokens": 20});
        let usage: Usage = serde_json::from_value(raw).unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 20);
        assert_eq!(usage.total_tokens(), 30);
    }

    #[test]
    fn deserializes_anthropic_field_names() {
        let raw = serde_json::json!({"input_tokens": 5, "output_tokens": 7});
        let usage: Usage = serde_json::from_value(raw).unwrap();
        assert_eq!(usage.total_tokens(), 12);
    }

    #[test]
    fn deserializes_google_field_names() {
        let raw = serde_json::json!({"promptTokenCount": 3, "candidatesTokenCount": 4});
        let usage: Usage = serde_json::from_value(raw).unwrap();
        assert_eq!(usage.total_tokens(), 7);
    }

    #[test]
    fn estimate_is_flagged() {
        let usage = Usage::estimate_from_text(400, "hello there friend");
        assert!(usage.estimated);
        assert_eq!(usage.output_tokens, 3);
    }
}
