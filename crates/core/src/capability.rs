//! Per-model capability lookup.
//!
//! Backends differ in ways the loop has to know about up front: whether a
//! model accepts tool schemas at all, whether it has a native reasoning
//! channel, how big its context window is, and which inline tool-call
//! grammar it tends to emit. Lookup is by case-insensitive substring on
//! the model id; unknown models get a conservative default.

use serde::{Deserialize, Serialize};

/// The inline tool-call grammars a model may emit instead of (or in
/// addition to) structured tool calls. Order matters: the normalizer
/// probes grammars in the order the capability entry lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InlineGrammar {
    /// `<tool_name>{...json...}</tool_name>` — one tag per tool name
    NamedTag,
    /// `<tool_call>{"name": ..., "arguments": ...}</tool_call>`
    WrapperTag,
    /// Bare `tool_name {...json...}` with no wrapping tag
    BarePrefix,
}

/// What the loop needs to know about a model before calling it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Whether tool schemas may be sent at all. When false the request
    /// omits tools entirely rather than sending an empty list.
    pub supports_tools: bool,

    /// Whether the backend returns an explicit reasoning field.
    pub native_reasoning: bool,

    /// Context window size in tokens.
    pub context_window: usize,

    /// Inline grammars to probe, in priority order.
    pub inline_grammars: Vec<InlineGrammar>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            native_reasoning: false,
            context_window: 8_192,
            inline_grammars: vec![
                InlineGrammar::NamedTag,
                InlineGrammar::WrapperTag,
                InlineGrammar::BarePrefix,
            ],
        }
    }
}

impl ModelCapabilities {
    /// Look up capabilities for a model id.
    pub fn for_model(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        let mut caps = Self::default();

        // Window sizes for the model families we route to.
        if id.contains("llama-3.3") || id.contains("llama-3.1") {
            caps.context_window = 65_536;
        } else if id.contains("claude") {
            caps.context_window = 200_000;
        } else if id.contains("gpt-4o") || id.contains("deepseek") {
            caps.context_window = 128_000;
        } else if id.contains("grok") {
            caps.context_window = 131_072;
        } else if id.contains("mistral") || id.contains("qwen") {
            caps.context_window = 32_768;
        }

        // Models with a native reasoning channel.
        if id.contains("deepseek-r1")
            || id.contains("qwq")
            || id.contains("o1")
            || id.contains("reasoning")
        {
            caps.native_reasoning = true;
        }

        // Models known to reject tool schemas outright.
        if id.contains("uncensored") || id.contains("dolphin") {
            caps.supports_tools = false;
        }

        // Small local models mostly emit the wrapper-tag form first.
        if id.contains("qwen") || id.contains("hermes") {
            caps.inline_grammars = vec![
                InlineGrammar::WrapperTag,
                InlineGrammar::NamedTag,
                InlineGrammar::BarePrefix,
            ];
        }

        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_gets_defaults() {
        let caps = ModelCapabilities::for_model("some-new-model");
        assert!(caps.supports_tools);
        assert!(!caps.native_reasoning);
        assert_eq!(caps.context_window, 8_192);
        assert_eq!(caps.inline_grammars.len(), 3);
    }

    #[test]
    fn uncensored_models_lack_tools() {
        let caps = ModelCapabilities::for_model("venice-uncensored");
        assert!(!caps.supports_tools);
    }

    #[test]
    fn reasoning_models_detected() {
        assert!(ModelCapabilities::for_model("deepseek/deepseek-r1").native_reasoning);
        assert!(ModelCapabilities::for_model("Qwen/QwQ-32B").native_reasoning);
        assert!(!ModelCapabilities::for_model("llama-3.3-70b").native_reasoning);
    }

    #[test]
    fn window_sizes_by_family() {
        assert_eq!(
            ModelCapabilities::for_model("llama-3.3-70b").context_window,
            65_536
        );
        assert_eq!(
            ModelCapabilities::for_model("anthropic/claude-sonnet-4").context_window,
            200_000
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let caps = ModelCapabilities::for_model("Dolphin-Mixtral");
        assert!(!caps.supports_tools);
    }
}
