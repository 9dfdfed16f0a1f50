//! Reply normalization.
//!
//! Converts a raw provider reply into a uniform shape: clean visible
//! text, validated tool calls, and separated reasoning. Structured tool
//! calls take precedence; when a backend returns none, the visible text
//! is probed for inline call grammars in the order the model's
//! capability profile specifies.

pub mod inline;
pub mod reasoning;

use cogito_core::capability::{InlineGrammar, ModelCapabilities};
use cogito_core::provider::ProviderReply;
use cogito_core::tool::ToolCall;
use tracing::{debug, warn};

/// The uniform result of normalizing one provider reply.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<String>,
}

impl Normalized {
    /// True when the reply carried neither usable text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }
}

/// Normalizes provider replies against a model's capability profile.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    /// Paragraph-mass ratio for the untagged reasoning heuristic
    split_ratio: f32,
}

impl Normalizer {
    pub fn new(split_ratio: f32) -> Self {
        Self { split_ratio }
    }

    pub fn normalize(
        &self,
        reply: &ProviderReply,
        known_tools: &[String],
        caps: &ModelCapabilities,
    ) -> Normalized {
        let mut tool_calls = structured_calls(reply, known_tools);
        let mut text = reply.text.clone();

        if tool_calls.is_empty() && !known_tools.is_empty() {
            for grammar in &caps.inline_grammars {
                let (residual, calls) = match grammar {
                    InlineGrammar::NamedTag => inline::extract_named_tag(&text, known_tools),
                    InlineGrammar::WrapperTag => inline::extract_wrapper_tag(&text, known_tools),
                    InlineGrammar::BarePrefix => inline::extract_bare_prefix(&text, known_tools),
                };
                if !calls.is_empty() {
                    debug!(grammar = ?grammar, count = calls.len(), "Extracted inline tool calls");
                    text = residual;
                    tool_calls = calls;
                    break;
                }
            }
        }

        let mut reasoning = reply.reasoning.clone().filter(|r| !r.trim().is_empty());
        if reasoning.is_none() {
            let (residual, extracted) = reasoning::extract_think_block(&text);
            if extracted.is_some() {
                text = residual;
                reasoning = extracted;
            } else if caps.native_reasoning && tool_calls.is_empty() {
                if let Some((lead, answer)) = reasoning::heuristic_split(&text, self.split_ratio) {
                    text = answer;
                    reasoning = Some(lead);
                }
            }
        }

        Normalized {
            text: collapse_whitespace(&text),
            tool_calls,
            reasoning,
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self { split_ratio: 0.7 }
    }
}

fn structured_calls(reply: &ProviderReply, known_tools: &[String]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for raw in &reply.tool_calls {
        if !known_tools.iter().any(|t| t == &raw.name) {
            warn!(tool = %raw.name, "Dropping call for unknown tool");
            continue;
        }
        match serde_json::from_str(&raw.arguments) {
            Ok(arguments) => calls.push(ToolCall {
                id: raw.id.clone(),
                name: raw.name.clone(),
                arguments,
            }),
            Err(e) => {
                warn!(tool = %raw.name, error = %e, "Dropping call with unparseable arguments");
            }
        }
    }
    calls
}

/// Strip hallucinated conversation transcripts. Some models prefix
/// their reply with turn labels ("Assistant: ..."), sometimes inventing
/// earlier turns; only the final labelled segment is the actual reply.
pub fn strip_turn_labels(text: &str) -> String {
    if !text.contains("Assistant:") {
        return text.to_string();
    }
    match text.rsplit("Assistant:").next() {
        Some(last) => last.trim().to_string(),
        None => text.to_string(),
    }
}

/// Collapse runs of blank lines and trim the edges, preserving
/// paragraph breaks.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out.trim().to_string()
}
