//! Turn request and outcome types — the surface the loop exposes upward.

use crate::message::SessionId;
use crate::provider::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of turn this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A user is waiting for the answer.
    #[default]
    Interactive,
    /// A self-initiated background turn. History is read from the primary
    /// interactive session, and the final text carries a delivery decision.
    Autonomous,
}

/// Immutable input to one loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// The incoming user (or trigger) text
    pub text: String,

    /// Which session this turn belongs to
    pub session_id: SessionId,

    /// Model override; falls back to the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// How many conversational turns of history to load
    pub history_limit: usize,

    #[serde(default)]
    pub kind: MessageKind,

    /// References to attached media (URLs or opaque ids)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
}

impl TurnRequest {
    pub fn new(text: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            text: text.into(),
            session_id,
            model_id: None,
            history_limit: 20,
            kind: MessageKind::Interactive,
            media: Vec::new(),
        }
    }
}

/// One tool call the turn executed, with its result, for the caller's
/// benefit (the model already saw the result as a tool message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
}

/// The final product of one turn.
///
/// Always returned — degraded answers (no-progress, iteration limit) are
/// still outcomes, never errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// The user-facing answer text
    pub final_text: String,

    /// Reasoning trace, when one was extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Tool calls executed during the turn, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ExecutedToolCall>,

    /// How many loop iterations ran
    pub iterations: u32,

    /// Token usage across the turn
    pub usage: Usage,

    /// For autonomous turns: whether the agent decided the message should
    /// actually be delivered. None for interactive turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver: Option<bool>,

    /// When the turn finished
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_interactive() {
        let req = TurnRequest::new("hello", SessionId::from("s1"));
        assert_eq!(req.kind, MessageKind::Interactive);
        assert_eq!(req.history_limit, 20);
        assert!(req.model_id.is_none());
    }

    #[test]
    fn outcome_serialization_skips_empty_fields() {
        let outcome = TurnOutcome {
            final_text: "done".into(),
            reasoning: None,
            tool_calls: vec![],
            iterations: 1,
            usage: Usage::default(),
            deliver: None,
            finished_at: Utc::now(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("reasoning"));
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("deliver"));
    }

    #[test]
    fn message_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Autonomous).unwrap(),
            "\"autonomous\""
        );
    }
}
