//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider-level stream deltas into the
//! higher-level events a frontend consumes: incremental text and
//! reasoning, tool lifecycle, and a single terminal event per turn.

use cogito_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent during a streamed turn.
///
/// Every turn ends with exactly one terminal event: `done` on success
/// (including fallback replies), `error` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Incremental reasoning text.
    Thinking { content: String },

    /// Incremental visible reply text.
    Content { content: String },

    /// The agent is invoking a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool finished executing.
    ToolResult {
        id: String,
        name: String,
        output: serde_json::Value,
        success: bool,
    },

    /// The turn failed. Terminal.
    Error { message: String },

    /// The turn completed. Terminal.
    Done {
        session_id: String,
        usage: Usage,
        iterations: u32,
        tool_calls_made: u32,
        deliver: Option<bool>,
    },
}

impl AgentStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = AgentStreamEvent::Content {
            content: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn tool_call_roundtrip() {
        let event = AgentStreamEvent::ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            arguments: serde_json::json!({"query": "x"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AgentStreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "tool_call");
    }

    #[test]
    fn terminal_events() {
        assert!(AgentStreamEvent::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(AgentStreamEvent::Done {
            session_id: "s".into(),
            usage: Usage::default(),
            iterations: 1,
            tool_calls_made: 0,
            deliver: None,
        }
        .is_terminal());
        assert!(!AgentStreamEvent::Thinking {
            content: "x".into()
        }
        .is_terminal());
    }
}
