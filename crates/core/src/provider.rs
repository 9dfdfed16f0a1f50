//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send an assembled context to a model backend and
//! get a reply back, either as a complete message or as a stream of deltas.
//! The loop calls `complete()` or `stream()` without knowing which backend
//! is behind the trait; new backends are added by implementing this
//! contract, never by touching the loop.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "llama-3.3-70b", "deepseek/deepseek-r1")
    pub model: String,

    /// The ordered context messages (system first)
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call. When empty, adapters must not
    /// put a tools field on the wire at all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// A request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
            stop: Vec::new(),
        }
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) reply from a provider.
///
/// `text` may be empty. `tool_calls` carries structured calls when the
/// backend returns them natively; inline-text encodings are left in `text`
/// for the normalizer to deal with. `reasoning` is only set when the
/// backend has an explicit reasoning field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderReply {
    /// The generated text (possibly empty)
    pub text: String,

    /// Structured tool calls, when the backend supplies them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<crate::message::MessageToolCall>,

    /// Explicit reasoning trace, when the backend supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Token usage statistics, when the backend reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A partial tool call inside a streaming delta.
///
/// Backends split one call across many deltas: the first fragment for an
/// index usually carries the id and name, later fragments append argument
/// text. Fragments with the same index are merged by the consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Position of this call in the reply; the merge key
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument text to append for this index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A single delta in a streaming reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Partial content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Partial reasoning trace (backends with a native reasoning channel)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Tool call fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,

    /// Whether this is the final delta
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only on the final delta, if at all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Adapters never retry; retry policy belongs to the loop.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "local").
    fn name(&self) -> &str;

    /// Send a request and get a complete reply.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderReply, ProviderError>;

    /// Send a request and get a stream of reply deltas.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single terminal delta, so backends without real streaming still work.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamDelta, ProviderError>>,
        ProviderError,
    > {
        let reply = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let tool_calls = reply
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ToolCallFragment {
                index: i as u32,
                id: Some(tc.id),
                name: Some(tc.name),
                arguments: Some(tc.arguments),
            })
            .collect();
        let _ = tx
            .send(Ok(StreamDelta {
                content: Some(reply.text),
                reasoning: reply.reasoning,
                tool_calls,
                done: true,
                usage: reply.usage,
            }))
            .await;
        Ok(rx)
    }
}
