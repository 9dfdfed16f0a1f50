//! Streaming turn execution.
//!
//! Runs the same state machine as `run_turn` but forwards incremental
//! provider deltas to the caller as they arrive. Tool-call fragments
//! are reassembled locally by index; the normalizer and fallback rules
//! are shared with the non-streaming path, so both converge on the same
//! persisted history. Every stream ends with exactly one terminal
//! event.

use std::collections::BTreeMap;

use chrono::Utc;
use cogito_core::capability::ModelCapabilities;
use cogito_core::error::Error;
use cogito_core::event::DomainEvent;
use cogito_core::message::{Message, MessageToolCall};
use cogito_core::provider::{ProviderReply, ProviderRequest, ToolCallFragment, Usage};
use cogito_core::turn::{ExecutedToolCall, TurnRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::loop_runner::{
    accumulate_usage, AgentLoop, ITERATION_LIMIT_REPLY, NO_PROGRESS_REPLY,
};
use crate::stream_event::AgentStreamEvent;

/// Reassembles tool calls from streamed fragments, keyed by index.
#[derive(Debug, Default)]
pub(crate) struct FragmentBuffer {
    slots: BTreeMap<u32, Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl FragmentBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn merge(&mut self, fragment: &ToolCallFragment) {
        let slot = self.slots.entry(fragment.index).or_default();
        if let Some(id) = &fragment.id {
            slot.id = Some(id.clone());
        }
        if let Some(name) = &fragment.name {
            slot.name = Some(name.clone());
        }
        if let Some(arguments) = &fragment.arguments {
            slot.arguments.push_str(arguments);
        }
    }

    /// Finalize into raw calls, in index order. Slots that never
    /// received a name are incomplete and dropped.
    pub(crate) fn into_calls(self) -> Vec<MessageToolCall> {
        self.slots
            .into_values()
            .filter_map(|slot| {
                let name = slot.name?;
                Some(MessageToolCall {
                    id: slot
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    arguments: if slot.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        slot.arguments
                    },
                })
            })
            .collect()
    }
}

impl AgentLoop {
    /// Run one turn, emitting events as the reply streams in.
    ///
    /// The returned channel yields incremental `thinking`/`content`
    /// text, tool lifecycle events, and a single terminal `done` or
    /// `error`.
    pub fn run_turn_stream(
        self: Arc<Self>,
        request: TurnRequest,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if let Err(e) = self.stream_inner(&request, &tx).await {
                warn!("Streamed turn failed: {e}");
                self.bus.publish(DomainEvent::ErrorOccurred {
                    context: "streamed turn".into(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        });
        rx
    }

    async fn stream_inner(
        &self,
        request: &TurnRequest,
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<(), Error> {
        let model = self.resolve_model(request);
        let caps = ModelCapabilities::for_model(&model);
        let session = self.session_for(request);

        let mut context = self.prepare_context(request, &caps).await?;
        self.state
            .append(&session, Message::user(&request.text))
            .await?;

        let known_tools = self.tools.names();
        let mut tools_enabled = caps.supports_tools && !self.tools.is_empty();
        let mut usage = Usage::default();
        let mut executed: Vec<ExecutedToolCall> = Vec::new();

        for iteration in 1..=self.max_iterations {
            let window = self.with_iteration_warning(&context, iteration);

            let reply = loop {
                match self
                    .stream_one_reply(&model, &window, tools_enabled, tx)
                    .await
                {
                    Ok(reply) => break reply,
                    Err(e) if tools_enabled && e.suggests_tool_rejection() => {
                        warn!(model = %model, error = %e, "Retrying stream without tools");
                        tools_enabled = false;
                        self.bus.publish(DomainEvent::ToolsDisabledRetry {
                            model: model.clone(),
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            accumulate_usage(&mut usage, reply.usage, &window, &reply.text);
            let normalized = self.normalizer.normalize(&reply, &known_tools, &caps);

            if !normalized.tool_calls.is_empty() {
                for call in &normalized.tool_calls {
                    let _ = tx
                        .send(AgentStreamEvent::ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        })
                        .await;
                }

                let before = executed.len();
                self.execute_tool_calls(&session, &normalized, &mut context, &mut executed)
                    .await?;

                for (call, record) in normalized.tool_calls.iter().zip(&executed[before..]) {
                    let _ = tx
                        .send(AgentStreamEvent::ToolResult {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            output: record.result.clone(),
                            success: record.success,
                        })
                        .await;
                }
                continue;
            }

            if !normalized.text.is_empty() {
                let (final_text, deliver) = self.post_process(&normalized.text, request.kind);
                self.state
                    .append(&session, Message::assistant(&final_text))
                    .await?;
                self.bus.publish(DomainEvent::TurnCompleted {
                    session_id: session.to_string(),
                    model: model.clone(),
                    iterations: iteration,
                    tokens_used: usage.total_tokens,
                    timestamp: Utc::now(),
                });
                info!(
                    session_id = %session,
                    iterations = iteration,
                    "Streamed turn completed"
                );
                let _ = tx
                    .send(AgentStreamEvent::Done {
                        session_id: session.to_string(),
                        usage,
                        iterations: iteration,
                        tool_calls_made: executed.len() as u32,
                        deliver,
                    })
                    .await;
                return Ok(());
            }

            warn!(iteration, "Stream yielded neither text nor tool calls");
            return self
                .stream_fall_back(request, &session, NO_PROGRESS_REPLY, iteration, usage, &executed, tx)
                .await;
        }

        info!(max_iterations = self.max_iterations, "Stream iteration limit reached");
        self.stream_fall_back(
            request,
            &session,
            ITERATION_LIMIT_REPLY,
            self.max_iterations,
            usage,
            &executed,
            tx,
        )
        .await
    }

    /// Drive one provider stream to its terminal delta, forwarding text
    /// and buffering tool fragments, then fold it into a reply.
    async fn stream_one_reply(
        &self,
        model: &str,
        window: &[Message],
        tools_enabled: bool,
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<ProviderReply, cogito_core::error::ProviderError> {
        let mut provider_request = ProviderRequest::new(model, window.to_vec());
        provider_request.temperature = self.temperature;
        provider_request.max_tokens = self.max_tokens;
        if tools_enabled {
            provider_request.tools = self.tools.definitions();
        }

        let mut deltas = self.provider.stream(provider_request).await?;

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut fragments = FragmentBuffer::new();
        let mut usage = None;

        while let Some(delta) = deltas.recv().await {
            let delta = delta?;

            if let Some(chunk) = &delta.reasoning {
                if !chunk.is_empty() {
                    reasoning.push_str(chunk);
                    let _ = tx
                        .send(AgentStreamEvent::Thinking {
                            content: chunk.clone(),
                        })
                        .await;
                }
            }
            if let Some(chunk) = &delta.content {
                if !chunk.is_empty() {
                    text.push_str(chunk);
                    let _ = tx
                        .send(AgentStreamEvent::Content {
                            content: chunk.clone(),
                        })
                        .await;
                }
            }
            for fragment in &delta.tool_calls {
                fragments.merge(fragment);
            }
            if delta.usage.is_some() {
                usage = delta.usage;
            }
            if delta.done {
                break;
            }
        }

        Ok(ProviderReply {
            text,
            tool_calls: fragments.into_calls(),
            reasoning: if reasoning.is_empty() {
                None
            } else {
                Some(reasoning)
            },
            usage,
            model: model.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_fall_back(
        &self,
        request: &TurnRequest,
        session: &cogito_core::message::SessionId,
        text: &str,
        iteration: u32,
        usage: Usage,
        executed: &[ExecutedToolCall],
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<(), Error> {
        self.state.append(session, Message::assistant(text)).await?;
        let deliver = match request.kind {
            cogito_core::turn::MessageKind::Autonomous => Some(true),
            cogito_core::turn::MessageKind::Interactive => None,
        };
        let _ = tx
            .send(AgentStreamEvent::Content {
                content: text.to_string(),
            })
            .await;
        let _ = tx
            .send(AgentStreamEvent::Done {
                session_id: session.to_string(),
                usage,
                iterations: iteration,
                tool_calls_made: executed.len() as u32,
                deliver,
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: arguments.map(String::from),
        }
    }

    #[test]
    fn fragments_accumulate_arguments() {
        let mut buffer = FragmentBuffer::new();
        buffer.merge(&fragment(0, Some("call_1"), Some("search"), Some("{\"que")));
        buffer.merge(&fragment(0, None, None, Some("ry\": \"x\"}")));

        let calls = buffer.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, r#"{"query": "x"}"#);
    }

    #[test]
    fn parallel_calls_ordered_by_index() {
        let mut buffer = FragmentBuffer::new();
        buffer.merge(&fragment(1, Some("b"), Some("second"), Some("{}")));
        buffer.merge(&fragment(0, Some("a"), Some("first"), Some("{}")));

        let calls = buffer.into_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn nameless_slot_is_dropped() {
        let mut buffer = FragmentBuffer::new();
        buffer.merge(&fragment(0, Some("call_1"), None, Some("{}")));
        assert!(buffer.into_calls().is_empty());
    }

    #[test]
    fn missing_id_and_arguments_get_defaults() {
        let mut buffer = FragmentBuffer::new();
        buffer.merge(&fragment(0, None, Some("search"), None));

        let calls = buffer.into_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn empty_buffer_yields_no_calls() {
        assert!(FragmentBuffer::new().into_calls().is_empty());
    }
}
