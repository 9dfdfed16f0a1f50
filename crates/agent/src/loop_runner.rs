//! The turn execution loop.
//!
//! Drives one turn to completion: assemble context, invoke the
//! provider, normalize the reply, then either finish with text, execute
//! the requested tools and go around again, or fall back. Degraded
//! endings (no progress, iteration limit) are ordinary outcomes; only
//! infrastructure failures surface as errors.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use cogito_config::AppConfig;
use cogito_core::capability::ModelCapabilities;
use cogito_core::error::Error;
use cogito_core::event::{DomainEvent, EventBus};
use cogito_core::message::{Message, MessageToolCall, Role, SessionId};
use cogito_core::provider::{Provider, ProviderRequest, Usage};
use cogito_core::tool::ToolRegistry;
use cogito_core::store::StateStore;
use cogito_core::turn::{ExecutedToolCall, MessageKind, TurnOutcome, TurnRequest};
use tracing::{debug, info, warn};

use crate::context::token::{estimate_messages_tokens, estimate_tokens};
use crate::context::{BudgetManager, ContextBuilder};
use crate::normalizer::{strip_turn_labels, Normalized, Normalizer};
use crate::summarizer::Summarizer;

/// Reply when a provider returns neither text nor tool calls.
pub(crate) const NO_PROGRESS_REPLY: &str =
    "I apologize, but I encountered an issue generating a response. Please try again.";

/// Reply when the iteration limit is exhausted without a final answer.
pub(crate) const ITERATION_LIMIT_REPLY: &str = "I got caught in a loop of tool calls and \
couldn't produce a final answer. Please try rephrasing your request.";

/// How much history the pre-turn compaction pass looks at.
const COMPACT_PROBE: usize = 1000;

/// Orchestrates provider calls and tool execution for one turn at a time.
pub struct AgentLoop {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) builder: ContextBuilder,
    summarizer: Option<Arc<Summarizer>>,
    pub(crate) bus: Arc<EventBus>,

    model: String,
    pub(crate) temperature: f32,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) max_iterations: u32,

    /// Non-system messages kept verbatim when compacting history
    keep_recent: usize,

    budget: BudgetManager,
    pub(crate) normalizer: Normalizer,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        state: Arc<dyn StateStore>,
        tools: Arc<ToolRegistry>,
        builder: ContextBuilder,
        bus: Arc<EventBus>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            state,
            tools,
            builder,
            summarizer: None,
            bus,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 10,
            keep_recent: 20,
            budget: BudgetManager::default(),
            normalizer: Normalizer::default(),
        }
    }

    /// Construct from application configuration.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        state: Arc<dyn StateStore>,
        tools: Arc<ToolRegistry>,
        builder: ContextBuilder,
        bus: Arc<EventBus>,
    ) -> Self {
        Self::new(provider, state, tools, builder, bus, &config.default_model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(Some(config.default_max_tokens))
            .with_max_iterations(config.r#loop.max_iterations)
            .with_keep_recent(config.context.keep_recent)
            .with_budget(BudgetManager::new(config.context.summary_threshold))
            .with_normalizer(Normalizer::new(config.context.reasoning_split_ratio))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    pub fn with_budget(mut self, budget: BudgetManager) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Attach a summarizer for pre-turn history compaction.
    pub fn with_summarizer(mut self, summarizer: Arc<Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Run one turn to completion.
    pub async fn run_turn(&self, request: &TurnRequest) -> Result<TurnOutcome, Error> {
        let model = self.resolve_model(request);
        let caps = ModelCapabilities::for_model(&model);
        let session = self.builder.target_session(request).clone();

        info!(
            session_id = %session,
            model = %model,
            kind = ?request.kind,
            "Starting turn"
        );

        let mut context = self.prepare_context(request, &caps).await?;

        // The user message is persisted after assembly; the builder
        // appends the current text itself, so persisting first would
        // duplicate it in the context.
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
                let mut provider_request =
                    ProviderRequest::new(model.clone(), window.clone());
                provider_request.temperature = self.temperature;
                provider_request.max_tokens = self.max_tokens;
                if tools_enabled {
                    provider_request.tools = self.tools.definitions();
                }

                match self.provider.complete(provider_request).await {
                    Ok(reply) => break reply,
                    Err(e) if tools_enabled && e.suggests_tool_rejection() => {
                        warn!(model = %model, error = %e, "Retrying without tools");
                        tools_enabled = false;
                        self.bus.publish(DomainEvent::ToolsDisabledRetry {
                            model: model.clone(),
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => {
                        self.bus.publish(DomainEvent::ErrorOccurred {
                            context: "provider completion".into(),
                            error_message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        return Err(e.into());
                    }
                }
            };

            accumulate_usage(&mut usage, reply.usage, &window, &reply.text);
            let normalized = self.normalizer.normalize(&reply, &known_tools, &caps);

            if !normalized.tool_calls.is_empty() {
                self.execute_tool_calls(&session, &normalized, &mut context, &mut executed)
                    .await?;
                continue;
            }

            if !normalized.text.is_empty() {
                return self
                    .finish(request, &session, &model, normalized, executed, iteration, usage)
                    .await;
            }

            warn!(iteration, "Provider returned neither text nor tool calls");
            return self
                .fall_back(request, &session, NO_PROGRESS_REPLY, executed, iteration, usage)
                .await;
        }

        info!(max_iterations = self.max_iterations, "Iteration limit reached");
        self.fall_back(
            request,
            &session,
            ITERATION_LIMIT_REPLY,
            executed,
            self.max_iterations,
            usage,
        )
        .await
    }

    pub(crate) fn resolve_model(&self, request: &TurnRequest) -> String {
        request
            .model_id
            .clone()
            .unwrap_or_else(|| self.model.clone())
    }

    pub(crate) fn session_for(&self, request: &TurnRequest) -> SessionId {
        self.builder.target_session(request).clone()
    }

    /// Assemble the context, compacting history first when the budget
    /// says the window is too full. Compaction failure is non-fatal.
    pub(crate) async fn prepare_context(
        &self,
        request: &TurnRequest,
        caps: &ModelCapabilities,
    ) -> Result<Vec<Message>, Error> {
        let context = self.builder.build(request).await?;

        let snapshot = self.budget.evaluate(&context, caps.context_window);
        if !snapshot.needs_summary {
            return Ok(context);
        }

        debug!(
            usage_percent = snapshot.usage_percent,
            "Context over budget, compacting history"
        );
        let session = self.builder.target_session(request);
        if self.compact_history(session).await {
            return self.builder.build(request).await;
        }
        Ok(context)
    }

    /// Summarize eligible history down to the most recent `keep_recent`
    /// messages. Returns whether anything was summarized.
    async fn compact_history(&self, session: &SessionId) -> bool {
        let Some(summarizer) = &self.summarizer else {
            debug!("Over budget but no summarizer attached");
            return false;
        };

        let history = match self.state.history(session, COMPACT_PROBE).await {
            Ok(h) => h,
            Err(e) => {
                warn!("History load for compaction failed: {e}");
                return false;
            }
        };
        let covers_to = match self.state.latest_summary(session).await {
            Ok(s) => s.map(|s| s.covers_to),
            Err(e) => {
                warn!("Summary lookup for compaction failed: {e}");
                return false;
            }
        };

        let eligible: Vec<Message> = history
            .into_iter()
            .filter(|m| {
                m.role != Role::System && covers_to.is_none_or(|t| m.timestamp > t)
            })
            .collect();
        if eligible.len() <= self.keep_recent {
            return false;
        }

        let span = &eligible[..eligible.len() - self.keep_recent];
        match summarizer.summarize_and_persist(session, span).await {
            Ok(record) => {
                info!(
                    message_count = record.message_count,
                    "History compacted before turn"
                );
                true
            }
            Err(e) => {
                warn!("Pre-turn summarization failed, proceeding untrimmed: {e}");
                false
            }
        }
    }

    /// Inject a wind-down note near the iteration limit. The note goes
    /// on a copy of the context only and is never persisted.
    pub(crate) fn with_iteration_warning(
        &self,
        context: &[Message],
        iteration: u32,
    ) -> Vec<Message> {
        let mut window = context.to_vec();
        if iteration == self.max_iterations {
            window.push(Message::system(
                "System note: This is your final iteration. Respond with your final \
                 answer now, without calling any more tools.",
            ));
        } else if iteration + 1 == self.max_iterations {
            window.push(Message::system(format!(
                "System note: You have used {} of {} tool-call iterations. Wrap up \
                 your tool use and prepare a final answer.",
                iteration, self.max_iterations
            )));
        }
        window
    }

    /// Persist the assistant's tool-call message, execute every call in
    /// order, and feed the results back into context and session.
    pub(crate) async fn execute_tool_calls(
        &self,
        session: &SessionId,
        normalized: &Normalized,
        context: &mut Vec<Message>,
        executed: &mut Vec<ExecutedToolCall>,
    ) -> Result<(), Error> {
        let raw_calls: Vec<MessageToolCall> = normalized
            .tool_calls
            .iter()
            .map(|call| MessageToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            })
            .collect();
        let assistant = Message::assistant_with_calls(&normalized.text, raw_calls);
        self.state.append(session, assistant.clone()).await?;
        context.push(assistant);

        for call in &normalized.tool_calls {
            debug!(tool = %call.name, "Executing tool");
            let started = Instant::now();
            let result = self.tools.execute(call).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            self.bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: result.success,
                duration_ms,
                timestamp: Utc::now(),
            });
            executed.push(ExecutedToolCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: result.output.clone(),
                success: result.success,
                duration_ms,
            });

            let content = render_tool_output(&result.output);
            let tool_message = Message::tool_result(&call.id, content);
            self.state.append(session, tool_message.clone()).await?;
            context.push(tool_message);
        }

        Ok(())
    }

    /// Terminal success: post-process the text, persist it, and emit
    /// the turn-completed event.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        request: &TurnRequest,
        session: &SessionId,
        model: &str,
        normalized: Normalized,
        executed: Vec<ExecutedToolCall>,
        iteration: u32,
        usage: Usage,
    ) -> Result<TurnOutcome, Error> {
        let (final_text, deliver) =
            self.post_process(&normalized.text, request.kind);

        self.state
            .append(session, Message::assistant(&final_text))
            .await?;
        self.bus.publish(DomainEvent::TurnCompleted {
            session_id: session.to_string(),
            model: model.to_string(),
            iterations: iteration,
            tokens_used: usage.total_tokens,
            timestamp: Utc::now(),
        });
        info!(
            session_id = %session,
            iterations = iteration,
            tool_calls = executed.len(),
            tokens = usage.total_tokens,
            "Turn completed"
        );

        Ok(TurnOutcome {
            final_text,
            reasoning: normalized.reasoning,
            tool_calls: executed,
            iterations: iteration,
            usage,
            deliver,
            finished_at: Utc::now(),
        })
    }

    /// Terminal fallback: a committed apology instead of an error.
    async fn fall_back(
        &self,
        request: &TurnRequest,
        session: &SessionId,
        text: &str,
        executed: Vec<ExecutedToolCall>,
        iteration: u32,
        usage: Usage,
    ) -> Result<TurnOutcome, Error> {
        self.state.append(session, Message::assistant(text)).await?;
        let deliver = match request.kind {
            MessageKind::Autonomous => Some(true),
            MessageKind::Interactive => None,
        };
        Ok(TurnOutcome {
            final_text: text.to_string(),
            reasoning: None,
            tool_calls: executed,
            iterations: iteration,
            usage,
            deliver,
            finished_at: Utc::now(),
        })
    }

    /// Final-text cleanup and, for autonomous turns, the delivery
    /// decision.
    pub(crate) fn post_process(&self, text: &str, kind: MessageKind) -> (String, Option<bool>) {
        let text = strip_turn_labels(text);
        match kind {
            MessageKind::Autonomous => {
                let (stripped, flag) = parse_decision_marker(&text);
                (stripped, Some(flag.unwrap_or(true)))
            }
            MessageKind::Interactive => (text, None),
        }
    }
}

/// Accumulate usage across iterations, estimating locally when the
/// provider reports none.
pub(crate) fn accumulate_usage(
    usage: &mut Usage,
    reported: Option<Usage>,
    sent: &[Message],
    received_text: &str,
) {
    match reported {
        Some(u) => {
            usage.prompt_tokens += u.prompt_tokens;
            usage.completion_tokens += u.completion_tokens;
            usage.total_tokens += u.total_tokens;
        }
        None => {
            let prompt = estimate_messages_tokens(sent) as u32;
            let completion = estimate_tokens(received_text) as u32;
            usage.prompt_tokens += prompt;
            usage.completion_tokens += completion;
            usage.total_tokens += prompt + completion;
        }
    }
}

/// Tool output as tool-message content: strings stay bare, everything
/// else is serialized JSON.
pub(crate) fn render_tool_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a trailing `<decision>send_message: true/false</decision>`
/// marker. Returns the text with the marker stripped and the flag, or
/// `None` when the marker is absent or malformed.
pub(crate) fn parse_decision_marker(text: &str) -> (String, Option<bool>) {
    const OPEN: &str = "<decision>";
    const CLOSE: &str = "</decision>";

    let Some(open_at) = text.rfind(OPEN) else {
        return (text.to_string(), None);
    };
    let body_start = open_at + OPEN.len();
    let Some(close_rel) = text[body_start..].find(CLOSE) else {
        return (text.to_string(), None);
    };

    let body = &text[body_start..body_start + close_rel];
    let flag = body.split_once(':').and_then(|(key, value)| {
        if key.trim() != "send_message" {
            return None;
        }
        match value.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    });

    let mut stripped = String::new();
    stripped.push_str(&text[..open_at]);
    stripped.push_str(&text[body_start + close_rel + CLOSE.len()..]);
    (stripped.trim().to_string(), flag)
}
