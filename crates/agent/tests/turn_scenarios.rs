//! End-to-end turn scenarios against in-memory stores and a scripted
//! provider.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cogito_agent::stream_event::AgentStreamEvent;
use cogito_agent::{AgentLoop, ContextBuilder, Summarizer};
use cogito_core::error::{ProviderError, StateError};
use cogito_core::event::EventBus;
use cogito_core::message::{Message, Role, SessionId};
use cogito_core::provider::{Provider, ProviderReply, ProviderRequest};
use cogito_core::store::{MemoryBlock, RetrievalService, StateStore};
use cogito_core::tool::{Tool, ToolError, ToolRegistry};
use cogito_core::turn::TurnRequest;
use cogito_state::{InMemoryMemoryBlocks, InMemoryStateStore};

/// Replays scripted replies and records every request it saw.
struct ScriptedProvider {
    script: Mutex<Vec<Result<ProviderReply, ProviderError>>>,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<ProviderReply, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn text(t: &str) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply {
            text: t.to_string(),
            ..Default::default()
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.seen.lock().unwrap().push(request);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(ProviderError::ApiError {
                backend: "scripted".into(),
                status_code: 500,
                message: "script exhausted".into(),
            });
        }
        script.remove(0)
    }
}

struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }
    fn description(&self) -> &str {
        "Searches an index"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = args["query"].as_str().unwrap_or_default().to_string();
        Ok(serde_json::json!({"results": [format!("result for {query}")]}))
    }
}

struct FixedRetrieval;

#[async_trait]
impl RetrievalService for FixedRetrieval {
    async fn retrieve(
        &self,
        _query: &str,
        _max_items: usize,
    ) -> Result<Option<String>, StateError> {
        Ok(Some("- archived note about the topic".to_string()))
    }
}

fn search_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(SearchTool));
    Arc::new(registry)
}

fn build_agent(
    provider: Arc<ScriptedProvider>,
    state: Arc<InMemoryStateStore>,
    tools: Arc<ToolRegistry>,
    blocks: Vec<MemoryBlock>,
) -> AgentLoop {
    let builder = ContextBuilder::new(
        state.clone(),
        Arc::new(InMemoryMemoryBlocks::new(blocks)),
        "You are a test agent.",
        SessionId::from("primary"),
    );
    AgentLoop::new(
        provider,
        state,
        tools,
        builder,
        Arc::new(EventBus::default()),
        "test-model",
    )
}

#[tokio::test]
async fn inline_tool_call_round_trip() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::text(r#"<search>{"query": "rust agents"}</search>"#),
        ScriptedProvider::text("I found one result about rust agents."),
    ]);
    let state = Arc::new(InMemoryStateStore::new());
    let agent = build_agent(provider.clone(), state.clone(), search_registry(), vec![]);

    let session = SessionId::from("s1");
    let outcome = agent
        .run_turn(&TurnRequest::new("find rust agents", session.clone()))
        .await
        .unwrap();

    assert_eq!(outcome.final_text, "I found one result about rust agents.");
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(outcome.tool_calls[0].name, "search");
    assert!(outcome.tool_calls[0].success);

    // The second request carries the tool result back to the model
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content.contains("result for rust agents")));

    // Full exchange persisted: user, assistant call, tool result, answer
    let history = state.history(&session, 50).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert!(!history[1].tool_calls.is_empty());
    assert_eq!(history[2].role, Role::Tool);
    assert_eq!(history[3].role, Role::Assistant);
}

#[tokio::test]
async fn memory_blocks_and_retrieval_reach_the_system_prompt() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("ok")]);
    let state = Arc::new(InMemoryStateStore::new());
    let blocks = vec![MemoryBlock {
        label: "persona".into(),
        content: "Patient and precise.".into(),
        capacity: 200,
        read_only: false,
    }];

    let builder = ContextBuilder::new(
        state.clone(),
        Arc::new(InMemoryMemoryBlocks::new(blocks)),
        "You are a test agent.",
        SessionId::from("primary"),
    )
    .with_retrieval(Arc::new(FixedRetrieval));
    let agent = AgentLoop::new(
        provider.clone(),
        state,
        Arc::new(ToolRegistry::new()),
        builder,
        Arc::new(EventBus::default()),
        "test-model",
    );

    agent
        .run_turn(&TurnRequest::new("hi", SessionId::from("s1")))
        .await
        .unwrap();

    let system = provider.requests()[0].messages[0].content.clone();
    assert!(system.contains("You are a test agent."));
    assert!(system.contains("persona"));
    assert!(system.contains("Patient and precise."));
    assert!(system.contains("archived note about the topic"));
}

#[tokio::test]
async fn over_budget_history_is_compacted_before_the_turn() {
    let turn_provider = ScriptedProvider::new(vec![ScriptedProvider::text("answered")]);
    let summary_provider =
        ScriptedProvider::new(vec![ScriptedProvider::text("They discussed many things.")]);

    let state = Arc::new(InMemoryStateStore::new());
    let session = SessionId::from("s1");
    // ~64k characters of history against a 8192-token default window
    for i in 0..64 {
        let filler = format!("message {i} {}", "x".repeat(1000));
        state.append(&session, Message::user(filler)).await.unwrap();
    }

    let bus = Arc::new(EventBus::default());
    let summarizer = Arc::new(Summarizer::new(
        summary_provider.clone(),
        state.clone(),
        bus.clone(),
        "test-model",
    ));
    let builder = ContextBuilder::new(
        state.clone(),
        Arc::new(InMemoryMemoryBlocks::empty()),
        "You are a test agent.",
        SessionId::from("primary"),
    );
    let agent = AgentLoop::new(
        turn_provider,
        state.clone(),
        Arc::new(ToolRegistry::new()),
        builder,
        bus,
        "test-model",
    )
    .with_summarizer(summarizer)
    .with_keep_recent(5);

    let mut request = TurnRequest::new("and now?", session.clone());
    request.history_limit = 60;
    let outcome = agent.run_turn(&request).await.unwrap();
    assert_eq!(outcome.final_text, "answered");

    // The summarizer ran and its record covers the old span
    assert_eq!(summary_provider.requests().len(), 1);
    let record = state.latest_summary(&session).await.unwrap().unwrap();
    assert_eq!(record.text, "They discussed many things.");
    assert_eq!(record.message_count, 64 - 5);

    // The summary text now lives in the session as a system message
    let history = state.history(&session, 200).await.unwrap();
    assert!(history
        .iter()
        .any(|m| m.role == Role::System && m.content.contains("They discussed many things.")));
}

#[tokio::test]
async fn summarization_failure_is_not_fatal() {
    let turn_provider = ScriptedProvider::new(vec![ScriptedProvider::text("still answered")]);
    let summary_provider =
        ScriptedProvider::new(vec![Err(ProviderError::Timeout("deadline elapsed".into()))]);

    let state = Arc::new(InMemoryStateStore::new());
    let session = SessionId::from("s1");
    for i in 0..64 {
        let filler = format!("message {i} {}", "x".repeat(1000));
        state.append(&session, Message::user(filler)).await.unwrap();
    }

    let bus = Arc::new(EventBus::default());
    let summarizer = Arc::new(Summarizer::new(
        summary_provider,
        state.clone(),
        bus.clone(),
        "test-model",
    ));
    let builder = ContextBuilder::new(
        state.clone(),
        Arc::new(InMemoryMemoryBlocks::empty()),
        "You are a test agent.",
        SessionId::from("primary"),
    );
    let agent = AgentLoop::new(
        turn_provider,
        state.clone(),
        Arc::new(ToolRegistry::new()),
        builder,
        bus,
        "test-model",
    )
    .with_summarizer(summarizer);

    let mut request = TurnRequest::new("and now?", session.clone());
    request.history_limit = 60;
    let outcome = agent.run_turn(&request).await.unwrap();

    assert_eq!(outcome.final_text, "still answered");
    assert!(state.latest_summary(&session).await.unwrap().is_none());
}

#[tokio::test]
async fn streamed_turn_emits_content_then_done() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("streamed answer")]);
    let state = Arc::new(InMemoryStateStore::new());
    let agent = Arc::new(build_agent(
        provider,
        state.clone(),
        Arc::new(ToolRegistry::new()),
        vec![],
    ));

    let session = SessionId::from("s1");
    let mut rx = agent.run_turn_stream(TurnRequest::new("hi", session.clone()));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(events.last().unwrap(), AgentStreamEvent::Done { .. }));
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentStreamEvent::Content { content } if content == "streamed answer")));

    // Streaming persists the same shape of history
    let history = state.history(&session, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "streamed answer");
}

#[tokio::test]
async fn streamed_turn_surfaces_tool_lifecycle() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::text(r#"<search>{"query": "streams"}</search>"#),
        ScriptedProvider::text("done searching"),
    ]);
    let state = Arc::new(InMemoryStateStore::new());
    let agent = Arc::new(build_agent(provider, state, search_registry(), vec![]));

    let mut rx = agent.run_turn_stream(TurnRequest::new("go", SessionId::from("s1")));
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let call_at = events
        .iter()
        .position(|e| matches!(e, AgentStreamEvent::ToolCall { name, .. } if name == "search"))
        .unwrap();
    let result_at = events
        .iter()
        .position(|e| matches!(e, AgentStreamEvent::ToolResult { success: true, .. }))
        .unwrap();
    assert!(call_at < result_at);

    match events.last().unwrap() {
        AgentStreamEvent::Done {
            tool_calls_made,
            iterations,
            ..
        } => {
            assert_eq!(*tool_calls_made, 1);
            assert_eq!(*iterations, 2);
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn streamed_provider_error_ends_with_error_event() {
    let provider =
        ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed("bad key".into()))]);
    let state = Arc::new(InMemoryStateStore::new());
    let agent = Arc::new(build_agent(
        provider,
        state,
        Arc::new(ToolRegistry::new()),
        vec![],
    ));

    let mut rx = agent.run_turn_stream(TurnRequest::new("hi", SessionId::from("s1")));
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(
        events.last().unwrap(),
        AgentStreamEvent::Error { .. }
    ));
}
