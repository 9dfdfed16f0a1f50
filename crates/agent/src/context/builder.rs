//! Context assembly.
//!
//! Produces the ordered message list for one provider invocation:
//! 1. system message: static instructions + memory-block snapshot +
//!    optional retrieval snippet
//! 2. trimmed history from the state store, skipping messages already
//!    covered by the latest summary (system messages are exempt)
//! 3. the current user message, always last
//!
//! When the filtered history exceeds a hard multiple of the history
//! limit, the oldest excess is handed to the summarizer in the
//! background rather than silently dropped.

use crate::summarizer::Summarizer;
use cogito_core::error::Error;
use cogito_core::message::{Message, Role, SessionId};
use cogito_core::store::{MemoryBlockStore, RetrievalService, StateStore};
use cogito_core::turn::{MessageKind, TurnRequest};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Assembles provider contexts from the collaborating stores.
pub struct ContextBuilder {
    state: Arc<dyn StateStore>,
    blocks: Arc<dyn MemoryBlockStore>,
    retrieval: Option<Arc<dyn RetrievalService>>,
    summarizer: Option<Arc<Summarizer>>,

    /// Static system instructions (identity, rules)
    instructions: String,

    /// The session autonomous turns read history from
    primary_session: SessionId,

    /// Multiple of `history_limit` beyond which excess history is
    /// summarized in the background
    overflow_multiple: usize,

    retrieval_max_items: usize,
}

impl ContextBuilder {
    pub fn new(
        state: Arc<dyn StateStore>,
        blocks: Arc<dyn MemoryBlockStore>,
        instructions: impl Into<String>,
        primary_session: SessionId,
    ) -> Self {
        Self {
            state,
            blocks,
            retrieval: None,
            summarizer: None,
            instructions: instructions.into(),
            primary_session,
            overflow_multiple: 2,
            retrieval_max_items: 5,
        }
    }

    /// Attach a retrieval service for context augmentation.
    pub fn with_retrieval(mut self, retrieval: Arc<dyn RetrievalService>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Attach a summarizer for background condensation of excess history.
    pub fn with_summarizer(mut self, summarizer: Arc<Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_overflow_multiple(mut self, multiple: usize) -> Self {
        self.overflow_multiple = multiple.max(1);
        self
    }

    /// The session a turn reads and writes. Autonomous turns use the
    /// primary interactive session so the agent stays aware of real
    /// conversations.
    pub fn target_session<'a>(&'a self, request: &'a TurnRequest) -> &'a SessionId {
        match request.kind {
            MessageKind::Autonomous => &self.primary_session,
            MessageKind::Interactive => &request.session_id,
        }
    }

    /// Build the ordered context for one turn.
    pub async fn build(&self, request: &TurnRequest) -> Result<Vec<Message>, Error> {
        let system = self.compose_system(request).await?;
        let session = self.target_session(request);

        let limit = request.history_limit.max(1);
        // Probe one multiple past the overflow boundary so excess is visible.
        let probe = limit * (self.overflow_multiple + 1);
        let raw = self.state.history(session, probe).await?;

        let covers_to = self
            .state
            .latest_summary(session)
            .await?
            .map(|s| s.covers_to);

        // Messages already represented by the latest summary are skipped;
        // system messages (including the summary itself) always survive.
        let filtered: Vec<Message> = raw
            .into_iter()
            .filter(|m| {
                m.role == Role::System
                    || covers_to.is_none_or(|t| m.timestamp > t)
            })
            .collect();

        let conversational = filtered.iter().filter(|m| m.role != Role::System).count();
        if conversational > limit * self.overflow_multiple {
            self.schedule_overflow_summary(session, &filtered, conversational - limit);
        }

        let kept = trim_history(filtered, limit);
        let kept = drop_orphaned_tool_messages(kept);

        let mut messages = Vec::with_capacity(kept.len() + 2);
        messages.push(Message::system(system));
        messages.extend(kept);
        messages.push(Message::user(&request.text));

        debug!(
            session_id = %session,
            messages = messages.len(),
            "Assembled context"
        );

        Ok(messages)
    }

    /// Compose the system message content.
    async fn compose_system(&self, request: &TurnRequest) -> Result<String, Error> {
        let mut system = self.instructions.clone();

        let blocks = self.blocks.list_blocks().await?;
        if !blocks.is_empty() {
            system.push_str("\n\n## Memory Blocks\n");
            for block in &blocks {
                let marker = if block.read_only { ", read-only" } else { "" };
                system.push_str(&format!(
                    "\n### {} ({:.0}% full{})\n{}\n",
                    block.label,
                    block.usage_percent(),
                    marker,
                    block.content
                ));
            }
        }

        if let Some(retrieval) = &self.retrieval {
            match retrieval
                .retrieve(&request.text, self.retrieval_max_items)
                .await
            {
                Ok(Some(snippet)) if !snippet.is_empty() => {
                    system.push_str("\n\n## Retrieved Context\n");
                    system.push_str(&snippet);
                }
                Ok(_) => {}
                Err(e) => warn!("Retrieval lookup failed: {e}"),
            }
        }

        Ok(system)
    }

    /// Fire-and-forget summarization of the oldest excess messages.
    /// Must never block or fail the turn that noticed the overflow.
    fn schedule_overflow_summary(&self, session: &SessionId, filtered: &[Message], excess: usize) {
        let Some(summarizer) = &self.summarizer else {
            debug!(excess, "History overflow but no summarizer attached");
            return;
        };

        let oldest: Vec<Message> = filtered
            .iter()
            .filter(|m| m.role != Role::System)
            .take(excess)
            .cloned()
            .collect();
        if oldest.is_empty() {
            return;
        }

        let summarizer = Arc::clone(summarizer);
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = summarizer.summarize_and_persist(&session, &oldest).await {
                warn!(session_id = %session, "Background summarization failed: {e}");
            }
        });
    }
}

/// Keep the most recent `limit` conversational messages plus every
/// system message, preserving order.
fn trim_history(messages: Vec<Message>, limit: usize) -> Vec<Message> {
    let conversational = messages.iter().filter(|m| m.role != Role::System).count();
    let mut to_drop = conversational.saturating_sub(limit);
    messages
        .into_iter()
        .filter(|m| {
            if m.role == Role::System {
                true
            } else if to_drop > 0 {
                to_drop -= 1;
                false
            } else {
                true
            }
        })
        .collect()
}

/// Drop tool messages whose `tool_call_id` has no matching call in the
/// immediately preceding assistant message. Truncation can strand them,
/// and providers reject orphans.
fn drop_orphaned_tool_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut cleaned = Vec::with_capacity(messages.len());
    let mut allowed: HashSet<String> = HashSet::new();

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                allowed = msg.tool_calls.iter().map(|tc| tc.id.clone()).collect();
                cleaned.push(msg);
            }
            Role::Tool => {
                let ok = msg
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| allowed.contains(id));
                if ok {
                    cleaned.push(msg);
                } else {
                    debug!(
                        tool_call_id = ?msg.tool_call_id,
                        "Dropping orphaned tool message"
                    );
                }
            }
            _ => {
                allowed.clear();
                cleaned.push(msg);
            }
        }
    }

    cleaned
}
