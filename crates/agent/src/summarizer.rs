//! Conversation summarization.
//!
//! Condenses a span of session history into a summary record via a
//! provider call made in an isolated context (the summarization prompt
//! never mixes with the live conversation). The persisted record marks
//! the covered timeframe so context assembly can skip summarized
//! messages, and the summary text is appended to the session as a
//! system message so it survives in history.

use std::sync::Arc;

use chrono::Utc;
use cogito_core::error::Error;
use cogito_core::event::{DomainEvent, EventBus};
use cogito_core::message::{Message, Role, SessionId};
use cogito_core::provider::{Provider, ProviderRequest};
use cogito_core::store::{StateStore, SummaryRecord};
use tracing::{debug, info};

use crate::context::token::estimate_tokens;

const SUMMARY_INSTRUCTIONS: &str = "You are a conversation summarizer. Produce a concise \
summary of the conversation excerpt you are given. Capture the topics discussed, any \
decisions made, key facts and preferences mentioned, and the current state of the \
conversation. Write in third person. Keep it under 200 words.";

pub struct Summarizer {
    provider: Arc<dyn Provider>,
    state: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    model: String,
}

impl Summarizer {
    pub fn new(
        provider: Arc<dyn Provider>,
        state: Arc<dyn StateStore>,
        bus: Arc<EventBus>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            state,
            bus,
            model: model.into(),
        }
    }

    /// Summarize `messages`, persist the record, and append the summary
    /// to the session as a system message.
    pub async fn summarize_and_persist(
        &self,
        session_id: &SessionId,
        messages: &[Message],
    ) -> Result<SummaryRecord, Error> {
        let (Some(first), Some(last)) = (messages.first(), messages.last()) else {
            return Err(Error::Internal("nothing to summarize".into()));
        };

        debug!(
            session_id = %session_id,
            count = messages.len(),
            "Summarizing conversation span"
        );

        let prompt = build_prompt(messages);
        let request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(SUMMARY_INSTRUCTIONS), Message::user(prompt)],
        );

        let reply = self.provider.complete(request).await?;
        let text = reply.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Internal("summarization produced empty text".into()));
        }

        let record = SummaryRecord {
            session_id: session_id.clone(),
            text: text.clone(),
            covers_from: first.timestamp,
            covers_to: last.timestamp,
            message_count: messages.len(),
            token_count: estimate_tokens(&text),
        };
        self.state.save_summary(record.clone()).await?;

        let note = format!(
            "Summary of earlier conversation ({} messages): {}",
            record.message_count, record.text
        );
        self.state.append(session_id, Message::system(note)).await?;

        info!(
            session_id = %session_id,
            message_count = record.message_count,
            token_count = record.token_count,
            "Summary persisted"
        );
        self.bus.publish(DomainEvent::SummaryCreated {
            session_id: session_id.to_string(),
            message_count: record.message_count,
            token_count: record.token_count,
            timestamp: Utc::now(),
        });

        Ok(record)
    }
}

fn build_prompt(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len() + 1);
    lines.push("Summarize this conversation excerpt:\n".to_string());
    for msg in messages {
        let role = match msg.role {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::System => "SYSTEM",
            Role::Tool => "TOOL",
        };
        lines.push(format!(
            "{} [{}]: {}",
            role,
            msg.timestamp.format("%H:%M"),
            msg.content
        ));
    }
    lines.join("\n")
}
