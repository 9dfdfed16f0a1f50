//! External collaborator contracts: conversation state, memory blocks,
//! and optional retrieval augmentation.
//!
//! The core never touches a database directly; it talks to these traits.
//! Implementations (in-memory, SQL-backed, remote) live in other crates.

use crate::error::StateError;
use crate::message::{Message, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted condensation of older conversation history.
///
/// Exactly one record is "latest" per session; history loads skip
/// non-system messages at or before `covers_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub session_id: SessionId,

    /// The summary text (stored and re-presented as a system message)
    pub text: String,

    /// Timestamp of the first message covered
    pub covers_from: DateTime<Utc>,

    /// Timestamp of the last message covered
    pub covers_to: DateTime<Utc>,

    /// How many messages the summary replaces
    pub message_count: usize,

    /// Estimated token count of the summary text
    pub token_count: usize,
}

/// A labeled, capacity-bounded piece of persistent context rendered into
/// every system prompt (persona, known facts, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub label: String,
    pub content: String,

    /// Capacity in characters; used to render a percent-full figure
    pub capacity: usize,

    #[serde(default)]
    pub read_only: bool,
}

impl MemoryBlock {
    /// How full this block is, as a percentage of its capacity.
    pub fn usage_percent(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.content.len() as f32 / self.capacity as f32) * 100.0
    }
}

/// Persistent conversation storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load up to `limit` most recent messages for a session, oldest first.
    async fn history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StateError>;

    /// Append a message to a session. Returns the stored message id.
    async fn append(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> std::result::Result<String, StateError>;

    /// The latest summary record for a session, if any.
    async fn latest_summary(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Option<SummaryRecord>, StateError>;

    /// Persist a summary record, making it the latest for its session.
    async fn save_summary(
        &self,
        record: SummaryRecord,
    ) -> std::result::Result<String, StateError>;
}

/// Source of memory blocks for the system prompt.
#[async_trait]
pub trait MemoryBlockStore: Send + Sync {
    async fn list_blocks(&self) -> std::result::Result<Vec<MemoryBlock>, StateError>;
}

/// Optional retrieval-augmentation lookup.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Retrieve a context snippet for the query, or None when nothing
    /// relevant is found.
    async fn retrieve(
        &self,
        query: &str,
        max_items: usize,
    ) -> std::result::Result<Option<String>, StateError>;
}
