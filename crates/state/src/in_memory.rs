//! In-memory backends — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cogito_core::error::StateError;
use cogito_core::message::{Message, SessionId};
use cogito_core::store::{MemoryBlock, MemoryBlockStore, StateStore, SummaryRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An in-memory state store keeping messages and summaries per session.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryStateStore {
    sessions: Arc<RwLock<HashMap<SessionId, Vec<Message>>>>,
    summaries: Arc<RwLock<HashMap<SessionId, SummaryRecord>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            summaries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Total message count across all sessions (test helper).
    pub async fn message_count(&self) -> usize {
        self.sessions.read().await.values().map(Vec::len).sum()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StateError> {
        let sessions = self.sessions.read().await;
        let messages = sessions.get(session_id).cloned().unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn append(
        &self,
        session_id: &SessionId,
        mut message: Message,
    ) -> std::result::Result<String, StateError> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }
        let id = message.id.clone();
        self.sessions
            .write()
            .await
            .entry(session_id.clone())
            .or_default()
            .push(message);
        Ok(id)
    }

    async fn latest_summary(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Option<SummaryRecord>, StateError> {
        Ok(self.summaries.read().await.get(session_id).cloned())
    }

    async fn save_summary(
        &self,
        record: SummaryRecord,
    ) -> std::result::Result<String, StateError> {
        let id = Uuid::new_v4().to_string();
        self.summaries
            .write()
            .await
            .insert(record.session_id.clone(), record);
        Ok(id)
    }
}

/// A fixed set of memory blocks, set up once at construction.
pub struct InMemoryMemoryBlocks {
    blocks: Vec<MemoryBlock>,
}

impl InMemoryMemoryBlocks {
    pub fn new(blocks: Vec<MemoryBlock>) -> Self {
        Self { blocks }
    }

    pub fn empty() -> Self {
        Self { blocks: Vec::new() }
    }
}

#[async_trait]
impl MemoryBlockStore for InMemoryMemoryBlocks {
    async fn list_blocks(&self) -> std::result::Result<Vec<MemoryBlock>, StateError> {
        Ok(self.blocks.clone())
    }
}
