//! # Cogito Core
//!
//! Domain types, traits, and error definitions for the cogito agent
//! orchestration core. This crate defines the contracts that all other
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the loop talks to — model backend, state store,
//! memory blocks, retrieval, tools — is a trait here. Implementations live
//! in their respective crates and are wired in by constructor injection.
//! This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod capability;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use capability::{InlineGrammar, ModelCapabilities};
pub use error::{Error, ProviderError, Result, StateError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role, SessionId};
pub use provider::{
    Provider, ProviderReply, ProviderRequest, StreamDelta, ToolCallFragment, ToolDefinition, Usage,
};
pub use store::{MemoryBlock, MemoryBlockStore, RetrievalService, StateStore, SummaryRecord};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use turn::{ExecutedToolCall, MessageKind, TurnOutcome, TurnRequest};
