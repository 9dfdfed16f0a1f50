//! State store implementations for cogito.
//!
//! The in-memory backends are useful for testing and ephemeral sessions;
//! durable backends implement the same `cogito_core` traits elsewhere.

pub mod in_memory;

pub use in_memory::{InMemoryMemoryBlocks, InMemoryStateStore};
