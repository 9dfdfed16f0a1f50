//! # Cogito Agent
//!
//! The agent loop: given a turn request, assemble context, invoke the
//! model backend, normalize its reply, execute requested tools, and
//! iterate to a final answer — with a streaming variant that emits
//! incremental events instead of a single outcome.
//!
//! Components, leaves first:
//! - [`context`] — token estimation, budget evaluation, context assembly
//! - [`normalizer`] — multi-format reply normalization
//! - [`summarizer`] — history condensation via the provider
//! - [`loop_runner`] — the non-streaming loop
//! - [`stream_runner`] — the streaming loop

pub mod context;
pub mod loop_runner;
pub mod normalizer;
pub mod stream_event;
pub mod stream_runner;
pub mod summarizer;

pub use context::{BudgetManager, BudgetSnapshot, ContextBuilder};
pub use loop_runner::AgentLoop;
pub use normalizer::{Normalized, Normalizer};
pub use stream_event::AgentStreamEvent;
pub use summarizer::Summarizer;
