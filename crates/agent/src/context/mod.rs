//! Context assembly and budget management.
//!
//! Builds the ordered message sequence for one provider invocation:
//! system instructions + memory-block snapshot + optional retrieval
//! snippet, then summary-aware trimmed history, then the current user
//! message. The budget side estimates token usage against the model's
//! window and decides when older history must be summarized.

pub mod budget;
pub mod builder;
pub mod token;

pub use budget::{BudgetManager, BudgetSnapshot};
pub use builder::ContextBuilder;
