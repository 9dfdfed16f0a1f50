//! Context budget evaluation.
//!
//! Pure computation: given an assembled context and a model's window
//! size, estimate usage and decide whether older history needs to be
//! summarized. The snapshot is advisory state for the current turn and
//! is never persisted.

use super::token::estimate_message_tokens;
use cogito_core::message::{Message, Role};
use serde::{Deserialize, Serialize};

/// The current turn's token-usage estimate against the model's window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// Tokens in system-role messages (instructions, memory, summaries)
    pub system_tokens: usize,

    /// Tokens in all other messages
    pub message_tokens: usize,

    pub total_tokens: usize,

    /// The model's context window size
    pub window_size: usize,

    /// `total_tokens / window_size`, as a percentage
    pub usage_percent: f32,

    /// Whether usage has crossed the summarization threshold
    pub needs_summary: bool,
}

/// Evaluates assembled contexts against a summarization threshold.
#[derive(Debug, Clone, Copy)]
pub struct BudgetManager {
    /// Fraction of the window that triggers summarization (0, 1]
    threshold: f32,
}

impl BudgetManager {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Evaluate a context. Deterministic: the same input always yields
    /// the same snapshot.
    pub fn evaluate(&self, messages: &[Message], window_size: usize) -> BudgetSnapshot {
        let mut system_tokens = 0;
        let mut message_tokens = 0;

        for msg in messages {
            let tokens = estimate_message_tokens(msg);
            if msg.role == Role::System {
                system_tokens += tokens;
            } else {
                message_tokens += tokens;
            }
        }

        let total_tokens = system_tokens + message_tokens;
        let usage_percent = if window_size == 0 {
            100.0
        } else {
            (total_tokens as f32 / window_size as f32) * 100.0
        };

        BudgetSnapshot {
            system_tokens,
            message_tokens,
            total_tokens,
            window_size,
            usage_percent,
            needs_summary: usage_percent >= self.threshold * 100.0,
        }
    }
}

impl Default for BudgetManager {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}
