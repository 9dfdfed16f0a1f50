//! Reasoning extraction from reply text.
//!
//! Reasoning models that lack a dedicated reasoning field tend to leak
//! their thinking into the visible text, either inside `<think>` tags or
//! as long deliberation paragraphs followed by a short answer. Both
//! extractors are lossless: reasoning is moved aside, never discarded.

/// Extract a `<think>...</think>` block. Returns the residual text and
/// the reasoning content, if a block was found.
pub fn extract_think_block(text: &str) -> (String, Option<String>) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let Some(open_at) = text.find(OPEN) else {
        return (text.to_string(), None);
    };
    let body_start = open_at + OPEN.len();
    let Some(close_at) = text[body_start..].find(CLOSE) else {
        // Unterminated block: treat everything after the tag as
        // reasoning only if there is nothing before it, otherwise
        // leave the text alone.
        if text[..open_at].trim().is_empty() {
            return (String::new(), Some(text[body_start..].trim().to_string()));
        }
        return (text.to_string(), None);
    };

    let reasoning = text[body_start..body_start + close_at].trim().to_string();
    let mut residual = String::new();
    residual.push_str(&text[..open_at]);
    residual.push_str(&text[body_start + close_at + CLOSE.len()..]);

    let reasoning = if reasoning.is_empty() {
        None
    } else {
        Some(reasoning)
    };
    (residual.trim().to_string(), reasoning)
}

/// Best-effort split of untagged reasoning from a final answer.
///
/// Applies only to replies from models known to reason natively. If the
/// leading paragraphs make up more than `ratio` of the text and the last
/// paragraph is comparatively short, the lead is treated as reasoning
/// and the tail as the answer. Returns `None` when no confident split
/// exists; the caller then keeps the text whole.
pub fn heuristic_split(text: &str, ratio: f32) -> Option<(String, String)> {
    let paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    if paragraphs.len() < 3 {
        return None;
    }

    let answer = paragraphs[paragraphs.len() - 1];
    let lead_len: usize = paragraphs[..paragraphs.len() - 1]
        .iter()
        .map(|p| p.len())
        .sum();
    let total = lead_len + answer.len();
    if total == 0 {
        return None;
    }

    if (lead_len as f32 / total as f32) < ratio {
        return None;
    }
    // The answer must be meaningfully shorter than the deliberation
    if answer.len() * 2 > lead_len {
        return None;
    }

    let reasoning = paragraphs[..paragraphs.len() - 1].join("\n\n");
    Some((reasoning.trim().to_string(), answer.trim().to_string()))
}
