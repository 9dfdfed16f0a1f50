//! Inline tool-call grammars.
//!
//! Some backends, when offered tool schemas, emit the call as delimited
//! text instead of a structured object. Three incompatible grammars show
//! up in practice:
//!
//! - `<tool_name>{...}</tool_name>` — one tag per tool name
//! - `<tool_call>{"name": ..., "arguments": ...}</tool_call>` — a generic
//!   wrapper tag (arguments sometimes arrive double-encoded as a string)
//! - `tool_name {...}` — a bare name/JSON prefix with no tag at all
//!
//! Each grammar is an independent pure function
//! `(text, known_tool_names) -> (residual_text, tool_calls)`; the
//! normalizer probes them in priority order and stops at the first
//! non-empty result. JSON payloads are extracted with brace-balanced
//! scanning, since arguments may contain nested braces and escaped
//! quotes that defeat naive pattern matching.

use cogito_core::tool::ToolCall;
use tracing::warn;
use uuid::Uuid;

/// Find the span of a balanced `{...}` JSON object starting at or after
/// `from`. Returns byte offsets `(start, end_exclusive)`.
pub(crate) fn scan_json_object(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = bytes[from..].iter().position(|&b| b == b'{')? + from;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + 1));
                }
            }
            _ => {}
        }
    }

    None
}

fn new_call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{}", Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments,
    }
}

/// `<tool_name>{...}</tool_name>` — the tag is the tool's own name.
pub fn extract_named_tag(text: &str, known_tools: &[String]) -> (String, Vec<ToolCall>) {
    let mut residual = text.to_string();
    let mut calls = Vec::new();

    for name in known_tools {
        let open = format!("<{name}>");
        let close = format!("</{name}>");

        while let Some(open_at) = residual.find(&open) {
            let body_start = open_at + open.len();
            let Some(close_at) = residual[body_start..].find(&close) else {
                break;
            };
            let body_end = body_start + close_at;
            let span_end = body_end + close.len();

            match scan_json_object(&residual[..body_end], body_start) {
                Some((json_start, json_end)) => {
                    match serde_json::from_str(&residual[json_start..json_end]) {
                        Ok(arguments) => calls.push(new_call(name, arguments)),
                        Err(e) => {
                            warn!(tool = %name, error = %e, "Dropping inline call with invalid JSON");
                        }
                    }
                }
                None => {
                    warn!(tool = %name, "Inline tag without JSON payload");
                }
            }

            residual.replace_range(open_at..span_end, "");
        }
    }

    (residual, calls)
}

/// `<tool_call>{"name": ..., "arguments": ...}</tool_call>`.
pub fn extract_wrapper_tag(text: &str, known_tools: &[String]) -> (String, Vec<ToolCall>) {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut residual = text.to_string();
    let mut calls = Vec::new();

    while let Some(open_at) = residual.find(OPEN) {
        let body_start = open_at + OPEN.len();
        let span_end = match residual[body_start..].find(CLOSE) {
            Some(close_at) => body_start + close_at + CLOSE.len(),
            // Unterminated tag: take a balanced object if one follows,
            // otherwise stop probing.
            None => match scan_json_object(&residual, body_start) {
                Some((_, json_end)) => json_end,
                None => break,
            },
        };

        if let Some((json_start, json_end)) = scan_json_object(&residual[..span_end], body_start) {
            match serde_json::from_str::<serde_json::Value>(&residual[json_start..json_end]) {
                Ok(payload) => {
                    if let Some(call) = wrapper_payload_to_call(&payload, known_tools) {
                        calls.push(call);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dropping wrapper call with invalid JSON");
                }
            }
        }

        residual.replace_range(open_at..span_end, "");
    }

    (residual, calls)
}

fn wrapper_payload_to_call(
    payload: &serde_json::Value,
    known_tools: &[String],
) -> Option<ToolCall> {
    let name = payload["name"].as_str()?;
    if !known_tools.iter().any(|t| t == name) {
        warn!(tool = %name, "Dropping inline call for unknown tool");
        return None;
    }

    // Arguments are sometimes double-encoded: a JSON string holding JSON.
    let arguments = match &payload["arguments"] {
        serde_json::Value::String(inner) => match serde_json::from_str(inner) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(tool = %name, error = %e, "Dropping call with undecodable arguments");
                return None;
            }
        },
        serde_json::Value::Null => serde_json::json!({}),
        other => other.clone(),
    };

    Some(new_call(name, arguments))
}

/// Bare `tool_name {...}` at the start of the text, no wrapping tag.
pub fn extract_bare_prefix(text: &str, known_tools: &[String]) -> (String, Vec<ToolCall>) {
    let trimmed = text.trim_start();
    let offset = text.len() - trimmed.len();

    for name in known_tools {
        let Some(rest) = trimmed.strip_prefix(name.as_str()) else {
            continue;
        };
        // The name must be immediately followed by the JSON object
        // (allowing whitespace), or it's just prose starting with a
        // tool-like word.
        let after_name = rest.trim_start();
        if !after_name.starts_with('{') {
            continue;
        }

        let json_from = offset + name.len() + (rest.len() - after_name.len());
        if let Some((json_start, json_end)) = scan_json_object(text, json_from) {
            if json_start != json_from {
                continue;
            }
            match serde_json::from_str(&text[json_start..json_end]) {
                Ok(arguments) => {
                    let mut residual = String::new();
                    residual.push_str(&text[..offset]);
                    residual.push_str(&text[json_end..]);
                    return (residual, vec![new_call(name, arguments)]);
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "Bare prefix with invalid JSON");
                }
            }
        }
    }

    (text.to_string(), Vec::new())
}
