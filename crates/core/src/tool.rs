//! Tool trait and registry — the dispatch seam between the loop and
//! concrete side-effecting capabilities.
//!
//! The registry is the only component aware of the full tool catalogue;
//! the loop only needs name → callable resolution and an "unknown tool"
//! fallback it can feed back to the model.

pub use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A normalized request to execute a tool.
///
/// Produced by the response normalizer (from structured or inline
/// encodings alike); consumed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID, opaque, unique within a turn
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that produced it
    pub name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output fed back to the model
    pub output: serde_json::Value,
}

/// The core Tool trait.
///
/// Concrete tools (search, messaging, code execution, ...) live outside
/// this core and implement this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The loop uses this to get definitions for the provider request and to
/// execute calls the model requests.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call, resolving unknown names to a structured error
    /// result rather than failing the turn.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.tools.get(&call.name) {
            Some(tool) => match tool.execute(call.arguments.clone()).await {
                Ok(output) => ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    success: true,
                    output,
                },
                Err(e) => ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    success: false,
                    output: serde_json::json!({ "error": e.to_string() }),
                },
            },
            None => ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: false,
                output: serde_json::json!({
                    "error": format!("Unknown tool: {}", call.name)
                }),
            },
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
