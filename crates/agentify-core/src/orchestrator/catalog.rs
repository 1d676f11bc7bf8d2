//! Tool catalog derivation
//!
//! One fixed-shape callable tool per ready backend, presented to the
//! completion model. The catalog is regenerated whenever the backend set
//! changes; in the current design that is once, at startup.

use serde_json::{json, Value};

use crate::ai::types::ToolDefinition;
use crate::backend::registry::BackendState;

/// Build the catalog over the currently ready backends
pub fn build_catalog(states: &[BackendState]) -> Vec<ToolDefinition> {
    states
        .iter()
        .filter(|state| state.is_ready)
        .map(|state| ToolDefinition {
            name: state.id.clone(),
            description: describe(&state.id),
            parameters: parameter_schema(),
        })
        .collect()
}

/// The fixed argument shape every backend tool shares
pub fn parameter_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "mcp_method": {
                "type": "string",
                "description": "The MCP method to invoke on the backend, e.g. 'tools/call'"
            },
            "mcp_params": {
                "type": "object",
                "description": "Parameters for the MCP method"
            }
        },
        "required": ["mcp_method", "mcp_params"]
    })
}

/// Static per-id descriptions, with a generic fallback for unknown ids
fn describe(id: &str) -> String {
    match id {
        "filesystem" => {
            "Reads, writes, and lists files and directories on the local machine.".to_string()
        }
        "browser" => {
            "Navigates web pages, extracts content, and automates browser actions.".to_string()
        }
        "terminal" => "Runs shell commands and returns their output.".to_string(),
        "editor" => "Inspects and edits the documents open in the editor.".to_string(),
        "git" => "Inspects repository history, diffs, and branches.".to_string(),
        other => format!("Routes the task to the '{other}' tool backend."),
    }
}
