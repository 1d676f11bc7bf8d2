//! Backend configuration
//!
//! Parses the `mcpServers`-style JSON map into validated descriptors.
//! `${VAR}` references in env values are expanded from the process
//! environment at load time. Ids must be tool-name-safe because they double
//! as tool names in the completion catalog.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::GatewayError;

/// Immutable per-backend configuration
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub id: String,
    pub display_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Raw config file shape
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsFile {
    #[serde(default)]
    pub mcp_servers: HashMap<String, RawBackend>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBackend {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl BackendsFile {
    pub async fn load(path: &Path) -> Result<Self, GatewayError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::Config(format!("failed to read {}: {e}", path.display())))?;
        let file: BackendsFile = serde_json::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("failed to parse {}: {e}", path.display())))?;
        tracing::info!(
            count = file.mcp_servers.len(),
            path = %path.display(),
            "loaded backend config"
        );
        Ok(file)
    }

    /// Validate and resolve into descriptors, sorted by id for
    /// deterministic startup order.
    pub fn descriptors(&self) -> Result<Vec<BackendDescriptor>, GatewayError> {
        let mut result = Vec::with_capacity(self.mcp_servers.len());
        for (id, raw) in &self.mcp_servers {
            result.push(resolve(id, raw)?);
        }
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }
}

pub fn resolve(id: &str, raw: &RawBackend) -> Result<BackendDescriptor, GatewayError> {
    if !is_tool_name_safe(id) {
        return Err(GatewayError::Config(format!(
            "backend id '{id}' is not tool-name-safe (use letters, digits, '-', '_')"
        )));
    }
    if raw.command.trim().is_empty() {
        return Err(GatewayError::Config(format!(
            "backend '{id}' has an empty command"
        )));
    }

    let env = raw
        .env
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_var(v)))
        .collect();

    Ok(BackendDescriptor {
        id: id.to_string(),
        display_name: raw.display_name.clone().unwrap_or_else(|| id.to_string()),
        command: raw.command.clone(),
        args: raw.args.clone(),
        env,
    })
}

pub fn is_tool_name_safe(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Expand `${VAR}` references from the process environment. Unknown
/// variables expand to the empty string.
fn expand_env_var(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end_offset) = result[start..].find('}') {
            let end = start + end_offset;
            let var_name = &result[start + 2..end];
            let value = std::env::var(var_name).unwrap_or_else(|_| {
                tracing::warn!("env variable '{var_name}' not set, expanding to empty");
                String::new()
            });
            result.replace_range(start..end + 1, &value);
        } else {
            break;
        }
    }
    result
}
