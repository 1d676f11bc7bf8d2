//! Gateway configuration
//!
//! Local defaults come from the CLI and environment; the client may
//! override most of them in its initialize params. Environment-sourced
//! secrets always win over client-supplied ones.

use std::collections::HashMap;

use serde::Deserialize;

use crate::backend::config::{self, BackendDescriptor, RawBackend};
use crate::constants::{DEFAULT_COMPLETIONS_URL, DEFAULT_MODEL};
use crate::error::GatewayError;

/// Local defaults, assembled before any client connects
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub model: String,
    pub completions_url: String,
    /// Environment-sourced completion credential, if set
    pub api_key: Option<String>,
    pub backends: Vec<BackendDescriptor>,
    pub agents: Vec<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("AGENTIFY_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self {
            model: DEFAULT_MODEL.to_string(),
            completions_url: DEFAULT_COMPLETIONS_URL.to_string(),
            api_key,
            backends: Vec::new(),
            agents: Vec::new(),
        }
    }

    /// Merge client-supplied initialize params over the local defaults.
    /// The environment-sourced API key takes priority over a client-supplied
    /// one; a missing credential is a fatal configuration error.
    pub fn merge(&self, params: &InitializeGatewayParams) -> Result<EffectiveConfig, GatewayError> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| params.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::Config(
                    "no completion credential: set AGENTIFY_API_KEY or supply apiKey".to_string(),
                )
            })?;

        let backends = match &params.mcp_servers {
            Some(map) => {
                let mut resolved = Vec::with_capacity(map.len());
                for (id, raw) in map {
                    resolved.push(config::resolve(id, raw)?);
                }
                resolved.sort_by(|a, b| a.id.cmp(&b.id));
                resolved
            }
            None => self.backends.clone(),
        };

        let mut seen = std::collections::HashSet::new();
        for backend in &backends {
            if !seen.insert(backend.id.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate backend id '{}'",
                    backend.id
                )));
            }
        }

        Ok(EffectiveConfig {
            model: params.model.clone().unwrap_or_else(|| self.model.clone()),
            completions_url: params
                .completions_url
                .clone()
                .unwrap_or_else(|| self.completions_url.clone()),
            api_key,
            backends,
            agents: params.agents.clone().unwrap_or_else(|| self.agents.clone()),
        })
    }
}

/// Client-supplied overrides in the initialize request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeGatewayParams {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub completions_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub mcp_servers: Option<HashMap<String, RawBackend>>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
}

/// The validated result of the merge, used for the rest of the session
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub model: String,
    pub completions_url: String,
    pub api_key: String,
    pub backends: Vec<BackendDescriptor>,
    pub agents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local_with_key(key: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            model: DEFAULT_MODEL.to_string(),
            completions_url: DEFAULT_COMPLETIONS_URL.to_string(),
            api_key: key.map(String::from),
            backends: Vec::new(),
            agents: vec!["reviewer".to_string()],
        }
    }

    #[test]
    fn test_env_key_wins_over_client_key() {
        let local = local_with_key(Some("env-secret"));
        let params = InitializeGatewayParams {
            api_key: Some("client-secret".to_string()),
            ..Default::default()
        };
        let effective = local.merge(&params).unwrap();
        assert_eq!(effective.api_key, "env-secret");
    }

    #[test]
    fn test_client_key_used_when_env_absent() {
        let local = local_with_key(None);
        let params = InitializeGatewayParams {
            api_key: Some("client-secret".to_string()),
            ..Default::default()
        };
        assert_eq!(local.merge(&params).unwrap().api_key, "client-secret");
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let local = local_with_key(None);
        let err = local.merge(&InitializeGatewayParams::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("credential"));
    }

    #[test]
    fn test_client_overrides_model_and_backends() {
        let local = local_with_key(Some("k"));
        let params: InitializeGatewayParams = serde_json::from_value(json!({
            "model": "gpt-4o-mini",
            "mcpServers": {
                "filesystem": {"command": "fs-mcp"},
                "browser": {"command": "browser-mcp"}
            }
        }))
        .unwrap();

        let effective = local.merge(&params).unwrap();
        assert_eq!(effective.model, "gpt-4o-mini");
        assert_eq!(effective.backends.len(), 2);
        assert_eq!(effective.backends[0].id, "browser");
        // Agents fall back to the local defaults
        assert_eq!(effective.agents, vec!["reviewer".to_string()]);
    }

    #[test]
    fn test_invalid_client_backend_id_rejected() {
        let local = local_with_key(Some("k"));
        let params: InitializeGatewayParams = serde_json::from_value(json!({
            "mcpServers": {"bad id": {"command": "x"}}
        }))
        .unwrap();
        assert!(local.merge(&params).is_err());
    }
}
