//! Plan and request types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The validated outcome of one orchestration decision: which backend to
/// call, with which method and params. Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub backend_id: String,
    pub mcp_method: String,
    pub mcp_params: Value,
}

impl Plan {
    pub fn is_valid(&self) -> bool {
        !self.backend_id.trim().is_empty()
            && !self.mcp_method.trim().is_empty()
            && self.mcp_params.is_object()
    }
}

/// The upstream orchestrate request payload
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

/// Optional editor context accompanying a query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, rename = "activeDocumentURI")]
    pub active_document_uri: Option<String>,
    #[serde(default, rename = "currentWorkingDirectory")]
    pub current_working_directory: Option<String>,
    #[serde(default, rename = "selectionText")]
    pub selection_text: Option<String>,
}
