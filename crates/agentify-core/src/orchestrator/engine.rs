//! Orchestration engine
//!
//! One free-text request in, at most one validated `Plan` out. The engine
//! never fails: every failure mode maps to "no plan", and callers treat all
//! of them identically. The distinct causes are kept as an internal reason
//! code for the logs only.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::plan::{OrchestrationRequest, Plan};
use crate::ai::types::{ChatMessage, CompletionRequest, CompletionService, ToolDefinition};

const SYSTEM_INSTRUCTION: &str = "You route a user's task to exactly one of the available tools. \
    Each tool is a backend capable of handling a category of tasks; invoke it by providing \
    'mcp_method' (the method to call on that backend) and 'mcp_params' (its parameters). \
    Choose exactly one tool. If the request is ambiguous or no tool supports it, choose none.";

/// Why a decision produced no plan. Logged, never returned: the external
/// contract stays a uniform absence.
#[derive(Debug, Clone, Copy, PartialEq)]
enum NoPlanReason {
    EmptyCatalog,
    NoToolCall,
    BadArgumentsJson,
    ShapeMismatch,
    CompletionFailed,
}

/// Fixed argument shape the model must produce
#[derive(Debug, Deserialize)]
struct ToolArguments {
    mcp_method: String,
    mcp_params: Value,
}

pub struct OrchestrationEngine {
    completions: Arc<dyn CompletionService>,
    catalog: Vec<ToolDefinition>,
    model: String,
}

impl OrchestrationEngine {
    pub fn new(
        completions: Arc<dyn CompletionService>,
        catalog: Vec<ToolDefinition>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            completions,
            catalog,
            model: model.into(),
        }
    }

    pub fn catalog(&self) -> &[ToolDefinition] {
        &self.catalog
    }

    /// Decide which backend should handle the request, if any
    pub async fn decide(&self, request: &OrchestrationRequest) -> Option<Plan> {
        match self.try_decide(request).await {
            Ok(plan) => {
                info!(
                    backend = %plan.backend_id,
                    method = %plan.mcp_method,
                    "orchestration decision"
                );
                Some(plan)
            }
            Err(reason) => {
                info!(reason = ?reason, "no plan determined");
                None
            }
        }
    }

    async fn try_decide(&self, request: &OrchestrationRequest) -> Result<Plan, NoPlanReason> {
        if self.catalog.is_empty() {
            return Err(NoPlanReason::EmptyCatalog);
        }

        let completion = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_INSTRUCTION),
                ChatMessage::user(compose_user_message(request)),
            ],
            tools: self.catalog.clone(),
        };

        let response = self.completions.create(completion).await.map_err(|e| {
            warn!(error = %e, "completion service call failed");
            NoPlanReason::CompletionFailed
        })?;

        let calls = response.tool_calls();
        if calls.is_empty() {
            return Err(NoPlanReason::NoToolCall);
        }
        if calls.len() > 1 {
            // One-shot design: the first call wins, extras are discarded
            debug!(extra = calls.len() - 1, "discarding extra tool calls");
        }
        let call = &calls[0];

        let arguments: ToolArguments =
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                warn!(
                    backend = %call.function.name,
                    error = %e,
                    "tool call arguments are not valid JSON for the expected shape"
                );
                if serde_json::from_str::<Value>(&call.function.arguments).is_err() {
                    NoPlanReason::BadArgumentsJson
                } else {
                    NoPlanReason::ShapeMismatch
                }
            })?;

        if !arguments.mcp_params.is_object() {
            return Err(NoPlanReason::ShapeMismatch);
        }

        let plan = Plan {
            backend_id: call.function.name.clone(),
            mcp_method: arguments.mcp_method,
            mcp_params: arguments.mcp_params,
        };
        if !plan.is_valid() {
            return Err(NoPlanReason::ShapeMismatch);
        }
        Ok(plan)
    }
}

fn compose_user_message(request: &OrchestrationRequest) -> String {
    match &request.context {
        Some(context) => match serde_json::to_string(context) {
            Ok(json) => format!("{}\n\nContext: {}", request.query, json),
            Err(_) => request.query.clone(),
        },
        None => request.query.clone(),
    }
}
