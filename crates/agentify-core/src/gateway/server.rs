//! Gateway protocol server
//!
//! JSON-RPC 2.0 over a byte stream (stdio in production), newline-delimited
//! like the backend transport. Requests are handled sequentially on the
//! reader loop. Built-in methods dispatch statically; per-agent passthrough
//! methods have runtime-computed names and go through a string-keyed handler
//! table populated once the configuration is known.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::{GatewayConfig, InitializeGatewayParams};
use crate::ai::HttpCompletionService;
use crate::backend::BackendRegistry;
use crate::jsonrpc::{codes, Incoming, Response, RpcError};
use crate::orchestrator::catalog::build_catalog;
use crate::orchestrator::{OrchestrationEngine, OrchestrationRequest};
use crate::trace::TraceSink;

pub type MethodHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Uninitialized,
    Ready,
    Draining,
    Terminated,
}

pub struct GatewayServer {
    local: GatewayConfig,
    state: RwLock<GatewayState>,
    registry: RwLock<Option<Arc<BackendRegistry>>>,
    engine: RwLock<Option<OrchestrationEngine>>,
    dynamic: RwLock<HashMap<String, MethodHandler>>,
    trace: Arc<dyn TraceSink>,
}

impl GatewayServer {
    pub fn new(local: GatewayConfig, trace: Arc<dyn TraceSink>) -> Arc<Self> {
        Arc::new(Self {
            local,
            state: RwLock::new(GatewayState::Uninitialized),
            registry: RwLock::new(None),
            engine: RwLock::new(None),
            dynamic: RwLock::new(HashMap::new()),
            trace,
        })
    }

    /// Serve the connection until the client sends `exit` or the stream
    /// closes. Either way the backend fleet is drained before returning.
    pub async fn run<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("gateway listening");
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                let payload = serde_json::to_string(&response)?;
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            if *self.state.read().await == GatewayState::Terminated {
                break;
            }
        }

        // Connection close without the shutdown/exit pair drains here
        self.drain().await;
        *self.state.write().await = GatewayState::Terminated;
        info!("gateway terminated");
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> Option<Response> {
        let incoming: Incoming = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "unparseable message from client");
                return Some(Response::failure(
                    Value::Null,
                    RpcError::new(codes::PARSE_ERROR, format!("parse error: {e}")),
                ));
            }
        };

        if incoming.is_request() {
            let id = incoming.id.unwrap_or(Value::Null);
            let method = incoming.method.unwrap_or_default();
            return Some(match self.dispatch(&method, incoming.params).await {
                Ok(result) => Response::success(id, result),
                Err(error) => Response::failure(id, error),
            });
        }

        if incoming.is_notification() {
            self.handle_notification(incoming.method.as_deref().unwrap_or_default())
                .await;
            return None;
        }

        debug!("ignoring stray response message from client");
        None
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "initialize" => self.handle_initialize(params).await,
            "agentify/orchestrateTask" => self.handle_orchestrate(params).await,
            "agentify/listBackends" => self.handle_list_backends().await,
            "ping" => Ok(json!("pong")),
            other => {
                let handler = self.dynamic.read().await.get(other).cloned();
                match handler {
                    Some(handler) => handler(params).await,
                    None => Err(RpcError::method_not_found(other)),
                }
            }
        }
    }

    async fn handle_notification(&self, method: &str) {
        match method {
            "shutdown" => {
                info!("shutdown requested by client");
                self.drain().await;
            }
            "exit" => {
                info!("exit requested by client");
                self.drain().await;
                *self.state.write().await = GatewayState::Terminated;
            }
            other => debug!(method = %other, "ignoring notification"),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value, RpcError> {
        if *self.state.read().await != GatewayState::Uninitialized {
            return Err(RpcError::new(
                codes::INVALID_REQUEST,
                "gateway already initialized",
            ));
        }

        let params: InitializeGatewayParams = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| RpcError::invalid_params(format!("invalid initialize params: {e}")))?,
            None => InitializeGatewayParams::default(),
        };

        let effective = self
            .local
            .merge(&params)
            .map_err(|e| RpcError::new(e.rpc_code(), e.to_string()))?;

        let registry = BackendRegistry::new(Arc::clone(&self.trace));
        *self.registry.write().await = Some(Arc::clone(&registry));

        // Strict bulk init: any backend failure is fatal to the handshake.
        // Survivors stay registered so the drain can tear them down.
        if let Err(e) = registry.initialize_all(&effective.backends).await {
            return Err(RpcError::new(
                codes::INTERNAL_ERROR,
                format!("backend initialization failed: {e}"),
            ));
        }

        let catalog = build_catalog(&registry.list_states().await);
        let completions = Arc::new(HttpCompletionService::new(
            &effective.completions_url,
            &effective.api_key,
        ));
        *self.engine.write().await = Some(OrchestrationEngine::new(
            completions,
            catalog,
            &effective.model,
        ));

        let agent_methods = self.register_agent_methods(&effective.agents).await;

        *self.state.write().await = GatewayState::Ready;
        info!(
            backends = effective.backends.len(),
            agents = agent_methods.len(),
            model = %effective.model,
            "gateway ready"
        );

        Ok(json!({
            "capabilities": {
                "orchestration": true,
                "agentMethods": agent_methods,
            },
            "serverInfo": {
                "name": "agentify",
                "version": env!("CARGO_PKG_VERSION"),
            }
        }))
    }

    /// One passthrough method per configured external agent. These return a
    /// structural echo; full multi-agent planning lives outside this core.
    async fn register_agent_methods(&self, agents: &[String]) -> Vec<String> {
        let mut names = Vec::new();
        let mut table = self.dynamic.write().await;
        for agent in agents {
            let method = format!("agentify/agent_{}", sanitize_agent_name(agent));
            let agent_name = agent.clone();
            let handler: MethodHandler = Arc::new(move |params| {
                let agent_name = agent_name.clone();
                async move {
                    Ok::<Value, RpcError>(json!({
                        "agent": agent_name,
                        "status": "acknowledged",
                        "echo": params,
                    }))
                }
                .boxed()
            });
            debug!(method = %method, "registered agent passthrough");
            table.insert(method.clone(), handler);
            names.push(method);
        }
        names
    }

    async fn handle_orchestrate(&self, params: Option<Value>) -> Result<Value, RpcError> {
        if *self.state.read().await != GatewayState::Ready {
            return Err(RpcError::new(
                codes::SERVER_NOT_INITIALIZED,
                "gateway is not initialized",
            ));
        }

        let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
        let request: OrchestrationRequest = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("invalid orchestrate params: {e}")))?;
        if request.query.trim().is_empty() {
            return Err(RpcError::invalid_params("query must be a non-empty string"));
        }

        let engine_guard = self.engine.read().await;
        let registry_guard = self.registry.read().await;
        let (Some(engine), Some(registry)) = (engine_guard.as_ref(), registry_guard.as_ref())
        else {
            return Err(RpcError::new(
                codes::SERVER_NOT_INITIALIZED,
                "gateway is not initialized",
            ));
        };

        let Some(plan) = engine.decide(&request).await else {
            return Err(RpcError::new(
                codes::NO_PLAN,
                "could not determine an action for the request",
            ));
        };

        registry
            .execute(&plan.backend_id, &plan.mcp_method, plan.mcp_params.clone())
            .await
            .map_err(|e| {
                RpcError::with_data(
                    e.rpc_code(),
                    e.to_string(),
                    json!({
                        "backendId": plan.backend_id,
                        "method": plan.mcp_method,
                        "error": e.to_string(),
                    }),
                )
            })
    }

    async fn handle_list_backends(&self) -> Result<Value, RpcError> {
        let registry = self.registry.read().await;
        match registry.as_ref() {
            Some(registry) => Ok(json!({ "backends": registry.list_states().await })),
            None => Err(RpcError::new(
                codes::SERVER_NOT_INITIALIZED,
                "gateway is not initialized",
            )),
        }
    }

    async fn drain(&self) {
        {
            let mut state = self.state.write().await;
            if matches!(*state, GatewayState::Draining | GatewayState::Terminated) {
                return;
            }
            *state = GatewayState::Draining;
        }
        info!("draining backend fleet");
        let registry = self.registry.read().await.clone();
        if let Some(registry) = registry {
            registry.shutdown_all().await;
        }
    }

    pub async fn state(&self) -> GatewayState {
        *self.state.read().await
    }
}

/// Method names must be stable identifiers; anything else becomes '_'
fn sanitize_agent_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::RecordingTraceSink;

    fn server_with_key() -> Arc<GatewayServer> {
        let local = GatewayConfig {
            model: "gpt-4o".to_string(),
            completions_url: "http://localhost:9/v1/chat/completions".to_string(),
            api_key: Some("test-key".to_string()),
            backends: Vec::new(),
            agents: Vec::new(),
        };
        GatewayServer::new(local, Arc::new(RecordingTraceSink::new()))
    }

    #[test]
    fn test_sanitize_agent_name() {
        assert_eq!(sanitize_agent_name("reviewer"), "reviewer");
        assert_eq!(sanitize_agent_name("Code Reviewer"), "Code_Reviewer");
        assert_eq!(sanitize_agent_name("a/b:c"), "a_b_c");
    }

    #[tokio::test]
    async fn test_ping_works_in_any_state() {
        let server = server_with_key();
        let result = server.dispatch("ping", None).await.unwrap();
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn test_orchestrate_before_initialize_is_rejected() {
        let server = server_with_key();
        let err = server
            .dispatch(
                "agentify/orchestrateTask",
                Some(json!({"query": "list files"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SERVER_NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let server = server_with_key();
        let err = server.dispatch("agentify/unknown", None).await.unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_initialize_without_credential_fails() {
        let local = GatewayConfig {
            model: "gpt-4o".to_string(),
            completions_url: "http://localhost:9".to_string(),
            api_key: None,
            backends: Vec::new(),
            agents: Vec::new(),
        };
        let server = GatewayServer::new(local, Arc::new(RecordingTraceSink::new()));
        let err = server.dispatch("initialize", None).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert_eq!(server.state().await, GatewayState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_registers_agent_methods() {
        let server = server_with_key();
        let result = server
            .dispatch(
                "initialize",
                Some(json!({"agents": ["Code Reviewer", "summarizer"]})),
            )
            .await
            .unwrap();

        assert_eq!(result["serverInfo"]["name"], "agentify");
        assert_eq!(
            result["capabilities"]["agentMethods"],
            json!([
                "agentify/agent_Code_Reviewer",
                "agentify/agent_summarizer"
            ])
        );
        assert_eq!(server.state().await, GatewayState::Ready);

        // The dynamically registered method answers with a structural echo
        let echo = server
            .dispatch(
                "agentify/agent_Code_Reviewer",
                Some(json!({"task": "review"})),
            )
            .await
            .unwrap();
        assert_eq!(echo["agent"], "Code Reviewer");
        assert_eq!(echo["echo"]["task"], "review");
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let server = server_with_key();
        server.dispatch("initialize", None).await.unwrap();
        let err = server.dispatch("initialize", None).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_orchestrate_with_empty_catalog_reports_no_plan() {
        let server = server_with_key();
        server.dispatch("initialize", None).await.unwrap();

        let err = server
            .dispatch(
                "agentify/orchestrateTask",
                Some(json!({"query": "list files in /tmp"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::NO_PLAN);
        assert!(err.message.contains("could not determine"));
    }

    #[tokio::test]
    async fn test_orchestrate_rejects_empty_query() {
        let server = server_with_key();
        server.dispatch("initialize", None).await.unwrap();

        let err = server
            .dispatch("agentify/orchestrateTask", Some(json!({"query": "  "})))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_full_session_over_stream() {
        let server = server_with_key();

        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let session = tokio::spawn(server.clone().run(server_read, server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        let script = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"agentify/listBackends"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"shutdown"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"exit"}"#,
            "\n",
        );
        client_write.write_all(script.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let first: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["result"]["serverInfo"]["name"], "agentify");

        let second: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["result"], "pong");

        let third: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(third["result"]["backends"], json!([]));

        session.await.unwrap().unwrap();
        assert_eq!(server.state().await, GatewayState::Terminated);
    }
}
