//! Backend registry
//!
//! Owns the keyed set of `BackendChannel`s and coordinates bulk lifecycle:
//! strict concurrent initialization, execution dispatch, and fleet-wide
//! shutdown. All registry mutations go through this type; removal is
//! idempotent between the exit watcher and `shutdown_all`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::channel::BackendChannel;
use super::config::BackendDescriptor;
use crate::error::GatewayError;
use crate::trace::TraceSink;

/// Read-only snapshot of one backend for status reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendState {
    pub id: String,
    pub is_ready: bool,
    pub display_name: String,
    pub command: String,
}

pub struct BackendRegistry {
    channels: RwLock<HashMap<String, Arc<BackendChannel>>>,
    trace: Arc<dyn TraceSink>,
}

impl BackendRegistry {
    pub fn new(trace: Arc<dyn TraceSink>) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            trace,
        })
    }

    /// Initialize every configured backend concurrently. Strict policy: if
    /// any backend fails to become ready the whole call fails, while the
    /// successful backends remain registered and operable. This is a
    /// deliberate all-or-nothing startup gate; partial-fleet startup is a
    /// plausible alternative that is intentionally not implemented.
    pub async fn initialize_all(
        self: &Arc<Self>,
        descriptors: &[BackendDescriptor],
    ) -> Result<(), GatewayError> {
        if descriptors.is_empty() {
            info!("no backends configured");
            return Ok(());
        }

        info!(count = descriptors.len(), "initializing backends");

        let results = join_all(descriptors.iter().map(|descriptor| async move {
            match self.initialize_backend(descriptor).await {
                Ok(()) => true,
                Err(e) => {
                    error!(backend = %descriptor.id, error = %e, "backend initialization failed");
                    false
                }
            }
        }))
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            return Err(GatewayError::InitFailed {
                failed,
                total: descriptors.len(),
            });
        }
        info!(count = descriptors.len(), "all backends ready");
        Ok(())
    }

    async fn initialize_backend(
        self: &Arc<Self>,
        descriptor: &BackendDescriptor,
    ) -> Result<(), GatewayError> {
        let channel = BackendChannel::spawn(
            descriptor.clone(),
            Arc::clone(&self.trace),
            Arc::downgrade(self),
        )
        .await?;

        // Registered before the handshake is issued, so a readiness check
        // can never race an absent entry.
        self.channels
            .write()
            .await
            .insert(descriptor.id.clone(), Arc::clone(&channel));

        if let Err(e) = channel.handshake().await {
            channel.shutdown().await;
            self.remove(&descriptor.id).await;
            return Err(e);
        }

        info!(backend = %descriptor.id, "backend ready");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<BackendChannel>> {
        self.channels.read().await.get(id).cloned()
    }

    pub async fn list_states(&self) -> Vec<BackendState> {
        let mut states: Vec<BackendState> = self
            .channels
            .read()
            .await
            .values()
            .map(|channel| BackendState {
                id: channel.id().to_string(),
                is_ready: channel.is_ready(),
                display_name: channel.descriptor().display_name.clone(),
                command: channel.descriptor().command.clone(),
            })
            .collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// Execute one call on the named backend. Unknown ids fail before any
    /// RPC is attempted; everything else is surfaced from the channel
    /// unchanged.
    pub async fn execute(
        &self,
        id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let channel = self
            .get(id)
            .await
            .ok_or_else(|| GatewayError::BackendNotFound(id.to_string()))?;
        channel.execute(method, Some(params)).await
    }

    /// Shut down every registered channel concurrently and remove all
    /// entries. Safe against channels that already self-removed via their
    /// exit watcher.
    pub async fn shutdown_all(&self) {
        let channels: Vec<Arc<BackendChannel>> =
            self.channels.read().await.values().cloned().collect();
        if channels.is_empty() {
            return;
        }

        info!(count = channels.len(), "shutting down backends");
        join_all(channels.iter().map(|channel| channel.shutdown())).await;

        for channel in &channels {
            self.remove(channel.id()).await;
        }
    }

    pub(crate) async fn remove(&self, id: &str) -> bool {
        self.channels.write().await.remove(id).is_some()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::trace::{RecordingTraceSink, TraceDirection};
    use serde_json::json;
    use std::time::Duration;

    /// Script for a minimal backend: answers the handshake, then serves one
    /// request with a canned result.
    const SERVING_BACKEND: &str = r#"
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}\n'
read line2
read line3
printf '{"jsonrpc":"2.0","id":2,"result":{"entries":["a.txt"]}}\n'
read line4
sleep 60
"#;

    /// Answers the handshake, then exits cleanly.
    const EXITING_BACKEND: &str = r#"
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n'
read line2
exit 0
"#;

    /// Answers the handshake, then appends the next two incoming lines to
    /// the file named by $OUT.
    const NOTE_RECORDING_BACKEND: &str = r#"
trap '' TERM
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n'
read line2
read line3
read line4
printf '%s\n' "$line3" >> "$OUT"
printf '%s\n' "$line4" >> "$OUT"
"#;

    fn shell_descriptor(id: &str, script: &str) -> BackendDescriptor {
        BackendDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
        }
    }

    async fn wait_until_removed(registry: &Arc<BackendRegistry>, id: &str) {
        for _ in 0..100 {
            if registry.get(id).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("backend '{id}' was never removed");
    }

    #[tokio::test]
    async fn test_execute_unknown_id_fails_without_rpc() {
        let trace = Arc::new(RecordingTraceSink::new());
        let registry = BackendRegistry::new(trace.clone());

        let err = registry
            .execute("nowhere", "fs/list", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BackendNotFound(ref id) if id == "nowhere"));
        assert!(trace.methods().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_and_execute_roundtrip() {
        let trace = Arc::new(RecordingTraceSink::new());
        let registry = BackendRegistry::new(trace.clone());

        registry
            .initialize_all(&[shell_descriptor("filesystem", SERVING_BACKEND)])
            .await
            .unwrap();

        let states = registry.list_states().await;
        assert_eq!(states.len(), 1);
        assert!(states[0].is_ready);

        let result = registry
            .execute("filesystem", "fs/list", json!({"path": "/tmp"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"entries": ["a.txt"]}));

        assert_eq!(
            trace.methods(),
            vec![
                (TraceDirection::Request, "fs/list".to_string()),
                (TraceDirection::Response, "fs/list".to_string()),
            ]
        );

        registry.shutdown_all().await;
        assert!(registry.get("filesystem").await.is_none());
    }

    #[tokio::test]
    async fn test_strict_init_keeps_survivors_registered() {
        let registry = BackendRegistry::new(Arc::new(RecordingTraceSink::new()));

        let err = registry
            .initialize_all(&[
                shell_descriptor("filesystem", SERVING_BACKEND),
                BackendDescriptor {
                    id: "broken".to_string(),
                    display_name: "Broken".to_string(),
                    command: "definitely-not-a-real-command-xyz".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
            ])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::InitFailed {
                failed: 1,
                total: 2
            }
        ));

        // The survivor is still registered and ready; the failure left no
        // partial entry behind.
        let survivor = registry.get("filesystem").await.expect("survivor");
        assert!(survivor.is_ready());
        assert!(registry.get("broken").await.is_none());

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_exit_removes_backend_from_registry() {
        let registry = BackendRegistry::new(Arc::new(RecordingTraceSink::new()));

        registry
            .initialize_all(&[shell_descriptor("flaky", EXITING_BACKEND)])
            .await
            .unwrap();

        // The backend exits with code 0 right after the handshake; the exit
        // watcher removes the entry.
        wait_until_removed(&registry, "flaky").await;

        let err = registry
            .execute("flaky", "fs/list", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BackendNotFound(_)));

        // Idempotent with a concurrent fleet shutdown
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_shutdown_sends_notifications_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("notes.log");

        let mut descriptor = shell_descriptor("polite", NOTE_RECORDING_BACKEND);
        descriptor
            .env
            .insert("OUT".to_string(), out.display().to_string());

        let registry = BackendRegistry::new(Arc::new(RecordingTraceSink::new()));
        registry.initialize_all(&[descriptor]).await.unwrap();

        registry.shutdown_all().await;
        assert!(registry.get("polite").await.is_none());

        let recorded = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""method":"shutdown""#));
        assert!(lines[1].contains(r#""method":"exit""#));
    }
}
