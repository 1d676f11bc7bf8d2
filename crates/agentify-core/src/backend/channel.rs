//! Per-backend supervision
//!
//! A `BackendChannel` owns one spawned tool-process and its JSON-RPC
//! connection. Requests are correlated through a pending map; a background
//! receive loop completes them. Readiness flips on after a successful
//! handshake and off on any runtime failure. The exit watcher is the single
//! authoritative cleanup path for unplanned termination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::BackendDescriptor;
use super::protocol::{InitializeParams, InitializeResult};
use super::registry::BackendRegistry;
use super::transport::StdioTransport;
use crate::constants::{HANDSHAKE_TIMEOUT, SHUTDOWN_GRACE};
use crate::error::GatewayError;
use crate::jsonrpc::{Incoming, Request};
use crate::trace::{TraceEvent, TraceSink};

type PendingMap = Mutex<HashMap<i64, oneshot::Sender<Result<Value, String>>>>;

pub struct BackendChannel {
    id: String,
    descriptor: BackendDescriptor,
    transport: Arc<StdioTransport>,
    next_id: AtomicI64,
    pending: Arc<PendingMap>,
    is_ready: AtomicBool,
    disposed: AtomicBool,
    recv_shutdown: Mutex<Option<mpsc::Sender<()>>>,
    trace: Arc<dyn TraceSink>,
}

impl BackendChannel {
    /// Spawn the backend process and start its receive loop and exit
    /// watcher. The returned channel is registered but not yet ready; call
    /// `handshake` next.
    pub async fn spawn(
        descriptor: BackendDescriptor,
        trace: Arc<dyn TraceSink>,
        registry: Weak<BackendRegistry>,
    ) -> Result<Arc<Self>, GatewayError> {
        let transport = StdioTransport::spawn(
            &descriptor.id,
            &descriptor.command,
            &descriptor.args,
            &descriptor.env,
        )
        .await?;

        let channel = Arc::new(Self {
            id: descriptor.id.clone(),
            descriptor,
            transport,
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            is_ready: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            recv_shutdown: Mutex::new(None),
            trace,
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        *channel.recv_shutdown.lock().await = Some(shutdown_tx);
        channel.clone().start_receive_loop(shutdown_rx);
        channel.clone().start_exit_watcher(registry);

        Ok(channel)
    }

    fn start_receive_loop(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(backend = %self.id, "receive loop shutting down");
                        break;
                    }
                    result = self.transport.receive() => {
                        match result {
                            Ok(message) => self.handle_message(&message).await,
                            Err(e) => {
                                // Runtime connection error: demote the
                                // backend but leave the registry entry for
                                // the exit watcher.
                                warn!(backend = %self.id, error = %e, "backend connection error");
                                self.is_ready.store(false, Ordering::SeqCst);
                                self.fail_pending(&format!("connection lost: {e}")).await;
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    fn start_exit_watcher(self: Arc<Self>, registry: Weak<BackendRegistry>) {
        tokio::spawn(async move {
            self.transport.wait_exit().await;
            self.is_ready.store(false, Ordering::SeqCst);
            self.dispose().await;
            self.fail_pending("backend process exited").await;
            if let Some(registry) = registry.upgrade() {
                if registry.remove(&self.id).await {
                    info!(backend = %self.id, "removed exited backend from registry");
                }
            }
        });
    }

    async fn handle_message(&self, message: &str) {
        let incoming: Incoming = match serde_json::from_str(message) {
            Ok(m) => m,
            Err(e) => {
                warn!(backend = %self.id, error = %e, "unparseable message from backend");
                return;
            }
        };

        if incoming.is_response() {
            let Some(id) = incoming.id.as_ref().and_then(Value::as_i64) else {
                return;
            };
            if let Some(tx) = self.pending.lock().await.remove(&id) {
                let outcome = match incoming.error {
                    Some(err) => Err(format!("backend error {}: {}", err.code, err.message)),
                    None => Ok(incoming.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            return;
        }

        // Server-to-client notifications are logged and otherwise ignored
        if let Some(method) = incoming.method {
            debug!(backend = %self.id, %method, "backend notification");
        }
    }

    async fn fail_pending(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Handshake with the backend, racing a fixed timeout. On success the
    /// channel becomes ready; on failure the caller tears it down.
    pub async fn handshake(&self) -> Result<(), GatewayError> {
        let params = serde_json::to_value(InitializeParams::new())
            .map_err(|e| GatewayError::HandshakeRejected {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        let result = match timeout(HANDSHAKE_TIMEOUT, self.request("initialize", Some(params))).await
        {
            Err(_) => return Err(GatewayError::HandshakeTimeout(self.id.clone())),
            Ok(Err(e)) => {
                return Err(GatewayError::HandshakeRejected {
                    id: self.id.clone(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(result)) => result,
        };

        if let Ok(init) = serde_json::from_value::<InitializeResult>(result) {
            if let Some(server) = init.server_info {
                info!(
                    backend = %self.id,
                    server = %server.name,
                    version = server.version.as_deref().unwrap_or("-"),
                    "backend handshake complete"
                );
            }
        }

        self.notify("notifications/initialized", None)
            .await
            .map_err(|e| GatewayError::HandshakeRejected {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        self.is_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Forward one call to the backend. Rejects immediately, without any
    /// I/O, when the channel is disposed or not ready.
    pub async fn execute(&self, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        if self.disposed.load(Ordering::SeqCst) || !self.is_ready() {
            return Err(GatewayError::BackendNotReady(self.id.clone()));
        }

        self.trace
            .record(TraceEvent::request(&self.id, method, params.as_ref()));

        match self.request(method, params).await {
            Ok(result) => {
                self.trace
                    .record(TraceEvent::response(&self.id, method, &result));
                Ok(result)
            }
            Err(e) => {
                self.trace.record(TraceEvent::error(&self.id, method, &e));
                Err(e)
            }
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(id, method, params);
        let json = serde_json::to_string(&request)
            .map_err(|_| GatewayError::ChannelClosed(self.id.clone()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.transport.send(&json).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(GatewayError::Downstream {
                id: self.id.clone(),
                method: method.to_string(),
                reason,
            }),
            Err(_) => Err(GatewayError::ChannelClosed(self.id.clone())),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        let note = Request::notification(method, params);
        let json = serde_json::to_string(&note)
            .map_err(|_| GatewayError::ChannelClosed(self.id.clone()))?;
        self.transport.send(&json).await
    }

    /// Graceful teardown: courtesy notifications when ready, dispose the
    /// connection, then SIGTERM with escalation to SIGKILL after the grace
    /// period. The registry entry is removed by the caller.
    pub async fn shutdown(&self) {
        if self.is_ready() {
            if let Err(e) = self.notify("shutdown", None).await {
                warn!(backend = %self.id, error = %e, "shutdown notification failed");
            }
            if let Err(e) = self.notify("exit", None).await {
                warn!(backend = %self.id, error = %e, "exit notification failed");
            }
        }

        self.is_ready.store(false, Ordering::SeqCst);
        self.dispose().await;

        if self.transport.is_alive() {
            self.transport.terminate();
            if timeout(SHUTDOWN_GRACE, self.transport.wait_exit())
                .await
                .is_err()
            {
                warn!(backend = %self.id, "backend did not exit within grace period, killing");
                self.transport.kill();
            }
        }
        info!(backend = %self.id, "backend shut down");
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(tx) = self.recv_shutdown.lock().await.take() {
            let _ = tx.try_send(());
        }
        self.transport.close_stdin().await;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }
}
