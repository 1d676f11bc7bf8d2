//! Backend stdio transport
//!
//! Spawns a tool-process with piped stdio and speaks newline-delimited JSON
//! over it. The child handle is moved into an exit-watcher task, so process
//! termination is observed exactly once; callers wait on `wait_exit`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex};

use crate::error::GatewayError;

#[derive(Debug)]
pub struct StdioTransport {
    backend_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<BufReader<ChildStdout>>,
    pid: Option<u32>,
    alive: AtomicBool,
    exit_rx: watch::Receiver<bool>,
}

impl StdioTransport {
    /// Spawn a backend process. Requires both stdin and stdout handles to
    /// exist; fails fast otherwise.
    pub async fn spawn(
        id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>, GatewayError> {
        tracing::info!(backend = %id, command = %command, args = ?args, "Spawning backend");
        for (k, v) in env {
            let shown = if is_secret_key(k) { "****" } else { v.as_str() };
            tracing::debug!(backend = %id, "  env {}={}", k, shown);
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                format!("command not found: {command}")
            } else {
                e.to_string()
            };
            GatewayError::Spawn {
                id: id.to_string(),
                reason,
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| GatewayError::Spawn {
            id: id.to_string(),
            reason: "no stdin handle".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| GatewayError::Spawn {
            id: id.to_string(),
            reason: "no stdout handle".to_string(),
        })?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let (exit_tx, exit_rx) = watch::channel(false);

        let transport = Arc::new(Self {
            backend_id: id.to_string(),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout)),
            pid,
            alive: AtomicBool::new(true),
            exit_rx,
        });

        // Drain stderr into the operator log
        if let Some(stderr) = stderr {
            let stderr_id = id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(backend = %stderr_id, "stderr: {line}");
                }
            });
        }

        // Exit watcher owns the child; fires the watch exactly once
        let watcher = Arc::clone(&transport);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::info!(backend = %watcher.backend_id, %status, "Backend process exited")
                }
                Err(e) => {
                    tracing::warn!(backend = %watcher.backend_id, error = %e, "Failed waiting on backend process")
                }
            }
            watcher.alive.store(false, Ordering::SeqCst);
            let _ = exit_tx.send(true);
        });

        Ok(transport)
    }

    /// Send one newline-delimited JSON message
    pub async fn send(&self, message: &str) -> Result<(), GatewayError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| GatewayError::ChannelClosed(self.backend_id.clone()))?;
        let write = async {
            stdin.write_all(message.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write
            .await
            .map_err(|_| GatewayError::ChannelClosed(self.backend_id.clone()))?;
        tracing::trace!(backend = %self.backend_id, "sent: {message}");
        Ok(())
    }

    /// Receive one newline-delimited JSON message, skipping non-JSON lines
    /// (backends sometimes print banners to stdout)
    pub async fn receive(&self) -> Result<String, GatewayError> {
        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            let bytes = stdout
                .read_line(&mut line)
                .await
                .map_err(|_| GatewayError::ChannelClosed(self.backend_id.clone()))?;
            if bytes == 0 {
                return Err(GatewayError::ChannelClosed(self.backend_id.clone()));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('{') {
                tracing::trace!(backend = %self.backend_id, "received: {line}");
                return Ok(line.to_string());
            }
            tracing::debug!(backend = %self.backend_id, "skipping non-JSON line: {line}");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Resolves once the process has exited (immediately if it already has)
    pub async fn wait_exit(&self) {
        let mut rx = self.exit_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Drop our end of the child's stdin
    pub async fn close_stdin(&self) {
        *self.stdin.lock().await = None;
    }

    /// Ask the process to terminate (SIGTERM)
    pub fn terminate(&self) {
        let Some(pid) = self.pid else { return };
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        #[cfg(windows)]
        {
            let _ = std::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T"])
                .output();
        }
    }

    /// Force-kill the process (SIGKILL)
    pub fn kill(&self) {
        let Some(pid) = self.pid else { return };
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        #[cfg(windows)]
        {
            let _ = std::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .output();
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    upper.contains("KEY") || upper.contains("TOKEN") || upper.contains("SECRET")
}
