//! Gateway error taxonomy
//!
//! Typed errors for everything the registry and channels can fail with.
//! The orchestration engine never surfaces errors (absence of a plan is its
//! uniform signal); the gateway boundary maps these into JSON-RPC errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to spawn backend '{id}': {reason}")]
    Spawn { id: String, reason: String },

    #[error("backend '{0}' timed out during handshake")]
    HandshakeTimeout(String),

    #[error("backend '{id}' rejected handshake: {reason}")]
    HandshakeRejected { id: String, reason: String },

    #[error("backend '{0}' not found")]
    BackendNotFound(String),

    #[error("backend '{0}' is not ready")]
    BackendNotReady(String),

    #[error("backend '{id}' failed to execute '{method}': {reason}")]
    Downstream {
        id: String,
        method: String,
        reason: String,
    },

    #[error("{failed} of {total} backends failed to initialize")]
    InitFailed { failed: usize, total: usize },

    #[error("connection to backend '{0}' closed")]
    ChannelClosed(String),
}

impl GatewayError {
    /// JSON-RPC error code for the gateway boundary
    pub fn rpc_code(&self) -> i64 {
        match self {
            GatewayError::Config(_) => crate::jsonrpc::codes::INVALID_PARAMS,
            GatewayError::BackendNotFound(_) | GatewayError::BackendNotReady(_) => {
                crate::jsonrpc::codes::BACKEND_UNAVAILABLE
            }
            GatewayError::Downstream { .. } | GatewayError::ChannelClosed(_) => {
                crate::jsonrpc::codes::DOWNSTREAM_FAILURE
            }
            _ => crate::jsonrpc::codes::INTERNAL_ERROR,
        }
    }
}
