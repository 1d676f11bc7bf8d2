//! Gateway protocol server
//!
//! The JSON-RPC surface exposed to the upstream client, and the merged
//! configuration it is initialized with.

pub mod config;
pub mod server;

pub use config::{EffectiveConfig, GatewayConfig, InitializeGatewayParams};
pub use server::{GatewayServer, GatewayState};
