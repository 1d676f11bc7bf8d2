//! Backend process supervision
//!
//! One spawned tool-process per configured backend, each owning a JSON-RPC
//! connection over stdio. The registry coordinates fleet-wide lifecycle.

pub mod channel;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use channel::BackendChannel;
pub use config::{BackendDescriptor, BackendsFile};
pub use registry::{BackendRegistry, BackendState};
