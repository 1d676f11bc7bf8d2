//! Completion service
//!
//! One operation: create a chat completion with a tool catalog and
//! automatic tool selection. The trait seam keeps the orchestration engine
//! testable without the network.

pub mod client;
pub mod types;

pub use client::HttpCompletionService;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionService, ToolCall,
    ToolDefinition,
};
