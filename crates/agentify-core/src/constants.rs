//! Shared constants

use std::time::Duration;

/// MCP protocol version sent during the backend handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name advertised to backends during the handshake
pub const CLIENT_NAME: &str = "agentify";

/// How long a backend gets to answer the handshake before it is torn down
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period between SIGTERM and SIGKILL during shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default completion model
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default chat/completions endpoint
pub const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Maximum output tokens requested from the completion service
pub const COMPLETION_MAX_TOKENS: usize = 1024;

/// Strings longer than this are truncated in trace payloads
pub const TRACE_MAX_STRING_CHARS: usize = 500;

/// Payloads serializing larger than this are replaced by a summary
pub const TRACE_MAX_PAYLOAD_BYTES: usize = 1024;
