//! Error types for tool-server connections.

/// Result type for tool-server operations.
pub type McpResult<T> = std::result::Result<T, McpError>;

/// Failures raised while building, using, or releasing tool-server handles.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The transport could not be established (network failure, spawn
    /// failure, or a failed protocol handshake).
    #[error("failed to connect MCP server '{server}': {reason}")]
    Connection { server: String, reason: String },

    /// The optional tool-list pre-fetch failed.
    #[error("tools/list failed for MCP server '{server}': {reason}")]
    ToolList { server: String, reason: String },

    /// Releasing the transport failed.
    #[error("cleanup failed for MCP server '{server}': {reason}")]
    Cleanup { server: String, reason: String },

    /// A config entry that carries neither a `url` nor a `command`.
    #[error("invalid descriptor for MCP server '{server}': {reason}")]
    InvalidDescriptor { server: String, reason: String },

    /// Two descriptors in one batch share a name.
    #[error("duplicate MCP server name: {0}")]
    DuplicateServer(String),

    #[error("MCP server '{0}' is not connected")]
    NotConnected(String),

    #[error("MCP server '{0}' is already connected")]
    AlreadyConnected(String),

    /// A tool invocation failed on the server side or in transit.
    #[error("tools/call failed for {server}::{tool}: {reason}")]
    ToolCall {
        server: String,
        tool: String,
        reason: String,
    },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The server list file could not be read or parsed.
    #[error("MCP config error: {0}")]
    Config(String),
}

impl McpError {
    pub fn connection(server: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            server: server.into(),
            reason: reason.to_string(),
        }
    }

    pub fn tool_list(server: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ToolList {
            server: server.into(),
            reason: reason.to_string(),
        }
    }

    pub fn cleanup(server: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Cleanup {
            server: server.into(),
            reason: reason.to_string(),
        }
    }
}
