//! Model Context Protocol (MCP) tool-server connections.
//!
//! This module connects to stdio and HTTP-based MCP servers, keeps the
//! resulting handles in declaration order, and releases them again.
//!
//! # Configuration
//!
//! MCP servers are configured via `mcp.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "weather": {
//!       "url": "http://127.0.0.1:8080/mcp"
//!     },
//!     "time": {
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"],
//!       "env": { "TZ": "${TZ}" }
//!     }
//!   }
//! }
//! ```
//!
//! # Tool Namespacing
//!
//! Tools are namespaced by server name: `server_name__tool_name`
//! (e.g., `time__now`, `weather__get_weather`).

pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod tools;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{McpConfig, ServerDescriptor, Transport, TransportKind};
pub use error::{McpError, McpResult};
pub use handle::{CleanupOutcome, CleanupStatus, ServerHandle};
pub use registry::{BuildOptions, ConnectWarning, McpRegistry, TeardownReport};
pub use tools::ToolCatalog;
pub use transport::{Connector, RmcpConnector, ToolConnection, ToolInfo};
