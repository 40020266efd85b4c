//! A single tool-server connection, whatever its transport.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::config::{ServerDescriptor, TransportKind};
use super::error::{McpError, McpResult};
use super::transport::{Connector, ToolConnection, ToolInfo};

enum HandleState {
    Idle,
    Connected {
        connection: Arc<dyn ToolConnection>,
        tools: Option<Vec<ToolInfo>>,
    },
    Closed,
}

impl HandleState {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connected { .. } => "connected",
            Self::Closed => "closed",
        }
    }
}

/// Uniform handle over one tool server.
///
/// `connect` and `cleanup` hold the state lock for their whole duration, so
/// they never interleave on the same handle.
pub struct ServerHandle {
    descriptor: ServerDescriptor,
    state: RwLock<HandleState>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .state
            .try_read()
            .map_or("busy", |state| state.label());
        f.debug_struct("ServerHandle")
            .field("name", &self.descriptor.name)
            .field("transport", &self.transport_kind())
            .field("state", &state)
            .finish()
    }
}

impl ServerHandle {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            state: RwLock::new(HandleState::Idle),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.descriptor.transport.kind()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, HandleState::Connected { .. })
    }

    /// Establish the connection.
    ///
    /// With `cache_tools` the tool list is fetched once here and served from
    /// memory afterwards; if that fetch fails the fresh connection is closed
    /// again and [`McpError::ToolList`] is returned.
    pub async fn connect(&self, connector: &dyn Connector, cache_tools: bool) -> McpResult<()> {
        let name = self.name();
        let mut state = self.state.write().await;
        match *state {
            HandleState::Idle => {}
            HandleState::Connected { .. } => return Err(McpError::AlreadyConnected(name.to_string())),
            HandleState::Closed => {
                return Err(McpError::connection(name, "handle has already been cleaned up"));
            }
        }

        tracing::info!(
            server = %name,
            transport = %self.transport_kind(),
            env_vars = self.descriptor.env.len(),
            "Connecting to MCP server"
        );

        let connection = connector
            .connect(&self.descriptor)
            .await
            .map_err(|e| McpError::connection(name, format!("{e:#}")))?;

        let tools = if cache_tools {
            match connection.list_tools().await {
                Ok(tools) => Some(tools),
                Err(e) => {
                    if let Err(close_err) = connection.close().await {
                        tracing::warn!(
                            server = %name,
                            error = %close_err,
                            "Failed to close connection after tool pre-fetch failure"
                        );
                    }
                    return Err(McpError::tool_list(name, format!("{e:#}")));
                }
            }
        } else {
            None
        };

        tracing::info!(
            server = %name,
            cached_tools = tools.as_ref().map(Vec::len),
            "MCP server connected"
        );
        *state = HandleState::Connected { connection, tools };
        Ok(())
    }

    /// Release the transport.
    ///
    /// Never fails: the outcome, including any failure, is returned so that
    /// sibling handles still get their cleanup call.
    pub async fn cleanup(&self) -> CleanupOutcome {
        let name = self.name().to_string();
        let mut state = self.state.write().await;
        let previous = std::mem::replace(&mut *state, HandleState::Closed);

        let status = match previous {
            HandleState::Idle => CleanupStatus::NeverConnected,
            HandleState::Closed => CleanupStatus::AlreadyClosed,
            HandleState::Connected { connection, .. } => match connection.close().await {
                Ok(()) => {
                    tracing::info!(server = %name, "MCP server resources released");
                    CleanupStatus::Closed
                }
                Err(e) => {
                    let err = McpError::cleanup(&name, format!("{e:#}"));
                    tracing::warn!(server = %name, error = %err, "MCP server cleanup failed");
                    CleanupStatus::Failed(err)
                }
            },
        };

        CleanupOutcome {
            server: name,
            status,
        }
    }

    /// Tools offered by this server.
    pub async fn list_tools(&self) -> McpResult<Vec<ToolInfo>> {
        let connection = {
            let state = self.state.read().await;
            match &*state {
                HandleState::Connected {
                    tools: Some(tools), ..
                } => return Ok(tools.clone()),
                HandleState::Connected { connection, .. } => Arc::clone(connection),
                HandleState::Idle | HandleState::Closed => {
                    return Err(McpError::NotConnected(self.name().to_string()));
                }
            }
        };

        connection
            .list_tools()
            .await
            .map_err(|e| McpError::tool_list(self.name(), format!("{e:#}")))
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        let connection = match &*self.state.read().await {
            HandleState::Connected { connection, .. } => Arc::clone(connection),
            HandleState::Idle | HandleState::Closed => {
                return Err(McpError::NotConnected(self.name().to_string()));
            }
        };

        connection
            .call_tool(tool, arguments)
            .await
            .map_err(|e| McpError::ToolCall {
                server: self.name().to_string(),
                tool: tool.to_string(),
                reason: format!("{e:#}"),
            })
    }
}

/// Result of one handle's cleanup.
#[derive(Debug)]
pub struct CleanupOutcome {
    pub server: String,
    pub status: CleanupStatus,
}

#[derive(Debug)]
pub enum CleanupStatus {
    /// The transport was released by this call.
    Closed,
    /// An earlier cleanup already released it.
    AlreadyClosed,
    /// The handle never reached the connected state.
    NeverConnected,
    Failed(McpError),
}

impl CleanupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, CleanupStatus::Failed(_))
    }

    /// Whether this call touched the transport at all.
    pub fn touched_transport(&self) -> bool {
        matches!(self.status, CleanupStatus::Closed | CleanupStatus::Failed(_))
    }
}
