//! Transport seam between handles and the MCP client library.
//!
//! [`Connector`] turns a descriptor into a live [`ToolConnection`]. The
//! production implementation, [`RmcpConnector`], speaks MCP through `rmcp`
//! over a child process (stdio) or a streamable HTTP endpoint; tests plug in
//! their own connectors.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::ServiceExt,
    transport::{StreamableHttpClientTransport, TokioChildProcess},
};
use serde::{Deserialize, Serialize};
use tokio::{process::Command, sync::RwLock};
use url::Url;

use super::config::{ServerDescriptor, Transport};

/// A tool advertised by a server, detached from the client library's types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// An established connection to one tool server.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Release the transport. Closing an already closed connection is a no-op.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Establishes connections from descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor)
    -> anyhow::Result<Arc<dyn ToolConnection>>;
}

type DynClientService = rmcp::service::RunningService<
    rmcp::service::RoleClient,
    Box<dyn rmcp::service::DynService<rmcp::service::RoleClient>>,
>;

/// `rmcp`-backed connector for both transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpConnector;

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn ToolConnection>> {
        let name = &descriptor.name;

        let service = match &descriptor.transport {
            Transport::Process { command, args } => {
                let cmd = child_command(command, args, &descriptor.env);
                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("failed to spawn `{command}` for '{name}'"))?;
                ().into_dyn()
                    .serve(transport)
                    .await
                    .with_context(|| format!("failed to initialize stdio MCP server '{name}'"))?
            }

            Transport::Stream { url } => {
                let url = Url::parse(url)
                    .with_context(|| format!("invalid url for remote MCP '{name}': {url}"))?;
                let transport = StreamableHttpClientTransport::from_uri(url.to_string());
                ().into_dyn()
                    .serve(transport)
                    .await
                    .with_context(|| format!("failed to initialize remote MCP server '{name}'"))?
            }
        };

        Ok(Arc::new(RmcpConnection {
            server: name.clone(),
            service: RwLock::new(Some(service)),
        }))
    }
}

/// Command for a stdio server. The descriptor env is set on the child only.
fn child_command(command: &str, args: &[String], env: &HashMap<String, String>) -> Command {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .stderr(std::process::Stdio::inherit());
    cmd
}

/// Running `rmcp` client service.
///
/// Calls share the read lock; `close` takes the write lock, so it waits for
/// in-flight calls before cancelling the service.
struct RmcpConnection {
    server: String,
    service: RwLock<Option<DynClientService>>,
}

impl std::fmt::Debug for RmcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpConnection")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolConnection for RmcpConnection {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| anyhow!("connection to '{}' is closed", self.server))?;

        let tools = service.list_all_tools().await?;
        Ok(tools
            .into_iter()
            .map(|t| ToolInfo {
                name: t.name.to_string(),
                description: t.description.as_deref().map(str::to_string),
                input_schema: serde_json::Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| anyhow!("connection to '{}' is closed", self.server))?;

        let res = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await?;
        Ok(serde_json::to_value(res)?)
    }

    async fn close(&self) -> anyhow::Result<()> {
        let Some(service) = self.service.write().await.take() else {
            return Ok(());
        };

        let reason = service
            .cancel()
            .await
            .with_context(|| format!("client task for '{}' did not shut down", self.server))?;
        tracing::debug!(server = %self.server, reason = ?reason, "MCP client service cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_child_command_carries_descriptor_env() {
        let env = HashMap::from([(
            "MCP_ASSISTANT_CHILD_ONLY_TOKEN".to_string(),
            "s3cret".to_string(),
        )]);
        let args = vec!["-y".to_string(), "@mcpcentral/mcp-time".to_string()];

        let cmd = child_command("npx", &args, &env);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "npx");
        assert_eq!(
            std_cmd.get_args().collect::<Vec<_>>(),
            vec![OsStr::new("-y"), OsStr::new("@mcpcentral/mcp-time")]
        );
        let envs: Vec<_> = std_cmd.get_envs().collect();
        assert_eq!(
            envs,
            vec![(
                OsStr::new("MCP_ASSISTANT_CHILD_ONLY_TOKEN"),
                Some(OsStr::new("s3cret"))
            )]
        );
        assert!(std::env::var_os("MCP_ASSISTANT_CHILD_ONLY_TOKEN").is_none());
    }
}
