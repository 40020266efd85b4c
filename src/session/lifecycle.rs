//! Setup and teardown of one interactive session.

use std::sync::Arc;

use tokio::io::AsyncWrite;

use crate::agent::{EventDemultiplexer, QueryError, QueryOrchestrator};
use crate::config::AppConfig;
use crate::llm::Model;
use crate::mcp::{BuildOptions, Connector, McpConfig, McpError, McpRegistry, McpResult, TeardownReport};

/// Owns the tool-server registry and the query orchestrator of a session.
///
/// Every connected server is released exactly once: by [`Session::teardown`],
/// or, if the session is dropped before that, by a cleanup task spawned on
/// the current Tokio runtime.
pub struct Session<W> {
    registry: Arc<McpRegistry>,
    orchestrator: QueryOrchestrator,
    demux: EventDemultiplexer<W>,
    max_turns: usize,
    torn_down: bool,
}

impl<W> std::fmt::Debug for Session<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("servers", &self.registry.names())
            .field("orchestrator", &self.orchestrator)
            .field("max_turns", &self.max_turns)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin,
{
    /// Connect the configured servers and bind the agent.
    ///
    /// A server list that cannot be read or parsed is logged and the session
    /// starts without tools.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::DuplicateServer`] when the server list names the
    /// same server twice.
    pub async fn setup(
        config: &AppConfig,
        connector: &dyn Connector,
        model: Arc<dyn Model>,
        demux: EventDemultiplexer<W>,
    ) -> McpResult<Self> {
        let options = BuildOptions {
            cache_tools: config.mcp.cache_tools,
        };

        let registry = match McpConfig::load(&config.mcp.config_path) {
            Ok(mcp_config) => McpRegistry::build(&mcp_config, connector, options).await?,
            Err(McpError::Config(reason)) => {
                tracing::warn!(
                    path = %config.mcp.config_path,
                    error = %reason,
                    "MCP server list unavailable, continuing without tools"
                );
                McpRegistry::empty()
            }
            Err(e) => return Err(e),
        };

        let mut orchestrator = QueryOrchestrator::new(model).with_name(config.agent.name.clone());
        orchestrator.initialize(&registry, config.agent.instructions.clone());

        tracing::info!(
            servers = registry.len(),
            skipped = registry.warnings().len(),
            max_turns = config.agent.max_turns,
            "Session ready"
        );

        Ok(Self {
            registry: Arc::new(registry),
            orchestrator,
            demux,
            max_turns: config.agent.max_turns,
            torn_down: false,
        })
    }

    /// Answer one query with the configured turn cap.
    pub async fn run_query(&mut self, text: &str, streaming: bool) -> Result<String, QueryError> {
        self.orchestrator
            .run(text, self.max_turns, streaming, &mut self.demux)
            .await
    }

    pub fn sink(&self) -> &W {
        self.demux.sink()
    }
}

impl<W> Session<W> {
    pub fn registry(&self) -> &McpRegistry {
        &self.registry
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Release every server. Only the first call does any work; later calls
    /// return an empty report.
    pub async fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            return TeardownReport::default();
        }
        self.torn_down = true;
        self.registry.teardown().await
    }
}

impl<W> Drop for Session<W> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let registry = Arc::clone(&self.registry);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Session dropped before teardown, scheduling MCP cleanup");
                handle.spawn(async move {
                    registry.teardown().await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    servers = registry.len(),
                    "Session dropped outside a Tokio runtime, MCP servers not cleaned up"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, LlmConfig, McpSettings, TelemetryConfig};
    use crate::llm::{Agent, EventStream};
    use crate::mcp::testing::MockConnector;
    use crate::normalized::NormalizedEvent;
    use std::io::Write;

    struct EchoModel;

    #[async_trait::async_trait]
    impl Model for EchoModel {
        fn run_streamed(&self, agent: Arc<Agent>, input: String, _max_turns: usize) -> EventStream {
            let answer = format!("{} servers: {input}", agent.servers.len());
            Box::pin(futures::stream::iter(vec![
                Ok(NormalizedEvent::MessageDelta { text: answer.clone() }),
                Ok(NormalizedEvent::MessageDone),
                Ok(NormalizedEvent::RunComplete { final_output: answer }),
            ]))
        }
    }

    fn app_config(mcp_path: &str) -> AppConfig {
        AppConfig {
            llm: LlmConfig {
                base_url: "http://localhost".to_string(),
                api_key: None,
                model: "stub".to_string(),
                context_window: 8192,
            },
            agent: AgentConfig {
                name: "assistant".to_string(),
                instructions: "be brief".to_string(),
                max_turns: 3,
                streaming: true,
            },
            mcp: McpSettings {
                config_path: mcp_path.to_string(),
                cache_tools: false,
            },
            telemetry: TelemetryConfig { log_json: false },
        }
    }

    fn mcp_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    async fn session(path: &str, connector: &MockConnector) -> McpResult<Session<Vec<u8>>> {
        Session::setup(
            &app_config(path),
            connector,
            Arc::new(EchoModel),
            EventDemultiplexer::new(Vec::new()),
        )
        .await
    }

    #[tokio::test]
    async fn test_missing_server_list_starts_without_tools() {
        let connector = MockConnector::new();
        let mut session = session("/nonexistent/mcp.json", &connector).await.unwrap();

        assert!(session.registry().is_empty());
        let out = session.run_query("ping", true).await.unwrap();
        assert_eq!(out, "0 servers: ping");
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_servers_fail_setup() {
        let file = mcp_file(
            r#"{ "mcpServers": { "a": { "url": "http://x" }, "a": { "url": "http://y" } } }"#,
        );
        let connector = MockConnector::new();
        let err = session(file.path().to_str().unwrap(), &connector)
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::DuplicateServer(ref name) if name == "a"));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let file = mcp_file(
            r#"{ "mcpServers": { "a": { "url": "http://x" }, "b": { "command": "echo", "args": ["hi"] } } }"#,
        );
        let connector = MockConnector::new();
        let mut session = session(file.path().to_str().unwrap(), &connector).await.unwrap();

        let first = session.teardown().await;
        let second = session.teardown().await;
        drop(session);

        assert_eq!(first.released_count(), 2);
        assert!(second.outcomes.is_empty());
        assert_eq!(connector.close_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_schedules_teardown() {
        let file = mcp_file(r#"{ "mcpServers": { "a": { "url": "http://x" } } }"#);
        let connector = MockConnector::new();
        let session = session(file.path().to_str().unwrap(), &connector).await.unwrap();

        drop(session);
        for _ in 0..10 {
            if connector.close_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(connector.close_count(), 1);
    }
}
