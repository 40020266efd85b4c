#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;
use mcp_assistant::config::{AgentConfig, AppConfig, LlmConfig, McpSettings, TelemetryConfig};
use mcp_assistant::llm::{LlmDriver, LlmRequest};
use mcp_assistant::mcp::{Connector, ServerDescriptor, ToolConnection, ToolInfo, Transport};
use mcp_assistant::normalized::NormalizedEvent;

/// Connector whose servers each offer one `echo` tool.
#[derive(Default, Clone)]
pub struct FakeConnector {
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub spawned: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn ToolConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Transport::Process { command, args } = &descriptor.transport {
            self.spawned
                .lock()
                .unwrap()
                .push(format!("{command} {}", args.join(" ")));
        }
        Ok(Arc::new(FakeConnection {
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct FakeConnection {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolConnection for FakeConnection {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>> {
        Ok(vec![ToolInfo {
            name: "echo".to_string(),
            description: Some("Echo the input".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } }
            }),
        }])
    }

    async fn call_tool(
        &self,
        _name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(arguments)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Driver that calls `tool` for the first `tool_turns` requests, then
/// answers with the content of the last tool result.
pub struct ScriptedDriver {
    pub tool: String,
    pub tool_turns: usize,
    pub requests: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new(tool: &str, tool_turns: usize) -> Self {
        Self {
            tool: tool.to_string(),
            tool_turns,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(
        &self,
        req: LlmRequest,
    ) -> anyhow::Result<Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);

        let events = if n < self.tool_turns {
            vec![
                NormalizedEvent::ToolCallComplete {
                    call_index: 0,
                    id: format!("call_{n}"),
                    name: self.tool.clone(),
                    arguments_json: r#"{"text":"pong"}"#.to_string(),
                },
                NormalizedEvent::Done,
            ]
        } else {
            let last_tool = req
                .messages
                .iter()
                .rev()
                .find(|m| m.tool_call_id.is_some())
                .map_or_else(|| "no tools".to_string(), |m| m.content.clone());
            vec![
                NormalizedEvent::MessageDelta {
                    text: "reply: ".to_string(),
                },
                NormalizedEvent::MessageDelta { text: last_tool },
                NormalizedEvent::MessageDone,
                NormalizedEvent::Done,
            ]
        };

        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

pub fn app_config(mcp_path: &str, max_turns: usize) -> AppConfig {
    AppConfig {
        llm: LlmConfig {
            base_url: "http://localhost:9".to_string(),
            api_key: None,
            model: "stub".to_string(),
            context_window: 65_536,
        },
        agent: AgentConfig {
            name: "weather-assistant".to_string(),
            instructions: "Use tools when helpful.".to_string(),
            max_turns,
            streaming: true,
        },
        mcp: McpSettings {
            config_path: mcp_path.to_string(),
            cache_tools: false,
        },
        telemetry: TelemetryConfig { log_json: false },
    }
}

pub fn write_mcp_json(dir: &tempfile::TempDir, json: &str) -> String {
    let path = dir.path().join("mcp.json");
    std::fs::write(&path, json).unwrap();
    path.to_str().unwrap().to_string()
}
