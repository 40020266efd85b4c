//! In-memory connector used by unit tests.

use std::collections::HashSet;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::anyhow;
use async_trait::async_trait;

use super::config::ServerDescriptor;
use super::transport::{Connector, ToolConnection, ToolInfo};

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
    lists: AtomicUsize,
    calls: Mutex<Vec<(String, String, serde_json::Value)>>,
}

#[derive(Default, Clone)]
pub(crate) struct MockConnector {
    fail_connect: HashSet<String>,
    fail_list: HashSet<String>,
    fail_close: HashSet<String>,
    tools: Vec<String>,
    counters: Arc<Counters>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(mut self, server: &str) -> Self {
        self.fail_connect.insert(server.to_string());
        self
    }

    pub(crate) fn failing_tool_list(mut self, server: &str) -> Self {
        self.fail_list.insert(server.to_string());
        self
    }

    pub(crate) fn failing_close(mut self, server: &str) -> Self {
        self.fail_close.insert(server.to_string());
        self
    }

    pub(crate) fn with_tool(mut self, tool: &str) -> Self {
        self.tools.push(tool.to_string());
        self
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn list_count(&self) -> usize {
        self.counters.lists.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.counters.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn ToolConnection>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.contains(&descriptor.name) {
            return Err(anyhow!("connection refused"));
        }
        Ok(Arc::new(MockConnection {
            server: descriptor.name.clone(),
            fail_list: self.fail_list.contains(&descriptor.name),
            fail_close: self.fail_close.contains(&descriptor.name),
            tools: self.tools.clone(),
            closed: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockConnection {
    server: String,
    fail_list: bool,
    fail_close: bool,
    tools: Vec<String>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

#[async_trait]
impl ToolConnection for MockConnection {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(anyhow!("tools/list timed out"));
        }
        Ok(self
            .tools
            .iter()
            .map(|name| ToolInfo {
                name: name.clone(),
                description: Some(format!("{name} tool")),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self.counters.calls.lock().unwrap().push((
            self.server.clone(),
            name.to_string(),
            arguments.clone(),
        ));
        Ok(serde_json::json!({ "server": self.server, "tool": name, "echo": arguments }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(anyhow!("process did not exit"));
        }
        Ok(())
    }
}
