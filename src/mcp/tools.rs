//! Namespaced view of the tools offered by a set of handles.
//!
//! Tools are exposed to the model as `server__tool` with every character
//! outside `[A-Za-z0-9_-]` replaced by `_`, which is what OpenAI-compatible
//! function calling accepts.

use std::{collections::HashMap, sync::Arc};

use super::error::{McpError, McpResult};
use super::handle::ServerHandle;
use super::transport::ToolInfo;

#[derive(Debug, Clone)]
struct CatalogEntry {
    namespaced: String,
    handle: Arc<ServerHandle>,
    tool: ToolInfo,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    // namespaced_tool_name -> index into entries
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// List tools on every handle.
    ///
    /// A server whose listing fails is left out of the catalog with a warning;
    /// the remaining servers are still usable.
    pub async fn collect(handles: &[Arc<ServerHandle>]) -> Self {
        let mut catalog = Self::default();

        for handle in handles {
            match handle.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        catalog.insert(Arc::clone(handle), tool);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        server = %handle.name(),
                        error = %e,
                        "Leaving MCP server out of the tool catalog"
                    );
                }
            }
        }

        catalog
    }

    fn insert(&mut self, handle: Arc<ServerHandle>, tool: ToolInfo) {
        let namespaced = sanitize_tool_name(&format!("{}__{}", handle.name(), tool.name));
        if self.index.contains_key(&namespaced) {
            tracing::warn!(tool = %namespaced, "Duplicate namespaced tool name, keeping the first");
            return;
        }
        tracing::debug!(tool = %namespaced, "MCP tool discovered");
        self.index.insert(namespaced.clone(), self.entries.len());
        self.entries.push(CatalogEntry {
            namespaced,
            handle,
            tool,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.namespaced.as_str())
    }

    /// Tools in OpenAI function-calling schema.
    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.entries
            .iter()
            .map(|e| {
                let params = if e.tool.input_schema.is_object() {
                    e.tool.input_schema.clone()
                } else {
                    serde_json::json!({ "type": "object", "properties": {} })
                };

                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": e.namespaced,
                        "description": e.tool.description.as_deref().unwrap_or(""),
                        "parameters": params
                    }
                })
            })
            .collect()
    }

    /// Execute a namespaced tool, e.g. `weather__get_weather`.
    pub async fn call(
        &self,
        namespaced_tool: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        let entry = self
            .index
            .get(namespaced_tool)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| McpError::UnknownTool(namespaced_tool.to_string()))?;

        entry.handle.call_tool(&entry.tool.name, arguments).await
    }
}

pub fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
