use std::sync::Arc;

use futures::future::join_all;

use super::config::{McpConfig, ServerDescriptor, ensure_unique};
use super::error::{McpError, McpResult};
use super::handle::{CleanupOutcome, ServerHandle};
use super::transport::Connector;

/// Options applied to every connection attempt of one build.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Pre-fetch and cache each server's tool list while connecting.
    pub cache_tools: bool,
}

/// A descriptor that did not make it into the registry.
#[derive(Debug)]
pub struct ConnectWarning {
    pub server: String,
    pub error: McpError,
}

/// Per-handle results of one teardown pass.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl TeardownReport {
    pub fn failures(&self) -> impl Iterator<Item = &CleanupOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Number of handles whose transport this pass actually touched.
    pub fn released_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.touched_transport()).count()
    }
}

/// Ordered collection of connected tool-server handles.
///
/// Handles appear in declaration order. Only handles whose `connect`
/// succeeded are ever added; every other descriptor is recorded as a
/// [`ConnectWarning`], so `len() + warnings().len()` always equals the
/// number of descriptors the registry was built from.
#[derive(Debug, Default)]
pub struct McpRegistry {
    handles: Vec<Arc<ServerHandle>>,
    warnings: Vec<ConnectWarning>,
}

impl McpRegistry {
    /// Creates a registry without servers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from raw `mcp.json` entries.
    ///
    /// Duplicate names reject the whole batch. Entries with neither `url`
    /// nor `command` are reported as warnings without a connection attempt.
    pub async fn build(
        cfg: &McpConfig,
        connector: &dyn Connector,
        options: BuildOptions,
    ) -> McpResult<Self> {
        cfg.ensure_unique_names()?;

        let slots = cfg
            .entries()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.to_descriptor(name)))
            .collect();

        Ok(Self::connect_slots(slots, connector, options).await)
    }

    /// Build from already validated descriptors.
    pub async fn connect_all(
        descriptors: Vec<ServerDescriptor>,
        connector: &dyn Connector,
        options: BuildOptions,
    ) -> McpResult<Self> {
        ensure_unique(descriptors.iter().map(|d| d.name.as_str()))?;

        let slots = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), Ok(d)))
            .collect();

        Ok(Self::connect_slots(slots, connector, options).await)
    }

    async fn connect_slots(
        slots: Vec<(String, McpResult<ServerDescriptor>)>,
        connector: &dyn Connector,
        options: BuildOptions,
    ) -> Self {
        let total = slots.len();

        // Connect concurrently; join_all keeps the input order.
        let attempts = slots.into_iter().map(|(name, slot)| async move {
            let result = match slot {
                Ok(descriptor) => {
                    let handle = ServerHandle::new(descriptor);
                    handle
                        .connect(connector, options.cache_tools)
                        .await
                        .map(|()| handle)
                }
                Err(e) => Err(e),
            };
            (name, result)
        });

        let mut handles = Vec::new();
        let mut warnings = Vec::new();

        for (server, result) in join_all(attempts).await {
            match result {
                Ok(handle) => handles.push(Arc::new(handle)),
                Err(error) => {
                    tracing::warn!(server = %server, error = %error, "Skipping MCP server");
                    warnings.push(ConnectWarning { server, error });
                }
            }
        }

        tracing::info!(
            connected = handles.len(),
            skipped = warnings.len(),
            total = total,
            "MCP server connection complete"
        );
        if handles.is_empty() && total > 0 {
            tracing::warn!("No MCP server could be connected; queries will run without tools");
        }

        Self { handles, warnings }
    }

    /// Connected handles in registration order.
    pub fn handles(&self) -> &[Arc<ServerHandle>] {
        &self.handles
    }

    pub fn warnings(&self) -> &[ConnectWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.name()).collect()
    }

    /// Clean up every handle in registration order.
    ///
    /// Failures are collected in the report and never stop the pass.
    /// Running it again is safe: already closed handles are not touched.
    pub async fn teardown(&self) -> TeardownReport {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            outcomes.push(handle.cleanup().await);
        }

        let report = TeardownReport { outcomes };
        tracing::info!(
            handles = self.handles.len(),
            released = report.released_count(),
            failed = report.failure_count(),
            "MCP registry teardown complete"
        );
        report
    }
}
