//! Query orchestration.
//!
//! [`QueryOrchestrator`] binds an agent identity once and runs one query at a
//! time against a [`Model`], either streaming incremental output through an
//! [`EventDemultiplexer`] or waiting for the final answer.

pub mod error;
pub mod stream;

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWrite;

use crate::llm::{Agent, Model, ModelSettings};
use crate::mcp::McpRegistry;
use crate::normalized::NormalizedEvent;

pub use error::QueryError;
pub use stream::EventDemultiplexer;

/// Turn cap used when the caller does not pick one.
pub const DEFAULT_MAX_TURNS: usize = 10;

pub const DEFAULT_AGENT_NAME: &str = "weather-assistant";

pub const DEFAULT_INSTRUCTIONS: &str = "You are a professional weather assistant who helps \
users look up and analyse weather information. Users may ask about current conditions or \
forecasts; choose the appropriate tools to answer their question.";

#[derive(Debug, Clone)]
enum AgentState {
    Unbound,
    Bound(Arc<Agent>),
}

/// Runs queries for one bound agent.
pub struct QueryOrchestrator {
    model: Arc<dyn Model>,
    name: String,
    settings: ModelSettings,
    state: AgentState,
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl QueryOrchestrator {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            name: DEFAULT_AGENT_NAME.to_string(),
            settings: ModelSettings::default(),
            state: AgentState::Unbound,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Bind the agent identity to the registry's current handles.
    ///
    /// Only the first call binds; later calls return the existing agent
    /// unchanged.
    pub fn initialize(&mut self, registry: &McpRegistry, instructions: impl Into<String>) -> Arc<Agent> {
        if let AgentState::Bound(agent) = &self.state {
            return Arc::clone(agent);
        }

        let agent = Arc::new(Agent {
            name: self.name.clone(),
            instructions: instructions.into(),
            servers: registry.handles().to_vec(),
            settings: self.settings,
        });

        tracing::info!(
            agent = %agent.name,
            server_count = agent.servers.len(),
            "Agent bound"
        );

        self.state = AgentState::Bound(Arc::clone(&agent));
        agent
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, AgentState::Bound(_))
    }

    pub fn agent(&self) -> Option<&Arc<Agent>> {
        match &self.state {
            AgentState::Bound(agent) => Some(agent),
            AgentState::Unbound => None,
        }
    }

    fn ensure_bound(&mut self) -> Arc<Agent> {
        self.initialize(&McpRegistry::empty(), DEFAULT_INSTRUCTIONS)
    }

    /// Run one query to completion and return the final answer.
    ///
    /// In streaming mode incremental text is written through `demux` as it
    /// arrives; in blocking mode nothing is written. Both modes honour the
    /// same `turn_cap`. An empty query returns an empty answer without
    /// calling the model. An unbound orchestrator binds itself with no tool
    /// servers and the default instructions.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidTurnCap`] for a zero `turn_cap`
    /// - [`QueryError::TurnLimitExceeded`] when the model does not conclude
    ///   within `turn_cap` turns
    /// - [`QueryError::StreamConsumption`] / [`QueryError::Model`] when the
    ///   model run fails
    pub async fn run<W>(
        &mut self,
        query: &str,
        turn_cap: usize,
        streaming: bool,
        demux: &mut EventDemultiplexer<W>,
    ) -> Result<String, QueryError>
    where
        W: AsyncWrite + Unpin,
    {
        let query = query.trim();
        if query.is_empty() {
            tracing::debug!("Empty query, skipping model call");
            return Ok(String::new());
        }
        if turn_cap == 0 {
            return Err(QueryError::InvalidTurnCap);
        }

        let agent = self.ensure_bound();

        tracing::info!(
            agent = %agent.name,
            turn_cap = turn_cap,
            streaming = streaming,
            query_length = query.len(),
            "Processing query"
        );

        if !streaming {
            return self
                .model
                .run(agent, query.to_string(), turn_cap)
                .await
                .map_err(QueryError::from_blocking);
        }

        let mut final_output = None;
        {
            let events = self
                .model
                .run_streamed(agent, query.to_string(), turn_cap)
                .inspect(|item| {
                    if let Ok(NormalizedEvent::RunComplete { final_output: out }) = item {
                        final_output = Some(out.clone());
                    }
                });
            demux.consume(events).await?;
        }

        final_output.ok_or_else(|| {
            QueryError::StreamConsumption("stream ended without a final answer".to_string())
        })
    }
}
