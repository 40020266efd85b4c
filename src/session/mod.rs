//! Session lifecycle.
//!
//! A [`Session`] connects the configured tool servers, binds the agent, runs
//! queries, and guarantees every server is released once.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mcp_assistant::agent::EventDemultiplexer;
//! use mcp_assistant::config::AppConfig;
//! use mcp_assistant::llm::{ChatCompletionsDriver, ToolLoopModel};
//! use mcp_assistant::mcp::RmcpConnector;
//! use mcp_assistant::session::Session;
//!
//! let config = AppConfig::load()?;
//! let driver = Arc::new(ChatCompletionsDriver::new(config.llm.settings()));
//! let model = Arc::new(ToolLoopModel::new(driver, config.llm.context_window));
//! let demux = EventDemultiplexer::new(tokio::io::stdout());
//!
//! let mut session = Session::setup(&config, &RmcpConnector, model, demux).await?;
//! let answer = session.run_query("What's the weather in Beijing?", true).await?;
//! session.teardown().await;
//! ```

mod lifecycle;

pub use lifecycle::Session;
