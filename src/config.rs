//! Application configuration.
//!
//! Layers, lowest priority first:
//! 1. Built-in defaults
//! 2. Optional config file (`--config` / `MCP_ASSISTANT_CONFIG`)
//! 3. `MCP_ASSISTANT_*` environment variables, `__` between sections
//!    (e.g. `MCP_ASSISTANT_AGENT__MAX_TURNS=5`)
//! 4. `API_KEY`, `BASE_URL`, `MODEL_NAME` for the model endpoint
//! 5. Command-line flags

use crate::agent::{DEFAULT_AGENT_NAME, DEFAULT_INSTRUCTIONS, DEFAULT_MAX_TURNS};
use crate::llm::LlmSettings;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "MCP_ASSISTANT_CONFIG")]
    pub config: Option<String>,

    /// Path of the MCP server list
    #[arg(long)]
    pub mcp_config: Option<String>,

    /// Maximum model turns per query
    #[arg(long)]
    pub max_turns: Option<usize>,

    /// Stream replies token by token
    #[arg(long)]
    pub streaming: Option<bool>,

    /// Pre-fetch tool lists while connecting
    #[arg(long)]
    pub cache_tools: Option<bool>,

    /// Model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub mcp: McpSettings,
    pub telemetry: TelemetryConfig,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub context_window: usize,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("context_window", &self.context_window)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub max_turns: usize,
    pub streaming: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpSettings {
    pub config_path: String,
    pub cache_tools: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub log_json: bool,
}

impl LlmConfig {
    pub fn settings(&self) -> LlmSettings {
        LlmSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: self.model.clone(),
            context_window: self.context_window,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("llm.base_url", "https://api.deepseek.com")?
            .set_default("llm.model", "deepseek-chat")?
            .set_default("llm.context_window", 65_536)?
            .set_default("agent.name", DEFAULT_AGENT_NAME)?
            .set_default("agent.instructions", DEFAULT_INSTRUCTIONS)?
            .set_default("agent.max_turns", DEFAULT_MAX_TURNS as u64)?
            .set_default("agent.streaming", true)?
            .set_default("mcp.config_path", "mcp.json")?
            .set_default("mcp.cache_tools", false)?
            .set_default("telemetry.log_json", false)?;

        // 2. Config file
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 3. Prefixed environment, e.g. MCP_ASSISTANT_MCP__CONFIG_PATH
        builder = builder.add_source(
            Environment::with_prefix("MCP_ASSISTANT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Model endpoint variables
        for (var, key) in [
            ("API_KEY", "llm.api_key"),
            ("BASE_URL", "llm.base_url"),
            ("MODEL_NAME", "llm.model"),
        ] {
            if let Ok(val) = env::var(var) {
                if !val.trim().is_empty() {
                    builder = builder.set_override(key, val)?;
                }
            }
        }

        // 5. CLI flags
        if let Some(path) = cli.mcp_config {
            builder = builder.set_override("mcp.config_path", path)?;
        }
        if let Some(turns) = cli.max_turns {
            builder = builder.set_override("agent.max_turns", turns as u64)?;
        }
        if let Some(streaming) = cli.streaming {
            builder = builder.set_override("agent.streaming", streaming)?;
        }
        if let Some(cache) = cli.cache_tools {
            builder = builder.set_override("mcp.cache_tools", cache)?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("llm.model", model)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("telemetry.log_json", json)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.agent.max_turns == 0 {
            return Err(config::ConfigError::Message(
                "agent.max_turns must be at least 1".to_string(),
            ));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "llm.base_url cannot be empty".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "llm.model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
