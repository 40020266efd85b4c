//! Model capability: LLM drivers, settings, and the tool loop.
//!
//! # Overview
//!
//! The [`LlmDriver`] trait defines the streaming interface to a model API.
//! [`runner::ToolLoopModel`] builds on top of a driver and the connected
//! tool servers to execute tool calls until the model produces a final
//! answer, bounded by a turn cap. Anything implementing [`runner::Model`]
//! can stand in for it.
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: OpenAI-compatible Chat Completions API
//!   (`/v1/chat/completions`)
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_assistant::llm::{ChatCompletionsDriver, LlmSettings};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.deepseek.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "deepseek-chat".to_string(),
//!     context_window: 65_536,
//! };
//! let driver = ChatCompletionsDriver::new(settings);
//! ```

pub mod chat_completions;
pub mod context;
pub mod runner;

pub use chat_completions::ChatCompletionsDriver;
pub use runner::{Agent, EventStream, Model, RunError, ToolLoopModel};

use crate::normalized::NormalizedEvent;
use futures::Stream;
use serde::{Deserialize, Serialize};

/// LLM connection settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Context window of the model in tokens, used for automatic truncation.
    pub context_window: usize,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("context_window", &self.context_window)
            .finish()
    }
}

/// How the model may pick tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

/// What to do when the conversation outgrows the context window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncation {
    /// Drop the oldest turns so the request fits.
    #[default]
    Auto,
    /// Send the history as is and let the API reject it.
    Disabled,
}

/// Fixed sampling and tool-use settings of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub temperature: f32,
    /// Nucleus-sampling threshold.
    pub top_p: f32,
    /// Maximum output tokens per model call.
    pub max_tokens: u32,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
    pub truncation: Truncation,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: 4096,
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            truncation: Truncation::Auto,
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    /// Tool call ID (for tool responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls made by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Type of tool (always "function" for now).
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

/// Function details in a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as JSON string.
    pub arguments: String,
}

/// Request to an LLM driver.
#[derive(Debug)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    /// Available tools in OpenAI function schema format.
    pub tools: Vec<serde_json::Value>,
    pub settings: ModelSettings,
}

/// Trait for LLM streaming drivers.
///
/// Implementations emit [`NormalizedEvent`]s as the model generates output:
/// `MessageDelta`, `MessageDone` at the end of a text segment, tool call
/// deltas and completions, and `Done` when the response is finished.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the connection is interrupted.
    async fn stream(
        &self,
        req: LlmRequest,
    ) -> anyhow::Result<std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>>;
}
