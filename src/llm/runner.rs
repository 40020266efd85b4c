//! Turn-bounded tool loop on top of an [`LlmDriver`].
//!
//! One run works like this:
//! 1. List the tools of the agent's servers
//! 2. Send the conversation to the model and stream the response
//! 3. Execute the tool calls the model asked for
//! 4. Feed tool results back and repeat
//!
//! until the model answers without asking for tools, or the turn cap is
//! reached.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt, future::join_all};
use uuid::Uuid;

use crate::mcp::{ServerHandle, ToolCatalog};
use crate::normalized::NormalizedEvent;

use super::context;
use super::{LlmDriver, LlmRequest, Message, ModelSettings, ToolCall, ToolCallFunction, Truncation};

/// Live, single-pass event sequence of one run.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<NormalizedEvent, RunError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The model did not conclude within the turn cap.
    #[error("max turns ({max_turns}) exceeded")]
    TurnLimitExceeded { max_turns: usize },

    /// The event sequence ended without a final answer.
    #[error("model run ended without a final answer")]
    Incomplete,

    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

/// Agent identity a model runs under.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    /// Tool servers the agent may use.
    pub servers: Vec<Arc<ServerHandle>>,
    pub settings: ModelSettings,
}

/// The model capability consumed by the query orchestrator.
#[async_trait::async_trait]
pub trait Model: Send + Sync {
    /// Start a run and return its live event sequence.
    ///
    /// A concluded run ends with `RunComplete { final_output }`; a run that
    /// hits the cap ends with `Err(RunError::TurnLimitExceeded)`.
    fn run_streamed(&self, agent: Arc<Agent>, input: String, max_turns: usize) -> EventStream;

    /// Run to completion and return the final answer.
    async fn run(
        &self,
        agent: Arc<Agent>,
        input: String,
        max_turns: usize,
    ) -> Result<String, RunError> {
        let mut events = self.run_streamed(agent, input, max_turns);
        let mut final_output = None;
        while let Some(event) = events.next().await {
            if let NormalizedEvent::RunComplete { final_output: out } = event? {
                final_output = Some(out);
            }
        }
        final_output.ok_or(RunError::Incomplete)
    }
}

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// [`Model`] backed by a streaming LLM driver and the agent's tool servers.
#[derive(Clone)]
pub struct ToolLoopModel {
    driver: Arc<dyn LlmDriver>,
    context_window: usize,
}

impl std::fmt::Debug for ToolLoopModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLoopModel")
            .field("context_window", &self.context_window)
            .finish_non_exhaustive()
    }
}

impl ToolLoopModel {
    pub fn new(driver: Arc<dyn LlmDriver>, context_window: usize) -> Self {
        Self {
            driver,
            context_window,
        }
    }
}

#[async_trait::async_trait]
impl Model for ToolLoopModel {
    #[allow(clippy::too_many_lines)]
    fn run_streamed(&self, agent: Arc<Agent>, input: String, max_turns: usize) -> EventStream {
        let driver = Arc::clone(&self.driver);
        let context_window = self.context_window;

        let stream = async_stream::stream! {
            let request_id = Uuid::new_v4().to_string();
            yield Ok(NormalizedEvent::StreamStart { request_id: request_id.clone() });

            let catalog = ToolCatalog::collect(&agent.servers).await;
            let tools = catalog.openai_tools_json();
            let settings = agent.settings;

            tracing::info!(
                request_id = %request_id,
                agent = %agent.name,
                tool_count = tools.len(),
                max_turns = max_turns,
                "Starting model run"
            );

            let mut messages = vec![Message::system(agent.instructions.clone()), Message::user(input)];

            for turn in 1..=max_turns {
                if settings.truncation == Truncation::Auto {
                    let budget = context_window.saturating_sub(settings.max_tokens as usize);
                    messages = context::truncate(messages, budget).0;
                }

                tracing::debug!(
                    request_id = %request_id,
                    turn = turn,
                    message_count = messages.len(),
                    "Sending request to LLM driver"
                );

                let req = LlmRequest {
                    messages: messages.clone(),
                    tools: tools.clone(),
                    settings,
                };

                let driver_stream = match driver.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(request_id = %request_id, turn = turn, error = %e, "Failed to create driver stream");
                        yield Err(RunError::Driver(e));
                        return;
                    }
                };

                let mut accumulators: std::collections::BTreeMap<usize, ToolCallAccumulator> =
                    std::collections::BTreeMap::new();
                let mut assistant_text = String::new();

                futures::pin_mut!(driver_stream);
                while let Some(result) = driver_stream.next().await {
                    let event = match result {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::error!(request_id = %request_id, turn = turn, error = %e, "Driver stream failed");
                            yield Err(RunError::Driver(e));
                            return;
                        }
                    };

                    match &event {
                        NormalizedEvent::MessageDelta { text } => assistant_text.push_str(text),
                        NormalizedEvent::ToolCallDelta { call_index, id, name, arguments_delta } => {
                            let acc = accumulators.entry(*call_index).or_default();
                            if acc.id.is_none() {
                                acc.id.clone_from(id);
                            }
                            if acc.name.is_none() {
                                acc.name.clone_from(name);
                            }
                            if let Some(delta) = arguments_delta {
                                acc.arguments.push_str(delta);
                            }
                        }
                        NormalizedEvent::ToolCallComplete { call_index, id, name, arguments_json } => {
                            let acc = accumulators.entry(*call_index).or_default();
                            acc.id = Some(id.clone());
                            acc.name = Some(name.clone());
                            acc.arguments.clone_from(arguments_json);
                        }
                        // End of one driver response, not of the run.
                        NormalizedEvent::Done => continue,
                        _ => {}
                    }
                    yield Ok(event);
                }

                yield Ok(NormalizedEvent::TurnComplete { turn });

                let tool_calls: Vec<ToolCall> = accumulators
                    .into_values()
                    .filter_map(|acc| {
                        Some(ToolCall {
                            id: acc.id?,
                            call_type: "function".to_string(),
                            function: ToolCallFunction {
                                name: acc.name?,
                                arguments: acc.arguments,
                            },
                        })
                    })
                    .collect();

                if tool_calls.is_empty() {
                    tracing::info!(
                        request_id = %request_id,
                        turn = turn,
                        output_length = assistant_text.len(),
                        "Model produced a final answer"
                    );
                    yield Ok(NormalizedEvent::RunComplete { final_output: assistant_text });
                    yield Ok(NormalizedEvent::Done);
                    return;
                }

                tracing::info!(
                    request_id = %request_id,
                    turn = turn,
                    tool_call_count = tool_calls.len(),
                    "Executing tool calls"
                );

                messages.push(Message::assistant_tool_calls(assistant_text, tool_calls.clone()));

                let calls = tool_calls.iter().map(|tc| execute_tool_call(&catalog, tc));
                let results = if settings.parallel_tool_calls {
                    join_all(calls).await
                } else {
                    let mut results = Vec::with_capacity(tool_calls.len());
                    for call in calls {
                        results.push(call.await);
                    }
                    results
                };

                for (tool_call, (content, success)) in tool_calls.iter().zip(results) {
                    yield Ok(NormalizedEvent::ToolResult {
                        id: tool_call.id.clone(),
                        name: tool_call.function.name.clone(),
                        content: content.clone(),
                        success,
                    });
                    messages.push(Message::tool_result(tool_call.id.clone(), content));
                }
            }

            tracing::error!(
                request_id = %request_id,
                max_turns = max_turns,
                "Maximum turns exceeded"
            );
            yield Err(RunError::TurnLimitExceeded { max_turns });
        };

        Box::pin(stream)
    }
}

/// Run one tool call; failures are reported back to the model as content.
async fn execute_tool_call(catalog: &ToolCatalog, tool_call: &ToolCall) -> (String, bool) {
    let tool_name = &tool_call.function.name;
    let arguments: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

    match catalog.call(tool_name, arguments).await {
        Ok(result) => {
            let content = serde_json::to_string(&result).unwrap_or_default();
            tracing::info!(
                tool_id = %tool_call.id,
                tool_name = %tool_name,
                result_length = content.len(),
                "Tool call succeeded"
            );
            (content, true)
        }
        Err(e) => {
            tracing::error!(
                tool_id = %tool_call.id,
                tool_name = %tool_name,
                error = %e,
                "Tool call failed"
            );
            (format!("Error: {e}"), false)
        }
    }
}
