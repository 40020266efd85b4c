//! Normalized event types for streaming query runs.
//!
//! This module defines a unified event model that abstracts over the wire
//! format of the model API and provides consistent, strictly ordered events
//! to whatever renders a run.
//!
//! # Event Types
//!
//! - Message deltas and segment boundaries for incremental text output
//! - Tool call lifecycle (delta, complete, result)
//! - Run lifecycle (start, turn complete, run complete, done)
//!
//! # Example
//!
//! ```rust
//! use mcp_assistant::normalized::{NormalizedEvent, event_name};
//!
//! let event = NormalizedEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! assert_eq!(event_name(&event), "message.delta");
//! ```

use serde::{Deserialize, Serialize};

/// Normalized streaming events emitted while a query runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Stream Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    /// Indicates the start of a new streaming response.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this run.
        request_id: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Message Content
    // ─────────────────────────────────────────────────────────────────────
    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    /// End of one contiguous output segment.
    #[serde(rename = "message.done")]
    MessageDone,

    // ─────────────────────────────────────────────────────────────────────
    // Tool Calls
    // ─────────────────────────────────────────────────────────────────────
    /// Incremental tool call delta (streaming tool call assembly).
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta {
        /// Index of this tool call in the current batch.
        call_index: usize,
        /// Tool call ID (may arrive in first delta or later).
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool/function name (may arrive in first delta or later).
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Incremental arguments JSON fragment.
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// Tool call is fully assembled and ready for execution.
    #[serde(rename = "tool_call.complete")]
    ToolCallComplete {
        call_index: usize,
        id: String,
        name: String,
        /// Complete arguments as JSON string.
        arguments_json: String,
    },

    /// Result from executing a tool.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Tool call ID this result corresponds to.
        id: String,
        name: String,
        /// Result content (typically JSON).
        content: String,
        #[serde(default = "default_true")]
        success: bool,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────
    /// One model round trip finished.
    #[serde(rename = "turn.complete")]
    TurnComplete {
        /// 1-based turn number.
        turn: usize,
    },

    /// The run concluded with a final answer.
    #[serde(rename = "run.complete")]
    RunComplete { final_output: String },

    /// Upstream stream has completed successfully.
    #[serde(rename = "done")]
    Done,
}

fn default_true() -> bool {
    true
}

/// Get the wire name for a [`NormalizedEvent`].
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::StreamStart { .. } => "stream.start",
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::MessageDone => "message.done",
        NormalizedEvent::ToolCallDelta { .. } => "tool_call.delta",
        NormalizedEvent::ToolCallComplete { .. } => "tool_call.complete",
        NormalizedEvent::ToolResult { .. } => "tool_result",
        NormalizedEvent::TurnComplete { .. } => "turn.complete",
        NormalizedEvent::RunComplete { .. } => "run.complete",
        NormalizedEvent::Done => "done",
    }
}
