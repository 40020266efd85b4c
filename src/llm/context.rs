//! Token estimation and automatic truncation of oversized context.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, cl100k_base};

use super::{Message, MessageRole};

static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn bpe() -> Option<&'static CoreBPE> {
    BPE.get_or_init(|| match cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            tracing::warn!(error = %e, "cl100k_base unavailable, estimating tokens from length");
            None
        }
    })
    .as_ref()
}

/// Estimate tokens for a string using `cl100k_base`.
pub fn estimate_string(content: &str) -> usize {
    match bpe() {
        Some(bpe) => bpe.encode_with_special_tokens(content).len(),
        None => content.len().div_ceil(4),
    }
}

fn estimate_message(message: &Message) -> usize {
    // ~3 tokens of framing per message
    let mut tokens = 3 + estimate_string(&message.content);
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            tokens += estimate_string(&call.function.name);
            tokens += estimate_string(&call.function.arguments);
        }
    }
    tokens
}

/// Estimate tokens for a list of messages, following the chat format
/// overhead roughly.
pub fn estimate_messages(messages: &[Message]) -> usize {
    // Every reply is primed with <|start|>assistant<|message|>
    messages.iter().map(estimate_message).sum::<usize>() + 3
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationReport {
    pub messages_removed: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Fit `messages` into `budget` tokens.
///
/// Leading system messages and the first user message are always kept; the
/// remaining space is filled with the most recent messages. The kept tail
/// never starts with a tool result, since a result without its assistant
/// tool call is rejected by the API.
pub fn truncate(messages: Vec<Message>, budget: usize) -> (Vec<Message>, Option<TruncationReport>) {
    let tokens_before = estimate_messages(&messages);
    if tokens_before <= budget {
        return (messages, None);
    }

    let head_len = messages
        .iter()
        .position(|m| m.role != MessageRole::System)
        .map_or(messages.len(), |first| first + 1);

    let mut remaining = budget.saturating_sub(estimate_messages(&messages[..head_len]));

    let mut tail_start = messages.len();
    for (idx, msg) in messages.iter().enumerate().skip(head_len).rev() {
        let cost = estimate_message(msg);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        tail_start = idx;
    }
    while tail_start < messages.len() && messages[tail_start].role == MessageRole::Tool {
        tail_start += 1;
    }

    let total = messages.len();
    let mut kept: Vec<Message> = Vec::with_capacity(head_len + total - tail_start);
    let mut iter = messages.into_iter();
    kept.extend(iter.by_ref().take(head_len));
    kept.extend(iter.skip(tail_start - head_len));

    let report = TruncationReport {
        messages_removed: total - kept.len(),
        tokens_before,
        tokens_after: estimate_messages(&kept),
    };
    tracing::info!(
        messages_removed = report.messages_removed,
        tokens_before = report.tokens_before,
        tokens_after = report.tokens_after,
        budget = budget,
        "Truncated conversation context"
    );

    (kept, Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ToolCall, ToolCallFunction};

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: "shell__run".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    fn conversation(rounds: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("System Prompt"), Message::user("First User")];
        for i in 0..rounds {
            let id = format!("call_{i}");
            messages.push(Message::assistant_tool_calls("", vec![tool_call(&id)]));
            messages.push(Message::tool_result(&id, "filler ".repeat(20)));
        }
        messages
    }

    #[test]
    fn test_small_history_is_untouched() {
        let messages = conversation(1);
        let (kept, report) = truncate(messages.clone(), 10_000);
        assert!(report.is_none());
        assert_eq!(kept, messages);
    }

    #[test]
    fn test_truncation_keeps_head_and_recent_tail() {
        let messages = conversation(20);
        let budget = estimate_messages(&messages) / 3;

        let (kept, report) = truncate(messages, budget);
        let report = report.unwrap();

        assert!(report.messages_removed > 0);
        assert!(report.tokens_after <= budget);
        assert_eq!(kept[0].content, "System Prompt");
        assert_eq!(kept[1].content, "First User");
        assert_eq!(kept.last().unwrap().tool_call_id.as_deref(), Some("call_19"));
    }

    #[test]
    fn test_tail_never_starts_with_orphan_tool_result() {
        let messages = conversation(10);
        for budget in [60, 80, 100, 150, 200, 300] {
            let (kept, _) = truncate(messages.clone(), budget);
            if kept.len() > 2 {
                assert_ne!(kept[2].role, MessageRole::Tool, "budget {budget}");
            }
        }
    }
}
