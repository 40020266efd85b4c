//! OpenAI-compatible Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for the Chat Completions
//! API (`/v1/chat/completions`), supporting streaming responses and tool calls.

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};

use crate::normalized::NormalizedEvent;

use super::{LlmDriver, LlmRequest, LlmSettings};

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Driver for the Chat Completions API.
///
/// Connects to `/v1/chat/completions` and streams responses as
/// [`NormalizedEvent`]s.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, req: LlmRequest) -> serde_json::Value {
        let s = req.settings;
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
            "temperature": s.temperature,
            "top_p": s.top_p,
            "max_tokens": s.max_tokens,
        });

        // Tool options are only valid alongside a non-empty tool list.
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(req.tools);
            body["tool_choice"] = serde_json::json!(s.tool_choice);
            body["parallel_tool_calls"] = serde_json::Value::Bool(s.parallel_tool_calls);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(
        &self,
        req: LlmRequest,
    ) -> anyhow::Result<std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>>
    {
        let url = self.url();
        let body = self.request_body(req);

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut decoder = SseDecoder::default();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                for event in decoder.feed(&chunk)? {
                    yield event;
                }
            }
            for event in decoder.finish()? {
                yield event;
            }
        };

        Ok(Box::pin(out))
    }
}

/// Incremental decoder from SSE bytes to [`NormalizedEvent`]s.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    tool_accum: BTreeMap<usize, ToolAccum>,
    // text emitted since the last segment boundary
    open_segment: bool,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<NormalizedEvent>> {
        // CRLF and LF framing decode the same once carriage returns are gone
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();

        while let Some(pos) = find_double_newline(&self.buf) {
            let frame = self.buf.drain(..pos + 2).collect::<Vec<_>>();
            self.decode_frame(&frame, &mut events)?;
        }

        Ok(events)
    }

    /// Decode whatever is left once the byte stream has ended.
    fn finish(&mut self) -> anyhow::Result<Vec<NormalizedEvent>> {
        let frame = std::mem::take(&mut self.buf);
        let mut events = Vec::new();
        self.decode_frame(&frame, &mut events)?;
        Ok(events)
    }

    fn decode_frame(&mut self, frame: &[u8], events: &mut Vec<NormalizedEvent>) -> anyhow::Result<()> {
        let text = String::from_utf8_lossy(frame);

        for line in text.lines() {
            let line = line.trim();
            if !line.starts_with("data:") {
                continue;
            }
            let data = line.trim_start_matches("data:").trim();

            if data == "[DONE]" {
                if self.open_segment {
                    self.open_segment = false;
                    events.push(NormalizedEvent::MessageDone);
                }
                events.push(NormalizedEvent::Done);
                continue;
            }

            let v: serde_json::Value = serde_json::from_str(data)?;
            self.decode_chunk(&v, events);
        }

        Ok(())
    }

    fn decode_chunk(&mut self, v: &serde_json::Value, events: &mut Vec<NormalizedEvent>) {
        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        // Assistant text delta
        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
            if !s.is_empty() {
                self.open_segment = true;
                events.push(NormalizedEvent::MessageDelta {
                    text: s.to_string(),
                });
            }
        }

        // Tool calls streaming deltas
        if let Some(arr) = delta.get("tool_calls").and_then(|x| x.as_array()) {
            for tc in arr {
                let idx = usize::try_from(tc.get("index").and_then(serde_json::Value::as_u64).unwrap_or(0))
                    .unwrap_or(0);
                let id = tc.get("id").and_then(|x| x.as_str()).map(ToString::to_string);
                let function = tc.get("function");
                let name = function
                    .and_then(|f| f.get("name"))
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);
                let args_delta = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);

                let entry = self.tool_accum.entry(idx).or_default();
                if entry.id.is_none() {
                    entry.id.clone_from(&id);
                }
                if entry.name.is_none() {
                    entry.name.clone_from(&name);
                }
                if let Some(ad) = &args_delta {
                    entry.args.push_str(ad);
                }

                events.push(NormalizedEvent::ToolCallDelta {
                    call_index: idx,
                    id,
                    name,
                    arguments_delta: args_delta,
                });
            }
        }

        // Completion boundary: close the text segment, then signal the tool phase
        if let Some(fr) = choice.get("finish_reason").and_then(|x| x.as_str()) {
            if self.open_segment {
                self.open_segment = false;
                events.push(NormalizedEvent::MessageDone);
            }
            if fr == "tool_calls" {
                for (idx, a) in std::mem::take(&mut self.tool_accum) {
                    if let (Some(id), Some(name)) = (a.id, a.name) {
                        events.push(NormalizedEvent::ToolCallComplete {
                            call_index: idx,
                            id,
                            name,
                            arguments_json: a.args,
                        });
                    }
                }
            }
        }
    }
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
