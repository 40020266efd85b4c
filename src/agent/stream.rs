//! Demultiplexes a live run into terminal output.
//!
//! Only two event kinds produce output: text deltas are written as they
//! arrive, and the end of a text segment writes one newline. Every other
//! event is consumed silently.

use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::llm::RunError;
use crate::normalized::NormalizedEvent;

use super::error::QueryError;

/// Writes the incremental text of a run to a sink.
#[derive(Debug)]
pub struct EventDemultiplexer<W> {
    sink: W,
    prefix: Option<String>,
}

impl<W> EventDemultiplexer<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(sink: W) -> Self {
        Self { sink, prefix: None }
    }

    /// Text written once before the first event of every consumed stream.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Consume `events` in arrival order until the stream ends or fails.
    ///
    /// # Errors
    ///
    /// The first error yielded by the stream stops consumption and is
    /// returned; a turn-limit failure keeps its kind. Output already written
    /// is not retracted. Sink failures are returned as [`QueryError::Output`].
    pub async fn consume<S>(&mut self, events: S) -> Result<(), QueryError>
    where
        S: Stream<Item = Result<NormalizedEvent, RunError>>,
    {
        futures::pin_mut!(events);

        if let Some(prefix) = &self.prefix {
            self.sink.write_all(prefix.as_bytes()).await?;
            self.sink.flush().await?;
        }

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "Response stream failed");
                    return Err(QueryError::from_stream(e));
                }
            };

            match event {
                NormalizedEvent::MessageDelta { text } => {
                    self.sink.write_all(text.as_bytes()).await?;
                    self.sink.flush().await?;
                }
                NormalizedEvent::MessageDone => {
                    self.sink.write_all(b"\n").await?;
                    self.sink.flush().await?;
                }
                NormalizedEvent::StreamStart { .. }
                | NormalizedEvent::ToolCallDelta { .. }
                | NormalizedEvent::ToolCallComplete { .. }
                | NormalizedEvent::ToolResult { .. }
                | NormalizedEvent::TurnComplete { .. }
                | NormalizedEvent::RunComplete { .. }
                | NormalizedEvent::Done => {}
            }
        }

        Ok(())
    }
}
