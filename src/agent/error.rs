//! Errors surfaced to the caller of a query.

use crate::llm::RunError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The model did not conclude within the turn cap. No final text exists.
    #[error("max turns ({max_turns}) exceeded")]
    TurnLimitExceeded { max_turns: usize },

    /// The live event sequence failed mid-stream. Output already written
    /// stays written.
    #[error("error while consuming the response stream: {0}")]
    StreamConsumption(String),

    /// A blocking model call failed.
    #[error("model call failed: {0}")]
    Model(String),

    #[error("turn cap must be at least 1")]
    InvalidTurnCap,

    /// Writing to the output sink failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl QueryError {
    /// Map a failure raised while a stream was being drained.
    pub(crate) fn from_stream(err: RunError) -> Self {
        match err {
            RunError::TurnLimitExceeded { max_turns } => Self::TurnLimitExceeded { max_turns },
            other => Self::StreamConsumption(other.to_string()),
        }
    }

    /// Map a failure of a blocking model call.
    pub(crate) fn from_blocking(err: RunError) -> Self {
        match err {
            RunError::TurnLimitExceeded { max_turns } => Self::TurnLimitExceeded { max_turns },
            other => Self::Model(other.to_string()),
        }
    }
}
