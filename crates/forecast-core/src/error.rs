use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = ForecastError> = std::result::Result<T, E>;

/// Everything that can go wrong between the conversation loop, the capability
/// client and the provider process.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The provider process could not be started or did not finish the handshake.
    #[error("connection to '{server}' failed: {reason}")]
    Connection { server: String, reason: String },

    /// A message had the wrong shape, or the session closed before a response arrived.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session was closed locally, or the provider went away mid-session.
    #[error("session with '{server}' closed: {reason}")]
    SessionClosed { server: String, reason: String },

    #[error("unknown tool: '{name}'")]
    ToolNotFound { name: String },

    /// The provider ran the tool and reported a failure.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("malformed arguments for tool '{name}': {reason}")]
    MalformedToolArguments { name: String, reason: String },

    #[error("request '{method}' timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },

    #[error("no final answer after {max_turns} turns")]
    TurnLimitExceeded { max_turns: usize },

    #[error("language model error: {0}")]
    Oracle(String),

    #[error("question cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ForecastError {
    /// Errors after which the session with the provider cannot be reused.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::SessionClosed { .. } | Self::Cancelled
        )
    }

    /// Tool-level failures the oracle can be told about and adapt to.
    pub fn is_recoverable_tool_error(&self) -> bool {
        matches!(self, Self::ToolNotFound { .. } | Self::ToolExecution { .. })
    }
}

impl From<reqwest::Error> for ForecastError {
    fn from(e: reqwest::Error) -> Self {
        Self::Oracle(e.to_string())
    }
}
