use std::fmt;

/// Error categories observable through error listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Auth,
    Stomp,
    WebSocket,
    Connection,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Stomp => "stomp",
            Self::WebSocket => "websocket",
            Self::Connection => "connection",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Realtime client failures.
/// Auth is fatal (never retried); the rest feed the reconnection loop.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("broker error: {0}")]
    Stomp(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("connection error: {0}")]
    Connection(String),
}

impl RealtimeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Stomp(_) => ErrorCategory::Stomp,
            Self::WebSocket(_) => ErrorCategory::WebSocket,
            Self::Connection(_) => ErrorCategory::Connection,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }

    pub fn missing_token() -> Self {
        Self::Auth("no authentication token available".into())
    }

    pub fn attempts_exhausted(max_attempts: u32) -> Self {
        Self::Connection(format!(
            "gave up after {max_attempts} reconnection attempts"
        ))
    }
}
