use std::fmt;

/// Lifecycle of the broker connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A backoff timer for reconnection attempt `attempt` is pending.
    Reconnecting {
        attempt: u32,
    },
    /// Every reconnection attempt failed. Only a manual connect leaves this.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// A link is being brought up, or will be once a timer fires.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}
