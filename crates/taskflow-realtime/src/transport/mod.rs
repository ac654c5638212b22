//! Byte-level link to the broker.
//!
//! A [`Transport`] opens a [`TransportLink`]: an outbound channel of text
//! messages and an inbound channel of [`TransportEvent`]s. Dropping the
//! outbound sender closes the link.

use async_trait::async_trait;
use tokio::sync::mpsc;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod websocket;

pub use websocket::WebSocketTransport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Socket-level failure. The link is dead after this.
    Error(String),
    /// Peer closed the socket or the stream ended.
    Closed { code: Option<u16>, reason: String },
}

impl TransportEvent {
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            code: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open {url}: {message}")]
    Open { url: String, message: String },
}

pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    /// Two ends of an in-memory link: `(client side, peer side)`.
    pub fn pair() -> (Self, PeerEnd) {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        (
            Self { outbound, inbound },
            PeerEnd {
                from_client,
                to_client,
            },
        )
    }
}

/// The far side of an in-memory [`TransportLink`].
pub struct PeerEnd {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError>;
}
