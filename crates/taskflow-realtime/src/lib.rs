//! # taskflow-realtime
//!
//! Keeps one STOMP 1.2 connection to the taskflow broker over WebSocket,
//! subscribes to the baseline topics, fans inbound messages out as typed
//! [`RealtimeEvent`]s, publishes presence payloads, and reconnects with
//! exponential backoff when the link drops.

pub mod client;
pub mod config;
pub mod registry;
pub mod state;
pub mod stomp;
mod subscriptions;
pub mod transport;

pub use client::RealtimeClient;
pub use config::RealtimeConfig;
pub use registry::{ErrorFilter, ListenerId};
pub use state::ConnectionState;
pub use subscriptions::ChannelCallback;
pub use transport::{Transport, TransportError, TransportEvent, TransportLink, WebSocketTransport};

pub use taskflow_core::{ErrorCategory, EventKey, RealtimeError, RealtimeEvent, TaskId, WorkspaceId};
