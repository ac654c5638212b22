//! Scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::{PeerEnd, Transport, TransportError, TransportEvent, TransportLink};
use crate::stomp::{self, Command, Frame};

/// What the next `open()` does.
#[derive(Clone, Debug)]
pub enum MockOpen {
    /// Open and answer the handshake with CONNECTED.
    Accept,
    /// Like `Accept`, granting `heart-beat:sx,sy`.
    AcceptHeartbeat(u64, u64),
    /// Open and answer the handshake with an ERROR frame.
    RejectStomp(String),
    /// Open and answer the handshake with this exact text message.
    Raw(String),
    /// Open, then close before answering.
    CloseBeforeConnected,
    /// Fail the open itself.
    Refuse(String),
    /// Wait, then behave like the inner step.
    Delay(Duration, Box<MockOpen>),
}

impl MockOpen {
    pub fn delayed(delay: Duration, inner: MockOpen) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Plays back [`MockOpen`] steps in order, then repeats the fallback.
pub struct MockTransport {
    script: Mutex<VecDeque<MockOpen>>,
    fallback: MockOpen,
    open_count: AtomicUsize,
    urls: Mutex<Vec<String>>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockTransport {
    pub fn new(script: Vec<MockOpen>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: MockOpen::Refuse("connection refused".into()),
            open_count: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Accepts every open.
    pub fn accepting() -> Self {
        Self::new(Vec::new()).with_fallback(MockOpen::Accept)
    }

    /// Refuses every open.
    pub fn refusing(message: &str) -> Self {
        Self::new(Vec::new()).with_fallback(MockOpen::Refuse(message.to_string()))
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: MockOpen) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn peer(&self, index: usize) -> Option<Arc<MockPeer>> {
        self.peers.lock().get(index).cloned()
    }

    pub fn last_peer(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }

    fn link(&self, reply: Option<TransportEvent>) -> TransportLink {
        let (link, end) = TransportLink::pair();
        if let Some(reply) = reply {
            let _ = end.to_client.send(reply);
        }
        self.peers.lock().push(Arc::new(MockPeer::new(end)));
        link
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());

        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.respond(url, step).await
    }
}

impl MockTransport {
    fn respond<'a>(
        &'a self,
        url: &'a str,
        step: MockOpen,
    ) -> BoxFuture<'a, Result<TransportLink, TransportError>> {
        Box::pin(async move {
            match step {
                MockOpen::Accept => {
                    let connected = Frame::new(Command::Connected).header("version", "1.2");
                    Ok(self.link(Some(TransportEvent::Text(connected.encode()))))
                }
                MockOpen::AcceptHeartbeat(sx, sy) => {
                    let connected = Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", format!("{sx},{sy}"));
                    Ok(self.link(Some(TransportEvent::Text(connected.encode()))))
                }
                MockOpen::RejectStomp(message) => {
                    let error = Frame::new(Command::Error).header("message", message);
                    Ok(self.link(Some(TransportEvent::Text(error.encode()))))
                }
                MockOpen::Raw(text) => Ok(self.link(Some(TransportEvent::Text(text)))),
                MockOpen::CloseBeforeConnected => {
                    Ok(self.link(Some(TransportEvent::closed("closed by mock"))))
                }
                MockOpen::Refuse(message) => Err(TransportError::Open {
                    url: url.to_string(),
                    message,
                }),
                MockOpen::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    self.respond(url, *inner).await
                }
            }
        })
    }
}

/// Broker side of one mock link.
pub struct MockPeer {
    from_client: Mutex<mpsc::UnboundedReceiver<String>>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    received: Mutex<Vec<Frame>>,
    heartbeats: AtomicUsize,
    client_gone: AtomicBool,
    next_message_id: AtomicU64,
}

impl MockPeer {
    fn new(end: PeerEnd) -> Self {
        Self {
            from_client: Mutex::new(end.from_client),
            to_client: end.to_client,
            received: Mutex::new(Vec::new()),
            heartbeats: AtomicUsize::new(0),
            client_gone: AtomicBool::new(false),
            next_message_id: AtomicU64::new(0),
        }
    }

    /// Every frame the client has sent on this link so far.
    pub fn frames(&self) -> Vec<Frame> {
        let mut received = self.received.lock();
        let mut rx = self.from_client.lock();
        loop {
            match rx.try_recv() {
                Ok(text) if text.trim().is_empty() => {
                    self.heartbeats.fetch_add(1, Ordering::SeqCst);
                }
                Ok(text) => match stomp::decode(&text) {
                    Ok(frames) => received.extend(frames),
                    Err(e) => panic!("client sent an undecodable frame: {e}: {text:?}"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.client_gone.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        received.clone()
    }

    /// Bare-EOL heart-beats the client has sent.
    pub fn heartbeats(&self) -> usize {
        self.frames();
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn frames_with(&self, command: Command) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.command == command)
            .collect()
    }

    /// `(id, destination)` of subscriptions not yet unsubscribed, in order.
    pub fn active_subscriptions(&self) -> Vec<(String, String)> {
        let mut active: Vec<(String, String)> = Vec::new();
        for frame in self.frames() {
            match frame.command {
                Command::Subscribe => {
                    if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                        active.push((id.to_string(), dest.to_string()));
                    }
                }
                Command::Unsubscribe => {
                    if let Some(id) = frame.get("id") {
                        active.retain(|(active_id, _)| active_id != id);
                    }
                }
                _ => {}
            }
        }
        active
    }

    pub fn subscription_id(&self, destination: &str) -> Option<String> {
        self.active_subscriptions()
            .into_iter()
            .find(|(_, dest)| dest == destination)
            .map(|(id, _)| id)
    }

    /// Publish a MESSAGE on `destination`. Returns whether the client is
    /// subscribed to it; unsubscribed deliveries carry no subscription header.
    pub fn deliver(&self, destination: &str, body: &Value) -> bool {
        self.deliver_raw(destination, &body.to_string())
    }

    pub fn deliver_raw(&self, destination: &str, body: &str) -> bool {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let mut frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("message-id", id.to_string())
            .header("content-type", "application/json");
        let subscription = self.subscription_id(destination);
        if let Some(sub) = &subscription {
            frame = frame.header("subscription", sub.as_str());
        }
        self.send_frame(&frame.body(body));
        subscription.is_some()
    }

    pub fn send_frame(&self, frame: &Frame) {
        self.send_text(frame.encode());
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Text(text.into()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.to_client.send(TransportEvent::Error(message.to_string()));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::closed(reason));
    }

    /// True once the client has dropped its end of the link.
    pub fn client_closed(&self) -> bool {
        self.frames();
        self.client_gone.load(Ordering::SeqCst)
    }
}
