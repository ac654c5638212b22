//! The reconnecting broker client.
//!
//! [`RealtimeClient`] is a cheap handle; clones share one connection. Shared
//! state sits behind a `parking_lot::Mutex` that is never held across an
//! `.await` or while listeners run.
//!
//! Every link gets a generation number. Driver tasks, reconnect timers and
//! in-flight handshakes carry the generation they were started under and
//! are ignored once it is stale.

mod channels;
mod publish;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use taskflow_auth::CredentialStore;
use taskflow_core::destinations::{workspace_destinations, BaselineTopic};
use taskflow_core::events::whole_millis;
use taskflow_core::{EventKey, RealtimeError, RealtimeEvent, WorkspaceId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::RealtimeConfig;
use crate::registry::{ErrorFilter, ListenerId, ListenerRegistry};
use crate::state::ConnectionState;
use crate::stomp::{self, Command, Frame, Heartbeat};
use crate::subscriptions::{ChannelCallback, Route, SubscriptionTable};
use crate::transport::{Transport, TransportEvent, TransportLink, WebSocketTransport};

#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    shared: Mutex<Shared>,
    events: ListenerRegistry<EventKey, RealtimeEvent>,
    errors: ListenerRegistry<ErrorFilter, RealtimeError>,
    state_tx: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    attempts: u32,
    generation: u64,
    link: Option<ActiveLink>,
    subscriptions: SubscriptionTable,
    /// Workspace channels the caller asked for; restored after a reconnect.
    channels: HashMap<WorkspaceId, ChannelCallback>,
    reconnect_task: Option<JoinHandle<()>>,
    last_error: Option<RealtimeError>,
}

struct ActiveLink {
    outbound: mpsc::UnboundedSender<String>,
    driver: JoinHandle<()>,
}

impl ActiveLink {
    fn send(&self, frame: &Frame) -> bool {
        self.outbound.send(frame.encode()).is_ok()
    }
}

enum Reconnect {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted,
}

impl RealtimeClient {
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                credentials,
                shared: Mutex::new(Shared::default()),
                events: ListenerRegistry::new(),
                errors: ListenerRegistry::new(),
                state_tx,
            }),
        }
    }

    /// Client over a real WebSocket.
    pub fn websocket(config: RealtimeConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::new(config, Arc::new(WebSocketTransport), credentials)
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().attempts
    }

    /// Destinations currently subscribed on the live link, sorted.
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.inner.shared.lock().subscriptions.destinations()
    }

    // ── Connection lifecycle ───────────────────────────────────────────

    /// Connect to the broker. Returns immediately when already connected;
    /// joins the in-flight attempt when one is running.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        let generation = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => None,
                ConnectionState::Failed => {
                    shared.attempts = 0;
                    Some(self.begin_attempt(&mut shared))
                }
                ConnectionState::Reconnecting { .. } => {
                    if let Some(timer) = shared.reconnect_task.take() {
                        timer.abort();
                    }
                    Some(self.begin_attempt(&mut shared))
                }
                ConnectionState::Disconnected => Some(self.begin_attempt(&mut shared)),
            }
        };

        match generation {
            Some(generation) => self.establish(generation).await,
            None => self.await_in_flight(&mut state_rx).await,
        }
    }

    /// Tear everything down: subscriptions, link, pending reconnect,
    /// listeners and workspace channels. Safe to call in any state.
    pub fn disconnect(&self) {
        let (link, timer, previous) = {
            let mut guard = self.inner.shared.lock();
            let shared = &mut *guard;
            shared.generation += 1;

            let link = shared.link.take();
            let pending = shared.subscriptions.drain();
            if let Some(link) = &link {
                for (destination, frame) in pending {
                    if !link.send(&frame) {
                        warn!(destination, "failed to unsubscribe during disconnect");
                    }
                }
                if !link.send(&Frame::disconnect()) {
                    debug!("link already closed, DISCONNECT not sent");
                }
            }

            shared.channels.clear();
            shared.attempts = 0;
            shared.last_error = None;
            let previous = shared.state;
            self.set_state(shared, ConnectionState::Disconnected);
            (link, shared.reconnect_task.take(), previous)
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        // Dropping the outbound sender lets the transport flush and close.
        if let Some(link) = link {
            link.driver.abort();
        }
        self.inner.events.clear();
        self.inner.errors.clear();

        if previous != ConnectionState::Disconnected {
            info!(previous = %previous, "disconnected from broker");
        }
    }

    fn begin_attempt(&self, shared: &mut Shared) -> u64 {
        shared.generation += 1;
        shared.last_error = None;
        self.set_state(shared, ConnectionState::Connecting);
        shared.generation
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            debug!(from = %shared.state, to = %state, "connection state");
        }
        shared.state = state;
        self.inner.state_tx.send_replace(state);
    }

    async fn await_in_flight(
        &self,
        state_rx: &mut watch::Receiver<ConnectionState>,
    ) -> Result<(), RealtimeError> {
        let settled = state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state);
        if matches!(settled, Ok(ConnectionState::Connected)) {
            return Ok(());
        }
        Err(self
            .inner
            .shared
            .lock()
            .last_error
            .clone()
            .unwrap_or_else(|| RealtimeError::Connection("connection attempt was cancelled".into())))
    }

    async fn establish(&self, generation: u64) -> Result<(), RealtimeError> {
        let Some(token) = self.inner.credentials.token() else {
            return Err(self.attempt_failed(generation, RealtimeError::missing_token()));
        };
        debug!(url = %self.inner.config.endpoint_url, generation, "opening broker link");
        match self.handshake(&token).await {
            Ok((link, heartbeat)) => self.attempt_succeeded(generation, link, heartbeat),
            Err(err) => Err(self.attempt_failed(generation, err)),
        }
    }

    /// Open the transport and exchange CONNECT / CONNECTED.
    async fn handshake(
        &self,
        token: &SecretString,
    ) -> Result<(TransportLink, Heartbeat), RealtimeError> {
        let config = &self.inner.config;
        let mut link = self
            .inner
            .transport
            .open(&config.endpoint_url)
            .await
            .map_err(|e| RealtimeError::WebSocket(e.to_string()))?;

        let connect = Frame::connect(config.virtual_host(), token.expose_secret(), config.heartbeat_ms);
        link.outbound
            .send(connect.encode())
            .map_err(|_| RealtimeError::WebSocket("link closed before CONNECT was sent".into()))?;

        loop {
            let event = link
                .inbound
                .recv()
                .await
                .unwrap_or_else(|| TransportEvent::closed("link dropped"));
            match event {
                TransportEvent::Text(text) => {
                    let frames =
                        stomp::decode(&text).map_err(|e| RealtimeError::Stomp(e.to_string()))?;
                    let mut frames = frames.into_iter();
                    while let Some(frame) = frames.next() {
                        match frame.command {
                            Command::Connected => {
                                let heartbeat = stomp::negotiate_heartbeat(
                                    config.heartbeat_ms,
                                    frame.get("heart-beat"),
                                );
                                for dropped in frames {
                                    debug!(command = %dropped.command, "dropping frame sent with CONNECTED");
                                }
                                return Ok((link, heartbeat));
                            }
                            Command::Error => {
                                return Err(RealtimeError::Stomp(frame.error_message()))
                            }
                            other => debug!(command = %other, "ignoring frame before CONNECTED"),
                        }
                    }
                }
                TransportEvent::Error(message) => return Err(RealtimeError::WebSocket(message)),
                TransportEvent::Closed { code, reason } => {
                    return Err(RealtimeError::Connection(close_reason(code, &reason)))
                }
            }
        }
    }

    fn attempt_succeeded(
        &self,
        generation: u64,
        link: TransportLink,
        heartbeat: Heartbeat,
    ) -> Result<(), RealtimeError> {
        let TransportLink { outbound, inbound } = link;
        let restored: Vec<WorkspaceId> = {
            let mut guard = self.inner.shared.lock();
            let shared = &mut *guard;
            if shared.generation != generation || shared.state != ConnectionState::Connecting {
                debug!(generation, "dropping link of a cancelled attempt");
                return Err(RealtimeError::Connection(
                    "connection attempt was cancelled".into(),
                ));
            }

            let driver = tokio::spawn(drive(
                Arc::downgrade(&self.inner),
                generation,
                inbound,
                outbound.clone(),
                heartbeat,
            ));
            let link = ActiveLink { outbound, driver };

            shared.subscriptions.reset();
            for topic in BaselineTopic::ALL {
                if let Some(frame) = shared
                    .subscriptions
                    .subscribe(topic.destination(), Route::Baseline(topic))
                {
                    link.send(&frame);
                }
            }
            for (workspace_id, callback) in &shared.channels {
                for destination in workspace_destinations(workspace_id) {
                    if let Some(frame) = shared
                        .subscriptions
                        .subscribe(&destination, Route::Workspace(Arc::clone(callback)))
                    {
                        link.send(&frame);
                    }
                }
            }

            shared.link = Some(link);
            shared.attempts = 0;
            shared.last_error = None;
            self.set_state(shared, ConnectionState::Connected);
            shared.channels.keys().cloned().collect()
        };

        info!(
            url = %self.inner.config.endpoint_url,
            outgoing_heartbeat = ?heartbeat.outgoing,
            incoming_heartbeat = ?heartbeat.incoming,
            "connected to broker"
        );
        for workspace_id in &restored {
            debug!(workspace_id = %workspace_id, "restored workspace channels");
            self.join_workspace(workspace_id);
        }
        self.emit(&RealtimeEvent::Established);
        Ok(())
    }

    /// Record a failed attempt, report it, and schedule the next one unless
    /// the failure is fatal. Returns the error for the caller.
    fn attempt_failed(&self, generation: u64, err: RealtimeError) -> RealtimeError {
        let reconnect = {
            let mut shared = self.inner.shared.lock();
            if shared.generation != generation {
                debug!(generation, error = %err, "ignoring failure of a cancelled attempt");
                return err;
            }
            shared.last_error = Some(err.clone());
            if err.is_fatal() {
                shared.attempts = 0;
                self.set_state(&mut shared, ConnectionState::Disconnected);
                None
            } else {
                Some(self.schedule_reconnect(&mut shared))
            }
        };

        warn!(category = %err.category(), error = %err, "broker connection attempt failed");
        self.report(&err);
        if let Some(reconnect) = reconnect {
            self.announce(reconnect);
        }
        err
    }

    /// Called by the driver when a live link dies.
    fn link_lost(&self, generation: u64, err: RealtimeError) {
        let reconnect = {
            let mut guard = self.inner.shared.lock();
            let shared = &mut *guard;
            if shared.generation != generation || shared.state != ConnectionState::Connected {
                return;
            }
            shared.link = None;
            shared.subscriptions.reset();
            shared.last_error = Some(err.clone());
            self.schedule_reconnect(shared)
        };

        warn!(category = %err.category(), error = %err, "broker link lost");
        self.report(&err);
        self.emit(&RealtimeEvent::Lost {
            reason: err.to_string(),
        });
        self.announce(reconnect);
    }

    fn schedule_reconnect(&self, shared: &mut Shared) -> Reconnect {
        let max_attempts = self.inner.config.max_reconnect_attempts;
        if shared.attempts >= max_attempts {
            shared.attempts = max_attempts;
            self.set_state(shared, ConnectionState::Failed);
            return Reconnect::Exhausted;
        }

        shared.attempts += 1;
        let attempt = shared.attempts;
        let delay = self.inner.config.backoff_delay(attempt);
        self.set_state(shared, ConnectionState::Reconnecting { attempt });

        let generation = shared.generation;
        let inner = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                RealtimeClient { inner }.reconnect_now(generation).await;
            }
        });
        if let Some(stale) = shared.reconnect_task.replace(timer) {
            stale.abort();
        }
        Reconnect::Scheduled { attempt, delay }
    }

    fn announce(&self, reconnect: Reconnect) {
        let max_attempts = self.inner.config.max_reconnect_attempts;
        match reconnect {
            Reconnect::Scheduled { attempt, delay } => {
                info!(
                    attempt,
                    max_attempts,
                    delay_ms = whole_millis(delay),
                    "scheduling reconnect"
                );
                self.emit(&RealtimeEvent::Reconnecting {
                    attempt,
                    max_attempts,
                    next_attempt_in: delay,
                });
            }
            Reconnect::Exhausted => {
                let err = RealtimeError::attempts_exhausted(max_attempts);
                error!(max_attempts, "giving up on broker connection");
                self.report(&err);
            }
        }
    }

    async fn reconnect_now(&self, generation: u64) {
        let next = {
            let mut shared = self.inner.shared.lock();
            if shared.generation != generation
                || !matches!(shared.state, ConnectionState::Reconnecting { .. })
            {
                debug!(generation, state = %shared.state, "skipping stale reconnect timer");
                return;
            }
            // This task is the one stored there; dropping the handle detaches it.
            shared.reconnect_task = None;
            self.begin_attempt(&mut shared)
        };
        let _ = self.establish(next).await;
    }

    // ── Inbound ────────────────────────────────────────────────────────

    fn handle_text(&self, generation: u64, text: &str) {
        let frames = match stomp::decode(text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "dropping undecodable broker frame");
                return;
            }
        };
        for frame in frames {
            match frame.command {
                Command::Message => self.dispatch(generation, &frame),
                Command::Error => {
                    let err = RealtimeError::Stomp(frame.error_message());
                    warn!(error = %err, "broker sent ERROR");
                    self.report(&err);
                }
                Command::Receipt => trace!(receipt = ?frame.get("receipt-id"), "receipt"),
                other => debug!(command = %other, "unexpected frame from broker"),
            }
        }
    }

    fn dispatch(&self, generation: u64, frame: &Frame) {
        let destination = frame.get("destination");
        let route = {
            let shared = self.inner.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared
                .subscriptions
                .route(frame.get("subscription"), destination)
        };
        let Some(route) = route else {
            debug!(destination = ?destination, "message for no active subscription");
            return;
        };

        let message: Value = match serde_json::from_str(&frame.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(destination = ?destination, error = %e, "dropping non-JSON message");
                return;
            }
        };

        match route {
            Route::Baseline(topic) => match RealtimeEvent::from_topic(topic, message) {
                Some(event) => self.emit(&event),
                None => warn!(
                    destination = topic.destination(),
                    "dropping message without an action"
                ),
            },
            Route::Workspace(callback) => callback(&message),
        }
    }

    // ── Listeners ──────────────────────────────────────────────────────

    pub fn on<F>(&self, key: EventKey, listener: F) -> ListenerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.inner.events.add(key, Arc::new(listener))
    }

    /// Remove one listener, or all listeners for `key` when `id` is `None`.
    pub fn off(&self, key: &EventKey, id: Option<ListenerId>) {
        self.inner.events.remove(key, id);
    }

    /// Run the listeners for `event.key()` synchronously, in registration order.
    pub fn emit(&self, event: &RealtimeEvent) {
        let key = event.key();
        let delivered = self.inner.events.emit(&key, event);
        trace!(event = %key, delivered, "emitted");
    }

    pub fn on_error<F>(&self, filter: impl Into<ErrorFilter>, listener: F) -> ListenerId
    where
        F: Fn(&RealtimeError) + Send + Sync + 'static,
    {
        self.inner.errors.add(filter.into(), Arc::new(listener))
    }

    pub fn off_error(&self, filter: impl Into<ErrorFilter>, id: Option<ListenerId>) {
        self.inner.errors.remove(&filter.into(), id);
    }

    /// Category listeners first, then wildcard listeners.
    fn report(&self, err: &RealtimeError) {
        self.inner
            .errors
            .emit(&ErrorFilter::Category(err.category()), err);
        self.inner.errors.emit(&ErrorFilter::Any, err);
    }
}

/// Per-link task: feeds inbound text to the client, keeps heart-beats
/// flowing, and reports the link lost when it ends.
async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
    heartbeat: Heartbeat,
) {
    let mut ticker = heartbeat_ticker(heartbeat);
    let mut last_received = Instant::now();
    let mut last_sent = Instant::now();

    let lost = loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(TransportEvent::Text(text)) => {
                    last_received = Instant::now();
                    let Some(inner) = inner.upgrade() else { return };
                    RealtimeClient { inner }.handle_text(generation, &text);
                }
                Some(TransportEvent::Error(message)) => break RealtimeError::WebSocket(message),
                Some(TransportEvent::Closed { code, reason }) => {
                    break RealtimeError::Connection(close_reason(code, &reason))
                }
                None => break RealtimeError::Connection("transport dropped".into()),
            },
            _ = next_tick(&mut ticker) => {
                if let Some(every) = heartbeat.outgoing {
                    if last_sent.elapsed() >= every {
                        let _ = outbound.send("\n".to_string());
                        last_sent = Instant::now();
                    }
                }
                if let Some(every) = heartbeat.incoming {
                    if last_received.elapsed() > every * 2 {
                        break RealtimeError::WebSocket(format!(
                            "no heart-beat from broker for {}ms",
                            last_received.elapsed().as_millis()
                        ));
                    }
                }
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        RealtimeClient { inner }.link_lost(generation, lost);
    }
}

fn heartbeat_ticker(heartbeat: Heartbeat) -> Option<Interval> {
    let period = match (heartbeat.outgoing, heartbeat.incoming) {
        (Some(out), Some(inc)) => out.min(inc),
        (Some(every), None) | (None, Some(every)) => every,
        (None, None) => return None,
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn close_reason(code: Option<u16>, reason: &str) -> String {
    match (code, reason.is_empty()) {
        (Some(code), true) => format!("closed with code {code}"),
        (Some(code), false) => format!("closed with code {code}: {reason}"),
        (None, true) => "closed".to_string(),
        (None, false) => format!("closed: {reason}"),
    }
}
