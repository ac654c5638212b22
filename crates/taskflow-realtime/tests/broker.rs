//! End-to-end tests against a fake STOMP broker on a real WebSocket.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use taskflow_auth::StaticTokenStore;
use taskflow_realtime::stomp::{self, Command, Frame};
use taskflow_realtime::{
    ConnectionState, ErrorCategory, EventKey, RealtimeClient, RealtimeConfig, RealtimeError,
    RealtimeEvent, TaskId, WorkspaceId,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const TOKEN: &str = "it-token";

/// One accepted broker connection, seen from the test.
struct BrokerConn {
    frames: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl BrokerConn {
    async fn expect(&mut self, command: Command) -> Frame {
        loop {
            let frame = timeout(TIMEOUT, self.frames.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("broker connection ended");
            if frame.command == command {
                return frame;
            }
        }
    }

    /// Wait for the four baseline SUBSCRIBE frames; returns destination → id.
    async fn baseline(&mut self) -> Vec<(String, String)> {
        let mut subs = Vec::new();
        while subs.len() < 4 {
            let frame = self.expect(Command::Subscribe).await;
            subs.push((
                frame.get("destination").unwrap().to_string(),
                frame.get("id").unwrap().to_string(),
            ));
        }
        subs
    }

    fn publish(&self, subscription: &str, destination: &str, body: &Value) {
        let frame = Frame::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", destination)
            .header("message-id", "m-1")
            .body(body.to_string());
        self.outbound
            .send(Message::Text(frame.encode().into()))
            .unwrap();
    }

    fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Bind a broker on an ephemeral port. Every accepted connection is handed
/// to the test through the returned receiver.
async fn boot_broker() -> (String, mpsc::UnboundedReceiver<BrokerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            let (frame_tx, frames) = mpsc::unbounded_channel();
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            if conn_tx.send(BrokerConn { frames, outbound }).is_err() {
                break;
            }
            tokio::spawn(serve(ws, frame_tx, outbound_rx));
        }
    });

    (format!("ws://{addr}/ws"), conn_rx)
}

/// Answers CONNECT itself; everything else is forwarded to the test.
async fn serve(
    ws: WebSocketStream<TcpStream>,
    frame_tx: mpsc::UnboundedSender<Frame>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    let (mut tx, mut rx) = ws.split();
    loop {
        tokio::select! {
            msg = rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                for frame in stomp::decode(text.as_str()).unwrap() {
                    if frame.command == Command::Connect {
                        let expected = format!("Bearer {TOKEN}");
                        let reply = if frame.get("Authorization") == Some(expected.as_str()) {
                            Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", "0,0")
                        } else {
                            Frame::new(Command::Error).header("message", "bad credentials")
                        };
                        if tx.send(Message::Text(reply.encode().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = frame_tx.send(frame);
                }
            }
            out = outbound_rx.recv() => {
                let Some(msg) = out else { break };
                let closing = msg.is_close();
                if tx.send(msg).await.is_err() || closing {
                    break;
                }
            }
        }
    }
}

fn client(url: &str, token: &str) -> RealtimeClient {
    client_with_delay(url, token, Duration::from_millis(50))
}

fn client_with_delay(url: &str, token: &str, reconnect_base_delay: Duration) -> RealtimeClient {
    let config = RealtimeConfig {
        endpoint_url: url.to_string(),
        reconnect_base_delay,
        heartbeat_ms: (0, 0),
        ..RealtimeConfig::default()
    };
    RealtimeClient::websocket(config, Arc::new(StaticTokenStore::new(token)))
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn connect_receive_publish_disconnect() {
    let (url, mut conns) = boot_broker().await;
    let client = client(&url, TOKEN);
    let (event_tx, mut events) = mpsc::unbounded_channel();
    client.on(EventKey::task("created"), move |event: &RealtimeEvent| {
        let _ = event_tx.send(event.payload());
    });

    client.connect().await.unwrap();
    let mut conn = recv(&mut conns).await;

    let connect = conn.expect(Command::Connect).await;
    assert_eq!(connect.get("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(connect.get("host"), Some("127.0.0.1"));

    let subs = conn.baseline().await;
    let (_, tasks_id) = subs
        .iter()
        .find(|(dest, _)| dest == "/topic/tasks")
        .expect("tasks subscription");
    conn.publish(
        tasks_id,
        "/topic/tasks",
        &json!({"action": "created", "task": {"id": "t1"}}),
    );
    assert_eq!(recv(&mut events).await, json!({"id": "t1"}));

    client.watch_task(&TaskId::new("t1"));
    let send = conn.expect(Command::Send).await;
    assert_eq!(send.get("destination"), Some("/app/task.watch"));
    assert_eq!(
        serde_json::from_str::<Value>(&send.body).unwrap(),
        json!({"taskId": "t1"})
    );

    client.disconnect();
    conn.expect(Command::Disconnect).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn workspace_channel_over_websocket() {
    let (url, mut conns) = boot_broker().await;
    let client = client(&url, TOKEN);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ws = WorkspaceId::new("42");

    client
        .subscribe_to_workspace_channel(&ws, move |message| {
            let _ = tx.send(message.clone());
        })
        .await
        .unwrap();
    let mut conn = recv(&mut conns).await;
    conn.baseline().await;

    let mut workspace_subs = Vec::new();
    while workspace_subs.len() < 4 {
        let frame = conn.expect(Command::Subscribe).await;
        workspace_subs.push((
            frame.get("destination").unwrap().to_string(),
            frame.get("id").unwrap().to_string(),
        ));
    }
    let join = conn.expect(Command::Send).await;
    assert_eq!(join.get("destination"), Some("/app/workspace.join"));

    let (dest, id) = &workspace_subs[2];
    assert_eq!(dest, "/topic/workspace/42/activity");
    conn.publish(id, dest, &json!({"kind": "comment", "by": "u1"}));
    assert_eq!(recv(&mut rx).await, json!({"kind": "comment", "by": "u1"}));

    client.unsubscribe_from_workspace_channel(&ws);
    for _ in 0..4 {
        conn.expect(Command::Unsubscribe).await;
    }
    client.disconnect();
}

#[tokio::test]
async fn broker_close_triggers_reconnect() {
    let (url, mut conns) = boot_broker().await;
    let client = client(&url, TOKEN);
    let (tx, mut established) = mpsc::unbounded_channel();
    client.on(EventKey::ConnectionEstablished, move |_| {
        let _ = tx.send(());
    });
    let (rtx, mut reconnecting) = mpsc::unbounded_channel();
    client.on(EventKey::ConnectionReconnecting, move |event| {
        let _ = rtx.send(event.clone());
    });

    client.connect().await.unwrap();
    recv(&mut established).await;
    let mut first = recv(&mut conns).await;
    first.baseline().await;

    first.close();

    let event = recv(&mut reconnecting).await;
    assert_eq!(
        event,
        RealtimeEvent::Reconnecting {
            attempt: 1,
            max_attempts: 5,
            next_attempt_in: Duration::from_millis(50),
        }
    );
    let mut second = recv(&mut conns).await;
    second.baseline().await;
    recv(&mut established).await;
    assert!(client.is_connected());
    assert_eq!(client.reconnect_attempts(), 0);

    client.disconnect();
}

#[tokio::test]
async fn rejected_credentials_surface_as_stomp_error() {
    let (url, _conns) = boot_broker().await;
    let client = client_with_delay(&url, "wrong-token", Duration::from_secs(30));
    let (tx, mut errors) = mpsc::unbounded_channel();
    client.on_error(ErrorCategory::Stomp, move |err| {
        let _ = tx.send(err.clone());
    });

    let result = client.connect().await;

    assert!(matches!(result, Err(RealtimeError::Stomp(ref msg)) if msg.contains("bad credentials")));
    assert!(matches!(recv(&mut errors).await, RealtimeError::Stomp(_)));
    assert!(matches!(
        client.state(),
        ConnectionState::Reconnecting { attempt: 1 }
    ));
    client.disconnect();
}

#[tokio::test]
async fn unreachable_broker_is_websocket_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client(&format!("ws://{addr}/ws"), TOKEN);

    let result = client.connect().await;

    assert!(matches!(result, Err(RealtimeError::WebSocket(_))));
    client.disconnect();
}
