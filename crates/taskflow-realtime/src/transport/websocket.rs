use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportEvent, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Open {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        debug!(url, "websocket open");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws, outbound_rx, inbound_tx));
        Ok(TransportLink { outbound, inbound })
    }
}

/// Moves text between the socket and the link channels until either side
/// goes away. Queued outbound messages are flushed before the close frame.
async fn pump(
    ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(text) = outgoing else {
                    if let Err(e) = ws_tx.send(Message::Close(None)).await {
                        debug!(error = %e, "close frame not sent");
                    }
                    break;
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
            incoming = ws_rx.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => TransportEvent::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Text(text),
                        Err(_) => {
                            warn!("dropping non-UTF-8 binary message");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                            .unwrap_or((None, String::new()));
                        let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(TransportEvent::closed("stream ended"));
                        break;
                    }
                };
                // Keep flushing outbound even if the reader is gone.
                let _ = inbound_tx.send(event);
            }
        }
    }
}
