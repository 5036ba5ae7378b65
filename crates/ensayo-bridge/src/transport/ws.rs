//! WebSocket relay adapter.
//!
//! Connects to `{relay_url}?session={session_id}` and forwards text frames
//! both ways. One background task per connection owns the socket.

use ensayo_common::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{Connector, Transport, TransportEvent, TransportEvents};

/// Build the relay URL for one session.
pub fn relay_session_url(relay_url: &str, session_id: &str) -> Result<Url> {
    let mut url = Url::parse(relay_url)
        .map_err(|e| Error::config(format!("invalid relay url {relay_url:?}: {e}")))?;
    url.query_pairs_mut().append_pair("session", session_id);
    Ok(url)
}

/// Opens WebSocket connections to a relay.
#[derive(Debug, Clone)]
pub struct WsConnector {
    relay_url: String,
}

impl WsConnector {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
        }
    }
}

impl Connector for WsConnector {
    fn open(&self, session_id: &str) -> Result<(Box<dyn Transport>, TransportEvents)> {
        let url = relay_session_url(&self.relay_url, session_id)?;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(url, out_rx, in_tx));

        Ok((Box::new(WsTransport { tx: out_tx }), in_rx))
    }
}

enum Outbound {
    Frame(String),
    Close,
}

struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WsTransport {
    fn send(&self, frame: String) -> Result<()> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::transport("relay connection closed"))
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

async fn run_socket(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("relay connection to {} failed: {}", url, e);
            let _ = inbound.send(TransportEvent::Closed(Some(e.to_string())));
            return;
        }
    };
    info!("connected to relay {}", url);

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break Some(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportEvent::Frame(text.as_str().to_owned())).is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break Some(frame.map_or_else(
                        || "relay closed the connection".to_string(),
                        |f| format!("relay closed the connection: {}", f.reason.as_str()),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break Some("relay stream ended".to_string()),
            },
        }
    };

    debug!("relay connection {} finished: {:?}", url, reason);
    let _ = inbound.send(TransportEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url() {
        let url = relay_session_url("ws://localhost:8080", "abc-123").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/?session=abc-123");

        let url = relay_session_url("wss://relay.example/bridge?v=1", "s").unwrap();
        assert_eq!(url.as_str(), "wss://relay.example/bridge?v=1&session=s");
    }

    #[test]
    fn test_session_url_rejects_garbage() {
        assert!(matches!(
            relay_session_url("not a url", "s"),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_closed() {
        // Grab a free port, then release it so nothing is listening there.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let connector = WsConnector::new(format!("ws://127.0.0.1:{port}"));
        let (_transport, mut events) = connector.open("s").unwrap();
        match events.recv().await {
            Some(TransportEvent::Closed(Some(_))) => {}
            other => panic!("expected Closed, got {:?}", other),
        }
    }
}
