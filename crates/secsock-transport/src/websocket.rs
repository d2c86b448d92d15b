//! WebSocket connector.
//!
//! ## Message mapping
//!
//! | Socket                    | Link                                     |
//! |---------------------------|------------------------------------------|
//! | handshake completed       | `opened()`                               |
//! | binary message            | `deliver(InboundFrame::Binary)`          |
//! | text message              | `deliver(InboundFrame::Text)`            |
//! | close frame               | `closed(code)`, 1005 without a payload   |
//! | read/write error, EOF     | `failed(reason)` then `closed(1006)`     |
//! | `LinkCommand::Send`       | binary message                           |
//! | `LinkCommand::Close(c)`   | close frame with code `c`, `closed(c)`   |
//!
//! WebSocket pings are answered by tungstenite; the protocol's own keepalive
//! runs above this layer.

use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use secsock_core::transport::{self, ABNORMAL_CLOSURE};
use secsock_core::{Connector, InboundFrame, Link, LinkCommand, LinkDriver, LinkEvents};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
    },
};

/// Close code reported when the peer's close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Opens WebSocket transports.
///
/// `open` spawns onto the current tokio runtime, so it must be called from
/// within one. The engine always does.
///
/// ```no_run
/// use secsock_transport::WebSocketConnector;
/// use std::sync::Arc;
///
/// let connector = Arc::new(WebSocketConnector::new().with_subprotocol("secsock.v1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    subprotocol: Option<String>,
}

impl WebSocketConnector {
    /// Connector that requests no subprotocol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `subprotocol`. The transport fails with an abnormal close
    /// unless the server's handshake response confirms it.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, url: &str) -> Link {
        let (link, driver) = transport::link();
        let url = url.to_string();
        let subprotocol = self.subprotocol.clone();

        tokio::spawn(async move {
            let events = driver.events.clone();
            if let Err(err) = drive(&url, subprotocol.as_deref(), driver).await {
                tracing::warn!(%err, "WebSocket transport failed");
                events.failed(err.to_string());
                events.closed(ABNORMAL_CLOSURE);
            }
        });

        link
    }
}

/// Dial `url` and pump frames until either side closes.
///
/// Returns `Ok` when the close was reported to the link already.
async fn drive(url: &str, subprotocol: Option<&str>, mut driver: LinkDriver) -> Result<()> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::InvalidRequest(e.to_string()))?;

    if let Some(subprotocol) = subprotocol {
        let value = HeaderValue::from_str(subprotocol)
            .map_err(|e| Error::InvalidRequest(format!("subprotocol: {}", e)))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    let (socket, response) = connect_async(request)
        .await
        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

    if let Some(expected) = subprotocol {
        let accepted = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok());
        if accepted != Some(expected) {
            return Err(Error::ConnectionFailed(format!(
                "Server did not accept subprotocol '{}', got: {:?}",
                expected, accepted
            )));
        }
    }

    tracing::debug!(url = %redact(url), "WebSocket open");
    let (mut sink, mut stream) = socket.split();
    driver.events.opened();

    loop {
        tokio::select! {
            command = driver.commands.recv() => match command {
                Some(LinkCommand::Send(frame)) => {
                    sink.send(Message::Binary(frame)).await?;
                }
                Some(LinkCommand::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(%err, "Close frame not delivered");
                    }
                    driver.events.closed(code);
                    return Ok(());
                }
                None => {
                    // Engine dropped the link.
                    let _ = sink.close().await;
                    return Ok(());
                }
            },
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if let Some(code) = forward(&driver.events, message) {
                        driver.events.closed(code);
                        return Ok(());
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    driver.events.closed(ABNORMAL_CLOSURE);
                    return Ok(());
                }
            },
        }
    }
}

/// Hand one inbound message to the link. Returns the close code on close.
fn forward(events: &LinkEvents, message: Message) -> Option<u16> {
    match message {
        Message::Binary(bytes) => events.deliver(InboundFrame::Binary(bytes)),
        Message::Text(text) => events.deliver(InboundFrame::Text(text)),
        Message::Close(frame) => {
            return Some(frame.map_or(NO_STATUS_RECEIVED, |f| u16::from(f.code)));
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
    }
    None
}

/// Strip the query, which carries the credential token.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsock_core::TransportEvent;

    #[test]
    fn test_redact_drops_token() {
        assert_eq!(redact("ws://host/socket?token=abc"), "ws://host/socket");
        assert_eq!(redact("ws://host/socket"), "ws://host/socket");
    }

    #[tokio::test]
    async fn test_forward_maps_messages() {
        let (mut link, driver) = transport::link();

        assert_eq!(forward(&driver.events, Message::Binary(vec![1, 2])), None);
        assert_eq!(forward(&driver.events, Message::Text("hi".into())), None);
        assert_eq!(forward(&driver.events, Message::Ping(vec![])), None);
        assert_eq!(forward(&driver.events, Message::Close(None)), Some(1005));
        let frame = CloseFrame {
            code: CloseCode::from(4001),
            reason: "bye".into(),
        };
        assert_eq!(forward(&driver.events, Message::Close(Some(frame))), Some(4001));

        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Frame(InboundFrame::Binary(vec![1, 2])))
        );
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Frame(InboundFrame::Text("hi".into())))
        );
        assert!(link.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_abnormal_close() {
        let connector = WebSocketConnector::new();
        // Port 9 on localhost: nothing listens there in test environments.
        let mut link = connector.open("ws://127.0.0.1:9/socket?token=x");

        match link.events.recv().await {
            Some(TransportEvent::Error(_)) => {}
            other => panic!("Expected error, got {:?}", other),
        }
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Closed(ABNORMAL_CLOSURE))
        );
        assert!(!link.handle.is_open());
    }

    #[tokio::test]
    async fn test_invalid_url_reports_abnormal_close() {
        let mut link = WebSocketConnector::new().open("not a url");

        assert!(matches!(link.events.recv().await, Some(TransportEvent::Error(_))));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Closed(ABNORMAL_CLOSURE))
        );
    }
}
