use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use url::Url;

/// Everything needed to open one recognition connection.
#[derive(Debug)]
pub struct ConnectRequest {
    pub url: Url,
    /// Fresh identifier sent as the X-ConnectionId header
    pub connection_id: String,
    pub bearer_token: String,
    /// Cap on the connection attempt
    pub connect_timeout: Duration,
}

/// One frame queued for transmission.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// One completion surfaced by the socket.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text block arrived from the service
    Message(String),
    /// The socket closed, with the server's reason if it gave one
    Closed(Option<String>),
    /// The socket failed
    Error(String),
}

/// Channel pair for one open connection. Frames pushed into `outbound` are
/// written in order; everything the socket produces arrives on `events`.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Seam between the session and the socket library, so tests can stand in
/// a scripted transport.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Transport>;
}

/// Production connector speaking WebSocket to the recognition endpoint.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Transport> {
        let host = request
            .url
            .host_str()
            .ok_or_else(|| SpeechError::Transport("endpoint URL has no host".to_string()))?;
        let host = match request.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        // Hand-built request so the connection carries the service headers
        let handshake = http::Request::builder()
            .uri(request.url.as_str())
            .header("Host", host)
            .header("X-ConnectionId", &request.connection_id)
            .header("Authorization", format!("Bearer {}", request.bearer_token))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())
            .map_err(|e| SpeechError::Transport(e.to_string()))?;

        let (ws_stream, _) =
            tokio::time::timeout(request.connect_timeout, connect_async(handshake))
                .await
                .map_err(|_| SpeechError::Transport("connection attempt timed out".to_string()))??;
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer half: drain queued frames onto the socket in order
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            log::warn!("Transport: Failed to send text frame: {}", e);
                            break;
                        }
                    }
                    OutboundFrame::Binary(bytes) => {
                        if let Err(e) = write.send(Message::Binary(bytes.into())).await {
                            log::warn!("Transport: Failed to send binary frame: {}", e);
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        });

        // Reader half: funnel socket activity into the event channel
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        if events_tx
                            .send(TransportEvent::Message(text.to_string()))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = events_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(Message::Binary(data)) => {
                        log::debug!("Transport: Ignoring {} byte binary message", data.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = events_tx.send(TransportEvent::Closed(None));
        });

        Ok(Transport {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{
        Request as WsRequest, Response as WsResponse,
    };

    #[test_log::test(tokio::test)]
    async fn test_ws_connector_sends_headers_and_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = std::sync::mpsc::channel::<(Option<String>, Option<String>)>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_hdr_async(stream, move |req: &WsRequest, resp: WsResponse| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from)
                };
                seen_tx.send((header("X-ConnectionId"), header("Authorization"))).unwrap();
                Ok(resp)
            })
            .await
            .unwrap();

            // Echo the first text frame, then drain until the client closes
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(format!("echo:{}", text).into()))
                    .await
                    .unwrap();
            }
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        });

        let url = Url::parse(&format!("ws://{}/speech", addr)).unwrap();
        let mut transport = WsConnector
            .connect(ConnectRequest {
                url,
                connection_id: "conn42".to_string(),
                bearer_token: "tok".to_string(),
                connect_timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        // The handshake completed, so the captured headers are already queued
        let (conn_id, authorization) = seen_rx.recv().unwrap();
        assert_eq!(conn_id.as_deref(), Some("conn42"));
        assert_eq!(authorization.as_deref(), Some("Bearer tok"));

        transport
            .outbound
            .send(OutboundFrame::Text("path:ping\r\n\r\n".to_string()))
            .unwrap();
        match transport.events.recv().await {
            Some(TransportEvent::Message(text)) => assert_eq!(text, "echo:path:ping\r\n\r\n"),
            other => panic!("expected echoed message, got {:?}", other),
        }

        transport.outbound.send(OutboundFrame::Close).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_url_without_host() {
        let url = Url::parse("unix:/tmp/socket").unwrap();
        let result = WsConnector
            .connect(ConnectRequest {
                url,
                connection_id: "c".to_string(),
                bearer_token: "t".to_string(),
                connect_timeout: Duration::from_secs(5),
            })
            .await;
        assert!(matches!(result, Err(SpeechError::Transport(_))));
    }
}
