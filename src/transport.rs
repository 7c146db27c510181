use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    TextReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection. The transport is a dumb
/// pipe for text frames with no knowledge of the chat protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the server.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connects to the given URL and returns the transport along with a
    /// stream of its events.
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// WebSocket transport backed by tokio-tungstenite.
pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<()> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        debug!(target: "Transport", "--> Sending frame: {} bytes", text.len());
        sink.send(Message::text(text))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink.close().await;
        }
    }
}

/// Factory for tokio-tungstenite WebSocket transports.
#[derive(Default)]
pub struct WebSocketTransportFactory;

impl WebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        info!(target: "Transport", "Dialing {url}");
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = ws.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let transport = Arc::new(WebSocketTransport::new(sink));

        tokio::task::spawn(read_pump(stream, event_tx.clone()));

        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!(target: "Transport", "<-- Received frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::TextReceived(text.to_string()))
                    .await
                    .is_err()
                {
                    warn!(target: "Transport", "Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                trace!(target: "Transport", "Received close frame");
                break;
            }
            // Ping/pong are answered by tungstenite itself; binary
            // frames are not part of this protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(target: "Transport", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Transport", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
