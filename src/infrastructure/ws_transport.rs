// Per-unit WebSocket transport - bridges a socket to the channel's mpsc link
use crate::application::backend::{DataFamily, TransportFrame, TransportLink, UnitTransport};
use crate::domain::errors::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const LINK_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn channel_url(&self, unit: &str, family: DataFamily) -> String {
        let unit = urlencoding::encode(unit);
        match family {
            DataFamily::Standard => format!("{}/ws/{}", self.base_url, unit),
            DataFamily::Hourly => format!("{}/ws/hourly/{}", self.base_url, unit),
        }
    }
}

#[async_trait]
impl UnitTransport for WsTransport {
    async fn connect(&self, unit: &str, family: DataFamily) -> Result<TransportLink, TransportError> {
        let url = self.channel_url(unit, family);
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(unit, %url, "websocket handshake complete");

        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut requests) = mpsc::channel::<String>(LINK_BUFFER);
        let (frames, incoming) = mpsc::channel::<TransportFrame>(LINK_BUFFER);

        let writer_unit = unit.to_string();
        tokio::spawn(async move {
            while let Some(text) = requests.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(unit = %writer_unit, "websocket write failed: {}", e);
                    return;
                }
            }
            // the channel dropped its end of the link
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = sink.send(Message::Close(Some(close))).await;
            let _ = sink.close().await;
        });

        let reader_unit = unit.to_string();
        tokio::spawn(async move {
            let clean = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if frames.send(TransportFrame::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(unit = %reader_unit, ?frame, "websocket close received");
                        break true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(unit = %reader_unit, "websocket read failed: {}", e);
                        break false;
                    }
                    None => break false,
                }
            };
            let _ = frames.send(TransportFrame::Closed { clean }).await;
        });

        Ok(TransportLink { outgoing, incoming })
    }
}
