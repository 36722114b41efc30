//! Push transport seam and its tokio-tungstenite implementation.

use std::pin::Pin;

use async_trait::async_trait;
use crewnexus_shared::ConnectionError;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

/// One established session: text frames out, text frames (or errors) in.
///
/// The stream ending means the peer closed the session. An `Err` item is an
/// error event and does not by itself end the session.
pub struct Session {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Session {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = ConnectionError> + Send + 'static,
        St: Stream<Item = Result<String, ConnectionError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Performs the handshake for a push address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, address: &str) -> Result<Session, ConnectionError>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, address: &str) -> Result<Session, ConnectionError> {
        if !(address.starts_with("ws://") || address.starts_with("wss://")) {
            return Err(ConnectionError::InvalidAddress(address.to_string()));
        }

        let (ws_stream, _response) = connect_async(address)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|text: String| {
                futures_util::future::ready(Ok::<_, ConnectionError>(Message::Text(text.into())))
            });

        // A read error ends the stream after it has been reported once
        let stream = futures_util::stream::unfold((read, false), |(mut read, failed)| async move {
            if failed {
                return None;
            }
            loop {
                match read.next().await? {
                    Ok(Message::Text(text)) => {
                        return Some((Ok(text.as_str().to_owned()), (read, false)));
                    }
                    Ok(Message::Binary(data)) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        return Some((Ok(text), (read, false)));
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("Received close frame: {:?}", frame);
                        return None;
                    }
                    // Pong is handled automatically by tungstenite
                    Ok(_) => continue,
                    Err(e) => {
                        return Some((Err(ConnectionError::Transport(e.to_string())), (read, true)));
                    }
                }
            }
        });

        Ok(Session::new(sink, stream))
    }
}
