//! WebSocket Connector
//!
//! `StreamConnector` backed by `tokio-tungstenite`. Splits the socket and
//! adapts both halves to plain text frames so the connection logic never sees
//! tungstenite types.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::application::ports::{StreamConnector, StreamError, WireSink, WireSource};

/// Production WebSocket connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource), StreamError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(classify_connect_error)?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| StreamError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, StreamError>(Message::Text(text.into()))));

        let source = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok().map(Ok),
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    Some(Err(StreamError::Closed))
                }
                // Control frames are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(source)))
    }
}

fn classify_connect_error(error: tungstenite::Error) -> StreamError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                StreamError::AuthRejected(format!("handshake rejected with {status}"))
            } else {
                StreamError::ConnectFailed(format!("handshake failed with {status}"))
            }
        }
        other => StreamError::ConnectFailed(other.to_string()),
    }
}
