//! WebSocket connector
//!
//! Connects to the server's `/ws` endpoint with tokio-tungstenite and pumps
//! JSON frames between the socket and a [`Link`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use url::Url;

use huddle_shared::{ChannelId, ClientEvent, OutboundMessage, UserId};

use crate::error::{ClientError, ClientResult};
use crate::session::{Connector, Link};

#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
    user_id: UserId,
    token: Option<String>,
}

impl WsConnector {
    /// `base_url` is the server root, e.g. `https://chat.example.com`
    pub fn new(base_url: &str, user_id: UserId) -> ClientResult<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            user_id,
            token: None,
        })
    }

    /// Bearer token passed as the `token` query parameter
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `{base}/ws?user_id=..&token=..&channel_id=..` with a WebSocket scheme
    pub fn endpoint(&self, channel_id: Option<&ChannelId>) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;

        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("user_id", &self.user_id.to_string());
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
            if let Some(channel_id) = channel_id {
                query.append_pair("channel_id", channel_id.as_str());
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, channel_id: Option<&ChannelId>) -> ClientResult<Link> {
        let url = self.endpoint(channel_id)?;
        let (socket, _) = connect_async(url.as_str()).await?;
        tracing::debug!(host = ?url.host_str(), user_id = %self.user_id, "WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<OutboundMessage>();

        // Writer: ends when the session drops its sender or the socket fails
        tokio::spawn(async move {
            while let Some(event) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize client event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    tracing::debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: dropping `incoming_tx` tells the session the link is closed
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<OutboundMessage>(&text) {
                        Ok(message) => {
                            if incoming_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Ignoring unparseable server frame");
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "WebSocket receive failed");
                        break;
                    }
                }
            }
        });

        Ok(Link { outgoing, incoming })
    }
}
