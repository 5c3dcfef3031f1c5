//! Transport links
//!
//! A link is how a frame reaches one connection. Long-lived servers hold an
//! in-process channel per socket ([`LocalLinks`]); stateless handlers behind
//! a managed WebSocket gateway post frames to the gateway's management API
//! ([`GatewayLinks`]).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use huddle_shared::{ConnectionId, OutboundMessage};

use crate::error::TransportError;

/// Delivery of frames to individual connections
#[async_trait]
pub trait LinkTable: Send + Sync {
    async fn deliver(
        &self,
        connection_id: &ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;

    /// Forget the link of a deregistered connection
    async fn detach(&self, connection_id: &ConnectionId);
}

// =============================================================================
// In-process links
// =============================================================================

/// Channels to sockets owned by this process
///
/// Only connections accepted by this process are reachable, so a deployment
/// using these must run a single server instance per store.
#[derive(Debug, Default)]
pub struct LocalLinks {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl LocalLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the writer side of a socket, returning its receiving end
    pub async fn attach(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut senders = self.senders.write().await;
        if senders.insert(connection_id.clone(), tx).is_some() {
            tracing::warn!(connection_id = %connection_id, "Replaced existing link");
        }
        rx
    }

    /// Number of attached links
    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.senders.read().await.is_empty()
    }
}

#[async_trait]
impl LinkTable for LocalLinks {
    async fn deliver(
        &self,
        connection_id: &ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let senders = self.senders.read().await;
        let sender = senders.get(connection_id).ok_or(TransportError::Gone)?;
        sender
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn detach(&self, connection_id: &ConnectionId) {
        let mut senders = self.senders.write().await;
        if senders.remove(connection_id).is_some() {
            tracing::debug!(connection_id = %connection_id, "Link detached");
        }
    }
}

// =============================================================================
// Gateway links
// =============================================================================

/// Links held by an external WebSocket gateway
///
/// Frames are posted to `{endpoint}/@connections/{connection_id}`; the
/// gateway answers `410 Gone` for connections it no longer holds. Every POST
/// is bounded by the client timeout, so a hung gateway fails one delivery
/// instead of stalling a fan-out.
#[derive(Clone)]
pub struct GatewayLinks {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl GatewayLinks {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn connection_url(&self, connection_id: &ConnectionId) -> String {
        format!("{}/@connections/{}", self.endpoint, connection_id)
    }
}

#[async_trait]
impl LinkTable for GatewayLinks {
    async fn deliver(
        &self,
        connection_id: &ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let mut request = self.client.post(self.connection_url(connection_id)).json(message);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Http(format!("Gateway timed out: {}", e))
            } else {
                TransportError::Http(format!("Failed to reach gateway: {}", e))
            }
        })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::GONE => Err(TransportError::Gone),
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    connection_id = %connection_id,
                    status = %status,
                    body = %body,
                    "Gateway rejected frame"
                );
                Err(TransportError::Http(format!("Gateway error: {}", status)))
            }
        }
    }

    async fn detach(&self, _connection_id: &ConnectionId) {
        // The gateway drops its side once the socket closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::ServerEvent;

    #[tokio::test]
    async fn test_local_delivery() {
        let links = LocalLinks::new();
        let id = ConnectionId::new();
        let mut rx = links.attach(id.clone()).await;

        links
            .deliver(&id, &OutboundMessage::new(ServerEvent::Pong))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().event, ServerEvent::Pong);
    }

    #[tokio::test]
    async fn test_unknown_link_is_gone() {
        let links = LocalLinks::new();
        let result = links
            .deliver(&ConnectionId::new(), &OutboundMessage::new(ServerEvent::Pong))
            .await;
        assert_eq!(result, Err(TransportError::Gone));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_closed() {
        let links = LocalLinks::new();
        let id = ConnectionId::new();
        drop(links.attach(id.clone()).await);

        let result = links
            .deliver(&id, &OutboundMessage::new(ServerEvent::Pong))
            .await;
        assert_eq!(result, Err(TransportError::Closed));
        assert!(result.unwrap_err().is_stale());

        links.detach(&id).await;
        assert!(links.is_empty().await);
    }

    fn gateway(endpoint: impl Into<String>, timeout: Duration) -> GatewayLinks {
        GatewayLinks::new(endpoint, Some("gw-token".to_string()), timeout).unwrap()
    }

    #[test]
    fn test_gateway_connection_url() {
        let links = gateway("https://gw.example.com/prod/", Duration::from_secs(1));
        assert_eq!(
            links.connection_url(&ConnectionId::from("abc=")),
            "https://gw.example.com/prod/@connections/abc="
        );
    }

    #[tokio::test]
    async fn test_gateway_delivery_posts_frame() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/@connections/abc")
            .match_header("authorization", "Bearer gw-token")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({ "type": "pong" }),
            ))
            .with_status(200)
            .create_async()
            .await;

        let links = gateway(server.url(), Duration::from_secs(5));
        links
            .deliver(&ConnectionId::from("abc"), &OutboundMessage::new(ServerEvent::Pong))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let _gone = server
            .mock("POST", "/@connections/gone")
            .with_status(410)
            .create_async()
            .await;
        let _broken = server
            .mock("POST", "/@connections/broken")
            .with_status(500)
            .with_body("internal")
            .create_async()
            .await;

        let links = gateway(server.url(), Duration::from_secs(5));
        let frame = OutboundMessage::new(ServerEvent::Pong);

        let gone = links.deliver(&ConnectionId::from("gone"), &frame).await;
        assert_eq!(gone, Err(TransportError::Gone));
        assert!(gone.unwrap_err().is_stale());

        let broken = links
            .deliver(&ConnectionId::from("broken"), &frame)
            .await
            .unwrap_err();
        assert!(matches!(broken, TransportError::Http(_)));
        assert!(!broken.is_stale());
    }

    #[tokio::test]
    async fn test_hung_gateway_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold sockets without ever answering
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let links = gateway(format!("http://{}", addr), Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = links
            .deliver(&ConnectionId::from("abc"), &OutboundMessage::new(ServerEvent::Pong))
            .await
            .unwrap_err();

        assert!(matches!(result, TransportError::Http(_)));
        assert!(!result.is_stale());
        assert!(started.elapsed() < Duration::from_secs(5));
        holder.abort();
    }
}
