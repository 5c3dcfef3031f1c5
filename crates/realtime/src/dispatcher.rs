//! Broadcast dispatcher
//!
//! Fans a frame out to every connection in a room. Deliveries run
//! concurrently and settle independently: one dead receiver is logged,
//! reported and deregistered, and never affects the others.

use futures::future::join_all;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use huddle_shared::{ChannelId, ConnectionId, OutboundMessage, ServerEvent};

use crate::error::{RealtimeResult, TransportError};
use crate::links::LinkTable;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;

/// Result of delivering one frame to one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub connection_id: ConnectionId,
    pub result: Result<(), TransportError>,
}

/// Per-receiver outcomes of a fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Room the frame was published to; `None` for global fan-out
    pub channel_id: Option<ChannelId>,
    pub outcomes: Vec<DeliveryOutcome>,
    /// Connections removed because their link was stale, including any
    /// found while announcing the resulting presence changes
    pub deregistered: Vec<ConnectionId>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    fn stale(&self) -> VecDeque<ConnectionId> {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Err(e) if e.is_stale()))
            .map(|o| o.connection_id.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
    links: Arc<dyn LinkTable>,
}

impl Dispatcher {
    pub fn new(
        registry: ConnectionRegistry,
        presence: PresenceTracker,
        links: Arc<dyn LinkTable>,
    ) -> Self {
        Self {
            registry,
            presence,
            links,
        }
    }

    /// Deliver `message` to every member of `channel_id` except `exclude`
    ///
    /// Fails only if the member list cannot be read; receiver failures are
    /// recorded in the report.
    pub async fn publish(
        &self,
        channel_id: &ChannelId,
        message: &OutboundMessage,
        exclude: Option<&ConnectionId>,
    ) -> RealtimeResult<DeliveryReport> {
        let members = self.registry.list_by_channel(channel_id).await?;
        let targets: Vec<ConnectionId> = members
            .into_iter()
            .filter(|id| Some(id) != exclude)
            .collect();

        let mut report = DeliveryReport {
            channel_id: Some(channel_id.clone()),
            outcomes: self.fan_out(&targets, message).await,
            deregistered: Vec::new(),
        };
        report.deregistered = self.deregister(report.stale()).await;

        tracing::debug!(
            channel_id = %channel_id,
            event = message.event.kind(),
            recipients = report.outcomes.len(),
            failed = report.failed(),
            deregistered = report.deregistered.len(),
            "Published to room"
        );

        Ok(report)
    }

    /// Deliver `message` to every live connection of every online user
    pub async fn publish_global(&self, message: &OutboundMessage) -> RealtimeResult<DeliveryReport> {
        let mut report = self.fan_out_global(message).await?;
        report.deregistered = self.deregister(report.stale()).await;

        tracing::debug!(
            event = message.event.kind(),
            recipients = report.outcomes.len(),
            failed = report.failed(),
            "Published globally"
        );

        Ok(report)
    }

    /// Deliver `message` to a single connection
    pub async fn deliver_to(
        &self,
        connection_id: &ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let result = self.links.deliver(connection_id, message).await;
        if let Err(e) = &result {
            tracing::warn!(
                error = %e,
                connection_id = %connection_id,
                event = message.event.kind(),
                "Failed to deliver frame"
            );
            if e.is_stale() {
                self.deregister(VecDeque::from([connection_id.clone()])).await;
            }
        }
        result
    }

    async fn fan_out(
        &self,
        targets: &[ConnectionId],
        message: &OutboundMessage,
    ) -> Vec<DeliveryOutcome> {
        let results = join_all(
            targets
                .iter()
                .map(|connection_id| self.links.deliver(connection_id, message)),
        )
        .await;

        targets
            .iter()
            .zip(results)
            .map(|(connection_id, result)| {
                if let Err(e) = &result {
                    tracing::warn!(
                        error = %e,
                        connection_id = %connection_id,
                        event = message.event.kind(),
                        "Failed to deliver frame"
                    );
                }
                DeliveryOutcome {
                    connection_id: connection_id.clone(),
                    result,
                }
            })
            .collect()
    }

    async fn fan_out_global(&self, message: &OutboundMessage) -> RealtimeResult<DeliveryReport> {
        let users = self.presence.online_users().await?;
        let per_user = join_all(users.iter().map(|user_id| self.registry.connections_of(user_id))).await;

        let mut targets = BTreeSet::new();
        for connections in per_user {
            targets.extend(connections?);
        }
        let targets: Vec<ConnectionId> = targets.into_iter().collect();

        Ok(DeliveryReport {
            channel_id: None,
            outcomes: self.fan_out(&targets, message).await,
            deregistered: Vec::new(),
        })
    }

    /// Remove stale connections, announcing users who went offline as a
    /// result. Stale receivers found by those announcements join the same
    /// worklist.
    async fn deregister(&self, mut worklist: VecDeque<ConnectionId>) -> Vec<ConnectionId> {
        let mut deregistered = Vec::new();

        while let Some(connection_id) = worklist.pop_front() {
            let removed = match self.registry.unregister(&connection_id).await {
                Ok(Some(removed)) => removed,
                // Someone else already removed it
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        connection_id = %connection_id,
                        "Failed to deregister stale connection"
                    );
                    continue;
                }
            };
            self.links.detach(&connection_id).await;
            deregistered.push(connection_id.clone());

            tracing::info!(
                connection_id = %connection_id,
                user_id = %removed.connection.user_id,
                "Deregistered stale connection"
            );

            let user_id = removed.connection.user_id;
            let offline = match self
                .presence
                .connection_removed(user_id, &self.registry)
                .await
            {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, user_id = %user_id, "Failed to update presence");
                    continue;
                }
            };

            let update = OutboundMessage::new(ServerEvent::presence_update(&offline));
            match self.fan_out_global(&update).await {
                Ok(report) => worklist.extend(report.stale()),
                Err(e) => {
                    tracing::error!(error = %e, user_id = %user_id, "Failed to announce offline user");
                }
            }
        }

        deregistered
    }
}
