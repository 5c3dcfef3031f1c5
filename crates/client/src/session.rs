//! Client session manager
//!
//! A [`Session`] owns one logical client. It opens links through a
//! [`Connector`], and every successful connect yields a brand-new server-side
//! connection. When a link drops the session reconnects on the backoff
//! schedule and replays `join` for the room of interest, since the server
//! keeps no membership across connections. After the last attempt fails the
//! session settles in [`SessionStatus::Disconnected`] and stays there.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_retry::RetryIf;
use uuid::Uuid;

use huddle_shared::{
    ChannelId, ClientEvent, MessageRecord, OutboundMessage, PresenceStatus, ServerEvent,
};

use crate::backoff::reconnect_delays;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::subscribers::{Subscribers, Subscription};
use crate::timeline::{EchoOutcome, Timeline, TimelineEntry};

/// Both directions of one open connection
///
/// The link is closed once `incoming` yields `None` or `outgoing` rejects a
/// send.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<ClientEvent>,
    pub incoming: mpsc::UnboundedReceiver<OutboundMessage>,
}

/// Opens links to the server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, channel_id: Option<&ChannelId>) -> ClientResult<Link>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Open,
    Reconnecting { attempt: usize },
    /// Terminal: attempts are exhausted or the session was closed
    Disconnected,
}

/// Events delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Status(SessionStatus),
    /// A server frame, after the timeline has absorbed it
    Frame(OutboundMessage),
    /// An optimistic message was confirmed by the server
    Confirmed { temp_id: Uuid, message_id: Uuid },
    /// An optimistic message was not confirmed within the send timeout
    SendFailed { temp_id: Uuid },
}

enum Command {
    Join(ChannelId),
    Leave(ChannelId),
    Message { temp_id: Uuid, event: ClientEvent },
    Send(ClientEvent),
}

enum LinkExit {
    Dropped,
    Shutdown,
}

struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    subscribers: Subscribers<SessionEvent>,
    timeline: Mutex<Timeline>,
    status: watch::Sender<SessionStatus>,
    shutdown: Notify,
}

impl Shared {
    fn set_status(&self, status: SessionStatus) {
        tracing::info!(user_id = %self.config.user_id, status = ?status, "Session status changed");
        self.status.send_replace(status.clone());
        self.subscribers.emit(SessionEvent::Status(status));
    }

    async fn connect_with_backoff(&self, room: Option<&ChannelId>, first: bool) -> ClientResult<Link> {
        let connector = Arc::clone(&self.connector);
        let room = room.cloned();
        let mut attempt = 0usize;

        RetryIf::spawn(
            reconnect_delays(&self.config),
            || {
                attempt += 1;
                self.set_status(if first && attempt == 1 {
                    SessionStatus::Connecting
                } else {
                    SessionStatus::Reconnecting { attempt }
                });
                let connector = Arc::clone(&connector);
                let room = room.clone();
                async move { connector.connect(room.as_ref()).await }
            },
            |e: &ClientError| {
                tracing::warn!(error = %e, "Connection attempt failed");
                e.is_transient()
            },
        )
        .await
    }

    /// Turn a queued command into the event to send, updating local state
    async fn prepare(&self, command: Command, room: &mut Option<ChannelId>) -> Option<ClientEvent> {
        match command {
            Command::Join(channel_id) => {
                *room = Some(channel_id.clone());
                Some(ClientEvent::Join { channel_id })
            }
            Command::Leave(channel_id) => {
                if room.as_ref() == Some(&channel_id) {
                    *room = None;
                }
                Some(ClientEvent::Leave { channel_id })
            }
            Command::Message { temp_id, event } => {
                if self.timeline.lock().await.is_pending(temp_id) {
                    Some(event)
                } else {
                    tracing::debug!(temp_id = %temp_id, "Dropping send of expired message");
                    None
                }
            }
            Command::Send(event) => Some(event),
        }
    }

    async fn handle_frame(&self, frame: OutboundMessage) {
        match &frame.event {
            ServerEvent::Message { message } | ServerEvent::MessageAccepted { message } => {
                let outcome = self.timeline.lock().await.apply_echo(message);
                match outcome {
                    EchoOutcome::Duplicate => return,
                    EchoOutcome::Confirmed(temp_id) => {
                        self.subscribers.emit(SessionEvent::Confirmed {
                            temp_id,
                            message_id: message.id,
                        });
                    }
                    EchoOutcome::Appended => {}
                }
            }
            ServerEvent::Error { message } => {
                tracing::warn!(error = %message, "Server reported an error");
            }
            _ => {}
        }
        self.subscribers.emit(SessionEvent::Frame(frame));
    }

    async fn pump(
        &self,
        link: Link,
        room: &mut Option<ChannelId>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> LinkExit {
        let Link { outgoing, mut incoming } = link;

        // Membership does not survive a reconnect
        if let Some(channel_id) = room.clone() {
            if outgoing.send(ClientEvent::Join { channel_id }).is_err() {
                return LinkExit::Dropped;
            }
        }

        let every = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return LinkExit::Shutdown,
                frame = incoming.recv() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        tracing::info!("Link closed by server");
                        return LinkExit::Dropped;
                    }
                },
                command = commands.recv() => {
                    let Some(command) = command else {
                        return LinkExit::Shutdown;
                    };
                    if let Some(event) = self.prepare(command, room).await {
                        if outgoing.send(event).is_err() {
                            return LinkExit::Dropped;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if outgoing.send(ClientEvent::Ping).is_err() {
                        return LinkExit::Dropped;
                    }
                }
            }
        }
    }
}

async fn run(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut room: Option<ChannelId> = None;
    let mut first = true;

    loop {
        let link = tokio::select! {
            link = shared.connect_with_backoff(room.as_ref(), first) => link,
            _ = shared.shutdown.notified() => break,
        };
        let link = match link {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(error = %e, "Giving up on reconnecting");
                break;
            }
        };
        first = false;
        shared.set_status(SessionStatus::Open);

        match shared.pump(link, &mut room, &mut commands).await {
            LinkExit::Dropped => continue,
            LinkExit::Shutdown => break,
        }
    }

    shared.set_status(SessionStatus::Disconnected);
}

async fn expire_pending(shared: Arc<Shared>) {
    let period = (shared.config.send_timeout / 4).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let failed = shared.timeline.lock().await.expire();
        for temp_id in failed {
            tracing::warn!(temp_id = %temp_id, "Message not confirmed in time");
            shared.subscribers.emit(SessionEvent::SendFailed { temp_id });
        }
    }
}

/// Handle to a running client session
pub struct Session {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    run_task: Option<JoinHandle<()>>,
    expiry_task: JoinHandle<()>,
}

impl Session {
    /// Spawn the session; it starts connecting immediately
    pub fn start(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let (status_tx, status) = watch::channel(SessionStatus::Connecting);
        let shared = Arc::new(Shared {
            timeline: Mutex::new(Timeline::new(config.send_timeout)),
            config,
            connector,
            subscribers: Subscribers::new(),
            status: status_tx,
            shutdown: Notify::new(),
        });

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let run_task = tokio::spawn(run(Arc::clone(&shared), commands_rx));
        let expiry_task = tokio::spawn(expire_pending(Arc::clone(&shared)));

        Self {
            shared,
            commands,
            status,
            run_task: Some(run_task),
            expiry_task,
        }
    }

    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        self.shared.subscribers.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    fn command(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::SessionClosed)
    }

    /// Make `channel_id` the room of interest, replayed after every reconnect
    pub fn join(&self, channel_id: ChannelId) -> ClientResult<()> {
        self.command(Command::Join(channel_id))
    }

    pub fn leave(&self, channel_id: ChannelId) -> ClientResult<()> {
        self.command(Command::Leave(channel_id))
    }

    /// Post a message optimistically, returning its temporary id
    pub async fn send(&self, channel_id: ChannelId, content: impl Into<String>) -> ClientResult<Uuid> {
        if self.commands.is_closed() {
            return Err(ClientError::SessionClosed);
        }

        let content = content.into();
        let sender_id = self.shared.config.user_id;
        let sender_name = self.shared.config.display_name.clone();
        let temp_id = self.shared.timeline.lock().await.push_pending(
            channel_id.clone(),
            sender_id,
            sender_name.clone(),
            content.clone(),
        );

        self.command(Command::Message {
            temp_id,
            event: ClientEvent::Message {
                channel_id,
                content,
                sender_id: Some(sender_id),
                sender_name,
            },
        })?;
        Ok(temp_id)
    }

    pub fn start_typing(&self, channel_id: ChannelId) -> ClientResult<()> {
        self.command(Command::Send(ClientEvent::TypingStart {
            channel_id,
            user_name: self.shared.config.display_name.clone(),
        }))
    }

    pub fn stop_typing(&self, channel_id: ChannelId) -> ClientResult<()> {
        self.command(Command::Send(ClientEvent::TypingStop { channel_id }))
    }

    pub fn set_presence(&self, status: PresenceStatus, status_message: Option<String>) -> ClientResult<()> {
        self.command(Command::Send(ClientEvent::SetPresence {
            status,
            status_message,
        }))
    }

    /// Entries of one room, oldest first
    pub async fn timeline(&self, channel_id: &ChannelId) -> Vec<TimelineEntry> {
        self.shared.timeline.lock().await.entries(channel_id)
    }

    /// Merge a re-fetched page of persisted messages
    pub async fn reconcile(&self, records: &[MessageRecord]) -> usize {
        self.shared.timeline.lock().await.reconcile(records)
    }

    /// Stop the session and wait for it to settle
    pub async fn close(mut self) {
        self.shared.shutdown.notify_one();
        if let Some(task) = self.run_task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Session task ended abnormally");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.expiry_task.abort();
        if let Some(task) = self.run_task.take() {
            task.abort();
        }
    }
}
