use crate::channel::{ChannelEvent, LiveChannel, chat_channel_url};
use crate::chatlog::{ApplyOutcome, ConversationLog};
use crate::config::ClientConfig;
use crate::error::{FetchError, ProtocolError, SessionError, ValidationError};
use crate::history;
use crate::http::HttpClient;
use crate::matches::ChatHeader;
use crate::send;
use crate::store::PersistenceManager;
use crate::transport::TransportFactory;
use crate::types::events::{
    ChannelClosed, ChannelOpened, EventBus, HistoryUnavailable, LoggedOut, MessageApplied,
    SendFailed,
};
use crate::types::message::{ChatMessage, ConversationKey, DeliveryState, UserId};
use crate::wire::ChatFrame;
use chrono::Utc;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const INPUT_CHANNEL_CAPACITY: usize = 100;

/// Requests into the session loop. Everything that touches session
/// state flows through here, so the loop is the only writer.
enum SessionInput {
    Send {
        text: String,
        reply: oneshot::Sender<String>,
    },
    Resend {
        client_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    ReopenChannel,
    Close,
}

/// A send the live channel accepted whose server echo has not arrived
/// yet. Expiry marks the message failed.
struct PendingConfirm {
    client_id: String,
    deadline: Instant,
}

pub(crate) struct SessionParams {
    pub user_id: UserId,
    pub peer_id: UserId,
    pub credential: String,
    pub config: ClientConfig,
    pub http: Arc<dyn HttpClient>,
    pub transport_factory: Arc<dyn TransportFactory>,
    pub persistence: Arc<PersistenceManager>,
    pub bus: Arc<EventBus>,
    pub generation: u64,
    pub live_generation: Arc<AtomicU64>,
    pub header: ChatHeader,
}

/// Starts the session task for one conversation and hands back the
/// caller-facing handle.
pub(crate) fn spawn(params: SessionParams) -> (ChatSession, JoinHandle<()>) {
    let url = chat_channel_url(&params.config.ws_base_url, &params.user_id, &params.peer_id);
    let (channel, channel_events) = LiveChannel::new(
        url,
        params.transport_factory.clone(),
        params.config.channel.clone(),
    );
    let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);

    let handle = ChatSession {
        peer_id: params.peer_id.clone(),
        header: params.header.clone(),
        inputs: inputs_tx,
    };

    let runtime = SessionRuntime {
        key: ConversationKey::new(params.user_id.clone(), params.peer_id.clone()),
        user_id: params.user_id,
        peer_id: params.peer_id,
        credential: params.credential,
        config: params.config,
        http: params.http,
        persistence: params.persistence,
        bus: params.bus,
        generation: params.generation,
        live_generation: params.live_generation,
        channel,
        log: ConversationLog::new(),
        pending_confirms: Vec::new(),
        closing: false,
    };

    let task = tokio::spawn(runtime.run(inputs_rx, channel_events));
    (handle, task)
}

/// The single logical event loop behind a [`ChatSession`]. Owns the
/// conversation log outright; commands, channel events and confirmation
/// deadlines are processed to completion one at a time, so no merge
/// ever races another.
struct SessionRuntime {
    user_id: UserId,
    peer_id: UserId,
    key: ConversationKey,
    credential: String,
    config: ClientConfig,
    http: Arc<dyn HttpClient>,
    persistence: Arc<PersistenceManager>,
    bus: Arc<EventBus>,
    /// The generation this session was started under. When the client
    /// opens a newer session the live generation moves past this one
    /// and this loop winds down instead of acting on stale state.
    generation: u64,
    live_generation: Arc<AtomicU64>,
    channel: Arc<LiveChannel>,
    log: ConversationLog,
    pending_confirms: Vec<PendingConfirm>,
    closing: bool,
}

impl SessionRuntime {
    async fn run(
        mut self,
        mut inputs: mpsc::Receiver<SessionInput>,
        mut channel_events: mpsc::Receiver<ChannelEvent>,
    ) {
        info!(target: "Session", "Starting chat session with {}", self.peer_id);

        match history::load_history(
            &self.http,
            &self.config,
            &self.credential,
            &self.user_id,
            &self.peer_id,
        )
        .await
        {
            Ok(messages) => {
                debug!(target: "Session", "Seeding log with {} persisted messages", messages.len());
                let _ = self.log.seed(messages);
            }
            Err(FetchError::Auth(e)) => {
                warn!(target: "Session", "History load rejected the credential: {e}");
                self.force_logout().await;
                return;
            }
            Err(FetchError::Network(e)) => {
                // Live-only mode: an empty baseline keeps the session
                // usable; retrying history means opening a new session.
                warn!(target: "Session", "History unavailable, continuing live-only: {e}");
                let _ = self.log.seed(Vec::new());
                let _ = self.bus.history_unavailable.send(Arc::new(HistoryUnavailable {
                    peer_id: self.peer_id.clone(),
                    detail: e.to_string(),
                }));
            }
        }

        if self.is_stale() {
            debug!(target: "Session", "Session with {} superseded during history load", self.peer_id);
            return;
        }

        // The channel connects only after the baseline is in place, so
        // every frame it delivers lands on a seeded log.
        tokio::spawn(self.channel.clone().run());

        loop {
            let deadline = self.next_confirm_deadline();
            tokio::select! {
                biased;
                input = inputs.recv() => match input {
                    None | Some(SessionInput::Close) => {
                        debug!(target: "Session", "Close requested for session with {}", self.peer_id);
                        break;
                    }
                    Some(input) => self.handle_input(input).await,
                },
                event = channel_events.recv() => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => break,
                },
                _ = wait_until(deadline) => self.sweep_confirm_deadlines(),
            }
            if self.closing || self.is_stale() {
                break;
            }
        }

        self.channel.disable().await;
        debug!(target: "Session", "Chat session with {} shut down", self.peer_id);
    }

    fn is_stale(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) != self.generation
    }

    async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Send { text, reply } => {
                let client_id = self.handle_send(text).await;
                let _ = reply.send(client_id);
            }
            SessionInput::Resend { client_id, reply } => {
                let result = self.handle_resend(client_id).await;
                let _ = reply.send(result);
            }
            SessionInput::Snapshot { reply } => {
                let _ = reply.send(self.log.snapshot());
            }
            SessionInput::ReopenChannel => {
                self.channel.reopen();
            }
            // Close never reaches here; the loop consumes it.
            SessionInput::Close => {}
        }
    }

    /// Optimistic send: the message is in the log as `Pending` before
    /// any network work happens, then delivery runs to completion.
    async fn handle_send(&mut self, text: String) -> String {
        let client_id = send::new_client_id();
        let message = ChatMessage {
            sender_id: self.user_id.clone(),
            receiver_id: self.peer_id.clone(),
            text,
            timestamp: Utc::now(),
            server_assigned: false,
            state: DeliveryState::Pending,
            client_id: Some(client_id.clone()),
        };
        if let Ok(outcome) = self.log.apply(message.clone()) {
            self.dispatch_applied(outcome, message.clone());
        }
        self.deliver(message, client_id.clone()).await;
        client_id
    }

    async fn deliver(&mut self, message: ChatMessage, client_id: String) {
        let frame = send::outbound_frame(&message);
        match self.channel.send(&frame).await {
            Ok(()) => {
                debug!(target: "Session", "Message {client_id} accepted by live channel; awaiting echo");
                self.pending_confirms.push(PendingConfirm {
                    client_id,
                    deadline: Instant::now() + self.config.send_confirm_timeout,
                });
            }
            Err(e) => {
                debug!(target: "Session", "Live channel unavailable ({e}); sending {client_id} directly");
                self.deliver_via_post(message, client_id).await;
            }
        }
    }

    async fn deliver_via_post(&mut self, message: ChatMessage, client_id: String) {
        match send::send_chat(&self.http, &self.config, &self.credential, &message).await {
            Ok(record) => {
                if self.is_stale() {
                    return;
                }
                let mut echo = record.into_message();
                // This echo answers the request we just made, so it is
                // paired with the optimistic entry even when the server
                // did not round-trip the correlation id.
                if echo.client_id.is_none() {
                    echo.client_id = Some(client_id);
                }
                if let Ok(outcome) = self.log.apply(echo.clone()) {
                    self.dispatch_applied(outcome, echo);
                }
            }
            Err(FetchError::Auth(e)) => {
                warn!(target: "Session", "Send rejected the credential: {e}");
                self.fail_send(&client_id, e.to_string());
                self.force_logout().await;
            }
            Err(FetchError::Network(e)) => {
                warn!(target: "Session", "Send failed: {e}");
                self.fail_send(&client_id, e.to_string());
            }
        }
    }

    async fn handle_resend(&mut self, client_id: String) -> Result<(), SessionError> {
        let Some(message) = self.log.get(&client_id).cloned() else {
            return Err(SessionError::UnknownMessage(client_id));
        };
        match message.state {
            DeliveryState::Confirmed => Err(SessionError::AlreadyConfirmed(client_id)),
            // Already in flight; nothing to do.
            DeliveryState::Pending => Ok(()),
            DeliveryState::Failed => {
                info!(target: "Session", "Resending message {client_id}");
                self.log.mark_pending(&client_id);
                if let Some(updated) = self.log.get(&client_id).cloned() {
                    let _ = self.bus.message.send(Arc::new(MessageApplied {
                        peer_id: self.peer_id.clone(),
                        message: updated.clone(),
                    }));
                    self.deliver(updated, client_id).await;
                }
                Ok(())
            }
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                let _ = self.bus.channel_opened.send(Arc::new(ChannelOpened {
                    peer_id: self.peer_id.clone(),
                }));
            }
            ChannelEvent::Closed { will_retry } => {
                let _ = self.bus.channel_closed.send(Arc::new(ChannelClosed {
                    peer_id: self.peer_id.clone(),
                    will_retry,
                }));
            }
            ChannelEvent::Frame(frame) => match self.frame_to_message(frame) {
                Ok(message) => {
                    if let Some(id) = message.client_id.as_deref() {
                        self.pending_confirms.retain(|p| p.client_id != id);
                    }
                    if let Ok(outcome) = self.log.apply(message.clone()) {
                        self.dispatch_applied(outcome, message);
                    }
                }
                Err(e) => {
                    warn!(target: "Session", "Dropping invalid frame: {e}");
                }
            },
        }
    }

    /// Validates an inbound frame and fills in what the wire format
    /// leaves implicit: the receiver is whichever participant did not
    /// send it.
    fn frame_to_message(&self, frame: ChatFrame) -> Result<ChatMessage, ProtocolError> {
        let sender_id = frame
            .sender_id
            .map(UserId::new)
            .ok_or(ProtocolError::MissingSender)?;
        let timestamp = frame.timestamp.ok_or(ProtocolError::MissingTimestamp)?;
        if frame.message.is_empty() {
            return Err(ProtocolError::EmptyText);
        }
        if !self.key.contains(&sender_id) {
            return Err(ProtocolError::ForeignSender(sender_id.to_string()));
        }
        let receiver_id = if sender_id == self.user_id {
            self.peer_id.clone()
        } else {
            self.user_id.clone()
        };
        Ok(ChatMessage {
            sender_id,
            receiver_id,
            text: frame.message,
            timestamp,
            server_assigned: true,
            state: DeliveryState::Confirmed,
            client_id: frame.client_id,
        })
    }

    fn dispatch_applied(&self, outcome: ApplyOutcome, applied: ChatMessage) {
        if outcome == ApplyOutcome::Unchanged {
            trace!(target: "Session", "Duplicate message ignored");
            return;
        }
        // Prefer the merged entry; it may carry more than the incoming
        // copy did.
        let message = applied
            .client_id
            .as_deref()
            .and_then(|id| self.log.get(id).cloned())
            .unwrap_or(applied);
        let _ = self.bus.message.send(Arc::new(MessageApplied {
            peer_id: self.peer_id.clone(),
            message,
        }));
    }

    fn fail_send(&mut self, client_id: &str, reason: String) {
        if self.log.mark_failed(client_id) {
            let _ = self.bus.send_failed.send(Arc::new(SendFailed {
                peer_id: self.peer_id.clone(),
                client_id: client_id.to_string(),
                reason,
            }));
        }
    }

    fn next_confirm_deadline(&self) -> Option<Instant> {
        self.pending_confirms.iter().map(|p| p.deadline).min()
    }

    fn sweep_confirm_deadlines(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.pending_confirms.retain(|p| {
            if p.deadline <= now {
                expired.push(p.client_id.clone());
                false
            } else {
                true
            }
        });
        for client_id in expired {
            warn!(
                target: "Session",
                "No echo for {client_id} within {:?}; marking failed",
                self.config.send_confirm_timeout
            );
            self.fail_send(&client_id, "no delivery confirmation from server".to_string());
        }
    }

    async fn force_logout(&mut self) {
        info!(target: "Session", "Credential rejected by the server; clearing session state");
        if let Err(e) = self.persistence.clear_session().await {
            warn!(target: "Session", "Failed to clear persisted session: {e}");
        }
        let _ = self.bus.logged_out.send(Arc::new(LoggedOut));
        self.channel.disable().await;
        self.closing = true;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle to an open conversation. Cheap to clone; all methods proxy to
/// the session loop and fail with [`SessionError::Closed`] once it is
/// gone.
#[derive(Clone)]
pub struct ChatSession {
    peer_id: UserId,
    header: ChatHeader,
    inputs: mpsc::Sender<SessionInput>,
}

impl ChatSession {
    pub fn peer_id(&self) -> &UserId {
        &self.peer_id
    }

    /// Display metadata for this conversation, resolved when the
    /// session was opened.
    pub fn header(&self) -> &ChatHeader {
        &self.header
    }

    /// Validates and sends a message, returning its correlation id. The
    /// text is trimmed; an effectively empty message is rejected
    /// locally and never leaves the client.
    pub async fn send(&self, text: &str) -> Result<String, SessionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inputs
            .send(SessionInput::Send {
                text: trimmed.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Retries a failed message under its original correlation id.
    pub async fn resend(&self, client_id: &str) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inputs
            .send(SessionInput::Resend {
                client_id: client_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// The merged conversation in render order.
    pub async fn snapshot(&self) -> Result<Vec<ChatMessage>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inputs
            .send(SessionInput::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Asks a settled-closed live channel to start connecting again.
    pub async fn reopen_channel(&self) -> Result<(), SessionError> {
        self.inputs
            .send(SessionInput::ReopenChannel)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub(crate) async fn request_close(&self) {
        let _ = self.inputs.send(SessionInput::Close).await;
    }
}
