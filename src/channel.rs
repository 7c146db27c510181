use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::message::UserId;
use crate::wire::ChatFrame;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::{Duration, sleep};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Lifecycle of the live channel for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    /// Not connected. The channel either retries on its own or, once
    /// the retry budget is spent, waits for [`LiveChannel::reopen`].
    Closed = 3,
    /// Shut down for good. Terminal.
    Disabled = 4,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Connecting,
            2 => ChannelState::Open,
            3 => ChannelState::Closed,
            4 => ChannelState::Disabled,
            _ => ChannelState::Idle,
        }
    }
}

#[derive(Debug)]
pub enum ChannelEvent {
    Opened,
    Frame(ChatFrame),
    Closed { will_retry: bool },
}

/// Maintains one conversation's connection to the chat endpoint:
/// connects, decodes inbound frames, reconnects with capped exponential
/// backoff, and parks once the retry budget is spent until someone asks
/// it to reopen. Liveness here is best-effort; delivery guarantees
/// come from the request/response path, not from this channel.
pub struct LiveChannel {
    url: String,
    factory: Arc<dyn TransportFactory>,
    config: ChannelConfig,
    state: AtomicU8,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    events_tx: mpsc::Sender<ChannelEvent>,
    shutdown: Notify,
    reopen_notify: Notify,
    is_running: AtomicBool,
}

impl LiveChannel {
    pub fn new(
        url: String,
        factory: Arc<dyn TransportFactory>,
        config: ChannelConfig,
    ) -> (Arc<Self>, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let channel = Arc::new(Self {
            url,
            factory,
            config,
            state: AtomicU8::new(ChannelState::Idle as u8),
            transport: Mutex::new(None),
            events_tx,
            shutdown: Notify::new(),
            reopen_notify: Notify::new(),
            is_running: AtomicBool::new(false),
        });
        (channel, events_rx)
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Drives the channel until it is disabled. Call once, from its own
    /// task.
    pub async fn run(self: Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Channel", "Channel `run` called while already running.");
            return;
        }
        let _running_guard = scopeguard::guard((), |_| {
            self.is_running.store(false, Ordering::SeqCst);
        });

        let mut attempts: u32 = 0;
        loop {
            if self.state() == ChannelState::Disabled {
                break;
            }
            self.set_state(ChannelState::Connecting);
            match self.factory.create_transport(&self.url).await {
                Ok((transport, events)) => {
                    attempts = 0;
                    *self.transport.lock().await = Some(transport);
                    self.set_state(ChannelState::Open);
                    info!(target: "Channel", "Live channel open: {}", self.url);
                    if self.events_tx.send(ChannelEvent::Opened).await.is_err() {
                        break;
                    }
                    let stop = self.pump_events(events).await;
                    *self.transport.lock().await = None;
                    if stop {
                        break;
                    }
                    warn!(target: "Channel", "Live channel connection lost");
                }
                Err(e) => {
                    attempts += 1;
                    warn!(target: "Channel", "Connect attempt {attempts} failed: {e:#}");
                    if attempts >= self.config.max_reconnect_attempts {
                        info!(
                            target: "Channel",
                            "Retry budget exhausted; channel stays closed until reopened"
                        );
                        self.set_state(ChannelState::Closed);
                        let _ = self
                            .events_tx
                            .send(ChannelEvent::Closed { will_retry: false })
                            .await;
                        tokio::select! {
                            biased;
                            _ = self.shutdown.notified() => break,
                            _ = self.reopen_notify.notified() => {
                                attempts = 0;
                                continue;
                            }
                        }
                    }
                }
            }

            self.set_state(ChannelState::Closed);
            let _ = self
                .events_tx
                .send(ChannelEvent::Closed { will_retry: true })
                .await;
            let delay = self.backoff_delay(attempts);
            debug!(target: "Channel", "Reconnecting in {delay:?}");
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = self.reopen_notify.notified() => {
                    attempts = 0;
                }
                _ = sleep(delay) => {}
            }
        }
        debug!(target: "Channel", "Channel run loop has shut down.");
    }

    /// Pumps transport events into channel events. Returns `true` when
    /// the run loop should stop entirely rather than reconnect.
    async fn pump_events(&self, mut events: mpsc::Receiver<TransportEvent>) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    debug!(target: "Channel", "Shutdown signaled; closing live channel.");
                    if let Some(transport) = self.transport.lock().await.as_ref() {
                        transport.disconnect().await;
                    }
                    return true;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::TextReceived(text)) => {
                        match ChatFrame::parse(&text) {
                            Ok(frame) => {
                                if self.events_tx.send(ChannelEvent::Frame(frame)).await.is_err() {
                                    return true;
                                }
                            }
                            // A bad frame is dropped; the channel stays up.
                            Err(e) => {
                                warn!(target: "Channel", "Dropping malformed frame: {e}");
                            }
                        }
                    }
                    Some(TransportEvent::Disconnected) | None => return false,
                }
            }
        }
    }

    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(10);
        let delay = self.config.reconnect_base_delay * 2u32.pow(exp);
        delay.min(self.config.reconnect_max_delay)
    }

    /// Sends one frame if the channel is open right now. There is no
    /// queueing: a non-open channel rejects immediately so the caller
    /// can fall back to the direct send path.
    pub async fn send(&self, frame: &ChatFrame) -> Result<(), ChannelError> {
        if self.state() != ChannelState::Open {
            return Err(ChannelError::Unavailable);
        }
        let transport = self.transport.lock().await.clone();
        let Some(transport) = transport else {
            return Err(ChannelError::Unavailable);
        };
        let payload =
            serde_json::to_string(frame).map_err(|e| ChannelError::Transport(e.to_string()))?;
        transport
            .send_text(&payload)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    /// Restarts connection attempts after the retry budget was spent.
    /// Only meaningful in `Closed`; returns whether a reopen was
    /// triggered.
    pub fn reopen(&self) -> bool {
        if self.state() != ChannelState::Closed {
            return false;
        }
        info!(target: "Channel", "Reopen requested for {}", self.url);
        self.reopen_notify.notify_one();
        true
    }

    /// Tears the channel down for good.
    pub async fn disable(&self) {
        debug!(target: "Channel", "Disabling live channel for {}", self.url);
        self.set_state(ChannelState::Disabled);
        self.shutdown.notify_one();
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.disconnect().await;
        }
    }
}

/// The chat endpoint for one conversation, with both participant ids in
/// the path.
pub fn chat_channel_url(ws_base_url: &str, user_id: &UserId, peer_id: &UserId) -> String {
    format!(
        "{}/ws/chat/{}/{}",
        ws_base_url.trim_end_matches('/'),
        urlencoding::encode(user_id.as_str()),
        urlencoding::encode(peer_id.as_str())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransportFactory;

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            reconnect_base_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(5),
            max_reconnect_attempts: 2,
        }
    }

    fn inbound_frame_json() -> String {
        r#"{"sender_id":"bob","message":"hi","timestamp":"2024-05-01T12:00:00Z"}"#.to_string()
    }

    #[tokio::test]
    async fn opens_and_delivers_frames() {
        let factory = MockTransportFactory::new();
        let (channel, mut events) =
            LiveChannel::new("ws://test/ws/chat/a/b".into(), factory.clone(), fast_config());
        tokio::spawn(channel.clone().run());

        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));
        assert_eq!(channel.state(), ChannelState::Open);

        let handle = factory.connection(0).await;
        handle
            .events
            .send(TransportEvent::TextReceived(inbound_frame_json()))
            .await
            .unwrap();

        match events.recv().await {
            Some(ChannelEvent::Frame(frame)) => {
                assert_eq!(frame.sender_id.as_deref(), Some("bob"));
                assert_eq!(frame.message, "hi");
            }
            other => panic!("expected frame, got {other:?}"),
        }

        channel.disable().await;
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_channel_survives() {
        let factory = MockTransportFactory::new();
        let (channel, mut events) =
            LiveChannel::new("ws://test/ws/chat/a/b".into(), factory.clone(), fast_config());
        tokio::spawn(channel.clone().run());
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));

        let handle = factory.connection(0).await;
        handle
            .events
            .send(TransportEvent::TextReceived("{not json".to_string()))
            .await
            .unwrap();
        handle
            .events
            .send(TransportEvent::TextReceived(inbound_frame_json()))
            .await
            .unwrap();

        // Only the valid frame comes through, and the channel is still
        // open.
        match events.recv().await {
            Some(ChannelEvent::Frame(frame)) => assert_eq!(frame.message, "hi"),
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(channel.state(), ChannelState::Open);

        channel.disable().await;
    }

    #[tokio::test]
    async fn send_is_rejected_when_not_open() {
        let factory = MockTransportFactory::new();
        let (channel, _events) =
            LiveChannel::new("ws://test/ws/chat/a/b".into(), factory, fast_config());

        let frame = ChatFrame {
            sender_id: None,
            message: "hello".to_string(),
            timestamp: None,
            client_id: Some("c1".to_string()),
        };
        assert_eq!(channel.send(&frame).await, Err(ChannelError::Unavailable));
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_parks_until_reopen() {
        let factory = MockTransportFactory::new();
        factory.fail_connects(2);
        let (channel, mut events) =
            LiveChannel::new("ws://test/ws/chat/a/b".into(), factory.clone(), fast_config());
        tokio::spawn(channel.clone().run());

        // Failed attempts drain the budget, ending in a terminal close.
        let mut saw_final_close = false;
        for _ in 0..3 {
            match events.recv().await {
                Some(ChannelEvent::Closed { will_retry: true }) => continue,
                Some(ChannelEvent::Closed { will_retry: false }) => {
                    saw_final_close = true;
                    break;
                }
                other => panic!("expected closed, got {other:?}"),
            }
        }
        assert!(saw_final_close);
        assert_eq!(channel.state(), ChannelState::Closed);

        // A reopen request starts a fresh budget and succeeds.
        assert!(channel.reopen());
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));
        assert_eq!(channel.state(), ChannelState::Open);

        channel.disable().await;
    }

    #[tokio::test]
    async fn drop_then_reconnect_reuses_budget() {
        let factory = MockTransportFactory::new();
        let (channel, mut events) =
            LiveChannel::new("ws://test/ws/chat/a/b".into(), factory.clone(), fast_config());
        tokio::spawn(channel.clone().run());
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));

        let handle = factory.connection(0).await;
        handle
            .events
            .send(TransportEvent::Disconnected)
            .await
            .unwrap();

        match events.recv().await {
            Some(ChannelEvent::Closed { will_retry }) => assert!(will_retry),
            other => panic!("expected closed, got {other:?}"),
        }
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));

        channel.disable().await;
    }

    #[tokio::test]
    async fn disable_is_terminal() {
        let factory = MockTransportFactory::new();
        let (channel, mut events) =
            LiveChannel::new("ws://test/ws/chat/a/b".into(), factory, fast_config());
        let run_task = tokio::spawn(channel.clone().run());

        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));
        channel.disable().await;
        run_task.await.unwrap();

        assert_eq!(channel.state(), ChannelState::Disabled);
        assert!(!channel.reopen());

        // Once the last handle is gone the event stream ends.
        drop(channel);
        assert!(matches!(events.recv().await, None));
    }

    #[test]
    fn channel_url_encodes_both_participants() {
        assert_eq!(
            chat_channel_url("ws://host:8000/", &UserId::new("a b"), &UserId::new("c/d")),
            "ws://host:8000/ws/chat/a%20b/c%2Fd"
        );
    }
}
