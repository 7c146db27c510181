use std::time::Duration;

/// Reconnection policy for the live chat channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// First retry delay; doubles on every consecutive failure.
    pub reconnect_base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before the channel settles closed
    /// and waits for an explicit reopen.
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Endpoints and timeouts for one backend deployment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://api.example.com`.
    pub backend_url: String,
    /// WebSocket base URL, e.g. `wss://api.example.com`.
    pub ws_base_url: String,
    /// Bound on every request/response call.
    pub request_timeout: Duration,
    /// How long a channel-accepted send may wait for its server echo
    /// before it is marked failed.
    pub send_confirm_timeout: Duration,
    pub channel: ChannelConfig,
}

impl ClientConfig {
    pub fn new(backend_url: impl Into<String>, ws_base_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            ws_base_url: ws_base_url.into(),
            request_timeout: Duration::from_secs(10),
            send_confirm_timeout: Duration::from_secs(10),
            channel: ChannelConfig::default(),
        }
    }
}
