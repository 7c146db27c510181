use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio::sync::mpsc;

/// Builds a syntactically valid bearer credential whose claim set names
/// `subject`. The signature is garbage; nothing in the client verifies it.
pub fn test_credential(subject: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(
        r#"{{"spotify_id":"{subject}","display_name":"Test Listener"}}"#
    ));
    let signature = URL_SAFE_NO_PAD.encode(b"test-signature");
    format!("{header}.{payload}.{signature}")
}

/// A mock HTTP client that replays scripted responses in order and
/// records every request it receives.
#[derive(Default)]
pub struct MockHttpClient {
    responses: std::sync::Mutex<VecDeque<HttpResponse>>,
    requests: std::sync::Mutex<Vec<HttpRequest>>,
    delay: std::sync::Mutex<Option<Duration>>,
}

impl MockHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status_code: u16, body: &str) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status_code,
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn push_status(&self, status_code: u16) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status_code,
            body: Vec::new(),
        });
    }

    /// Makes every subsequent request stall before responding.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn request(&self, index: usize) -> HttpRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let method = request.method.clone();
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => anyhow::bail!("no scripted response for {method} {url}"),
        }
    }
}

/// A mock transport that records outbound frames, for testing purposes.
#[derive(Default)]
pub struct MockTransport {
    sent: std::sync::Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// One simulated connection: the transport the channel holds plus the
/// sender a test uses to inject server-side events.
#[derive(Clone)]
pub struct MockConnectionHandle {
    pub transport: Arc<MockTransport>,
    pub events: mpsc::Sender<TransportEvent>,
}

/// A mock transport factory for testing. Each successful connect hands
/// out a fresh [`MockConnectionHandle`]; [`fail_connects`] makes the
/// next N attempts error instead.
///
/// [`fail_connects`]: MockTransportFactory::fail_connects
#[derive(Default)]
pub struct MockTransportFactory {
    connections: std::sync::Mutex<Vec<MockConnectionHandle>>,
    fail_next: AtomicU32,
    attempts: AtomicUsize,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_connects(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Waits for the `index`-th successful connection to exist.
    pub async fn connection(&self, index: usize) -> MockConnectionHandle {
        for _ in 0..200 {
            let handle = self.connections.lock().unwrap().get(index).cloned();
            if let Some(handle) = handle {
                return handle;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transport connection {index} was never established");
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
        _url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("simulated connect failure");
        }

        let (events_tx, events_rx) = mpsc::channel(100);
        events_tx
            .send(TransportEvent::Connected)
            .await
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))?;

        let transport = Arc::new(MockTransport::default());
        self.connections.lock().unwrap().push(MockConnectionHandle {
            transport: transport.clone(),
            events: events_tx,
        });
        Ok((transport, events_rx))
    }
}
