use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use renderwatch_core::envelope::JobStatusPayload;
use renderwatch_core::errors::StreamError;

use crate::sse::{SseFrame, SseStream};

/// Boxed stream of parsed wire frames from one open connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseFrame, StreamError>> + Send>>;

/// Transport seam between the connection/poller logic and the network.
/// The HTTP implementation talks to the real backend; the mock in
/// [`crate::mock`] scripts outcomes for tests.
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    /// Open the long-lived event stream at `url`.
    async fn open_events(&self, url: &str) -> Result<EventStream, StreamError>;

    /// Fetch the job status document at `url`.
    async fn fetch_status(&self, url: &str) -> Result<JobStatusPayload, StreamError>;
}

/// Production transport over reqwest. Liveness bounds are applied by the
/// caller around each frame wait, not here.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, StreamError> {
        let client = Client::builder()
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProgressTransport for HttpTransport {
    async fn open_events(&self, url: &str) -> Result<EventStream, StreamError> {
        let resp = self
            .client
            .get(url)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamError::from_status(status, body));
        }

        let stream = SseStream::new(resp.bytes_stream());
        Ok(Box::pin(stream))
    }

    async fn fetch_status(&self, url: &str) -> Result<JobStatusPayload, StreamError> {
        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamError::from_status(status, body));
        }

        resp.json::<JobStatusPayload>()
            .await
            .map_err(|e| StreamError::Transport(format!("invalid status document: {e}")))
    }
}
