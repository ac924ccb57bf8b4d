use std::time::Duration;

use crate::ids::JobId;

/// Configuration surface consumed from the caller. One source of truth for
/// every timer and bound in the client.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Total reconnect attempts before the stream is abandoned.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub base_retry_delay: Duration,
    /// Backoff cap.
    pub max_retry_delay: Duration,
    /// Bound on the initial handshake only.
    pub establish_timeout: Duration,
    /// Bound on silence after a successful open; reset on every message.
    pub idle_timeout: Duration,
    /// Bound on the whole session, stream and poller combined.
    pub overall_job_timeout: Duration,
    /// Fixed interval between fallback status fetches.
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            establish_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            overall_job_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Immutable per-connection parameters, fixed at session creation.
#[derive(Clone, Debug)]
pub struct ConnectionDescriptor {
    pub endpoint_url: String,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub establish_timeout: Duration,
    pub idle_timeout: Duration,
}

impl ConnectionDescriptor {
    pub fn from_config(endpoint_url: String, config: &StreamConfig) -> Self {
        Self {
            endpoint_url,
            max_retries: config.max_retries,
            base_retry_delay: config.base_retry_delay,
            max_retry_delay: config.max_retry_delay,
            establish_timeout: config.establish_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Builds the stream and status URLs for one backend.
#[derive(Clone, Debug)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Long-lived text-event-stream endpoint for a job. The connection owns
    /// the resumption query parameter appended on reconnect.
    pub fn events_url(&self, job_id: &JobId) -> String {
        format!("{}/jobs/{}/events", self.base_url, job_id)
    }

    /// Status endpoint used by the fallback poller.
    pub fn status_url(&self, job_id: &JobId) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }
}
