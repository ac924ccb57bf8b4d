use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use renderwatch_core::envelope::{JobState, JobStatusPayload};
use renderwatch_core::errors::StreamError;

use crate::sse::SseFrame;
use crate::transport::{EventStream, ProgressTransport};

/// Pre-programmed outcome for one `open_events` call.
pub enum MockConnect {
    /// Yield these frames, then end the stream cleanly (server closed it).
    Stream(Vec<Result<SseFrame, StreamError>>),
    /// Yield these frames, then stay open without further data.
    StayOpen(Vec<Result<SseFrame, StreamError>>),
    /// Fail the open itself.
    Fail(StreamError),
    /// Never complete the handshake (drives the establish timeout).
    Hang,
}

/// Scripted transport for deterministic tests without a backend. Connect
/// outcomes and status documents are consumed in sequence; every requested
/// URL is recorded so tests can assert on resumption parameters.
#[derive(Default)]
pub struct MockTransport {
    connects: Mutex<VecDeque<MockConnect>>,
    statuses: Mutex<VecDeque<Result<JobStatusPayload, StreamError>>>,
    open_urls: Mutex<Vec<String>>,
    status_urls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(connects: Vec<MockConnect>) -> Self {
        Self {
            connects: Mutex::new(connects.into()),
            ..Default::default()
        }
    }

    pub fn push_connect(&self, connect: MockConnect) {
        self.connects.lock().push_back(connect);
    }

    pub fn push_status(&self, status: Result<JobStatusPayload, StreamError>) {
        self.statuses.lock().push_back(status);
    }

    /// URLs passed to `open_events`, in call order.
    pub fn open_urls(&self) -> Vec<String> {
        self.open_urls.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.open_urls.lock().len()
    }

    /// URLs passed to `fetch_status`, in call order.
    pub fn status_urls(&self) -> Vec<String> {
        self.status_urls.lock().clone()
    }

    pub fn status_count(&self) -> usize {
        self.status_urls.lock().len()
    }
}

/// Convenience: a well-formed wire frame.
pub fn frame(event: &str, id: Option<&str>, data: &str) -> Result<SseFrame, StreamError> {
    Ok(SseFrame {
        event: event.to_string(),
        data: data.to_string(),
        id: id.map(str::to_owned),
    })
}

/// Convenience: a running status document at the given percentage.
pub fn running_status(percent: f64) -> JobStatusPayload {
    JobStatusPayload {
        status: JobState::Running,
        stage: Some("render".into()),
        percent: Some(percent),
        progress_message: None,
        error_message: None,
        output_path: None,
        artifacts: None,
    }
}

/// Convenience: a completed status document.
pub fn completed_status(output_path: &str) -> JobStatusPayload {
    JobStatusPayload {
        status: JobState::Completed,
        stage: None,
        percent: Some(100.0),
        progress_message: None,
        error_message: None,
        output_path: Some(output_path.into()),
        artifacts: None,
    }
}

/// Convenience: a failed status document.
pub fn failed_status(error: &str) -> JobStatusPayload {
    JobStatusPayload {
        status: JobState::Failed,
        stage: None,
        percent: None,
        progress_message: None,
        error_message: Some(error.into()),
        output_path: None,
        artifacts: None,
    }
}

#[async_trait]
impl ProgressTransport for MockTransport {
    async fn open_events(&self, url: &str) -> Result<EventStream, StreamError> {
        self.open_urls.lock().push(url.to_string());
        let next = self.connects.lock().pop_front();
        match next {
            Some(MockConnect::Stream(frames)) => {
                Ok(Box::pin(futures::stream::iter(frames)))
            }
            Some(MockConnect::StayOpen(frames)) => Ok(Box::pin(
                futures::stream::iter(frames).chain(futures::stream::pending()),
            )),
            Some(MockConnect::Fail(err)) => Err(err),
            Some(MockConnect::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            None => Err(StreamError::Transport("no scripted connect".into())),
        }
    }

    async fn fetch_status(&self, url: &str) -> Result<JobStatusPayload, StreamError> {
        self.status_urls.lock().push(url.to_string());
        self.statuses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(StreamError::Transport("no scripted status".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_connects_consumed_in_order() {
        let transport = MockTransport::new(vec![
            MockConnect::Fail(StreamError::Transport("first".into())),
            MockConnect::Stream(vec![frame("job-status", Some("1"), "{\"status\":\"running\"}")]),
        ]);

        let err = transport.open_events("http://a").await.err().unwrap();
        assert!(matches!(err, StreamError::Transport(msg) if msg == "first"));

        let mut stream = transport.open_events("http://b").await.unwrap();
        let f = stream.next().await.unwrap().unwrap();
        assert_eq!(f.event, "job-status");
        assert!(stream.next().await.is_none());

        assert_eq!(transport.open_urls(), vec!["http://a", "http://b"]);
    }

    #[tokio::test]
    async fn exhausted_script_fails_open() {
        let transport = MockTransport::new(vec![]);
        let err = transport.open_events("http://x").await.err().unwrap();
        assert!(matches!(err, StreamError::Transport(_)));
    }

    #[tokio::test]
    async fn scripted_statuses_consumed_in_order() {
        let transport = MockTransport::default();
        transport.push_status(Ok(running_status(10.0)));
        transport.push_status(Ok(completed_status("/out.mp4")));

        let first = transport.fetch_status("http://s").await.unwrap();
        assert_eq!(first.percent, Some(10.0));
        let second = transport.fetch_status("http://s").await.unwrap();
        assert_eq!(second.status, JobState::Completed);
        assert_eq!(transport.status_count(), 2);
    }
}
