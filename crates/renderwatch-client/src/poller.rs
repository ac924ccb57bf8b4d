use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use renderwatch_core::envelope::{
    EventEnvelope, JobCompletedPayload, JobFailedPayload, JobState, JobStatusPayload,
    ProgressEvent, StepProgressPayload,
};
use renderwatch_core::errors::StreamError;

use crate::dispatcher::Dispatcher;
use crate::transport::ProgressTransport;

/// Consecutive fetch failures tolerated before the poller gives up.
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 3;

/// Why the poller stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// A terminal status was observed and dispatched.
    TerminalEvent,
    /// The overall job timeout elapsed first.
    TimedOut,
    /// Too many consecutive fetch failures.
    Failed,
    /// `close()` was called.
    Cancelled,
}

/// Periodic status-fetch loop substituting for a streaming channel that
/// could not be established. Polled documents are translated into the same
/// envelopes the stream produces, so handlers are transport-agnostic.
///
/// A 404 means the job is not registered yet: the poller keeps going. Only
/// repeated transport failures or the overall timeout escalate to failure.
pub struct StatusPoller {
    status_url: String,
    transport: Arc<dyn ProgressTransport>,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    overall_timeout: Duration,
    cancel: CancellationToken,
}

impl StatusPoller {
    pub fn new(
        status_url: String,
        transport: Arc<dyn ProgressTransport>,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
        overall_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            status_url,
            transport,
            dispatcher,
            poll_interval,
            overall_timeout,
            cancel,
        }
    }

    /// Poll until a terminal status, the overall deadline, a failure bound,
    /// or cancellation. The first fetch happens immediately.
    pub async fn run(&self) -> PollOutcome {
        let deadline = tokio::time::Instant::now() + self.overall_timeout;
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut consecutive_failures = 0u32;
        let mut last_emitted: Option<JobStatusPayload> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.overall_timeout.as_millis() as u64,
                    "job did not finish within the overall timeout"
                );
                self.dispatch_failure("job did not finish within the overall timeout");
                return PollOutcome::TimedOut;
            }

            match self.transport.fetch_status(&self.status_url).await {
                Ok(doc) => {
                    consecutive_failures = 0;
                    self.emit_progress(&doc, &mut last_emitted);
                    if doc.status.is_terminal() {
                        info!(status = ?doc.status, "terminal status observed while polling");
                        self.emit_terminal(&doc);
                        return PollOutcome::TerminalEvent;
                    }
                }
                Err(StreamError::JobNotFound) => {
                    consecutive_failures = 0;
                    debug!("job not registered yet, continuing to poll");
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        error = %err,
                        consecutive = consecutive_failures,
                        "status poll failed"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                        self.dispatch_failure(&format!("status polling failed: {err}"));
                        return PollOutcome::Failed;
                    }
                }
            }
        }
    }

    /// Dispatch a `job-status` envelope for each observed change, plus a
    /// `step-progress` envelope when a percentage is present.
    fn emit_progress(&self, doc: &JobStatusPayload, last_emitted: &mut Option<JobStatusPayload>) {
        if last_emitted.as_ref() == Some(doc) {
            return;
        }
        *last_emitted = Some(doc.clone());

        self.dispatcher
            .dispatch(&EventEnvelope::new(ProgressEvent::JobStatus(doc.clone())));

        if doc.status.is_terminal() {
            return;
        }
        if let Some(pct) = doc.percent {
            self.dispatcher
                .dispatch(&EventEnvelope::new(ProgressEvent::StepProgress(
                    StepProgressPayload {
                        step: doc.stage.clone().unwrap_or_else(|| "job".into()),
                        phase: None,
                        progress_pct: pct,
                        message: doc.progress_message.clone(),
                    },
                )));
        }
    }

    fn emit_terminal(&self, doc: &JobStatusPayload) {
        let event = match doc.status {
            JobState::Completed => ProgressEvent::JobCompleted(JobCompletedPayload {
                output_path: doc.output_path.clone(),
                artifacts: doc.artifacts.clone(),
            }),
            JobState::Cancelled => ProgressEvent::JobCancelled,
            _ => ProgressEvent::JobFailed(JobFailedPayload {
                error_message: doc.error_message.clone(),
            }),
        };
        self.dispatcher.dispatch(&EventEnvelope::new(event));
    }

    fn dispatch_failure(&self, message: &str) {
        self.dispatcher
            .dispatch(&EventEnvelope::new(ProgressEvent::JobFailed(
                JobFailedPayload {
                    error_message: Some(message.to_string()),
                },
            )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::mock::{completed_status, failed_status, running_status, MockTransport};

    fn poller(
        transport: Arc<MockTransport>,
        dispatcher: Arc<Dispatcher>,
        overall: Duration,
    ) -> StatusPoller {
        StatusPoller::new(
            "http://render.local/jobs/job_1".into(),
            transport,
            dispatcher,
            Duration::from_secs(2),
            overall,
            CancellationToken::new(),
        )
    }

    fn record_events(dispatcher: &Dispatcher) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for event_type in ["job-status", "step-progress", "job-completed", "job-failed"] {
            let seen = Arc::clone(&seen);
            dispatcher.on(event_type, move |env| {
                seen.lock().push(env.event.event_type().to_string());
            });
        }
        seen
    }

    #[tokio::test]
    async fn translates_polled_statuses_into_stream_events() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        transport.push_status(Ok(running_status(10.0)));
        transport.push_status(Ok(completed_status("/renders/out.mp4")));

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let outcome = poller(transport, dispatcher, Duration::from_secs(600))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::TerminalEvent);
        assert_eq!(
            *seen.lock(),
            vec!["job-status", "step-progress", "job-status", "job-completed"]
        );
    }

    #[tokio::test]
    async fn unchanged_status_is_not_re_emitted() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        transport.push_status(Ok(running_status(10.0)));
        transport.push_status(Ok(running_status(10.0)));
        transport.push_status(Ok(completed_status("/out.mp4")));

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let outcome = poller(transport, dispatcher, Duration::from_secs(600))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::TerminalEvent);
        assert_eq!(
            *seen.lock(),
            vec!["job-status", "step-progress", "job-status", "job-completed"]
        );
    }

    #[tokio::test]
    async fn not_found_keeps_polling() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        transport.push_status(Err(StreamError::JobNotFound));
        transport.push_status(Err(StreamError::JobNotFound));
        transport.push_status(Ok(completed_status("/out.mp4")));

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let outcome = poller(Arc::clone(&transport), dispatcher, Duration::from_secs(600))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::TerminalEvent);
        assert_eq!(transport.status_count(), 3);
        assert!(!seen.lock().contains(&"job-failed".to_string()));
    }

    #[tokio::test]
    async fn failed_status_emits_job_failed() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        transport.push_status(Ok(failed_status("encoder crashed")));

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let outcome = poller(transport, dispatcher, Duration::from_secs(600))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::TerminalEvent);
        assert_eq!(*seen.lock(), vec!["job-status", "job-failed"]);
    }

    #[tokio::test]
    async fn consecutive_transport_failures_escalate() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        for _ in 0..3 {
            transport.push_status(Err(StreamError::Transport("unreachable".into())));
        }
        // Never reached
        transport.push_status(Ok(completed_status("/out.mp4")));

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let outcome = poller(Arc::clone(&transport), dispatcher, Duration::from_secs(600))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::Failed);
        assert_eq!(transport.status_count(), 3);
        assert_eq!(*seen.lock(), vec!["job-failed"]);
    }

    #[tokio::test]
    async fn transient_failures_below_the_bound_recover() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        transport.push_status(Err(StreamError::Transport("unreachable".into())));
        transport.push_status(Err(StreamError::Transport("unreachable".into())));
        transport.push_status(Ok(completed_status("/out.mp4")));

        let dispatcher = Arc::new(Dispatcher::new());
        let outcome = poller(transport, dispatcher, Duration::from_secs(600))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::TerminalEvent);
    }

    #[tokio::test]
    async fn overall_timeout_bounds_the_poller() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        for _ in 0..10 {
            transport.push_status(Ok(running_status(50.0)));
        }

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let outcome = poller(transport, dispatcher, Duration::from_secs(5))
            .run()
            .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(seen.lock().last().map(String::as_str), Some("job-failed"));
    }

    #[tokio::test]
    async fn cancellation_stops_polling_without_failure_events() {
        tokio::time::pause();

        let transport = Arc::new(MockTransport::default());
        for _ in 0..10 {
            transport.push_status(Ok(running_status(50.0)));
        }

        let dispatcher = Arc::new(Dispatcher::new());
        let seen = record_events(&dispatcher);

        let cancel = CancellationToken::new();
        let poller = StatusPoller::new(
            "http://render.local/jobs/job_1".into(),
            transport,
            dispatcher,
            Duration::from_secs(2),
            Duration::from_secs(600),
            cancel.clone(),
        );

        let worker = tokio::spawn(async move { poller.run().await });
        tokio::task::yield_now().await;
        cancel.cancel();

        let outcome = worker.await.unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert!(!seen.lock().contains(&"job-failed".to_string()));
    }
}
