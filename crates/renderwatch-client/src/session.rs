use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use renderwatch_core::config::{ConnectionDescriptor, Endpoints, StreamConfig};
use renderwatch_core::envelope::{EventEnvelope, JobFailedPayload, ProgressEvent};
use renderwatch_core::ids::{JobId, SessionId};
use renderwatch_core::state::{ActiveTransport, SessionState, StatusSnapshot};

use crate::connection::{Connection, ConnectionOutcome, ConnectionShared};
use crate::dispatcher::{Dispatcher, HandlerToken};
use crate::poller::StatusPoller;
use crate::transport::ProgressTransport;

/// Supervises progress delivery for one render job: runs the streaming
/// connection, and when the stream cannot be established or its reconnect
/// budget runs out, switches the session to status polling. The switch is
/// one-directional; a session never goes back to streaming.
///
/// Exactly one transport feeds the dispatcher at any moment, and the whole
/// session is bounded by the overall job timeout.
pub struct JobSession {
    job_id: JobId,
    session_id: SessionId,
    endpoints: Endpoints,
    config: StreamConfig,
    transport: Arc<dyn ProgressTransport>,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<ConnectionShared>,
    active_transport: RwLock<ActiveTransport>,
    closed: AtomicBool,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobSession {
    /// Create the session and start its worker task immediately.
    pub fn spawn(
        job_id: JobId,
        endpoints: Endpoints,
        config: StreamConfig,
        transport: Arc<dyn ProgressTransport>,
    ) -> Arc<Self> {
        let session_id = SessionId::new();
        let dispatcher = Arc::new(Dispatcher::new());
        let cancel = CancellationToken::new();

        let descriptor =
            ConnectionDescriptor::from_config(endpoints.events_url(&job_id), &config);
        let connection = Connection::new(
            descriptor,
            Arc::clone(&transport),
            Arc::clone(&dispatcher),
            cancel.clone(),
        );

        let session = Arc::new(Self {
            job_id,
            session_id,
            endpoints,
            config,
            transport,
            dispatcher,
            shared: connection.shared(),
            active_transport: RwLock::new(ActiveTransport::Stream),
            closed: AtomicBool::new(false),
            cancel,
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&session).drive(connection));
        *session.worker.lock() = Some(handle);
        session
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Read-only view of the session at this instant.
    pub fn state(&self) -> SessionState {
        let snapshot = self.shared.snapshot();
        SessionState {
            job_id: self.job_id.clone(),
            active_transport: *self.active_transport.read(),
            connection_state: snapshot.status,
            reconnect_attempt: snapshot.reconnect_attempt,
            last_event_id: snapshot.last_event_id,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register a handler for one event type.
    pub fn on(
        &self,
        event_type: &str,
        handler: impl Fn(&EventEnvelope) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.dispatcher.on(event_type, handler)
    }

    pub fn off(&self, event_type: &str, token: HandlerToken) -> bool {
        self.dispatcher.off(event_type, token)
    }

    /// Register a connection-status observer.
    pub fn on_status_change(
        &self,
        handler: impl Fn(&StatusSnapshot) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.dispatcher.on_status_change(handler)
    }

    pub fn off_status_change(&self, token: HandlerToken) -> bool {
        self.dispatcher.off_status_change(token)
    }

    /// Stop the session: cancels whichever transport is active and drops
    /// every registered handler. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(job_id = %self.job_id, session_id = %self.session_id, "closing session");
        self.cancel.cancel();
        self.dispatcher.clear();
    }

    /// Wait for the worker task to finish. Used by callers that want to
    /// block until the job reaches a terminal outcome.
    pub async fn wait(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(job_id = %self.job_id, error = %err, "session worker aborted");
            }
        }
    }

    async fn drive(self: Arc<Self>, connection: Connection) {
        let deadline = tokio::time::Instant::now() + self.config.overall_job_timeout;

        let outcome = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => None,
            outcome = connection.run() => Some(outcome),
        };

        match outcome {
            None => {
                warn!(
                    job_id = %self.job_id,
                    timeout_ms = self.config.overall_job_timeout.as_millis() as u64,
                    "job did not finish within the overall timeout"
                );
                self.dispatcher
                    .dispatch(&EventEnvelope::new(ProgressEvent::JobFailed(
                        JobFailedPayload {
                            error_message: Some(
                                "job did not finish within the overall timeout".into(),
                            ),
                        },
                    )));
            }
            Some(ConnectionOutcome::TerminalEvent) | Some(ConnectionOutcome::ClosedByCaller) => {}
            Some(ConnectionOutcome::EstablishTimedOut)
            | Some(ConnectionOutcome::RetriesExhausted) => {
                if !self.cancel.is_cancelled() {
                    self.degrade_to_polling(deadline).await;
                }
            }
        }

        // Terminal auto-close: all dispatching is done, release handlers.
        self.close();
    }

    /// Switch the session to the fallback transport and run it to
    /// completion. The streaming connection is already closed by now.
    async fn degrade_to_polling(&self, deadline: tokio::time::Instant) {
        *self.active_transport.write() = ActiveTransport::Poll;
        info!(
            job_id = %self.job_id,
            session_id = %self.session_id,
            "stream unavailable, falling back to status polling"
        );

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let poller = StatusPoller::new(
            self.endpoints.status_url(&self.job_id),
            Arc::clone(&self.transport),
            Arc::clone(&self.dispatcher),
            self.config.poll_interval,
            remaining,
            self.cancel.clone(),
        );
        let outcome = poller.run().await;
        debug!(job_id = %self.job_id, outcome = ?outcome, "poller finished");
    }
}
