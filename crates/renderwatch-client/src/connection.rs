use std::sync::Arc;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use renderwatch_core::config::ConnectionDescriptor;
use renderwatch_core::envelope::{DecodeError, EventEnvelope};
use renderwatch_core::errors::StreamError;
use renderwatch_core::state::{ConnectionState, RetryState, StatusSnapshot};

use crate::backoff::BackoffPolicy;
use crate::dispatcher::Dispatcher;
use crate::transport::ProgressTransport;

/// Why the connection worker stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// `close()` was called; all further retries are suppressed.
    ClosedByCaller,
    /// A terminal domain event was dispatched.
    TerminalEvent,
    /// The handshake never completed within the establish timeout. The
    /// stream is abandoned; the supervisor degrades to polling.
    EstablishTimedOut,
    /// Every reconnect attempt was used up.
    RetriesExhausted,
}

enum RetryDecision {
    Retry,
    Exhausted,
    Cancelled,
}

/// State shared between the connection worker and session snapshots.
pub(crate) struct ConnectionShared {
    state: RwLock<ConnectionState>,
    retry: RwLock<RetryState>,
}

impl ConnectionShared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            retry: RwLock::new(RetryState::default()),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn reconnect_attempt(&self) -> u32 {
        self.retry.read().attempt_count
    }

    pub(crate) fn last_event_id(&self) -> Option<String> {
        self.retry.read().last_event_id.clone()
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        let retry = self.retry.read();
        StatusSnapshot {
            status: *self.state.read(),
            reconnect_attempt: retry.attempt_count,
            last_event_id: retry.last_event_id.clone(),
        }
    }
}

/// One streaming transport session to one endpoint. Runs as a single worker
/// loop, so every transition, dispatch, and timer fires sequentially; no two
/// callbacks for the same connection run concurrently.
pub struct Connection {
    descriptor: ConnectionDescriptor,
    transport: Arc<dyn ProgressTransport>,
    dispatcher: Arc<Dispatcher>,
    backoff: BackoffPolicy,
    shared: Arc<ConnectionShared>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(
        descriptor: ConnectionDescriptor,
        transport: Arc<dyn ProgressTransport>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        let backoff = BackoffPolicy::new(descriptor.base_retry_delay, descriptor.max_retry_delay);
        Self {
            descriptor,
            transport,
            dispatcher,
            backoff,
            shared: Arc::new(ConnectionShared::new()),
            cancel,
        }
    }

    pub(crate) fn shared(&self) -> Arc<ConnectionShared> {
        Arc::clone(&self.shared)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id()
    }

    fn transition(&self, next: ConnectionState) {
        *self.shared.state.write() = next;
        self.dispatcher.notify_status(&self.shared.snapshot());
    }

    /// The reconnect URL carries the last successfully processed event id so
    /// the server may replay missed events. The stream transport cannot set
    /// custom headers, so the id travels as a query parameter.
    fn resume_url(&self) -> String {
        match self.shared.last_event_id() {
            Some(id) => {
                let sep = if self.descriptor.endpoint_url.contains('?') {
                    '&'
                } else {
                    '?'
                };
                format!("{}{}lastEventId={}", self.descriptor.endpoint_url, sep, id)
            }
            None => self.descriptor.endpoint_url.clone(),
        }
    }

    async fn schedule_retry(&self) -> RetryDecision {
        let attempt = {
            let mut retry = self.shared.retry.write();
            retry.attempt_count += 1;
            retry.attempt_count
        };

        if attempt > self.descriptor.max_retries {
            warn!(
                attempts = attempt - 1,
                "reconnect attempts exhausted, closing connection"
            );
            self.transition(ConnectionState::Closed);
            return RetryDecision::Exhausted;
        }

        self.transition(ConnectionState::Reconnecting);
        let delay = self.backoff.delay(attempt);
        debug!(
            attempt,
            max_retries = self.descriptor.max_retries,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.transition(ConnectionState::Closed);
                RetryDecision::Cancelled
            }
            _ = tokio::time::sleep(delay) => RetryDecision::Retry,
        }
    }

    /// Drive the connection until a terminal condition. Dispatches decoded
    /// envelopes in arrival order; reconnects with backoff on transport
    /// failure; stops on cancellation, a terminal domain event, an establish
    /// timeout, or retry exhaustion.
    pub async fn run(&self) -> ConnectionOutcome {
        loop {
            if self.cancel.is_cancelled() {
                self.transition(ConnectionState::Closed);
                return ConnectionOutcome::ClosedByCaller;
            }

            self.transition(ConnectionState::Connecting);
            let url = self.resume_url();
            debug!(url = %url, "opening progress stream");

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.transition(ConnectionState::Closed);
                    return ConnectionOutcome::ClosedByCaller;
                }
                res = tokio::time::timeout(
                    self.descriptor.establish_timeout,
                    self.transport.open_events(&url),
                ) => res,
            };

            let stream = match opened {
                Err(_elapsed) => {
                    warn!(
                        timeout_ms = self.descriptor.establish_timeout.as_millis() as u64,
                        "handshake did not complete, abandoning stream"
                    );
                    self.transition(ConnectionState::Error);
                    self.transition(ConnectionState::Closed);
                    return ConnectionOutcome::EstablishTimedOut;
                }
                Ok(Err(err)) => {
                    warn!(
                        error = %err,
                        kind = err.error_kind(),
                        "failed to open progress stream"
                    );
                    self.transition(ConnectionState::Error);
                    match self.schedule_retry().await {
                        RetryDecision::Retry => continue,
                        RetryDecision::Exhausted => return ConnectionOutcome::RetriesExhausted,
                        RetryDecision::Cancelled => return ConnectionOutcome::ClosedByCaller,
                    }
                }
                Ok(Ok(stream)) => stream,
            };

            self.shared.retry.write().attempt_count = 0;
            self.transition(ConnectionState::Connected);

            let mut stream = stream;
            let failure: Option<StreamError> = loop {
                // Every frame wait is bounded by the idle timeout, so a
                // server that goes silent mid-stream is detected no matter
                // which transport produced the stream.
                let item = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.transition(ConnectionState::Closed);
                        return ConnectionOutcome::ClosedByCaller;
                    }
                    item = tokio::time::timeout(self.descriptor.idle_timeout, stream.next()) => item,
                };
                let item = match item {
                    Ok(item) => item,
                    Err(_elapsed) => {
                        break Some(StreamError::IdleTimeout(self.descriptor.idle_timeout))
                    }
                };

                match item {
                    Some(Ok(frame)) => {
                        // Record the id for every received frame; resumption
                        // must not replay a message we already consumed, even
                        // one we dropped as malformed.
                        if let Some(id) = &frame.id {
                            self.shared.retry.write().last_event_id = Some(id.clone());
                        }
                        match EventEnvelope::decode(&frame.event, frame.id.as_deref(), &frame.data)
                        {
                            Ok(envelope) => {
                                let terminal = envelope.event.is_terminal();
                                self.dispatcher.dispatch(&envelope);
                                if terminal {
                                    info!(
                                        event_type = envelope.event.event_type(),
                                        "terminal event received, closing connection"
                                    );
                                    self.transition(ConnectionState::Closed);
                                    return ConnectionOutcome::TerminalEvent;
                                }
                            }
                            Err(DecodeError::UnknownEventType(event_type)) => {
                                warn!(event_type = %event_type, "dropping unrecognized event");
                            }
                            Err(err) => {
                                warn!(error = %err, "dropping malformed event");
                            }
                        }
                    }
                    Some(Err(err)) => break Some(err),
                    None => break None,
                }
            };

            match &failure {
                Some(err) => warn!(
                    error = %err,
                    kind = err.error_kind(),
                    "progress stream interrupted"
                ),
                None => warn!("server closed the progress stream before a terminal event"),
            }
            self.transition(ConnectionState::Error);
            match self.schedule_retry().await {
                RetryDecision::Retry => continue,
                RetryDecision::Exhausted => return ConnectionOutcome::RetriesExhausted,
                RetryDecision::Cancelled => return ConnectionOutcome::ClosedByCaller,
            }
        }
    }
}
