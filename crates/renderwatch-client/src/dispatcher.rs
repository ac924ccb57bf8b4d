use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace, warn};

use renderwatch_core::envelope::EventEnvelope;
use renderwatch_core::state::StatusSnapshot;

/// Removal token handed back by `on` / `on_status_change`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

type EventHandler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(&StatusSnapshot) + Send + Sync>;

/// Registry of per-event-type handlers and connection-status observers.
/// Insertion order determines invocation order. A panicking handler is
/// caught and logged; it never blocks dispatch to subsequent handlers.
///
/// Handlers are cloned out of the registry before invocation, so a handler
/// may re-enter the dispatcher (register, remove, even clear) without
/// corrupting iteration.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<String, Vec<(HandlerToken, EventHandler)>>>,
    status_handlers: Mutex<Vec<(HandlerToken, StatusHandler)>>,
    next_token: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_token(&self) -> HandlerToken {
        HandlerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a handler for one event type. Returns a token for `off`.
    pub fn on(
        &self,
        event_type: &str,
        handler: impl Fn(&EventEnvelope) + Send + Sync + 'static,
    ) -> HandlerToken {
        let token = self.mint_token();
        self.handlers
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push((token, Arc::new(handler)));
        token
    }

    /// Remove a previously registered handler. Returns false if the token
    /// was not found under that event type.
    pub fn off(&self, event_type: &str, token: HandlerToken) -> bool {
        let mut handlers = self.handlers.lock();
        if let Some(list) = handlers.get_mut(event_type) {
            let before = list.len();
            list.retain(|(t, _)| *t != token);
            return list.len() != before;
        }
        false
    }

    /// Register a connection-status observer. Observers receive a snapshot
    /// on every state transition, not only terminal ones.
    pub fn on_status_change(
        &self,
        handler: impl Fn(&StatusSnapshot) + Send + Sync + 'static,
    ) -> HandlerToken {
        let token = self.mint_token();
        self.status_handlers
            .lock()
            .push((token, Arc::new(handler)));
        token
    }

    pub fn off_status_change(&self, token: HandlerToken) -> bool {
        let mut handlers = self.status_handlers.lock();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    /// Invoke every handler registered for the envelope's event type, in
    /// registration order.
    pub fn dispatch(&self, envelope: &EventEnvelope) {
        let event_type = envelope.event.event_type();
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.lock();
            match map.get(event_type) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => {
                    trace!(event_type, "no handlers registered, dropping event");
                    return;
                }
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                error!(event_type, "event handler panicked; continuing dispatch");
            }
        }
    }

    /// Notify every status observer of a state transition.
    pub fn notify_status(&self, snapshot: &StatusSnapshot) {
        let handlers: Vec<StatusHandler> = {
            let list = self.status_handlers.lock();
            list.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(snapshot))).is_err() {
                warn!(
                    status = snapshot.status.as_str(),
                    "status observer panicked; continuing"
                );
            }
        }
    }

    /// Drop every registration. Called when the session closes.
    pub fn clear(&self) {
        self.handlers.lock().clear();
        self.status_handlers.lock().clear();
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .lock()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
