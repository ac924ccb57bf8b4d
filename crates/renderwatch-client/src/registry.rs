use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use renderwatch_core::ids::RegistrationId;

use crate::session::JobSession;

/// Registration was refused because the registry is tearing down.
#[derive(Debug, thiserror::Error)]
#[error("registry is shutting down; session was closed")]
pub struct ShuttingDown;

/// Process-wide collection of live sessions, so application teardown can
/// close every open connection in one call. Once `shutdown` begins, new
/// registrations are refused and the offered session is closed on the spot.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<RegistrationId, Arc<JobSession>>,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session until it is unregistered or the registry shuts down.
    pub fn register(&self, session: Arc<JobSession>) -> Result<RegistrationId, ShuttingDown> {
        if self.shutting_down.load(Ordering::SeqCst) {
            session.close();
            return Err(ShuttingDown);
        }

        let id = RegistrationId::new();
        self.sessions.insert(id.clone(), Arc::clone(&session));

        // Shutdown may have started between the gate and the insert; a
        // session slipping in here would outlive teardown.
        if self.shutting_down.load(Ordering::SeqCst) {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close();
            }
            return Err(ShuttingDown);
        }
        Ok(id)
    }

    pub fn get(&self, id: &RegistrationId) -> Option<Arc<JobSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Stop tracking a session without closing it. The caller takes over
    /// its lifecycle.
    pub fn unregister(&self, id: &RegistrationId) -> Option<Arc<JobSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Close one session and stop tracking it. Returns false if the id was
    /// unknown.
    pub fn close(&self, id: &RegistrationId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                true
            }
            None => {
                warn!(registration_id = %id, "close requested for unknown registration");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Close every tracked session. Idempotent; a misbehaving close must
    /// not keep the remaining sessions open.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<RegistrationId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        info!(sessions = ids.len(), "shutting down session registry");

        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                if catch_unwind(AssertUnwindSafe(|| session.close())).is_err() {
                    error!(registration_id = %id, "session close panicked during shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use renderwatch_core::config::{Endpoints, StreamConfig};
    use renderwatch_core::ids::JobId;

    use crate::mock::{frame, MockConnect, MockTransport};

    fn open_session(job: &str) -> Arc<JobSession> {
        let transport = Arc::new(MockTransport::new(vec![MockConnect::StayOpen(vec![frame(
            "job-status",
            Some("1"),
            r#"{"status":"running"}"#,
        )])]));
        JobSession::spawn(
            JobId::from_raw(job),
            Endpoints::new("http://render.local"),
            StreamConfig {
                overall_job_timeout: Duration::from_secs(3600),
                ..Default::default()
            },
            transport,
        )
    }

    #[tokio::test]
    async fn register_get_and_close() {
        let registry = SessionRegistry::new();
        let session = open_session("job_1");

        let id = registry.register(Arc::clone(&session)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_some());

        assert!(registry.close(&id));
        assert!(session.is_closed());
        assert!(registry.is_empty());

        // Already removed
        assert!(!registry.close(&id));
    }

    #[tokio::test]
    async fn unregister_leaves_the_session_running() {
        let registry = SessionRegistry::new();
        let session = open_session("job_1");

        let id = registry.register(Arc::clone(&session)).unwrap();
        let returned = registry.unregister(&id).unwrap();

        assert!(!returned.is_closed());
        assert!(registry.is_empty());
        returned.close();
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let registry = SessionRegistry::new();
        let a = open_session("job_a");
        let b = open_session("job_b");
        registry.register(Arc::clone(&a)).unwrap();
        registry.register(Arc::clone(&b)).unwrap();

        registry.shutdown();

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.is_empty());
        assert!(registry.is_shutting_down());

        // Second shutdown is a no-op
        registry.shutdown();
    }

    #[tokio::test]
    async fn registration_refused_after_shutdown() {
        let registry = SessionRegistry::new();
        registry.shutdown();

        let session = open_session("job_late");
        let result = registry.register(Arc::clone(&session));

        assert!(result.is_err());
        assert!(session.is_closed());
        assert!(registry.is_empty());
    }
}
