use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// Connection lifecycle states. `Closed` is terminal; nothing leaves it
/// except constructing a new connection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }
}

/// Which transport currently feeds the session. Switching from `Stream` to
/// `Poll` is one-directional within a session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTransport {
    Stream,
    Poll,
}

/// Mutable reconnect bookkeeping, owned exclusively by the connection.
/// `attempt_count` resets to 0 on a successful open; `last_event_id`
/// persists across reconnect attempts within a session.
#[derive(Clone, Debug, Default)]
pub struct RetryState {
    pub attempt_count: u32,
    pub last_event_id: Option<String>,
}

/// Snapshot delivered to status observers on every connection state
/// transition, not only terminal ones.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub status: ConnectionState,
    pub reconnect_attempt: u32,
    pub last_event_id: Option<String>,
}

/// Read-only view of one session, exposed via a snapshot accessor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub job_id: JobId,
    pub active_transport: ActiveTransport,
    pub connection_state: ConnectionState,
    pub reconnect_attempt: u32,
    pub last_event_id: Option<String>,
}
