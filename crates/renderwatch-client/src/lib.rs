//! Resilient progress delivery for long-running render jobs.
//!
//! A [`JobSession`] opens a server-sent-events stream for one job,
//! reconnects with exponential backoff when the stream drops, resumes from
//! the last processed event id, and falls back to status polling when
//! streaming cannot be established at all. Decoded events fan out through a
//! [`Dispatcher`] to per-event-type handlers.

pub mod backoff;
pub mod connection;
pub mod dispatcher;
pub mod mock;
pub mod poller;
pub mod registry;
pub mod session;
pub mod sse;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use connection::{Connection, ConnectionOutcome};
pub use dispatcher::{Dispatcher, HandlerToken};
pub use poller::{PollOutcome, StatusPoller};
pub use registry::{SessionRegistry, ShuttingDown};
pub use session::JobSession;
pub use sse::{SseFrame, SseStream};
pub use transport::{EventStream, HttpTransport, ProgressTransport};
