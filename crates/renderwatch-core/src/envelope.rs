use serde::{Deserialize, Serialize};

/// Job status document returned by the status endpoint, and the payload of
/// `job-status` stream events. Both paths share one shape so downstream
/// handlers are transport-agnostic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusPayload {
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,
}

/// Backend job lifecycle states as reported by the status endpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepProgressPayload {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub progress_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepStatusPayload {
    pub step: String,
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessagePayload {
    pub message: String,
}

/// Payload for `warning` and `error` events. Both are informational on the
/// stream; neither terminates the session by itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoticePayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobFailedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Domain events carried on the progress stream, one case per recognized
/// wire event type. Synthesized identically by the fallback poller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ProgressEvent {
    #[serde(rename = "job-status")]
    JobStatus(JobStatusPayload),
    #[serde(rename = "step-progress")]
    StepProgress(StepProgressPayload),
    #[serde(rename = "step-status")]
    StepStatus(StepStatusPayload),
    #[serde(rename = "progress-message")]
    ProgressMessage(ProgressMessagePayload),
    #[serde(rename = "warning")]
    Warning(NoticePayload),
    #[serde(rename = "error")]
    Error(NoticePayload),
    #[serde(rename = "job-completed")]
    JobCompleted(JobCompletedPayload),
    #[serde(rename = "job-failed")]
    JobFailed(JobFailedPayload),
    #[serde(rename = "job-cancelled")]
    JobCancelled,
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobStatus(_) => "job-status",
            Self::StepProgress(_) => "step-progress",
            Self::StepStatus(_) => "step-status",
            Self::ProgressMessage(_) => "progress-message",
            Self::Warning(_) => "warning",
            Self::Error(_) => "error",
            Self::JobCompleted(_) => "job-completed",
            Self::JobFailed(_) => "job-failed",
            Self::JobCancelled => "job-cancelled",
        }
    }

    /// Terminal events end the session once dispatched.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobCompleted(_) | Self::JobFailed(_) | Self::JobCancelled
        )
    }
}

/// A decoded unit of data received from the stream or synthesized from a
/// poll. `id` is the transport-supplied message identifier; it feeds
/// resumption, so the decoder must carry it forward whenever present.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event: ProgressEvent,
    pub id: Option<String>,
}

impl EventEnvelope {
    pub fn new(event: ProgressEvent) -> Self {
        Self { event, id: None }
    }

    pub fn with_id(event: ProgressEvent, id: impl Into<String>) -> Self {
        Self {
            event,
            id: Some(id.into()),
        }
    }

    /// Decode one raw stream message into an envelope. A malformed payload
    /// produces a `DecodeError` the caller logs and discards; the stream
    /// never terminates because of one bad message.
    pub fn decode(
        event_type: &str,
        id: Option<&str>,
        data: &str,
    ) -> Result<Self, DecodeError> {
        let event = decode_event(event_type, data)?;
        Ok(Self {
            event,
            id: id.map(str::to_owned),
        })
    }
}

fn decode_event(event_type: &str, data: &str) -> Result<ProgressEvent, DecodeError> {
    fn payload<T: serde::de::DeserializeOwned>(
        event_type: &str,
        data: &str,
    ) -> Result<T, DecodeError> {
        serde_json::from_str(data).map_err(|e| DecodeError::MalformedPayload {
            event_type: event_type.to_string(),
            detail: e.to_string(),
        })
    }

    match event_type {
        "job-status" => Ok(ProgressEvent::JobStatus(payload(event_type, data)?)),
        "step-progress" => Ok(ProgressEvent::StepProgress(payload(event_type, data)?)),
        "step-status" => Ok(ProgressEvent::StepStatus(payload(event_type, data)?)),
        "progress-message" => Ok(ProgressEvent::ProgressMessage(payload(event_type, data)?)),
        "warning" => Ok(ProgressEvent::Warning(payload(event_type, data)?)),
        "error" => Ok(ProgressEvent::Error(payload(event_type, data)?)),
        "job-completed" => Ok(ProgressEvent::JobCompleted(if data.trim().is_empty() {
            JobCompletedPayload::default()
        } else {
            payload(event_type, data)?
        })),
        "job-failed" => Ok(ProgressEvent::JobFailed(if data.trim().is_empty() {
            JobFailedPayload::default()
        } else {
            payload(event_type, data)?
        })),
        "job-cancelled" => Ok(ProgressEvent::JobCancelled),
        other => Err(DecodeError::UnknownEventType(other.to_string())),
    }
}

/// A single malformed or unrecognized stream message. Dropped with a logged
/// warning by the connection; never propagated to handlers.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unrecognized event type: {0}")]
    UnknownEventType(String),
    #[error("malformed {event_type} payload: {detail}")]
    MalformedPayload { event_type: String, detail: String },
}
