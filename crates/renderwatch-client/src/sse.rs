use std::pin::Pin;

use futures::Stream;
use renderwatch_core::errors::StreamError;

/// One wire-level message from the text-event-stream transport: the event
/// name, the raw data payload, and the server-assigned message id when
/// present (the id feeds resumption).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Parse complete text-event-stream frames out of `raw`. Field rules per the
/// stream format: `event:`, `data:` (multiple lines joined with `\n`),
/// `id:`; a blank line terminates a frame; lines starting with `:` are
/// comments. Frames with no event name default to `message`.
pub fn parse_frames(raw: &str) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    let mut event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut id: Option<String> = None;

    let mut flush = |event: &mut String, data_lines: &mut Vec<&str>, id: &mut Option<String>| {
        if event.is_empty() && data_lines.is_empty() && id.is_none() {
            return;
        }
        frames.push(SseFrame {
            event: if event.is_empty() {
                "message".to_string()
            } else {
                std::mem::take(event)
            },
            data: data_lines.join("\n"),
            id: id.take(),
        });
        event.clear();
        data_lines.clear();
    };

    for line in raw.lines() {
        if line.is_empty() {
            flush(&mut event, &mut data_lines, &mut id);
        } else if line.starts_with(':') {
            // comment / keep-alive
        } else if let Some(value) = field_value(line, "event") {
            event = value.to_string();
        } else if let Some(value) = field_value(line, "data") {
            data_lines.push(value);
        } else if let Some(value) = field_value(line, "id") {
            id = Some(value.to_string());
        }
        // other fields (e.g. retry) are ignored
    }
    flush(&mut event, &mut data_lines, &mut id);

    frames
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Wraps a transport byte stream and yields parsed frames, buffering
/// partial frames across chunk boundaries. Purely a framing adapter;
/// liveness (idle) enforcement belongs to the connection, which bounds
/// every frame wait.
pub struct SseStream<S> {
    inner: Pin<Box<S>>,
    buffer: String,
    pending: Vec<SseFrame>,
}

impl<S, E> SseStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    pub fn new(byte_stream: S) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: String::new(),
            pending: Vec::new(),
        }
    }

    // A frame ends at a blank line; servers may use LF or CRLF line
    // endings, so both delimiters mark a boundary.
    fn drain_complete_frames(&mut self) {
        loop {
            let boundary = match (self.buffer.find("\n\n"), self.buffer.find("\r\n\r\n")) {
                (Some(lf), Some(crlf)) => {
                    if lf < crlf {
                        Some((lf, 2))
                    } else {
                        Some((crlf, 4))
                    }
                }
                (Some(lf), None) => Some((lf, 2)),
                (None, Some(crlf)) => Some((crlf, 4)),
                (None, None) => None,
            };
            let Some((pos, len)) = boundary else { break };
            let chunk = self.buffer[..pos + len].to_string();
            self.buffer = self.buffer[pos + len..].to_string();
            self.pending.extend(parse_frames(&chunk));
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    type Item = Result<SseFrame, StreamError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if !self.pending.is_empty() {
            return std::task::Poll::Ready(Some(Ok(self.pending.remove(0))));
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.buffer.push_str(&text);
                    self.drain_complete_frames();

                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(Ok(self.pending.remove(0))));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    return std::task::Poll::Ready(Some(Err(StreamError::Transport(
                        e.to_string(),
                    ))));
                }
                std::task::Poll::Ready(None) => {
                    // Stream ended — flush whatever remains in the buffer
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.pending.extend(parse_frames(&remaining));
                        if !self.pending.is_empty() {
                            return std::task::Poll::Ready(Some(Ok(self.pending.remove(0))));
                        }
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => return std::task::Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    #[test]
    fn parse_single_frame() {
        let frames =
            parse_frames("event: step-progress\nid: 7\ndata: {\"step\":\"render\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "step-progress");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].data, "{\"step\":\"render\"}");
    }

    #[test]
    fn parse_multiple_frames() {
        let raw = "event: job-status\ndata: {}\n\nevent: job-completed\nid: 9\ndata: {}\n\n";
        let frames = parse_frames(raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "job-status");
        assert_eq!(frames[1].event, "job-completed");
        assert_eq!(frames[1].id.as_deref(), Some("9"));
    }

    #[test]
    fn multi_line_data_joined() {
        let frames = parse_frames("data: line one\ndata: line two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line one\nline two");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        let frames = parse_frames(": keep-alive\nretry: 3000\nevent: warning\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "warning");
    }

    #[test]
    fn trailing_frame_without_blank_line() {
        let frames = parse_frames("event: progress-message\ndata: {\"message\":\"hi\"}");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "progress-message");
    }

    #[test]
    fn field_without_space_accepted() {
        let frames = parse_frames("event:error\ndata:{}\nid:abc\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "error");
        assert_eq!(frames[0].id.as_deref(), Some("abc"));
    }

    #[test]
    fn empty_input_yields_no_frames() {
        assert!(parse_frames("").is_empty());
        assert!(parse_frames(": ping\n\n").is_empty());
    }

    #[derive(Debug)]
    struct FakeIoError;
    impl std::fmt::Display for FakeIoError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("connection reset")
        }
    }

    #[tokio::test]
    async fn stream_yields_frames_across_chunk_boundaries() {
        let chunks: Vec<Result<bytes::Bytes, FakeIoError>> = vec![
            Ok(bytes::Bytes::from("event: job-st")),
            Ok(bytes::Bytes::from("atus\ndata: {\"status\":\"running\"}\n")),
            Ok(bytes::Bytes::from("\nevent: warning\ndata: {\"message\":\"m\"}\n\n")),
        ];
        let mut stream = Box::pin(SseStream::new(futures::stream::iter(chunks)));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event, "job-status");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.event, "warning");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn crlf_frames_drain_before_stream_close() {
        let chunks: Vec<Result<bytes::Bytes, FakeIoError>> = vec![Ok(bytes::Bytes::from(
            "event: job-status\r\ndata: {}\r\n\r\nevent: warning\r\ndata: {}\r\n\r\n",
        ))];
        // The stream never ends, so frames must come from the draining
        // pass, not the end-of-stream flush.
        let byte_stream = futures::stream::iter(chunks).chain(futures::stream::pending());
        let mut stream = Box::pin(SseStream::new(byte_stream));

        let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("first frame not drained")
            .unwrap()
            .unwrap();
        assert_eq!(first.event, "job-status");
        let second = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("second frame not drained")
            .unwrap()
            .unwrap();
        assert_eq!(second.event, "warning");
    }

    #[tokio::test]
    async fn stream_surfaces_transport_error() {
        let chunks: Vec<Result<bytes::Bytes, FakeIoError>> =
            vec![Ok(bytes::Bytes::from("event: job-status\ndata: {}\n\n")), Err(FakeIoError)];
        let mut stream = Box::pin(SseStream::new(futures::stream::iter(chunks)));

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Transport(msg) if msg.contains("connection reset")));
    }
}
