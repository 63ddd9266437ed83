//! Async pipeline stage driving a [`PathMatcher`] from a [`ByteStream`].

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::StreamExt;
use n0_future::Stream;

use super::{PathMatch, PathMatcher};
use crate::error::ParseError;
use crate::stream::{ByteStream, StreamError};

/// Failure reported by a [`MatchStream`]. Either way, it is the last item.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The body is not valid JSON
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The body stream failed or was cancelled
    #[error(transparent)]
    Stream(#[from] StreamError),
}

struct Stage {
    body: ByteStream,
    matcher: PathMatcher,
    failure: Option<MatchError>,
    ended: bool,
}

impl Stage {
    /// Produce the next event, pulling more input only when nothing is queued.
    async fn next_event(mut self) -> Option<(Result<PathMatch, MatchError>, Option<Self>)> {
        loop {
            if let Some(found) = self.matcher.next_match() {
                return Some((Ok(found), Some(self)));
            }
            if let Some(err) = self.failure.take() {
                return Some((Err(err), None));
            }
            if self.ended {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = self.matcher.feed(&chunk) {
                        self.failure = Some(err.into());
                    }
                }
                Some(Err(err)) => self.failure = Some(err.into()),
                None => {
                    self.ended = true;
                    if let Err(err) = self.matcher.finish() {
                        self.failure = Some(err.into());
                    }
                }
            }
        }
    }
}

/// Stream of matches found in a response body.
///
/// Yields every match in document order. A syntax error or a body failure is
/// yielded after the matches that precede it and ends the stream. Dropping
/// the `MatchStream` drops the body.
pub struct MatchStream {
    inner: Pin<Box<dyn Stream<Item = Result<PathMatch, MatchError>> + Send>>,
}

impl MatchStream {
    /// Feed `body` into `matcher` as it arrives.
    pub fn new(body: ByteStream, matcher: PathMatcher) -> Self {
        let stage = Stage {
            body,
            matcher,
            failure: None,
            ended: false,
        };
        let events = futures::stream::unfold(Some(stage), |stage| async move {
            stage?.next_event().await
        });
        Self {
            inner: Box::pin(events),
        }
    }
}

impl Stream for MatchStream {
    type Item = Result<PathMatch, MatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for MatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use crate::stream::StreamErrorKind;
    use bytes::Bytes;
    use futures::stream;
    use serde_json::json;

    fn body(parts: Vec<Result<&'static str, StreamError>>) -> ByteStream {
        let items: Vec<Result<Bytes, StreamError>> = parts
            .into_iter()
            .map(|part| part.map(|text| Bytes::from_static(text.as_bytes())))
            .collect();
        ByteStream::new(stream::iter(items))
    }

    #[tokio::test]
    async fn yields_matches_across_chunks_then_ends() {
        let body = body(vec![Ok(r#"{"a": [{"id": 1}, {"#), Ok(r#""id": 2}]}"#)]);
        let events: Vec<_> = MatchStream::new(body, PathMatcher::new("a.*.id"))
            .collect()
            .await;

        let values: Vec<_> = events.into_iter().map(|e| e.unwrap().value).collect();
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn parse_error_follows_earlier_matches_and_ends_the_stream() {
        let body = body(vec![Ok(r#"{"a": 1, "b": }"#), Ok(r#"{"a": 2}"#)]);
        let mut events = MatchStream::new(body, PathMatcher::new("a"));

        assert_eq!(events.next().await.unwrap().unwrap().value, json!(1));
        match events.next().await {
            Some(Err(MatchError::Parse(err))) => {
                assert_eq!(err.kind(), &ParseErrorKind::UnexpectedByte(b'}'))
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_body_is_a_parse_error() {
        let body = body(vec![Ok(r#"{"a": {"#)]);
        let events: Vec<_> = MatchStream::new(body, PathMatcher::new("b")).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Err(MatchError::Parse(err)) if err.kind() == &ParseErrorKind::UnexpectedEnd
        ));
    }

    #[tokio::test]
    async fn body_errors_are_forwarded() {
        let body = body(vec![Ok(r#"{"a": 1,"#), Err(StreamError::closed())]);
        let events: Vec<_> = MatchStream::new(body, PathMatcher::new("a")).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(
            &events[1],
            Err(MatchError::Stream(err)) if err.kind() == &StreamErrorKind::Closed
        ));
    }

    #[tokio::test]
    async fn empty_body_ends_without_events() {
        let events: Vec<_> = MatchStream::new(ByteStream::empty(), PathMatcher::new("a"))
            .collect()
            .await;
        assert!(events.is_empty());
    }
}
