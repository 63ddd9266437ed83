//! Byte stream abstractions for HTTP response bodies, and the cancellation
//! bridge that sits between the transport and the path matcher.

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use n0_future::Stream;
use tokio_util::sync::CancellationToken;

/// Boxed error type for streaming operations
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Error type for streaming operations
#[derive(Debug)]
pub struct StreamError {
    kind: StreamErrorKind,
    source: Option<BoxError>,
}

/// Categories of streaming errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Network or I/O error
    Transport,
    /// Stream or connection closed
    Closed,
    /// Delivery stopped because the stream's cancellation token fired
    Cancelled,
}

impl StreamError {
    /// Create a new streaming error
    pub fn new(kind: StreamErrorKind, source: Option<BoxError>) -> Self {
        Self { kind, source }
    }

    /// Get the error kind
    pub fn kind(&self) -> &StreamErrorKind {
        &self.kind
    }

    /// Get the underlying error source
    pub fn source(&self) -> Option<&BoxError> {
        self.source.as_ref()
    }

    /// Whether this error was produced by cancellation rather than by the transport
    pub fn is_cancelled(&self) -> bool {
        self.kind == StreamErrorKind::Cancelled
    }

    /// Create a "connection closed" error
    pub fn closed() -> Self {
        Self::new(StreamErrorKind::Closed, None)
    }

    /// Create a "cancelled" error
    pub fn cancelled() -> Self {
        Self::new(StreamErrorKind::Cancelled, None)
    }

    /// Create a transport error with source
    pub fn transport(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(StreamErrorKind::Transport, Some(Box::new(source)))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamErrorKind::Transport => write!(f, "Transport error"),
            StreamErrorKind::Closed => write!(f, "Stream closed"),
            StreamErrorKind::Cancelled => write!(f, "Stream cancelled"),
        }?;

        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }

        Ok(())
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Response body delivered chunk by chunk.
///
/// Dropping a `ByteStream` drops the transport stream behind it, which is how
/// an in-flight download is aborted.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>,
}

impl ByteStream {
    /// Create a new byte stream from any compatible stream
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream that ends immediately
    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// Stop delivering chunks once `token` is cancelled.
    ///
    /// The token is checked before every pull from the underlying stream. When
    /// it fires, the returned stream yields a single
    /// [`StreamErrorKind::Cancelled`] error, drops the underlying stream and
    /// ends. A chunk that was already handed out is never interrupted.
    pub fn cancellable(self, token: CancellationToken) -> ByteStream {
        let bridged = futures::stream::unfold(Some((self, token)), |state| async move {
            let (mut body, token) = state?;
            tokio::select! {
                biased;
                () = token.cancelled() => Some((Err(StreamError::cancelled()), None)),
                chunk = body.next() => chunk.map(|chunk| (chunk, Some((body, token)))),
            }
        });
        ByteStream::new(bridged)
    }

    /// Read the remaining body into a single buffer.
    pub async fn collect(mut self) -> Result<Bytes, StreamError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read the remaining body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String, StreamError> {
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}
