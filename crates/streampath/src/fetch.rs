//! Fetch a JSON document and stop downloading at the first value found at a path.

use std::time::Duration;

use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{FetchError, HttpError, ParseError, TransportError};
use crate::http_client::HttpClient;
use crate::matcher::{DEFAULT_MAX_DEPTH, MatchError, MatchStream, PathMatch, PathMatcher};
use crate::path::JsonPath;

/// Per-request settings.
///
/// ```
/// use std::time::Duration;
/// use streampath::fetch::RequestOptions;
///
/// let options = RequestOptions::builder()
///     .method(http::Method::POST)
///     .body(br#"{"query": "all"}"#.to_vec())
///     .timeout(Duration::from_secs(30))
///     .build()
///     .header(http::header::ACCEPT, http::HeaderValue::from_static("application/json"));
/// assert_eq!(options.headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct RequestOptions {
    /// HTTP method
    #[builder(default)]
    pub method: Method,
    /// Extra request headers
    #[builder(default)]
    pub headers: HeaderMap,
    /// Request body
    #[builder(default, into)]
    pub body: Vec<u8>,
    /// Upper bound for the whole lookup, from sending the request until the
    /// value is found or the body ends. Unbounded when unset.
    pub timeout: Option<Duration>,
    /// Cancels the lookup from outside. Firing it before a value is found
    /// yields [`FetchError::AbortedUnmatched`].
    pub cancellation: Option<CancellationToken>,
    /// Maximum nesting depth accepted in the body
    pub max_depth: Option<usize>,
}

impl RequestOptions {
    /// Add a request header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

#[derive(Debug)]
enum Outcome {
    Streaming,
    Resolved(Value),
    Failed(ParseError),
}

/// State of one lookup.
///
/// The outcome is written once: by the first match or by the first parse
/// error. Dropping the session cancels its token, so a token never outlives
/// the lookup it was made for.
#[derive(Debug)]
struct FetchSession<'p> {
    path: &'p JsonPath,
    token: CancellationToken,
    outcome: Outcome,
}

impl<'p> FetchSession<'p> {
    fn new(path: &'p JsonPath, parent: Option<&CancellationToken>) -> Self {
        let token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        Self {
            path,
            token,
            outcome: Outcome::Streaming,
        }
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record the first match and cancel the transfer. Later matches are
    /// ignored; returns whether this one was taken.
    fn on_match(&mut self, found: PathMatch) -> bool {
        if !matches!(self.outcome, Outcome::Streaming) {
            return false;
        }
        self.outcome = Outcome::Resolved(found.value);
        self.token.cancel();
        true
    }

    fn on_parse_error(&mut self, err: ParseError) {
        if matches!(self.outcome, Outcome::Streaming) {
            self.outcome = Outcome::Failed(err);
        }
    }

    /// The pipeline ran to its end.
    fn settle(mut self) -> Result<Option<Value>, FetchError> {
        match std::mem::replace(&mut self.outcome, Outcome::Streaming) {
            Outcome::Streaming => Ok(None),
            Outcome::Resolved(value) => Ok(Some(value)),
            Outcome::Failed(err) => Err(err.into()),
        }
    }

    /// The pipeline stopped because the token fired.
    fn settle_cancelled(mut self) -> Result<Option<Value>, FetchError> {
        match std::mem::replace(&mut self.outcome, Outcome::Streaming) {
            Outcome::Resolved(value) => Ok(Some(value)),
            Outcome::Failed(err) => Err(err.into()),
            Outcome::Streaming => {
                #[cfg(feature = "tracing")]
                tracing::debug!(path = %self.path, "request cancelled before a match");
                Err(FetchError::AbortedUnmatched {
                    path: self.path.to_string(),
                })
            }
        }
    }
}

impl Drop for FetchSession<'_> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Looks up values in remote JSON documents through an [`HttpClient`].
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use streampath::fetch::{PathFetcher, RequestOptions};
///
/// let fetcher = PathFetcher::new(reqwest::Client::new());
/// let url = url::Url::parse("https://example.com/feed.json")?;
/// let first_title = fetcher
///     .find(&url, "items.0.title", RequestOptions::default())
///     .await?;
/// println!("{first_title:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct PathFetcher<C> {
    client: C,
}

impl<C: HttpClient> PathFetcher<C> {
    /// Use `client` for every lookup.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// The underlying HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch `url` and return the first value found at `path`.
    ///
    /// The download stops as soon as that value is complete. `Ok(None)` means
    /// the whole body was read and nothing sits at `path`.
    pub async fn find(
        &self,
        url: &Url,
        path: impl Into<JsonPath>,
        options: RequestOptions,
    ) -> Result<Option<Value>, FetchError> {
        let path = path.into();
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, self.lookup(url, &path, options))
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => self.lookup(url, &path, options).await,
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(url = %url, path = %path)))]
    async fn lookup(
        &self,
        url: &Url,
        path: &JsonPath,
        options: RequestOptions,
    ) -> Result<Option<Value>, FetchError> {
        let RequestOptions {
            method,
            headers,
            body,
            cancellation,
            max_depth,
            ..
        } = options;
        let session = FetchSession::new(path, cancellation.as_ref());
        let request = build_request(url, method, headers, body)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %request.method(), "sending request");

        let token = session.token();
        let response = tokio::select! {
            biased;
            () = token.cancelled() => return session.settle_cancelled(),
            response = self.client.send_http_streaming(request) => {
                response.map_err(C::classify)?
            }
        };

        let (parts, body) = response.into_parts();
        let body = body.cancellable(session.token());

        #[cfg(feature = "tracing")]
        tracing::debug!(status = %parts.status, "response headers received");

        if parts.status.is_client_error() || parts.status.is_server_error() {
            return match body.text().await {
                Ok(text) => Err(HttpError {
                    status: parts.status,
                    body: text,
                }
                .into()),
                Err(err) if err.is_cancelled() => session.settle_cancelled(),
                Err(err) => Err(TransportError::Stream(err).into()),
            };
        }

        let matcher = PathMatcher::with_max_depth(path, max_depth.unwrap_or(DEFAULT_MAX_DEPTH));
        stream_matches(MatchStream::new(body, matcher), session).await
    }
}

/// Drive the pipeline until it ends or the session's token stops it.
async fn stream_matches(
    mut events: MatchStream,
    mut session: FetchSession<'_>,
) -> Result<Option<Value>, FetchError> {
    while let Some(event) = events.next().await {
        match event {
            Ok(found) => {
                #[cfg(feature = "tracing")]
                let location = found.location.clone();
                if session.on_match(found) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(?location, "value found, cancelling transfer");
                }
            }
            Err(MatchError::Parse(err)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, "response body is not valid JSON");
                session.on_parse_error(err);
            }
            Err(MatchError::Stream(err)) if err.is_cancelled() => {
                return session.settle_cancelled();
            }
            Err(MatchError::Stream(err)) => return Err(TransportError::Stream(err).into()),
        }
    }
    session.settle()
}

fn build_request(
    url: &Url,
    method: Method,
    headers: HeaderMap,
    body: Vec<u8>,
) -> Result<http::Request<Vec<u8>>, TransportError> {
    let mut builder = http::Request::builder().method(method).uri(url.as_str());
    if let Some(request_headers) = builder.headers_mut() {
        request_headers.extend(headers);
    }
    Ok(builder.body(body)?)
}

/// Fetch `url` with a default [`reqwest::Client`] and return the first value
/// found at `path`.
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), streampath::error::FetchError> {
/// use streampath::{RequestOptions, fetch_and_find_path};
///
/// let value = fetch_and_find_path("http://localhost:3000/", "data3", RequestOptions::default()).await?;
/// println!("{value:?}");
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "reqwest-client")]
pub async fn fetch_and_find_path(
    url: &str,
    path: impl Into<JsonPath>,
    options: RequestOptions,
) -> Result<Option<Value>, FetchError> {
    let url = Url::parse(url)?;
    PathFetcher::new(reqwest::Client::new())
        .find(&url, path, options)
        .await
}
