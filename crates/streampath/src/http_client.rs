//! Minimal HTTP client abstraction producing streaming response bodies.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::error::TransportError;
use crate::stream::ByteStream;

/// HTTP client that hands back the response as soon as the headers arrive.
///
/// Dropping the returned body must abort the transfer; that is how a lookup
/// releases the connection after it has found its value.
#[trait_variant::make(Send)]
pub trait HttpClient {
    /// Error type returned by the HTTP client
    type Error: std::error::Error + Display + Send + Sync + 'static;

    /// Send an HTTP request and return a response with a streaming body.
    fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = Result<http::Response<ByteStream>, Self::Error>>;

    /// Sort a client error into a [`TransportError`].
    ///
    /// Errors are kept opaque as [`TransportError::Other`] unless the client
    /// knows better.
    fn classify(error: Self::Error) -> TransportError {
        TransportError::Other(Box::new(error))
    }
}

#[cfg(feature = "reqwest-client")]
impl HttpClient for reqwest::Client {
    type Error = reqwest::Error;

    async fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<ByteStream>, Self::Error> {
        use crate::stream::StreamError;
        use futures::StreamExt;

        let (parts, body) = request.into_parts();

        let mut req = self.request(parts.method, parts.uri.to_string()).body(body);

        for (name, value) in parts.headers.iter() {
            req = req.header(name.as_str(), value.as_bytes());
        }

        let resp = req.send().await?;

        let mut response = http::Response::new(ByteStream::empty());
        *response.status_mut() = resp.status();
        *response.version_mut() = resp.version();
        *response.headers_mut() = resp.headers().clone();

        let stream = resp
            .bytes_stream()
            .map(|result| result.map_err(StreamError::transport));
        *response.body_mut() = ByteStream::new(stream);

        Ok(response)
    }

    fn classify(error: Self::Error) -> TransportError {
        error.into()
    }
}

impl<T: HttpClient + Sync> HttpClient for Arc<T> {
    type Error = T::Error;

    fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = Result<http::Response<ByteStream>, Self::Error>> + Send {
        self.as_ref().send_http_streaming(request)
    }

    fn classify(error: Self::Error) -> TransportError {
        T::classify(error)
    }
}
