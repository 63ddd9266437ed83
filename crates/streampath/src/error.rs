//! Error types for path lookups

use crate::stream::StreamError;

/// Error returned by a path lookup
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum FetchError {
    /// The server answered with a status code of 400 or above
    #[error("{0}")]
    Http(
        #[from]
        #[diagnostic_source]
        HttpError,
    ),

    /// The response body is not valid JSON
    #[error("{0}")]
    Parse(
        #[from]
        #[diagnostic_source]
        ParseError,
    ),

    /// The request was cancelled before any value was found at the path.
    ///
    /// Unlike `Ok(None)`, this says nothing about whether the value exists:
    /// the body was not read to the end.
    #[error("Request aborted before finding JSON path \"{path}\".")]
    #[diagnostic(
        code(streampath::aborted_unmatched),
        help("the request was cancelled by its caller, not by a match")
    )]
    AbortedUnmatched {
        /// The path that was being looked for
        path: String,
    },

    /// HTTP transport error
    #[error("HTTP transport error: {0}")]
    Transport(
        #[from]
        #[diagnostic_source]
        TransportError,
    ),

    /// The URL could not be parsed
    #[error("Invalid URL: {0}")]
    #[diagnostic(code(streampath::invalid_url))]
    InvalidUrl(#[from] url::ParseError),
}

/// Transport-level errors that occur during HTTP communication
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TransportError {
    /// Failed to establish connection to server
    #[error("Connection error: {0}")]
    Connect(String),

    /// Request timed out
    #[error("Request timeout")]
    Timeout,

    /// Request construction failed (malformed URI, headers, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body failed while it was being read
    #[error("Response body error: {0}")]
    Stream(#[source] StreamError),

    /// Other transport error
    #[error("Transport error: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "reqwest-client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() || e.is_request() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Other(Box::new(e))
        }
    }
}

impl From<http::Error> for TransportError {
    fn from(e: http::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

/// HTTP error response, with the body read in full
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("HTTP error: {} {body}", .status.as_u16())]
pub struct HttpError {
    /// HTTP status code
    pub status: http::StatusCode,
    /// Response body, decoded lossily as UTF-8
    pub body: String,
}

/// Malformed JSON, reported at the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
#[error("Invalid JSON at byte {offset}: {kind}")]
#[diagnostic(code(streampath::parse))]
pub struct ParseError {
    offset: u64,
    kind: ParseErrorKind,
}

impl ParseError {
    /// Create a parse error at `offset` bytes into the body
    pub fn new(offset: u64, kind: ParseErrorKind) -> Self {
        Self { offset, kind }
    }

    /// Byte offset into the response body
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// What went wrong
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }
}

/// Categories of JSON syntax errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    /// A byte that the grammar does not allow here
    #[error("unexpected character {}", describe_byte(.0))]
    UnexpectedByte(u8),
    /// Input ended inside a value
    #[error("unexpected end of input")]
    UnexpectedEnd,
    /// Unknown backslash escape
    #[error("invalid escape sequence \\{0}")]
    InvalidEscape(char),
    /// Malformed `\uXXXX` escape
    #[error("invalid unicode escape")]
    InvalidUnicodeEscape,
    /// A UTF-16 surrogate without its partner
    #[error("unpaired surrogate in unicode escape")]
    LoneSurrogate,
    /// Unescaped control character inside a string
    #[error("control character in string")]
    ControlCharacter,
    /// Number that does not follow the JSON number grammar
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    /// String bytes that are not UTF-8
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// Nesting deeper than the configured limit
    #[error("nesting deeper than {0} levels")]
    DepthLimitExceeded(usize),
}

fn describe_byte(byte: &u8) -> String {
    format!("{:?}", char::from(*byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_message_embeds_status_and_body() {
        let err = FetchError::from(HttpError {
            status: http::StatusCode::NOT_FOUND,
            body: r#"{"error":"Not Found"}"#.to_string(),
        });
        assert_eq!(err.to_string(), r#"HTTP error: 404 {"error":"Not Found"}"#);
    }

    #[test]
    fn aborted_unmatched_names_the_path() {
        let err = FetchError::AbortedUnmatched {
            path: "data3".into(),
        };
        assert_eq!(
            err.to_string(),
            "Request aborted before finding JSON path \"data3\"."
        );
    }

    #[test]
    fn parse_error_reports_offset_and_kind() {
        let err = ParseError::new(7, ParseErrorKind::UnexpectedByte(b'}'));
        assert_eq!(err.to_string(), "Invalid JSON at byte 7: unexpected character '}'");
        assert_eq!(
            FetchError::from(err).to_string(),
            "Invalid JSON at byte 7: unexpected character '}'"
        );
    }

    #[test]
    fn body_failures_are_transport_errors() {
        let err = FetchError::from(TransportError::Stream(StreamError::closed()));
        assert_eq!(
            err.to_string(),
            "HTTP transport error: Response body error: Stream closed"
        );
    }
}
