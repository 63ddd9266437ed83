//! Incremental path matching over chunked JSON input.
//!
//! [`PathMatcher`] is the synchronous core: push bytes in, take matches out.
//! [`MatchStream`] wraps it as an async pipeline stage over a
//! [`ByteStream`](crate::stream::ByteStream).

use std::collections::VecDeque;

use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::path::{JsonPath, Step};

mod scanner;
mod stream;

use scanner::{Container, Scanner, Token, TokenSink};
pub use stream::{MatchError, MatchStream};

/// Nesting limit used unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// A value found at the watched path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch {
    /// Concrete location of the value in the document
    pub location: Vec<Step>,
    /// The value itself
    pub value: Value,
}

/// An open container, and the partial value built for it if it is being kept.
#[derive(Debug)]
struct Frame {
    container: Container,
    /// Where this container sits in its parent; `None` for a top-level value
    step: Option<Step>,
    /// Key read for the member that comes next
    pending_key: Option<String>,
    next_index: usize,
    /// `Some` while the container is inside (or is) a matched value
    value: Option<Value>,
    matched: bool,
}

impl Frame {
    /// Location slot of the next child value.
    fn next_step(&mut self) -> Option<Step> {
        match self.container {
            Container::Object => self.pending_key.take().map(Step::Key),
            Container::Array => {
                let index = self.next_index;
                self.next_index += 1;
                Some(Step::Index(index))
            }
        }
    }

    /// Location slot the next child value would take, without claiming it.
    fn peek_step(&self) -> Option<Step> {
        match self.container {
            Container::Object => self.pending_key.clone().map(Step::Key),
            Container::Array => Some(Step::Index(self.next_index)),
        }
    }

    fn insert(&mut self, step: Option<Step>, child: Value) {
        match (&mut self.value, step) {
            (Some(Value::Object(map)), Some(Step::Key(key))) => {
                map.insert(key, child);
            }
            (Some(Value::Array(items)), _) => items.push(child),
            _ => {}
        }
    }
}

/// Tracks where the scanner is in the document and builds the values that
/// are kept.
#[derive(Debug)]
struct Tracker {
    path: JsonPath,
    frames: Vec<Frame>,
    location: Vec<Step>,
    matches: VecDeque<PathMatch>,
}

impl Tracker {
    fn next_step(&mut self) -> Option<Step> {
        self.frames.last_mut().and_then(Frame::next_step)
    }

    fn parent_keeps_values(&self) -> bool {
        self.frames.last().is_some_and(|frame| frame.value.is_some())
    }

    fn open(&mut self, container: Container, empty: Value) {
        let step = self.next_step();
        if let Some(step) = &step {
            self.location.push(step.clone());
        }
        let matched = self.path.matches(&self.location);
        let keep = matched || self.parent_keeps_values();
        self.frames.push(Frame {
            container,
            step,
            pending_key: None,
            next_index: 0,
            value: keep.then_some(empty),
            matched,
        });
    }

    fn close(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if let Some(value) = frame.value {
            self.complete(frame.step.clone(), value, frame.matched);
        }
        if frame.step.is_some() {
            self.location.pop();
        }
    }

    fn scalar(&mut self, value: Value) {
        let step = self.next_step();
        let nested = step.is_some();
        if let Some(step) = &step {
            self.location.push(step.clone());
        }
        let matched = self.path.matches(&self.location);
        if matched || self.parent_keeps_values() {
            self.complete(step, value, matched);
        }
        if nested {
            self.location.pop();
        }
    }

    /// Deliver a finished value: queue it if it matched, and hand it to the
    /// enclosing container if that one is being kept. `location` must point
    /// at the value itself.
    fn complete(&mut self, step: Option<Step>, value: Value, matched: bool) {
        match self.frames.last_mut().filter(|parent| parent.value.is_some()) {
            Some(parent) => {
                if matched {
                    self.matches.push_back(PathMatch {
                        location: self.location.clone(),
                        value: value.clone(),
                    });
                }
                parent.insert(step, value);
            }
            None if matched => self.matches.push_back(PathMatch {
                location: self.location.clone(),
                value,
            }),
            None => {}
        }
    }
}

impl TokenSink for Tracker {
    fn token(&mut self, token: Token) {
        match token {
            Token::Key(key) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.pending_key = Some(key);
                }
            }
            Token::BeginObject => self.open(Container::Object, Value::Object(Map::new())),
            Token::BeginArray => self.open(Container::Array, Value::Array(Vec::new())),
            Token::EndObject | Token::EndArray => self.close(),
            Token::Scalar(value) => self.scalar(value),
            // only sent for values keeps_next_value turned down
            Token::Discarded => {
                self.next_step();
            }
        }
    }

    fn keeps_next_value(&mut self) -> bool {
        if self.parent_keeps_values() {
            return true;
        }
        match self.frames.last().and_then(Frame::peek_step) {
            Some(step) => {
                self.location.push(step);
                let matched = self.path.matches(&self.location);
                self.location.pop();
                matched
            }
            None => self.path.matches(&self.location),
        }
    }
}

/// Push-based matcher emitting every value found at a [`JsonPath`].
///
/// Feed the response body with [`feed`](Self::feed) as chunks arrive and call
/// [`finish`](Self::finish) at the end of input. Matches are queued in the
/// order their values complete, so a match nested inside another match is
/// reported first. Only matched subtrees are materialised; other strings and
/// numbers are validated without being buffered, so memory follows the
/// matched values and the nesting depth, not the document size.
///
/// ```
/// use serde_json::json;
/// use streampath::matcher::PathMatcher;
///
/// let mut matcher = PathMatcher::new("rows.*.id");
/// matcher.feed(br#"{"rows": [{"id": 1}, {"i"#).unwrap();
/// matcher.feed(br#"d": 2}]}"#).unwrap();
/// matcher.finish().unwrap();
///
/// let ids: Vec<_> = matcher.drain().map(|m| m.value).collect();
/// assert_eq!(ids, vec![json!(1), json!(2)]);
/// ```
#[derive(Debug)]
pub struct PathMatcher {
    scanner: Scanner,
    tracker: Tracker,
    failure: Option<ParseError>,
}

impl PathMatcher {
    /// Watch `path`, with the default nesting limit.
    pub fn new(path: impl Into<JsonPath>) -> Self {
        Self::with_max_depth(path, DEFAULT_MAX_DEPTH)
    }

    /// Watch `path`, rejecting documents nested deeper than `max_depth`.
    pub fn with_max_depth(path: impl Into<JsonPath>, max_depth: usize) -> Self {
        Self {
            scanner: Scanner::new(max_depth),
            tracker: Tracker {
                path: path.into(),
                frames: Vec::new(),
                location: Vec::new(),
                matches: VecDeque::new(),
            },
            failure: None,
        }
    }

    /// The watched path.
    pub fn path(&self) -> &JsonPath {
        &self.tracker.path
    }

    /// Bytes consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.scanner.offset()
    }

    /// Push the next chunk of input.
    ///
    /// Matches completed before a syntax error are still queued. Once an error
    /// has been returned, every later call returns it again.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.scanner
            .feed(chunk, &mut self.tracker)
            .map_err(|err| self.fail(err))
    }

    /// Signal end of input.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.scanner
            .finish(&mut self.tracker)
            .map_err(|err| self.fail(err))
    }

    /// Take the oldest queued match.
    pub fn next_match(&mut self) -> Option<PathMatch> {
        self.tracker.matches.pop_front()
    }

    /// Take every queued match, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = PathMatch> + '_ {
        self.tracker.matches.drain(..)
    }

    fn fail(&mut self, err: ParseError) -> ParseError {
        self.failure = Some(err.clone());
        err
    }
}
