//! Push tokenizer for JSON text that arrives in arbitrary chunks.

use serde_json::Value;

use crate::error::{ParseError, ParseErrorKind};

/// Characters of a discarded number kept for error messages.
const NUMBER_ECHO_LIMIT: usize = 32;

/// Syntactic event produced by the [`Scanner`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    Key(String),
    Scalar(Value),
    /// A string or number that was validated but not decoded
    Discarded,
}

/// Receives tokens as soon as the [`Scanner`] completes them.
pub(crate) trait TokenSink {
    fn token(&mut self, token: Token);

    /// Whether the string or number value starting now is wanted. Unwanted
    /// values are validated without being buffered and arrive as
    /// [`Token::Discarded`].
    fn keeps_next_value(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    Object,
    Array,
}

/// What the grammar accepts next, ignoring whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrEnd,
    Key,
    KeyOrEnd,
    Colon,
    CommaOrEnd,
    /// A top-level value just ended; whitespace must come before the next one
    Separator,
}

/// A token whose bytes straddle a chunk boundary.
#[derive(Debug)]
enum Partial {
    Idle,
    Str(StrState),
    Number(NumberState),
    Literal { text: &'static [u8], matched: usize },
}

#[derive(Debug)]
enum Escape {
    Plain,
    Backslash,
    Unicode { code: u32, digits: u8 },
}

/// Continuation bytes still owed by a multi-byte UTF-8 sequence, and the
/// range the next one must fall in.
#[derive(Debug, Clone, Copy, Default)]
struct Utf8Tail {
    remaining: u8,
    low: u8,
    high: u8,
}

impl Utf8Tail {
    fn lead(byte: u8) -> Result<Self, ParseErrorKind> {
        let (remaining, low, high) = match byte {
            0x00..=0x7f => (0, 0, 0),
            0xc2..=0xdf => (1, 0x80, 0xbf),
            0xe0 => (2, 0xa0, 0xbf),
            0xe1..=0xec | 0xee..=0xef => (2, 0x80, 0xbf),
            0xed => (2, 0x80, 0x9f),
            0xf0 => (3, 0x90, 0xbf),
            0xf1..=0xf3 => (3, 0x80, 0xbf),
            0xf4 => (3, 0x80, 0x8f),
            _ => return Err(ParseErrorKind::InvalidUtf8),
        };
        Ok(Self {
            remaining,
            low,
            high,
        })
    }

    fn is_pending(&self) -> bool {
        self.remaining > 0
    }

    fn continuation(&mut self, byte: u8) -> Result<(), ParseErrorKind> {
        if !(self.low..=self.high).contains(&byte) {
            return Err(ParseErrorKind::InvalidUtf8);
        }
        self.remaining -= 1;
        self.low = 0x80;
        self.high = 0xbf;
        Ok(())
    }
}

#[derive(Debug)]
struct StrState {
    buf: Vec<u8>,
    is_key: bool,
    keep: bool,
    escape: Escape,
    high_surrogate: Option<u32>,
    utf8: Utf8Tail,
}

impl StrState {
    fn key() -> Self {
        Self::new(true, true)
    }

    fn value(keep: bool) -> Self {
        Self::new(false, keep)
    }

    fn new(is_key: bool, keep: bool) -> Self {
        Self {
            buf: Vec::new(),
            is_key,
            keep,
            escape: Escape::Plain,
            high_surrogate: None,
            utf8: Utf8Tail::default(),
        }
    }

    fn keep_bytes(&mut self, bytes: &[u8]) {
        if self.keep {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Consume one byte; `Ok(true)` once the closing quote is seen.
    fn push(&mut self, byte: u8) -> Result<bool, ParseErrorKind> {
        if self.utf8.is_pending() {
            self.utf8.continuation(byte)?;
            self.keep_bytes(&[byte]);
            return Ok(false);
        }
        match self.escape {
            Escape::Plain => match byte {
                b'"' if self.high_surrogate.is_some() => return Err(ParseErrorKind::LoneSurrogate),
                b'"' => return Ok(true),
                b'\\' => self.escape = Escape::Backslash,
                0x00..=0x1f => return Err(ParseErrorKind::ControlCharacter),
                _ if self.high_surrogate.is_some() => return Err(ParseErrorKind::LoneSurrogate),
                _ => {
                    self.utf8 = Utf8Tail::lead(byte)?;
                    self.keep_bytes(&[byte]);
                }
            },
            Escape::Backslash => {
                let decoded = match byte {
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'/' => b'/',
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'u' => {
                        self.escape = Escape::Unicode { code: 0, digits: 0 };
                        return Ok(false);
                    }
                    other => return Err(ParseErrorKind::InvalidEscape(char::from(other))),
                };
                if self.high_surrogate.is_some() {
                    return Err(ParseErrorKind::LoneSurrogate);
                }
                self.keep_bytes(&[decoded]);
                self.escape = Escape::Plain;
            }
            Escape::Unicode { code, digits } => {
                let digit = char::from(byte)
                    .to_digit(16)
                    .ok_or(ParseErrorKind::InvalidUnicodeEscape)?;
                let code = (code << 4) | digit;
                if digits < 3 {
                    self.escape = Escape::Unicode {
                        code,
                        digits: digits + 1,
                    };
                } else {
                    self.escape = Escape::Plain;
                    self.push_code_unit(code)?;
                }
            }
        }
        Ok(false)
    }

    fn push_code_unit(&mut self, unit: u32) -> Result<(), ParseErrorKind> {
        let scalar = match (self.high_surrogate.take(), unit) {
            (None, 0xD800..=0xDBFF) => {
                self.high_surrogate = Some(unit);
                return Ok(());
            }
            (None, 0xDC00..=0xDFFF) => return Err(ParseErrorKind::LoneSurrogate),
            (None, unit) => unit,
            (Some(high), 0xDC00..=0xDFFF) => 0x10000 + ((high - 0xD800) << 10) + (unit - 0xDC00),
            (Some(_), _) => return Err(ParseErrorKind::LoneSurrogate),
        };
        let ch = char::from_u32(scalar).ok_or(ParseErrorKind::InvalidUnicodeEscape)?;
        let mut utf8 = [0u8; 4];
        self.keep_bytes(ch.encode_utf8(&mut utf8).as_bytes());
        Ok(())
    }
}

/// Position reached in the JSON number grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberPart {
    Minus,
    Zero,
    Integer,
    Point,
    Fraction,
    Exponent,
    ExponentSign,
    ExponentDigits,
    Invalid,
}

impl NumberPart {
    fn advance(self, byte: u8) -> Self {
        use NumberPart::*;
        match (self, byte) {
            (Minus, b'0') => Zero,
            (Minus, b'1'..=b'9') | (Integer, b'0'..=b'9') => Integer,
            (Zero | Integer, b'.') => Point,
            (Point | Fraction, b'0'..=b'9') => Fraction,
            (Zero | Integer | Fraction, b'e' | b'E') => Exponent,
            (Exponent, b'+' | b'-') => ExponentSign,
            (Exponent | ExponentSign | ExponentDigits, b'0'..=b'9') => ExponentDigits,
            _ => Invalid,
        }
    }

    fn is_complete(self) -> bool {
        matches!(
            self,
            Self::Zero | Self::Integer | Self::Fraction | Self::ExponentDigits
        )
    }
}

#[derive(Debug)]
struct NumberState {
    /// Full text when kept; otherwise a prefix for error messages
    text: String,
    part: NumberPart,
    keep: bool,
}

impl NumberState {
    fn new(first: u8, keep: bool) -> Self {
        let part = match first {
            b'-' => NumberPart::Minus,
            b'0' => NumberPart::Zero,
            _ => NumberPart::Integer,
        };
        Self {
            text: String::from(char::from(first)),
            part,
            keep,
        }
    }

    fn push(&mut self, byte: u8) {
        self.part = self.part.advance(byte);
        if self.keep || self.text.len() < NUMBER_ECHO_LIMIT {
            self.text.push(char::from(byte));
        }
    }
}

/// Incremental JSON tokenizer.
///
/// Bytes are pushed with [`Scanner::feed`] in chunks of any size; tokens go to
/// the [`TokenSink`] as soon as they are complete. The grammar is enforced as
/// tokens are produced, so an error is reported at the first offending byte.
/// Whitespace-separated top-level values are accepted one after another.
///
/// Memory held between chunks is bounded by the nesting depth and by the
/// string or number currently being decoded; values the sink does not keep
/// are never buffered.
#[derive(Debug)]
pub(crate) struct Scanner {
    offset: u64,
    partial: Partial,
    expect: Expect,
    containers: Vec<Container>,
    max_depth: usize,
}

impl Scanner {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            offset: 0,
            partial: Partial::Idle,
            expect: Expect::Value,
            containers: Vec::new(),
            max_depth,
        }
    }

    /// Bytes consumed so far.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes of the current unfinished token held in memory.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        match &self.partial {
            Partial::Str(state) => state.buf.len(),
            Partial::Number(state) => state.text.len(),
            Partial::Idle | Partial::Literal { .. } => 0,
        }
    }

    /// Tokenize `chunk`, handing complete tokens to `out`.
    ///
    /// On error, `out` has already received every token completed before the
    /// offending byte.
    pub(crate) fn feed(
        &mut self,
        chunk: &[u8],
        out: &mut impl TokenSink,
    ) -> Result<(), ParseError> {
        let mut rest = chunk;
        while let Some((&byte, tail)) = rest.split_first() {
            if self.step(byte, out)? {
                self.offset += 1;
                rest = tail;
            }
        }
        Ok(())
    }

    /// Signal end of input, flushing a trailing top-level number.
    pub(crate) fn finish(&mut self, out: &mut impl TokenSink) -> Result<(), ParseError> {
        match std::mem::replace(&mut self.partial, Partial::Idle) {
            Partial::Idle => {}
            Partial::Number(state) => self.number(state, out)?,
            Partial::Str(_) | Partial::Literal { .. } => {
                return Err(self.error(ParseErrorKind::UnexpectedEnd));
            }
        }
        if self.containers.is_empty() && matches!(self.expect, Expect::Value | Expect::Separator) {
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::UnexpectedEnd))
        }
    }

    /// Process one byte. Returns `false` when the byte terminated a number and
    /// must be processed again as structure.
    fn step(&mut self, byte: u8, out: &mut impl TokenSink) -> Result<bool, ParseError> {
        match &mut self.partial {
            Partial::Idle => {}
            Partial::Str(state) => {
                let done = state.push(byte).map_err(|kind| self.error(kind))?;
                if done {
                    if let Partial::Str(state) = std::mem::replace(&mut self.partial, Partial::Idle)
                    {
                        self.string(state, out)?;
                    }
                }
                return Ok(true);
            }
            Partial::Number(state) => {
                if matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                    state.push(byte);
                    return Ok(true);
                }
                if let Partial::Number(state) = std::mem::replace(&mut self.partial, Partial::Idle) {
                    self.number(state, out)?;
                }
                return Ok(false);
            }
            Partial::Literal { text, matched } => {
                if text.get(*matched) != Some(&byte) {
                    return Err(self.error(ParseErrorKind::UnexpectedByte(byte)));
                }
                *matched += 1;
                if *matched == text.len() {
                    let value = match *text {
                        b"true" => Value::Bool(true),
                        b"false" => Value::Bool(false),
                        _ => Value::Null,
                    };
                    self.partial = Partial::Idle;
                    self.emit(Token::Scalar(value), out);
                }
                return Ok(true);
            }
        }
        self.structural(byte, out)?;
        Ok(true)
    }

    fn structural(&mut self, byte: u8, out: &mut impl TokenSink) -> Result<(), ParseError> {
        if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
            if self.expect == Expect::Separator {
                self.expect = Expect::Value;
            }
            return Ok(());
        }
        let top = self.containers.last().copied();
        match (self.expect, byte) {
            (Expect::Key | Expect::KeyOrEnd, b'"') => {
                self.partial = Partial::Str(StrState::key());
            }
            (Expect::KeyOrEnd | Expect::CommaOrEnd, b'}') if top == Some(Container::Object) => {
                self.close(Token::EndObject, out);
            }
            (Expect::ValueOrEnd | Expect::CommaOrEnd, b']') if top == Some(Container::Array) => {
                self.close(Token::EndArray, out);
            }
            (Expect::Colon, b':') => self.expect = Expect::Value,
            (Expect::CommaOrEnd, b',') => {
                self.expect = match top {
                    Some(Container::Object) => Expect::Key,
                    _ => Expect::Value,
                };
            }
            (Expect::Value | Expect::ValueOrEnd, _) => self.begin_value(byte, out)?,
            _ => return Err(self.error(ParseErrorKind::UnexpectedByte(byte))),
        }
        Ok(())
    }

    fn begin_value(&mut self, byte: u8, out: &mut impl TokenSink) -> Result<(), ParseError> {
        match byte {
            b'{' => {
                self.open(Container::Object, out)?;
                self.expect = Expect::KeyOrEnd;
            }
            b'[' => {
                self.open(Container::Array, out)?;
                self.expect = Expect::ValueOrEnd;
            }
            b'"' => self.partial = Partial::Str(StrState::value(out.keeps_next_value())),
            b't' => self.partial = Partial::Literal { text: b"true", matched: 1 },
            b'f' => self.partial = Partial::Literal { text: b"false", matched: 1 },
            b'n' => self.partial = Partial::Literal { text: b"null", matched: 1 },
            b'-' | b'0'..=b'9' => {
                self.partial = Partial::Number(NumberState::new(byte, out.keeps_next_value()));
            }
            _ => return Err(self.error(ParseErrorKind::UnexpectedByte(byte))),
        }
        Ok(())
    }

    fn open(&mut self, container: Container, out: &mut impl TokenSink) -> Result<(), ParseError> {
        if self.containers.len() >= self.max_depth {
            return Err(self.error(ParseErrorKind::DepthLimitExceeded(self.max_depth)));
        }
        self.containers.push(container);
        out.token(match container {
            Container::Object => Token::BeginObject,
            Container::Array => Token::BeginArray,
        });
        Ok(())
    }

    fn close(&mut self, token: Token, out: &mut impl TokenSink) {
        self.containers.pop();
        self.emit(token, out);
    }

    fn string(&mut self, state: StrState, out: &mut impl TokenSink) -> Result<(), ParseError> {
        if !state.keep {
            self.emit(Token::Discarded, out);
            return Ok(());
        }
        let text =
            String::from_utf8(state.buf).map_err(|_| self.error(ParseErrorKind::InvalidUtf8))?;
        if state.is_key {
            out.token(Token::Key(text));
            self.expect = Expect::Colon;
        } else {
            self.emit(Token::Scalar(Value::String(text)), out);
        }
        Ok(())
    }

    fn number(&mut self, state: NumberState, out: &mut impl TokenSink) -> Result<(), ParseError> {
        if !state.part.is_complete() {
            return Err(self.error(ParseErrorKind::InvalidNumber(state.text)));
        }
        if !state.keep {
            self.emit(Token::Discarded, out);
            return Ok(());
        }
        match serde_json::from_str::<Value>(&state.text) {
            Ok(value @ Value::Number(_)) => {
                self.emit(Token::Scalar(value), out);
                Ok(())
            }
            _ => Err(self.error(ParseErrorKind::InvalidNumber(state.text))),
        }
    }

    /// Hand a value-completing token to the sink and move past the value.
    fn emit(&mut self, token: Token, out: &mut impl TokenSink) {
        out.token(token);
        self.expect = if self.containers.is_empty() {
            Expect::Separator
        } else {
            Expect::CommaOrEnd
        };
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.offset, kind)
    }
}
