//! Path expressions selecting values inside a JSON document.
//!
//! A [`JsonPath`] is a sequence of [`Segment`]s matched against the concrete
//! location ([`Step`]s) of every value the matcher completes. The string form
//! uses dots between components:
//!
//! | Text          | Meaning                                                   |
//! |---------------|-----------------------------------------------------------|
//! | `data3`       | the `data3` member of the top-level object                |
//! | `rows.*.doc`  | `doc` inside every element (or member) of `rows`          |
//! | `rows.0`      | the first element of `rows` (keys also match indices)     |
//! | `..id`        | every `id`, at any depth                                  |
//! | `a..b`        | every `b` somewhere below `a`                             |
//! | (empty)       | the top-level value itself                                |
//!
//! Two differences from JSONStream-style path strings: the empty path selects
//! the top-level value instead of never matching, and a `null` found at the
//! path is a match (`Some(Value::Null)`) instead of being skipped while the
//! search goes on.
//!
//! ```
//! use streampath::path::{JsonPath, Step};
//!
//! let path = JsonPath::from("rows.*.doc");
//! let location = [
//!     Step::Key("rows".into()),
//!     Step::Index(4),
//!     Step::Key("doc".into()),
//! ];
//! assert!(path.matches(&location));
//! ```

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use regex::Regex;

/// One component of a [`JsonPath`].
#[derive(Debug, Clone)]
pub enum Segment {
    /// An object key; also matches an array index with the same decimal value
    Key(String),
    /// An array index; also matches an object key with the same decimal value
    Index(usize),
    /// Any single key or index
    Any,
    /// Zero or more arbitrary levels, followed by the next segment
    Recurse,
    /// A key, or an index rendered in decimal, accepted by the expression
    Pattern(Regex),
}

impl Segment {
    /// Whether this segment accepts a single concrete step.
    ///
    /// [`Segment::Recurse`] spans several steps and is resolved by
    /// [`JsonPath::matches`], so it accepts nothing on its own.
    pub fn accepts(&self, step: &Step) -> bool {
        match (self, step) {
            (Segment::Key(key), Step::Key(name)) => key == name,
            (Segment::Key(key), Step::Index(index)) => parses_to(key, *index),
            (Segment::Index(index), Step::Index(at)) => index == at,
            (Segment::Index(index), Step::Key(name)) => parses_to(name, *index),
            (Segment::Any, _) => true,
            (Segment::Pattern(re), Step::Key(name)) => re.is_match(name),
            (Segment::Pattern(re), Step::Index(index)) => re.is_match(&index.to_string()),
            (Segment::Recurse, _) => false,
        }
    }
}

fn parses_to(text: &str, index: usize) -> bool {
    text.parse::<usize>().is_ok_and(|n| n == index)
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::Key(a), Segment::Key(b)) => a == b,
            (Segment::Index(a), Segment::Index(b)) => a == b,
            (Segment::Any, Segment::Any) | (Segment::Recurse, Segment::Recurse) => true,
            (Segment::Pattern(a), Segment::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for Segment {}

/// Concrete position of a value relative to its parent container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Member of an object
    Key(String),
    /// Element of an array
    Index(usize),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(key) => f.write_str(key),
            Step::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A path expression selecting values in a JSON document.
///
/// Build one from its dotted string form, or structurally:
///
/// ```
/// use streampath::path::JsonPath;
///
/// let dotted = JsonPath::from("feed..uri");
/// let built = JsonPath::root().key("feed").recurse().key("uri");
/// assert_eq!(dotted, built);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// The path of the top-level value.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse the dotted string form. Every string is a valid path.
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Self::root();
        }
        text.split('.').fold(Self::root(), |path, component| match component {
            "" => path.recurse(),
            "*" => path.any(),
            key => path.key(key),
        })
    }

    /// Append an object key.
    pub fn key(self, key: impl Into<String>) -> Self {
        self.push(Segment::Key(key.into()))
    }

    /// Append an array index.
    pub fn index(self, index: usize) -> Self {
        self.push(Segment::Index(index))
    }

    /// Append a wildcard matching any single key or index.
    pub fn any(self) -> Self {
        self.push(Segment::Any)
    }

    /// Append a recursive descent: zero or more levels before the next segment.
    pub fn recurse(self) -> Self {
        self.push(Segment::Recurse)
    }

    /// Append a regular expression tested against keys and indices.
    pub fn pattern(self, pattern: Regex) -> Self {
        self.push(Segment::Pattern(pattern))
    }

    /// Append an arbitrary segment.
    pub fn push(mut self, segment: Segment) -> Self {
        // `a...b` means the same as `a..b`
        if segment == Segment::Recurse && self.segments.last() == Some(&Segment::Recurse) {
            return self;
        }
        self.segments.push(segment);
        self
    }

    /// The segments of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether a value at `location` is selected by this path.
    pub fn matches(&self, location: &[Step]) -> bool {
        matches_from(&self.segments, location)
    }
}

fn matches_from(segments: &[Segment], location: &[Step]) -> bool {
    match segments.split_first() {
        None => location.is_empty(),
        Some((Segment::Recurse, rest)) => {
            // a trailing recursion has nothing to land on
            if rest.is_empty() {
                return false;
            }
            (0..=location.len()).any(|skip| matches_from(rest, &location[skip..]))
        }
        Some((segment, rest)) => match location.split_first() {
            Some((step, remaining)) => segment.accepts(step) && matches_from(rest, remaining),
            None => false,
        },
    }
}

impl From<&str> for JsonPath {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for JsonPath {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<&JsonPath> for JsonPath {
    fn from(path: &JsonPath) -> Self {
        path.clone()
    }
}

impl FromStr for JsonPath {
    type Err = Infallible;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(text))
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut separate = false;
        for segment in &self.segments {
            if let Segment::Recurse = segment {
                f.write_str("..")?;
                separate = false;
                continue;
            }
            if separate {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(key) => f.write_str(key)?,
                Segment::Index(index) => write!(f, "{index}")?,
                Segment::Any => f.write_str("*")?,
                Segment::Pattern(re) => write!(f, "/{}/", re.as_str())?,
                Segment::Recurse => {}
            }
            separate = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> Step {
        Step::Key(name.to_string())
    }

    #[test]
    fn parses_dotted_components() {
        let path = JsonPath::parse("rows.*.doc");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("rows".into()),
                Segment::Any,
                Segment::Key("doc".into())
            ]
        );
    }

    #[test]
    fn double_dot_becomes_a_single_recursion() {
        assert_eq!(
            JsonPath::parse("..id").segments(),
            &[Segment::Recurse, Segment::Key("id".into())]
        );
        assert_eq!(JsonPath::parse("a...b"), JsonPath::parse("a..b"));
    }

    #[test]
    fn empty_string_is_the_root() {
        let path = JsonPath::parse("");
        assert!(path.is_root());
        assert!(path.matches(&[]));
        assert!(!path.matches(&[key("a")]));
    }

    #[test]
    fn plain_key_matches_only_its_own_level() {
        let path = JsonPath::from("data3");
        assert!(path.matches(&[key("data3")]));
        assert!(!path.matches(&[]));
        assert!(!path.matches(&[key("data3"), key("message")]));
        assert!(!path.matches(&[key("outer"), key("data3")]));
    }

    #[test]
    fn keys_and_indices_compare_by_value() {
        assert!(JsonPath::from("rows.0").matches(&[key("rows"), Step::Index(0)]));
        assert!(JsonPath::root().key("rows").index(2).matches(&[key("rows"), Step::Index(2)]));
        assert!(JsonPath::root().index(7).matches(&[key("7")]));
        assert!(!JsonPath::from("rows.1").matches(&[key("rows"), Step::Index(0)]));
    }

    #[test]
    fn recursion_spans_zero_or_more_levels() {
        let path = JsonPath::from("a..b");
        assert!(path.matches(&[key("a"), key("b")]));
        assert!(path.matches(&[key("a"), Step::Index(3), key("x"), key("b")]));
        assert!(!path.matches(&[key("b")]));
        assert!(!path.matches(&[key("a"), key("b"), key("c")]));
    }

    #[test]
    fn recursion_backtracks_over_repeated_keys() {
        let path = JsonPath::from("..a.b");
        assert!(path.matches(&[key("a"), key("a"), key("b")]));
    }

    #[test]
    fn trailing_recursion_never_matches() {
        let path = JsonPath::from("a..");
        assert!(!path.matches(&[key("a")]));
        assert!(!path.matches(&[key("a"), key("b")]));
    }

    #[test]
    fn pattern_segments_test_keys_and_indices() {
        let path = JsonPath::root().pattern(Regex::new(r"^data\d$").unwrap());
        assert!(path.matches(&[key("data7")]));
        assert!(!path.matches(&[key("data10")]));

        let digits = JsonPath::root().key("rows").pattern(Regex::new("^1").unwrap());
        assert!(digits.matches(&[key("rows"), Step::Index(12)]));
    }

    #[test]
    fn display_round_trips_the_dotted_form() {
        for text in ["data3", "rows.*.doc", "..id", "a..b", "feed.0.post", ""] {
            assert_eq!(JsonPath::parse(text).to_string(), text);
        }
        let built = JsonPath::root().key("x").pattern(Regex::new("^y").unwrap());
        assert_eq!(built.to_string(), "x./^y/");
    }
}
