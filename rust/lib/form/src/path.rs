//! Field path codec.
//!
//! Field paths use dot/bracket notation: `a.b[0].c` addresses key `c` of the
//! first element of array `b` inside object `a`. Parsing produces a list of
//! [`PathSegment`]s; the raw text is kept in [`FieldPath`] because the field
//! registry keys on exactly what the user wrote.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::warn;

/// One step through a nested tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object property.
    Key(String),
    /// Array position.
    Index(usize),
}

impl PathSegment {
    /// The segment as a map key. Indices render as their decimal text.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            PathSegment::Key(k) => Cow::Borrowed(k),
            PathSegment::Index(i) => Cow::Owned(i.to_string()),
        }
    }

    /// The segment as an array index, if it can be one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(k) => parse_index(k),
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, PathSegment::Index(_))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Parse path text into segments.
///
/// Empty text yields an empty list. Text that does not follow the grammar
/// (empty segments, unbalanced or non-numeric brackets) is treated as a
/// single flat key; debug builds log a warning for it.
pub fn parse(text: &str) -> Vec<PathSegment> {
    if text.is_empty() {
        return Vec::new();
    }
    match try_parse(text) {
        Some(segments) => segments,
        None => {
            if cfg!(debug_assertions) {
                warn!(path = text, "malformed field path, treating it as a single key");
            }
            vec![PathSegment::Key(text.to_string())]
        }
    }
}

/// Render segments back to dot/bracket text.
pub fn format(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        match seg {
            PathSegment::Key(k) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(n) => {
                out.push('[');
                out.push_str(&n.to_string());
                out.push(']');
            }
        }
    }
    out
}

fn try_parse(text: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    for part in text.split('.') {
        if part.is_empty() {
            return None;
        }
        let (name, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if name.contains(']') {
            return None;
        }
        if !name.is_empty() {
            segments.push(segment_of(name));
        }
        // `rest` is empty or starts with `[`.
        while !rest.is_empty() {
            let close = rest.find(']')?;
            segments.push(PathSegment::Index(parse_index(&rest[1..close])?));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

fn segment_of(name: &str) -> PathSegment {
    match parse_index(name) {
        Some(i) => PathSegment::Index(i),
        None => PathSegment::Key(name.to_string()),
    }
}

fn parse_index(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

// ── FieldPath ──

/// A field path: the user-authored text plus its parsed segments.
///
/// Equality, ordering and hashing use the raw text only, so `a[0]` and
/// `a.0` are distinct registry keys even though they address the same slot.
#[derive(Debug, Clone)]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = parse(&raw);
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl PartialEq for FieldPath {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for FieldPath {}

impl Hash for FieldPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for FieldPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for FieldPath {
    fn from(raw: &str) -> Self {
        FieldPath::new(raw)
    }
}

impl From<String> for FieldPath {
    fn from(raw: String) -> Self {
        FieldPath::new(raw)
    }
}

// ── AsSegments ──

/// Anything that can address a tree: path text, a [`FieldPath`] or segments.
pub trait AsSegments {
    fn as_segments(&self) -> Cow<'_, [PathSegment]>;
}

impl AsSegments for str {
    fn as_segments(&self) -> Cow<'_, [PathSegment]> {
        Cow::Owned(parse(self))
    }
}

impl AsSegments for String {
    fn as_segments(&self) -> Cow<'_, [PathSegment]> {
        Cow::Owned(parse(self))
    }
}

impl AsSegments for FieldPath {
    fn as_segments(&self) -> Cow<'_, [PathSegment]> {
        Cow::Borrowed(&self.segments)
    }
}

impl AsSegments for [PathSegment] {
    fn as_segments(&self) -> Cow<'_, [PathSegment]> {
        Cow::Borrowed(self)
    }
}

impl AsSegments for Vec<PathSegment> {
    fn as_segments(&self) -> Cow<'_, [PathSegment]> {
        Cow::Borrowed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.to_string())
    }

    fn idx(i: usize) -> PathSegment {
        PathSegment::Index(i)
    }

    // ========================================================================
    // parse
    // ========================================================================

    #[test]
    fn parse_single_key() {
        assert_eq!(parse("foo"), vec![key("foo")]);
    }

    #[test]
    fn parse_dotted() {
        assert_eq!(parse("a.b.c"), vec![key("a"), key("b"), key("c")]);
    }

    #[test]
    fn parse_bracket_index() {
        assert_eq!(
            parse("a.b[0].c"),
            vec![key("a"), key("b"), idx(0), key("c")]
        );
    }

    #[test]
    fn parse_chained_brackets() {
        assert_eq!(parse("grid[1][2]"), vec![key("grid"), idx(1), idx(2)]);
    }

    #[test]
    fn parse_numeric_dot_segment_is_index() {
        assert_eq!(
            parse("0.b.c[1].d"),
            vec![idx(0), key("b"), key("c"), idx(1), key("d")]
        );
    }

    #[test]
    fn parse_leading_bracket() {
        assert_eq!(parse("[3].name"), vec![idx(3), key("name")]);
    }

    #[test]
    fn parse_empty_is_empty() {
        assert!(parse("").is_empty());
    }

    // ========================================================================
    // Malformed input degrades to a flat key
    // ========================================================================

    #[test]
    fn parse_empty_segment_is_flat_key() {
        assert_eq!(parse("a..b"), vec![key("a..b")]);
        assert_eq!(parse(".a"), vec![key(".a")]);
        assert_eq!(parse("a."), vec![key("a.")]);
    }

    #[test]
    fn parse_unclosed_bracket_is_flat_key() {
        assert_eq!(parse("a[0"), vec![key("a[0")]);
    }

    #[test]
    fn parse_non_numeric_bracket_is_flat_key() {
        assert_eq!(parse("a[x]"), vec![key("a[x]")]);
        assert_eq!(parse("a[]"), vec![key("a[]")]);
    }

    #[test]
    fn parse_text_after_bracket_is_flat_key() {
        assert_eq!(parse("a[0]b"), vec![key("a[0]b")]);
    }

    #[test]
    fn parse_stray_close_bracket_is_flat_key() {
        assert_eq!(parse("a]"), vec![key("a]")]);
    }

    // ========================================================================
    // format
    // ========================================================================

    #[test]
    fn format_renders_brackets_for_indices() {
        let segs = vec![key("a"), key("b"), idx(0), key("c")];
        assert_eq!(format(&segs), "a.b[0].c");
    }

    #[test]
    fn format_then_parse_is_stable() {
        for text in ["a", "a.b", "a.b[0].c", "grid[1][2]", "[0].x"] {
            let segs = parse(text);
            assert_eq!(parse(&format(&segs)), segs, "round-trip of {}", text);
        }
    }

    #[test]
    fn format_normalizes_numeric_dot_segment() {
        assert_eq!(format(&parse("a.0.b")), "a[0].b");
    }

    // ========================================================================
    // FieldPath identity
    // ========================================================================

    #[test]
    fn field_path_identity_is_raw_text() {
        let a = FieldPath::new("a[0]");
        let b = FieldPath::new("a.0");
        assert_eq!(a.segments(), b.segments());
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(b);
        set.insert(FieldPath::new("a[0]"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn field_path_depth_and_display() {
        let p = FieldPath::from("a.b[0].c");
        assert_eq!(p.depth(), 4);
        assert_eq!(p.to_string(), "a.b[0].c");
        assert!(FieldPath::from("").is_empty());
    }

    #[test]
    fn segment_key_and_index_views() {
        assert_eq!(idx(7).as_key(), "7");
        assert_eq!(key("7").as_index(), Some(7));
        assert_eq!(key("x").as_index(), None);
        assert!(idx(0).is_index());
    }
}
