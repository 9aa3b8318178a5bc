//! Structural paths into a [`Document`](crate::Document).
//!
//! A path is a list of segments. Sequence elements that carry a
//! discriminating field are addressed by that field rather than by position,
//! so `spec.params[name=hermetic].value` stays stable when parameters are
//! reordered.
//!
//! Keys containing `.`, `[`, `]` or `"` are rendered quoted:
//! `metadata.annotations."build.appstudio.openshift.io/repo"`, and so are
//! discriminator values containing `[`, `]` or `=`: `params[name="a=b"]`.

use std::fmt;
use std::str::FromStr;

use crate::error::DocumentError;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// A mapping key.
    Key(String),
    /// A sequence element whose mapping has `field == value`.
    Keyed { field: String, value: String },
    /// A sequence element by position (sequences without a discriminator).
    Index(usize),
}

impl Segment {
    pub fn key(name: impl Into<String>) -> Self {
        Segment::Key(name.into())
    }

    /// Shorthand for the `[name=<value>]` discriminator used by tasks and params.
    pub fn named(value: impl Into<String>) -> Self {
        Segment::Keyed {
            field: "name".to_string(),
            value: value.into(),
        }
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            _ => None,
        }
    }
}

/// A location inside a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The document root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// New path with `segment` appended.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn key(&self, name: impl Into<String>) -> Self {
        self.child(Segment::key(name))
    }

    pub fn named(&self, value: impl Into<String>) -> Self {
        self.child(Segment::named(value))
    }

    pub fn index(&self, index: usize) -> Self {
        self.child(Segment::Index(index))
    }

    /// Split into parent path and final segment. `None` at the root.
    pub fn split_last(&self) -> Option<(Path, &Segment)> {
        let (last, rest) = self.0.split_last()?;
        Some((Path(rest.to_vec()), last))
    }

    /// True when `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// True when any key segment equals `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|s| s.as_key() == Some(key))
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    if needs_quotes(key) {
                        write!(f, "\"{key}\"")?;
                    } else {
                        f.write_str(key)?;
                    }
                }
                Segment::Keyed { field, value } if value.contains([']', '[', '=']) => {
                    write!(f, "[{field}=\"{value}\"]")?
                }
                Segment::Keyed { field, value } => write!(f, "[{field}={value}]")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn needs_quotes(key: &str) -> bool {
    key.is_empty() || key.contains(['.', '[', ']', '"'])
}

impl FromStr for Path {
    type Err = DocumentError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DocumentError::InvalidPath {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut chars = input.chars().peekable();
        let mut expect_key = true;

        while let Some(&c) = chars.peek() {
            match c {
                '.' => {
                    if expect_key {
                        return Err(invalid("empty key"));
                    }
                    chars.next();
                    expect_key = true;
                    if chars.peek().is_none() {
                        return Err(invalid("trailing '.'"));
                    }
                }
                '[' => {
                    chars.next();
                    let mut inner = String::new();
                    let mut quoted = false;
                    loop {
                        match chars.next() {
                            Some(']') if !quoted => break,
                            Some('"') if quoted || inner.ends_with('=') => {
                                quoted = !quoted;
                                inner.push('"');
                            }
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid("unclosed '['")),
                        }
                    }
                    segments.push(parse_bracket(&inner).ok_or_else(|| {
                        invalid("expected [field=value] or [index]")
                    })?);
                    expect_key = false;
                }
                '"' => {
                    if !expect_key {
                        return Err(invalid("missing '.' before quoted key"));
                    }
                    chars.next();
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('"') => break,
                            Some(ch) => key.push(ch),
                            None => return Err(invalid("unclosed quote")),
                        }
                    }
                    segments.push(Segment::Key(key));
                    expect_key = false;
                }
                _ => {
                    if !expect_key {
                        return Err(invalid("missing '.' between keys"));
                    }
                    let mut key = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch == '.' || ch == '[' {
                            break;
                        }
                        key.push(ch);
                        chars.next();
                    }
                    segments.push(Segment::Key(key));
                    expect_key = false;
                }
            }
        }

        if segments.is_empty() {
            return Err(invalid("empty path"));
        }
        Ok(Path(segments))
    }
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if let Some((field, value)) = inner.split_once('=') {
        if field.is_empty() || field.contains('"') {
            return None;
        }
        let value = match value.strip_prefix('"') {
            Some(rest) => rest.strip_suffix('"').filter(|v| !v.contains('"'))?,
            None => value,
        };
        return Some(Segment::Keyed {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    inner.parse().ok().map(Segment::Index)
}
