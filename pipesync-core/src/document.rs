//! Pipeline document model.
//!
//! A parsed YAML tree is converted once into a closed [`Node`] type
//! (mapping | sequence | scalar). Mapping key order is preserved so a merged
//! document serializes in the same order the operator wrote it.

use std::fmt;

use serde_yaml::{Number, Value};

use crate::error::DocumentError;
use crate::path::{Path, Segment};

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// A leaf value. Equality is exact: `"1"` and `1` differ.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

// serde_yaml's `Number` equality treats NaN as equal to itself, so it is total.
impl Eq for Scalar {}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::String(s) => write!(f, "{s:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// An insertion-ordered mapping with unique string keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    entries: Vec<(String, Node)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Node) -> Option<Node> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, Node)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, Node)>>(iter: I) -> Self {
        let mut mapping = Mapping::new();
        for (k, v) in iter {
            mapping.insert(k, v);
        }
        mapping
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One node of a pipeline document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Mapping(Mapping),
    Sequence(Vec<Node>),
    Scalar(Scalar),
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::String(s.into()))
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Mapping field lookup; `None` for non-mappings.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping()?.get(key)
    }

    /// Short label for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Mapping(_) => "mapping",
            Node::Sequence(_) => "sequence",
            Node::Scalar(_) => "scalar",
        }
    }

    /// String value of `field` when this node is a mapping element such as
    /// `{name: hermetic, value: "true"}`.
    pub fn discriminator(&self, field: &str) -> Option<&str> {
        self.get(field)?.as_str()
    }

    /// Follow `segments` from this node.
    pub fn at(&self, segments: &[Segment]) -> Option<&Node> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(self);
        };
        let next = match (self, first) {
            (Node::Mapping(m), Segment::Key(key)) => m.get(key)?,
            (Node::Sequence(items), Segment::Keyed { field, value }) => items
                .iter()
                .find(|item| item.discriminator(field) == Some(value.as_str()))?,
            (Node::Sequence(items), Segment::Index(i)) => items.get(*i)?,
            _ => return None,
        };
        next.at(rest)
    }

    /// Mutable variant of [`Node::at`].
    pub fn at_mut(&mut self, segments: &[Segment]) -> Option<&mut Node> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(self);
        };
        let next = match (self, first) {
            (Node::Mapping(m), Segment::Key(key)) => m.get_mut(key)?,
            (Node::Sequence(items), Segment::Keyed { field, value }) => items
                .iter_mut()
                .find(|item| item.discriminator(field) == Some(value.as_str()))?,
            (Node::Sequence(items), Segment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
        next.at_mut(rest)
    }

    /// Convert a parsed YAML value. Tags are unwrapped to their inner value.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        convert(value, &Path::root())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Node::Scalar(Scalar::Null) => Value::Null,
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Node::Scalar(Scalar::Number(n)) => Value::Number(n.clone()),
            Node::Scalar(Scalar::String(s)) => Value::String(s.clone()),
            Node::Sequence(items) => Value::Sequence(items.iter().map(Node::to_value).collect()),
            Node::Mapping(m) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in m.iter() {
                    out.insert(Value::String(k.to_string()), v.to_value());
                }
                Value::Mapping(out)
            }
        }
    }
}

fn convert(value: Value, at: &Path) -> Result<Node, DocumentError> {
    Ok(match value {
        Value::Null => Node::Scalar(Scalar::Null),
        Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
        Value::Number(n) => Node::Scalar(Scalar::Number(n)),
        Value::String(s) => Node::Scalar(Scalar::String(s)),
        Value::Tagged(tagged) => convert(tagged.value, at)?,
        Value::Sequence(items) => Node::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| convert(item, &at.index(i)))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => s,
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Null => "null".to_string(),
                    _ => {
                        return Err(DocumentError::UnsupportedKey {
                            path: at.to_string(),
                        })
                    }
                };
                let child = convert(v, &at.key(key.clone()))?;
                out.insert(key, child);
            }
            Node::Mapping(out)
        }
    })
}

impl From<Scalar> for Node {
    fn from(s: Scalar) -> Self {
        Node::Scalar(s)
    }
}

impl From<Mapping> for Node {
    fn from(m: Mapping) -> Self {
        Node::Mapping(m)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::string(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Scalar(Scalar::Bool(b))
    }
}

impl fmt::Display for Node {
    /// Compact single-line rendering for change reports.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Scalar(s) => s.fmt(f),
            Node::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt(f)?;
                }
                f.write_str("]")
            }
            Node::Mapping(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An immutable pipeline document. Merging produces a new `Document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Node,
}

impl Document {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_yaml::from_str(text)?;
        Ok(Self::new(Node::from_value(value)?))
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn get(&self, path: &Path) -> Option<&Node> {
        self.root.at(path.segments())
    }

    pub fn to_yaml_string(&self) -> Result<String, DocumentError> {
        Ok(serde_yaml::to_string(&self.root.to_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
apiVersion: tekton.dev/v1
kind: Pipeline
metadata:
  name: docker-build
spec:
  params:
    - name: hermetic
      default: "false"
    - name: image-expires-after
      default: ""
  tasks:
    - name: clone
      taskRef:
        name: git-clone
    - name: build
      runAfter: [clone]
"#;

    #[test]
    fn parses_and_resolves_keyed_paths() {
        let doc = Document::from_yaml_str(PIPELINE).expect("parse");
        let path: Path = "spec.params[name=hermetic].default".parse().unwrap();
        assert_eq!(doc.get(&path), Some(&Node::string("false")));

        let path: Path = "spec.tasks[name=build].runAfter[0]".parse().unwrap();
        assert_eq!(doc.get(&path), Some(&Node::string("clone")));

        let missing: Path = "spec.tasks[name=scan]".parse().unwrap();
        assert!(doc.get(&missing).is_none());
    }

    #[test]
    fn key_order_survives_serialization() {
        let doc = Document::from_yaml_str(PIPELINE).expect("parse");
        let yaml = doc.to_yaml_string().expect("yaml");
        let api = yaml.find("apiVersion").unwrap();
        let kind = yaml.find("kind").unwrap();
        let spec = yaml.find("spec").unwrap();
        assert!(api < kind && kind < spec);
        assert_eq!(Document::from_yaml_str(&yaml).unwrap(), doc);
    }

    #[test]
    fn nan_scalars_compare_equal() {
        let a = Document::from_yaml_str("x: .nan\n").unwrap();
        let b = Document::from_yaml_str("x: .nan\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn scalar_types_are_not_coerced() {
        let a = Document::from_yaml_str("x: 1").unwrap();
        let b = Document::from_yaml_str("x: \"1\"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn non_scalar_keys_are_rejected() {
        let err = Document::from_yaml_str("? [a, b]\n: 1\n").unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedKey { .. }));
    }

    #[test]
    fn mapping_insert_keeps_position() {
        let mut m: Mapping = [("a", Node::from("1")), ("b", Node::from("2"))]
            .into_iter()
            .collect();
        m.insert("a", Node::from("3"));
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(m.get("a"), Some(&Node::from("3")));
    }

    #[test]
    fn display_is_compact() {
        let doc = Document::from_yaml_str("a: [x, 1, true, null]").unwrap();
        assert_eq!(doc.root().to_string(), r#"{a: ["x", 1, true, null]}"#);
    }
}
