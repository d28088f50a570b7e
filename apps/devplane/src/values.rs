//! # Values
//!
//! Ordered value trees for chart values and cluster configuration, the
//! left-to-right deep merge, and `key=value` override parsing.
//!
//! Nothing here performs I/O. Callers load documents and hand the parsed
//! trees in.

use crate::error::ValuesError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// YAML `null` or `~`
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A node in a value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    /// Nested mapping; the only node kind merged recursively
    Tree(ValueTree),
    /// Replaced wholesale on merge, never concatenated
    Sequence(Vec<Value>),
}

impl Value {
    /// String scalar.
    pub fn string(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::String(s.into()))
    }

    /// The nested tree, if this node is one.
    pub fn as_tree(&self) -> Option<&ValueTree> {
        match self {
            Value::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    /// The string, if this node is a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Scalar(Scalar::Int(i))
    }
}

impl From<ValueTree> for Value {
    fn from(tree: ValueTree) -> Self {
        Value::Tree(tree)
    }
}

/// Mapping from string keys to values, keeping insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueTree {
    entries: Vec<(String, Value)>,
}

impl ValueTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the tree has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Value under a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Follow a path of keys through nested trees.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let value = self.get(first)?;
        if rest.is_empty() {
            Some(value)
        } else {
            value.as_tree()?.get_path(rest)
        }
    }

    /// Set `key`, keeping its position when it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style `insert`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Top-level keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Top-level entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` on top of `self`: trees meet trees recursively,
    /// anything else is replaced outright.
    pub fn merge_from(&mut self, other: ValueTree) {
        for (key, incoming) in other.entries {
            match (self.get_mut(&key), incoming) {
                (Some(Value::Tree(existing)), Value::Tree(incoming)) => {
                    existing.merge_from(incoming);
                }
                (Some(slot), incoming) => *slot = incoming,
                (None, incoming) => self.entries.push((key, incoming)),
            }
        }
    }

    /// Parse a YAML document; see [`ValueTree::from_yaml`].
    pub fn from_yaml_str(source: &str) -> Result<Self, ValuesError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(source)?;
        Self::from_yaml(doc)
    }

    /// Convert a YAML document. A null document is an empty tree.
    pub fn from_yaml(doc: serde_yaml::Value) -> Result<Self, ValuesError> {
        match value_from_yaml(doc)? {
            Value::Tree(tree) => Ok(tree),
            Value::Scalar(Scalar::Null) => Ok(ValueTree::new()),
            other => Err(ValuesError::NotAMapping(kind_name(&other).to_string())),
        }
    }

    /// Convert to a YAML mapping, keeping key order.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        let mut mapping = serde_yaml::Mapping::new();
        for (key, value) in &self.entries {
            mapping.insert(serde_yaml::Value::String(key.clone()), value_to_yaml(value));
        }
        serde_yaml::Value::Mapping(mapping)
    }

    /// Render as a YAML document, e.g. for `helm --values -`.
    pub fn to_yaml_string(&self) -> Result<String, ValuesError> {
        Ok(serde_yaml::to_string(&self.to_yaml())?)
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Scalar(_) => "scalar",
        Value::Tree(_) => "mapping",
        Value::Sequence(_) => "sequence",
    }
}

fn value_from_yaml(doc: serde_yaml::Value) -> Result<Value, ValuesError> {
    use serde_yaml::Value as Y;

    Ok(match doc {
        Y::Null => Value::Scalar(Scalar::Null),
        Y::Bool(b) => Value::Scalar(Scalar::Bool(b)),
        Y::Number(n) => match n.as_i64() {
            Some(i) => Value::Scalar(Scalar::Int(i)),
            None => Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
        },
        Y::String(s) => Value::string(s),
        Y::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(value_from_yaml)
                .collect::<Result<_, _>>()?,
        ),
        Y::Mapping(mapping) => {
            let mut tree = ValueTree::new();
            for (key, value) in mapping {
                let key = match key {
                    Y::String(s) => s,
                    Y::Bool(b) => b.to_string(),
                    Y::Number(n) => n.to_string(),
                    other => return Err(ValuesError::UnsupportedKey(format!("{:?}", other))),
                };
                tree.insert(key, value_from_yaml(value)?);
            }
            Value::Tree(tree)
        }
        Y::Tagged(tagged) => value_from_yaml(tagged.value)?,
    })
}

fn value_to_yaml(value: &Value) -> serde_yaml::Value {
    use serde_yaml::Value as Y;

    match value {
        Value::Scalar(Scalar::Null) => Y::Null,
        Value::Scalar(Scalar::Bool(b)) => Y::Bool(*b),
        Value::Scalar(Scalar::Int(i)) => Y::Number((*i).into()),
        Value::Scalar(Scalar::Float(f)) => Y::Number((*f).into()),
        Value::Scalar(Scalar::String(s)) => Y::String(s.clone()),
        Value::Sequence(items) => Y::Sequence(items.iter().map(value_to_yaml).collect()),
        Value::Tree(tree) => tree.to_yaml(),
    }
}

impl Serialize for ValueTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_yaml().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let doc = serde_yaml::Value::deserialize(deserializer)?;
        ValueTree::from_yaml(doc).map_err(serde::de::Error::custom)
    }
}

/// Merge `sources` left to right, then `overrides` on top.
pub fn merge(sources: &[ValueTree], overrides: &ValueTree) -> ValueTree {
    let mut merged = ValueTree::new();
    for source in sources {
        merged.merge_from(source.clone());
    }
    merged.merge_from(overrides.clone());
    merged
}

/// Build an override tree from `a.b.c=value` pairs.
///
/// Paths split on unescaped `.`; `\.` is a literal dot. Values are always
/// strings. A pair fails when it lacks `=`, has an empty segment, indexes a
/// list with `[n]`, or would nest below a key an earlier pair set to a
/// scalar.
pub fn parse_overrides<S: AsRef<str>>(pairs: &[S]) -> Result<ValueTree, ValuesError> {
    let mut tree = ValueTree::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ValuesError::malformed(pair, "expected key=value"))?;
        let path = split_path(key).map_err(|reason| ValuesError::malformed(pair, reason))?;
        set_path(&mut tree, &path, Value::string(value), pair)?;
    }
    Ok(tree)
}

fn split_path(key: &str) -> Result<Vec<String>, &'static str> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => segments.push(std::mem::take(&mut current)),
            '[' | ']' => return Err("list indexing is not supported"),
            other => current.push(other),
        }
    }
    segments.push(current);

    if segments.iter().any(String::is_empty) {
        return Err("empty path segment");
    }
    Ok(segments)
}

fn set_path(
    tree: &mut ValueTree,
    path: &[String],
    value: Value,
    pair: &str,
) -> Result<(), ValuesError> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        tree.insert(head.clone(), value);
        return Ok(());
    }
    if tree.get(head).is_none() {
        tree.insert(head.clone(), ValueTree::new());
    }
    match tree.get_mut(head) {
        Some(Value::Tree(child)) => set_path(child, rest, value, pair),
        _ => Err(ValuesError::malformed(
            pair,
            format!("'{}' is already set to a scalar", head),
        )),
    }
}
