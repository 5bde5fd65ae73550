//! Attribute sets.
//!
//! Measurements are partitioned into series by their attribute set: an unordered collection of
//! key/value pairs.  [`Attributes`] normalizes a collection of [`KeyValue`]s so that two sets with
//! the same pairs, given in any order, compare and hash equal and can be used directly as the key
//! of an accumulator table.
use std::{borrow::Cow, fmt, sync::Arc};

use ordered_float::OrderedFloat;

/// An owned or borrowed attribute key.
pub type SharedString = Cow<'static, str>;

/// The value of an attribute.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    I64(i64),
    /// A floating-point number.
    F64(OrderedFloat<f64>),
    /// A string.
    String(SharedString),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(OrderedFloat(v))
    }
}

impl From<&'static str> for Value {
    fn from(v: &'static str) -> Self {
        Value::String(Cow::Borrowed(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Cow::Owned(v))
    }
}

/// A single attribute: a key and its value.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct KeyValue {
    key: SharedString,
    value: Value,
}

impl KeyValue {
    /// Creates a [`KeyValue`] from a key and value.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<SharedString>,
        V: Into<Value>,
    {
        KeyValue { key: key.into(), value: value.into() }
    }

    /// Key of this attribute.
    pub fn key(&self) -> &str {
        self.key.as_ref()
    }

    /// Value of this attribute.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A normalized attribute set.
///
/// Pairs are sorted by key, and when a key is given more than once the last value wins.  Cloning
/// is cheap: the pairs are shared.
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Attributes(Arc<[KeyValue]>);

impl Default for Attributes {
    fn default() -> Self {
        Attributes(Arc::from(Vec::new()))
    }
}

impl Attributes {
    /// Creates an empty attribute set.
    pub fn empty() -> Self {
        Attributes::default()
    }

    /// Creates an attribute set from the given pairs.
    pub fn new(pairs: &[KeyValue]) -> Self {
        pairs.iter().cloned().collect()
    }

    /// Whether or not this set has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of attributes in this set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the attributes, ordered by key.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.0.iter()
    }

    /// Gets the value for the given key, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .binary_search_by(|kv| kv.key().cmp(key))
            .ok()
            .map(|idx| &self.0[idx].value)
    }
}

impl FromIterator<KeyValue> for Attributes {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        let mut pairs: Vec<KeyValue> = iter.into_iter().collect();

        // Stable sort keeps insertion order among equal keys, so keeping the last of each run
        // gives last-write-wins semantics.
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<KeyValue> = Vec::with_capacity(pairs.len());
        for kv in pairs {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        Attributes(deduped.into())
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter().map(|kv| (kv.key(), &kv.value))).finish()
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self.0.iter().map(|kv| format!("{}={}", kv.key, kv.value)).collect::<Vec<_>>();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// An allow-list of attribute keys.
///
/// Applied by a view projection before measurements are accumulated: any attribute whose key is
/// not in the list is removed from the set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeFilter {
    keys: Arc<[String]>,
}

impl AttributeFilter {
    /// Creates a filter retaining only the given keys.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        AttributeFilter { keys: keys.into() }
    }

    /// Whether or not the given key is retained.
    pub fn allows(&self, key: &str) -> bool {
        self.keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
    }

    /// Applies the filter, returning the retained set and the attributes that were removed.
    pub fn apply(&self, attributes: &Attributes) -> (Attributes, Vec<KeyValue>) {
        let (kept, dropped): (Vec<KeyValue>, Vec<KeyValue>) =
            attributes.iter().cloned().partition(|kv| self.allows(kv.key()));
        (Attributes(kept.into()), dropped)
    }
}
