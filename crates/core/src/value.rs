use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EpochError, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A store-native entity identifier for one vertex or edge.
///
/// Allocated from a persisted counter and never recycled, so an id keeps
/// denoting the same element across every version of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = EpochError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(EntityId)
            .map_err(|_| EpochError::NotFound(format!("malformed entity id {s:?}")))
    }
}

/// Identifier of one committed transaction. Transaction ids are strictly
/// increasing in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// A read view: `None` is the live database, `Some(tx)` the database as of
/// transaction `tx`.
pub type Basis = Option<TxId>;

/// The kind of a graph element. Immutable for the lifetime of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Vertex,
    Edge,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Vertex => "vertex",
            ElementKind::Edge => "edge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vertex" => Some(ElementKind::Vertex),
            "edge" => Some(ElementKind::Edge),
            _ => None,
        }
    }

    /// The keyword stored as the value of the element-type attribute.
    pub fn keyword(self) -> Value {
        Value::Keyword(format!("graph.element.type/{}", self.as_str()))
    }

    pub fn from_keyword(value: &Value) -> Option<Self> {
        match value {
            Value::Keyword(k) => k
                .strip_prefix("graph.element.type/")
                .and_then(ElementKind::parse),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Store-level value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Boolean,
    Long,
    Float,
    Double,
    Instant,
    Ref,
    Keyword,
}

impl ValueType {
    /// The types a user property may carry, in read-resolution order.
    pub const PROPERTY_TYPES: [ValueType; 6] = [
        ValueType::String,
        ValueType::Boolean,
        ValueType::Long,
        ValueType::Float,
        ValueType::Double,
        ValueType::Instant,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Instant => "instant",
            ValueType::Ref => "ref",
            ValueType::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(ValueType::String),
            "boolean" => Some(ValueType::Boolean),
            "long" => Some(ValueType::Long),
            "float" => Some(ValueType::Float),
            "double" => Some(ValueType::Double),
            "instant" => Some(ValueType::Instant),
            "ref" => Some(ValueType::Ref),
            "keyword" => Some(ValueType::Keyword),
            _ => None,
        }
    }

    pub fn is_property_type(self) -> bool {
        Self::PROPERTY_TYPES.contains(&self)
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value in a fact's value position.
///
/// `Ref` and `Keyword` are reserved for structural facts; every other
/// variant can be stored as a user property.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    String(String),
    Boolean(bool),
    Long(i64),
    Float(f32),
    Double(f64),
    Instant(DateTime<Utc>),
    /// A reference to another entity.
    Ref(EntityId),
    /// A namespaced symbolic constant.
    Keyword(String),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::Instant(_) => ValueType::Instant,
            Value::Ref(_) => ValueType::Ref,
            Value::Keyword(_) => ValueType::Keyword,
        }
    }

    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Exact, type-tagged encoding used as the value component of index keys.
    pub(crate) fn index_key(&self) -> String {
        match self {
            Value::String(s) => format!("s:{s}"),
            Value::Boolean(b) => format!("b:{b}"),
            Value::Long(n) => format!("l:{n}"),
            Value::Float(n) => format!("f:{:08x}", n.to_bits()),
            Value::Double(n) => format!("d:{:016x}", n.to_bits()),
            Value::Instant(t) => format!("i:{}", instant_key(t)),
            Value::Ref(id) => format!("r:{:020}", id.0),
            Value::Keyword(k) => format!("k:{k}"),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::Boolean(_) => 1,
            Value::Long(_) => 2,
            Value::Float(_) => 3,
            Value::Double(_) => 4,
            Value::Instant(_) => 5,
            Value::Ref(_) => 6,
            Value::Keyword(_) => 7,
        }
    }
}

/// Fixed-width key for an instant whose byte order is chronological over
/// chrono's whole range: seconds with the sign bit flipped, then nanos.
pub(crate) fn instant_key(t: &DateTime<Utc>) -> String {
    let seconds = (t.timestamp() as u64) ^ (1 << 63);
    format!("{:020}.{:09}", seconds, t.timestamp_subsec_nanos())
}

// Floats compare by `total_cmp`, which is equal exactly when the bit
// patterns are equal, so `Eq`, `Ord` and `Hash` agree.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Instant(a), Value::Instant(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::Keyword(a), Value::Keyword(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::String(s) | Value::Keyword(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Long(n) => n.hash(state),
            Value::Float(n) => n.to_bits().hash(state),
            Value::Double(n) => n.to_bits().hash(state),
            Value::Instant(t) => t.hash(state),
            Value::Ref(id) => id.hash(state),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}
impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Long(i64::from(n))
    }
}
impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float(n)
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Instant(t)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = EpochError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Long(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(EpochError::UnsupportedValueType(format!("number {n}")))
                }
            }
            serde_json::Value::Null => Err(EpochError::UnsupportedValueType("null".into())),
            serde_json::Value::Array(_) => Err(EpochError::UnsupportedValueType("array".into())),
            serde_json::Value::Object(_) => {
                Err(EpochError::UnsupportedValueType("object".into()))
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) | Value::Keyword(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Double(n) => write!(f, "{n}"),
            Value::Instant(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Ref(id) => write!(f, "#{id}"),
        }
    }
}
