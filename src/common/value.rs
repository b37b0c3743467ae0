use crate::collection::Document;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Compare two floats with proper NaN and total ordering.
/// NaN is treated as greater than all other values.
#[inline]
fn num_cmp_float(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Represents a [Document] value. It can be a simple value like [Value::Int],
/// [Value::String] or a complex value like [Value::Document] or [Value::Array].
///
/// # Ordering
///
/// `Value` implements a total order used by every sorted structure in the
/// engine, most importantly the binary indices:
///
/// - `Null` sorts before every other value.
/// - Numbers sort before strings. `Bool`, `Int`, `Float` and `Date` form a
///   single numeric group compared cross-type (`false`/`true` as `0`/`1`,
///   dates by their epoch-millisecond value). `NaN` sorts after every other
///   number.
/// - Strings compare lexicographically.
/// - Arrays compare element-wise, documents entry-wise; both sort after
///   strings.
///
/// # Usage
///
/// Create values using the `From` trait or the `val!` macro:
/// ```text
/// let v1: Value = 42.into();
/// let v2 = Value::from("hello");
/// let v3 = val!(true);
/// ```
#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub enum Value {
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a signed 64-bit integer value.
    Int(i64),
    /// Represents a 64-bit floating point value.
    Float(f64),
    /// Represents a timestamp as epoch milliseconds. Compares as a number so
    /// that serializing it to its numeric form preserves index ordering.
    Date(i64),
    /// Represents a string value.
    String(String),
    /// Represents an array value.
    Array(Vec<Value>),
    /// Represents a nested document value.
    Document(Document),
}

impl Value {
    /// Creates a new [Value] from anything that implements [`Into<Value>`].
    pub fn from<T: Into<Value>>(value: T) -> Value {
        value.into()
    }

    /// Creates a new [Value] from the given [Option] value. [None] converts
    /// to [Value::Null].
    pub fn from_option<T: Into<Value>>(value: Option<T>) -> Value {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for members of the numeric comparison group.
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Date(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Numeric view used by cross-type comparison. `Bool` coerces to `0`/`1`,
    /// `Date` to its epoch milliseconds.
    pub(crate) fn numeric(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Date(ms) => Some(*ms as f64),
            _ => None,
        }
    }

    /// Parse-to-float coercion used by the numerical aggregations. Strings
    /// are parsed; anything non-numeric and non-parsable yields `None`.
    /// Non-finite results are dropped by the caller.
    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Date(ms) => Some(*ms as f64),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Rank of the value's type group in the total order.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Date(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) => 3,
            Value::Document(_) => 4,
        }
    }

    /// Three-way comparison under the engine's total order. This is the
    /// comparator every binary index is sorted by.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        self.cmp(other)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        // numeric group compares cross-type
        if let (Some(a), Some(b)) = (self.numeric(), other.numeric()) {
            // exact path for integer-representable values
            if let (Some(ai), Some(bi)) = (int_repr(self), int_repr(other)) {
                return ai.cmp(&bi);
            }
            return num_cmp_float(a, b);
        }

        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            // unreachable: equal ranks are handled above
            _ => Ordering::Equal,
        }
    }
}

/// Integer representation for `Bool`, `Int` and `Date` values.
#[inline]
fn int_repr(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Int(i) => Some(*i),
        Value::Date(ms) => Some(*ms),
        _ => None,
    }
}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => "null_value".hash(state),
            // numeric values hash canonically so that cross-type equality
            // (Int(5) == Float(5.0) == Bool? ...) stays consistent with Hash
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Date(_) => {
                let f = self.numeric().unwrap_or(0.0);
                if f.is_nan() {
                    2u8.hash(state);
                } else if let Some(i) = int_repr(self) {
                    (0u8, i).hash(state);
                } else if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    (0u8, f as i64).hash(state);
                } else {
                    (1u8, f.to_bits()).hash(state);
                }
            }
            Value::String(v) => v.hash(state),
            Value::Array(v) => v.hash(state),
            Value::Document(v) => v.hash(state),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(ms) => write!(f, "date({})", ms),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Document(d) => write!(f, "{}", d),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        Value::Date(v.timestamp_millis())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        Value::from_option(v)
    }
}

#[macro_export]
macro_rules! val {
    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}
