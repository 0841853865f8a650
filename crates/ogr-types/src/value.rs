use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::object::ObjectRef;

/// Typed attribute value carried by a [`Node`](crate::Node).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Timestamp(DateTime<Utc>),
    /// Relationship to another node.
    Ref(ObjectRef),
}

impl Value {
    /// Human-readable type name, used in mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view for aggregation. `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_object_ref(&self) -> Option<&ObjectRef> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Total-enough ordering for sorting fetch results.
    ///
    /// Numbers compare numerically across `Int`/`Float`; `Null` sorts first;
    /// values of unrelated types compare by type name so sorting stays
    /// deterministic.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Ref(a), Self::Ref(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.type_name().cmp(b.type_name()),
            },
        }
    }

    /// Canonical string used to compare values for uniqueness constraints.
    ///
    /// `Int(1)` and `Float(1.0)` are distinct keys; uniqueness is per stored
    /// representation.
    pub fn constraint_key(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(b) => format!("b:{b}"),
            Self::Int(i) => format!("i:{i}"),
            Self::Float(f) => format!("f:{}", f.to_bits()),
            Self::Text(s) => format!("s:{s}"),
            Self::Uuid(u) => format!("u:{u}"),
            Self::Timestamp(t) => format!("t:{}", t.timestamp_nanos_opt().unwrap_or_default()),
            Self::Ref(r) => format!("r:{}", r.encode()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Ref(r) => write!(f, "{r}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Self::Ref(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Typed decode of an attribute value.
///
/// Implementations return [`TypeError::Mismatch`] instead of coercing.
pub trait FromValue: Sized {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, TypeError>;
}

fn mismatch(attribute: &str, expected: &str, found: &Value) -> TypeError {
    TypeError::Mismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

macro_rules! impl_from_value {
    ($ty:ty, $expected:literal, $pat:pat => $out:expr) => {
        impl FromValue for $ty {
            fn from_value(attribute: &str, value: &Value) -> Result<Self, TypeError> {
                match value {
                    $pat => Ok($out),
                    other => Err(mismatch(attribute, $expected, other)),
                }
            }
        }
    };
}

impl_from_value!(bool, "bool", Value::Bool(b) => *b);
impl_from_value!(i64, "int", Value::Int(i) => *i);
impl_from_value!(String, "text", Value::Text(s) => s.clone());
impl_from_value!(uuid::Uuid, "uuid", Value::Uuid(u) => *u);
impl_from_value!(DateTime<Utc>, "timestamp", Value::Timestamp(t) => *t);
impl_from_value!(ObjectRef, "ref", Value::Ref(r) => r.clone());

impl FromValue for f64 {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            other => Err(mismatch(attribute, "float", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(attribute, other).map(Some),
        }
    }
}
