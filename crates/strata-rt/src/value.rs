use std::fmt;
use strata_layout::StructureIndex;
use strata_mem::{Scalar, WideInt};

/// Handle of an object in an [`crate::Environment`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// A value moving between the host and typed views.
///
/// Aggregates are referenced through [`Value::Object`]; `List` and `Record`
/// are plain initializers for arrays, slices, structs and unions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Null,
    Bool(bool),
    Int(i128),
    UInt(u128),
    BigInt(WideInt),
    Float(f64),
    /// Name of an enumeration item or error.
    Str(String),
    Object(ObjectId),
    Type(StructureIndex),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
}

impl Value {
    pub fn record<I, S>(fields: I) -> Value
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Record(fields.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        self.to_scalar().and_then(|scalar| scalar.as_i128())
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.to_scalar().map(|scalar| scalar.as_f64())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric and boolean values as accessor input.
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Int(v) => Some(Scalar::Int(*v)),
            Value::UInt(v) => Some(Scalar::UInt(*v)),
            Value::BigInt(v) => Some(Scalar::Wide(v.clone())),
            Value::Float(v) => Some(Scalar::Float(*v)),
            _ => None,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::UInt(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Object(id) => id.to_string(),
            Value::Type(index) => format!("type #{}", index),
            Value::List(items) => format!("list of {}", items.len()),
            Value::Record(fields) => format!("record with {} fields", fields.len()),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(v) => Value::Int(v),
            Scalar::UInt(v) => Value::UInt(v),
            Scalar::Wide(v) => Value::BigInt(v),
            Scalar::Float(v) => Value::Float(v),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i128)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v as i128)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u128)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
