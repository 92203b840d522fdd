use crate::error::Error;
use internment::Intern;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

pub use record::Record;

pub mod record;

/// A single decoded field value.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Value {
    Bytes(Vec<u8>),
    String(String),
    UnsignedInteger(u64),
    SignedInteger(i64),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
    Boolean(bool),
    Enum(EnumValue),
    Flags(FlagsValue),
    List(Vec<Value>),
    Record(Record),
    /// Produced by a conditional field whose condition did not hold.
    Absent,
}

/// An enumeration member: the backing integer and its label, when known.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: i64,
    pub label: Option<Intern<String>>,
}

/// A flag set: the raw bits and the labels of all set flags.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct FlagsValue {
    pub bits: u64,
    pub labels: Vec<Intern<String>>,
}

impl Value {
    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::UnsignedInteger(_) => "unsigned integer",
            Value::SignedInteger(_) => "signed integer",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Boolean(_) => "boolean",
            Value::Enum(_) => "enum member",
            Value::Flags(_) => "flag set",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Absent => "absent",
        }
    }

    /// Truthiness used by conditional fields: numeric zero, empty sequences,
    /// and the absent sentinel are false; everything else is true.
    ///
    /// Note that a non-empty byte string is always true, including a single
    /// NUL byte.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bytes(b) => !b.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::UnsignedInteger(v) => *v != 0,
            Value::SignedInteger(v) => *v != 0,
            Value::F32(v) => v.0 != 0.0,
            Value::F64(v) => v.0 != 0.0,
            Value::Boolean(b) => *b,
            Value::Enum(e) => e.value != 0,
            Value::Flags(f) => f.bits != 0,
            Value::List(l) => !l.is_empty(),
            Value::Record(_) => true,
            Value::Absent => false,
        }
    }

    /// Loose equality for switch-case lookup: an enum member also matches
    /// its label string or backing integer, and signedness differences
    /// between equal integers are ignored.
    pub fn matches_key(&self, key: &Value) -> bool {
        if self == key {
            return true;
        }
        match (self, key) {
            (Value::Enum(e), Value::String(s)) => e.label.is_some_and(|l| l.as_str() == s),
            (Value::Enum(e), Value::SignedInteger(v)) => e.value == *v,
            (Value::Enum(e), Value::UnsignedInteger(v)) => {
                i64::try_from(*v).is_ok_and(|v| e.value == v)
            }
            (Value::UnsignedInteger(a), Value::SignedInteger(b)) => {
                i64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Value::SignedInteger(a), Value::UnsignedInteger(b)) => {
                i64::try_from(*b).is_ok_and(|b| *a == b)
            }
            _ => false,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UnsignedInteger(v) => Some(*v),
            Value::SignedInteger(v) => u64::try_from(*v).ok(),
            Value::Boolean(b) => Some(u64::from(*b)),
            Value::Enum(e) => u64::try_from(e.value).ok(),
            Value::Flags(f) => Some(f.bits),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UnsignedInteger(v) => i64::try_from(*v).ok(),
            Value::SignedInteger(v) => Some(*v),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Enum(e) => Some(e.value),
            Value::Flags(f) => i64::try_from(f.bits).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(f64::from(v.0)),
            Value::F64(v) => Some(v.0),
            Value::UnsignedInteger(v) => Some(*v as f64),
            Value::SignedInteger(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// Conversion from a context value to a typed dynamic-attribute result.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        value
            .as_i64()
            .ok_or_else(|| Error::Config(format!("expected an integer, found {}", value.kind())))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        value.as_u64().ok_or_else(|| {
            Error::Config(format!(
                "expected an unsigned integer, found {}",
                value.kind()
            ))
        })
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.is_truthy())
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UnsignedInteger(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UnsignedInteger(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UnsignedInteger(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UnsignedInteger(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::SignedInteger(v.into())
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SignedInteger(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::SignedInteger(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::SignedInteger(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(OrderedFloat(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(OrderedFloat(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(v: &[u8; N]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<FlagsValue> for Value {
    fn from(v: FlagsValue) -> Self {
        Value::Flags(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::UnsignedInteger(0).is_truthy());
        assert!(Value::UnsignedInteger(1).is_truthy());
        assert!(!Value::SignedInteger(0).is_truthy());
        assert!(!Value::Bytes(vec![]).is_truthy());
        // A single NUL byte is a non-empty byte string, hence true.
        assert!(Value::Bytes(vec![0]).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Absent.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::Absent]).is_truthy());
    }

    #[test]
    fn switch_key_matching() {
        let member = Value::Enum(EnumValue {
            value: 2,
            label: Some(Intern::new("B".to_owned())),
        });
        assert!(member.matches_key(&Value::from("B")));
        assert!(member.matches_key(&Value::from(2u8)));
        assert!(member.matches_key(&Value::from(2i64)));
        assert!(!member.matches_key(&Value::from("A")));
        assert!(Value::UnsignedInteger(7).matches_key(&Value::SignedInteger(7)));
    }
}
