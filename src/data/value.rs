use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::fmt;

/// Dynamic value a template is rendered against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Decimal(Decimal),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

/// Named-field access on a structured value.
///
/// Lookups never assume a shape: scalars simply have no fields, lists expose
/// their elements under decimal indexes.
pub trait FieldLookup {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl FieldLookup for Value {
    fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(name),
            Value::List(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }
}

impl Value {
    /// Truthiness used by conditions: null, `false`, zero, and empty
    /// strings/lists/maps are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::I64(v) => *v != 0,
            Value::F64(v) => *v != 0.0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Date(_) | Value::DateTime(_) | Value::DateTimeUtc(_) => true,
        }
    }

    /// `true` for null and for empty strings, lists and maps.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value. Strings count when they are syntactically
    /// numbers, so `"10"` and `10` compare the same way.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            Value::Decimal(d) => d.to_f64(),
            Value::Str(s) if is_numeric(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Whether `s` is an optionally signed integer or decimal literal, with an
/// optional exponent. Surrounding whitespace is ignored.
pub fn is_numeric(s: &str) -> bool {
    let bytes = s.trim().as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == bytes.len()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null | Value::Map(_) => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(dt) => write!(f, "{}", dt),
            Value::DateTimeUtc(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        i64::try_from(v).map_or(Value::F64(v as f64), Value::I64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}
impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTimeUtc(v)
    }
}
impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("10"));
        assert!(is_numeric("-3"));
        assert!(is_numeric("+9.99"));
        assert!(is_numeric(".5"));
        assert!(is_numeric("1e3"));
        assert!(is_numeric(" 42 "));
        assert!(!is_numeric(""));
        assert!(!is_numeric("-"));
        assert!(!is_numeric("1e"));
        assert!(!is_numeric("abc"));
        assert!(!is_numeric("10px"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::I64(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Str("0".into()).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(Value::Decimal(Decimal::new(1, 2)).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::F64(10.0).to_string(), "10");
        assert_eq!(Value::F64(3.14).to_string(), "3.14");
        assert_eq!(Value::from(vec![1, 2, 3]).to_string(), "1,2,3");
        assert_eq!(Value::Decimal(Decimal::new(1999, 2)).to_string(), "19.99");
    }

    #[test]
    fn test_as_number() {
        assert_eq!(Value::Str("10".into()).as_number(), Some(10.0));
        assert_eq!(Value::Str("ten".into()).as_number(), None);
        assert_eq!(Value::Decimal(Decimal::new(15, 1)).as_number(), Some(1.5));
        assert_eq!(Value::Bool(true).as_number(), None);
    }

    #[test]
    fn test_field_lookup() {
        let mut m = IndexMap::new();
        m.insert("@first".to_string(), Value::from("apple"));
        let map = Value::Map(m);
        assert_eq!(map.field("@first"), Some(&Value::from("apple")));
        assert_eq!(map.field("missing"), None);

        let list = Value::from(vec!["a", "b"]);
        assert_eq!(list.field("1"), Some(&Value::from("b")));
        assert_eq!(list.field("x"), None);
        assert_eq!(Value::from("abc").field("len"), None);
    }
}
