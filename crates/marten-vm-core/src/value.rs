//! JavaScript values
//!
//! Values are a small tagged enum. Numbers that are integral and fit in 32
//! bits are kept as `Int32` so the arithmetic fast paths can stay in integer
//! space; everything else numeric is a `Double`.

use std::sync::Arc;

use marten_vm_bytecode::ConstantValue;

use crate::object::JsObject;

/// A JavaScript value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Integral number in int32 range (never `-0`)
    Int32(i32),
    /// Any other number
    Double(f64),
    /// Immutable string
    String(Arc<str>),
    /// Object reference
    Object(Arc<JsObject>),
}

impl Value {
    /// Canonical number value
    #[inline]
    pub fn number(n: f64) -> Self {
        let i = n as i32;
        if i as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            Value::Int32(i)
        } else {
            Value::Double(n)
        }
    }

    /// String value
    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    /// Value for a literal constant
    pub fn from_constant(constant: &ConstantValue) -> Self {
        match constant {
            ConstantValue::Undefined => Value::Undefined,
            ConstantValue::Null => Value::Null,
            ConstantValue::Boolean(b) => Value::Boolean(*b),
            ConstantValue::Int32(i) => Value::Int32(*i),
            ConstantValue::Double(d) => Value::Double(*d),
            ConstantValue::String(s) => Value::string(s.as_str()),
        }
    }

    /// Is `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Is `undefined` or `null`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Is a number
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Double(_))
    }

    /// Is a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Object reference, if any
    #[inline]
    pub fn as_object(&self) -> Option<&Arc<JsObject>> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// String contents, if any
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Int32 payload, if this is an int32
    #[inline]
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric payload of a number value
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Int32(i) => *i != 0,
            Value::Double(d) => !(d.is_nan() || *d == 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// ToNumber
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => *b as i32 as f64,
            Value::Int32(i) => *i as f64,
            Value::Double(d) => *d,
            Value::String(s) => string_to_number(s),
            Value::Object(object) => string_to_number(&object.default_string()),
        }
    }

    /// ToInt32
    pub fn to_int32(&self) -> i32 {
        match self {
            Value::Int32(i) => *i,
            other => f64_to_int32(other.to_number()),
        }
    }

    /// ToUint32
    pub fn to_uint32(&self) -> u32 {
        self.to_int32() as u32
    }

    /// ToString
    pub fn to_js_string(&self) -> Arc<str> {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Boolean(true) => "true".into(),
            Value::Boolean(false) => "false".into(),
            Value::Int32(i) => itoa::Buffer::new().format(*i).into(),
            Value::Double(d) => number_to_string(*d).into(),
            Value::String(s) => Arc::clone(s),
            Value::Object(object) => object.default_string().into(),
        }
    }

    /// Result of the `typeof` operator
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Int32(_) | Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Object(object) if object.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.to_number() == b.to_number(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Object(_), b) => Value::string(self.to_js_string()).loose_equals(b),
            (a, Value::Object(_)) => a.loose_equals(&Value::string(other.to_js_string())),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (a, b) => a.to_number() == b.to_number(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Arc<JsObject>> for Value {
    fn from(object: Arc<JsObject>) -> Self {
        Value::Object(object)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int32(i) => write!(f, "{i}"),
            Value::Double(d) => f.write_str(&number_to_string(*d)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(object) => write!(f, "[object {}]", object.class_name()),
        }
    }
}

/// Number to string conversion.
///
/// Integral values below 1e21 print without a fraction; other finite values
/// use the shortest round-tripping representation.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        if n.abs() < 9e15 {
            return itoa::Buffer::new().format(n as i64).to_string();
        }
        return format!("{n:.0}");
    }
    let mut buffer = ryu::Buffer::new();
    let s = buffer.format_finite(n);
    // ryu writes `1e21` and `1e-7`; JavaScript wants an explicit sign.
    match s.find('e') {
        Some(e) if !s[e + 1..].starts_with('-') => format!("{}e+{}", &s[..e], &s[e + 1..]),
        _ => s.to_string(),
    }
}

/// String to number conversion
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// ToInt32 on a raw double
pub fn f64_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    modulo as u32 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_canonicalization() {
        assert!(matches!(Value::number(3.0), Value::Int32(3)));
        assert!(matches!(Value::number(-0.0), Value::Double(_)));
        assert!(matches!(Value::number(0.5), Value::Double(_)));
        assert!(matches!(Value::number(4_294_967_296.0), Value::Double(_)));
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(-2.5), "-2.5");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert!(string_to_number("abc").is_nan());
        assert!(string_to_number("inf").is_nan());
    }

    #[test]
    fn test_to_int32_wraps() {
        assert_eq!(f64_to_int32(4_294_967_297.0), 1);
        assert_eq!(f64_to_int32(-1.5), -1);
        assert_eq!(f64_to_int32(f64::NAN), 0);
        assert_eq!(f64_to_int32(2_147_483_648.0), i32::MIN);
    }

    #[test]
    fn test_equality() {
        assert!(Value::Int32(1).strict_equals(&Value::Double(1.0)));
        assert!(!Value::Int32(1).strict_equals(&Value::string("1")));
        assert!(Value::Int32(1).loose_equals(&Value::string("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Int32(0)));
        assert!(!Value::Double(f64::NAN).strict_equals(&Value::Double(f64::NAN)));
    }

    #[test]
    fn test_type_of_primitives() {
        assert_eq!(Value::Null.type_of(), "object");
        assert_eq!(Value::Double(1.5).type_of(), "number");
        assert_eq!(Value::string("x").type_of(), "string");
    }
}
