//! The tagged value model.
//!
//! [`Value`] is a discriminated union over every wire-representable kind.
//! Accessors match exhaustively on the active kind; a read through an
//! accessor with no defined conversion path is a recoverable
//! [`ConversionError`], never a silent zero and never undefined access.

use crate::ids::OrbId;

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// No payload; the state produced by [`Value::retype`] and the default.
    Untyped,
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Enumeration value; shares i64 storage with the integer kinds.
    Enum,
    /// IEEE-754 double.
    Float64,
    /// UTF-8 string.
    String,
    /// Ordered list of values.
    Sequence,
    /// Ordered list of named values.
    Record,
    /// Object reference: orb id plus interface type name.
    Instance,
    /// A boxed nested value.
    Any,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Untyped => "untyped",
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Enum => "enum",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Sequence => "sequence",
            Self::Record => "record",
            Self::Instance => "instance",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// Error from reading a [`Value`] through an accessor with no conversion
/// path from the active kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionError {
    /// The value's active kind.
    pub from: Kind,
    /// The kind the accessor asked for.
    pub to: Kind,
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no conversion from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for ConversionError {}

/// A wire-representable value.
///
/// Assignment retypes: constructing from a native value picks the implied
/// kind and drops any prior payload. Integer kinds (`Int32`, `Int64`,
/// `Enum`) widen to i64 through the numeric accessors; strings expose the
/// legacy `strtoll`/`strtod` leading-prefix parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No payload.
    #[default]
    Untyped,
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// Enumeration value in i64 storage.
    Enum(i64),
    /// IEEE-754 double.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    Sequence(Vec<Value>),
    /// Ordered list of named values.
    Record(Vec<(String, Value)>),
    /// Object reference by orb id and interface type name.
    Instance {
        /// The registry id addressing the object.
        orbid: OrbId,
        /// Interface type name, used for stub-side downcasts.
        type_name: String,
    },
    /// A boxed nested value.
    Any(Box<Value>),
}

impl Value {
    /// The active kind.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Untyped => Kind::Untyped,
            Self::Bool(_) => Kind::Bool,
            Self::Int32(_) => Kind::Int32,
            Self::Int64(_) => Kind::Int64,
            Self::Enum(_) => Kind::Enum,
            Self::Float64(_) => Kind::Float64,
            Self::String(_) => Kind::String,
            Self::Sequence(_) => Kind::Sequence,
            Self::Record(_) => Kind::Record,
            Self::Instance { .. } => Kind::Instance,
            Self::Any(_) => Kind::Any,
        }
    }

    /// Reset to the untyped default payload of `kind`, with no conversion.
    ///
    /// Used when a receiver slot is initialized from an unknown or absent
    /// peer value.
    pub fn retype(&mut self, kind: Kind) {
        *self = match kind {
            Kind::Untyped => Self::Untyped,
            Kind::Bool => Self::Bool(false),
            Kind::Int32 => Self::Int32(0),
            Kind::Int64 => Self::Int64(0),
            Kind::Enum => Self::Enum(0),
            Kind::Float64 => Self::Float64(0.0),
            Kind::String => Self::String(String::new()),
            Kind::Sequence => Self::Sequence(Vec::new()),
            Kind::Record => Self::Record(Vec::new()),
            Kind::Instance => Self::Instance {
                orbid: OrbId::new(0),
                type_name: String::new(),
            },
            Kind::Any => Self::Any(Box::new(Self::Untyped)),
        };
    }

    fn conversion_error(&self, to: Kind) -> ConversionError {
        ConversionError {
            from: self.kind(),
            to,
        }
    }

    /// Converting boolean accessor.
    ///
    /// Integers and floats convert by nonzero test; strings by a nonzero
    /// numeric prefix or the literal `true`.
    pub fn as_bool(&self) -> Result<bool, ConversionError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int32(i) => Ok(*i != 0),
            Self::Int64(i) | Self::Enum(i) => Ok(*i != 0),
            Self::Float64(f) => Ok(*f != 0.0),
            Self::String(s) => Ok(s.trim() == "true" || parse_i64_prefix(s) != 0),
            Self::Any(inner) => inner.as_bool(),
            _ => Err(self.conversion_error(Kind::Bool)),
        }
    }

    /// Converting 64-bit integer accessor.
    ///
    /// Booleans, enums and 32-bit integers widen; floats truncate toward
    /// zero; strings parse a leading integer prefix (`strtoll` semantics,
    /// yielding 0 when no prefix exists).
    pub fn as_int64(&self) -> Result<i64, ConversionError> {
        match self {
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Int32(i) => Ok(i64::from(*i)),
            Self::Int64(i) | Self::Enum(i) => Ok(*i),
            Self::Float64(f) => Ok(*f as i64),
            Self::String(s) => Ok(parse_i64_prefix(s)),
            Self::Any(inner) => inner.as_int64(),
            _ => Err(self.conversion_error(Kind::Int64)),
        }
    }

    /// Converting 32-bit integer accessor; wider storage wraps.
    pub fn as_int32(&self) -> Result<i32, ConversionError> {
        self.as_int64().map(|i| i as i32).map_err(|mut e| {
            e.to = Kind::Int32;
            e
        })
    }

    /// Converting float accessor.
    ///
    /// Integers widen per IEEE-754; strings parse a leading decimal prefix
    /// (`strtod` semantics, yielding 0.0 when no prefix exists).
    pub fn as_float64(&self) -> Result<f64, ConversionError> {
        match self {
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Int32(i) => Ok(f64::from(*i)),
            Self::Int64(i) | Self::Enum(i) => Ok(*i as f64),
            Self::Float64(f) => Ok(*f),
            Self::String(s) => Ok(parse_f64_prefix(s)),
            Self::Any(inner) => inner.as_float64(),
            _ => Err(self.conversion_error(Kind::Float64)),
        }
    }

    /// Converting string accessor.
    ///
    /// Strings return their literal content; scalars format to their
    /// canonical decimal form.
    pub fn as_string(&self) -> Result<String, ConversionError> {
        match self {
            Self::Bool(b) => Ok(b.to_string()),
            Self::Int32(i) => Ok(i.to_string()),
            Self::Int64(i) | Self::Enum(i) => Ok(i.to_string()),
            Self::Float64(f) => Ok(f.to_string()),
            Self::String(s) => Ok(s.clone()),
            Self::Any(inner) => inner.as_string(),
            _ => Err(self.conversion_error(Kind::String)),
        }
    }

    /// Borrow the elements of a sequence value.
    pub fn as_sequence(&self) -> Result<&[Value], ConversionError> {
        match self {
            Self::Sequence(items) => Ok(items),
            Self::Any(inner) => inner.as_sequence(),
            _ => Err(self.conversion_error(Kind::Sequence)),
        }
    }

    /// Borrow the named fields of a record value.
    pub fn as_record(&self) -> Result<&[(String, Value)], ConversionError> {
        match self {
            Self::Record(fields) => Ok(fields),
            Self::Any(inner) => inner.as_record(),
            _ => Err(self.conversion_error(Kind::Record)),
        }
    }

    /// Read an object reference as `(orbid, type_name)`.
    pub fn as_instance(&self) -> Result<(OrbId, &str), ConversionError> {
        match self {
            Self::Instance { orbid, type_name } => Ok((*orbid, type_name)),
            Self::Any(inner) => inner.as_instance(),
            _ => Err(self.conversion_error(Kind::Instance)),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

/// Leading-integer-prefix parse with `strtoll` semantics: skip leading
/// whitespace, accept an optional sign, consume digits, yield 0 when no
/// digit follows. Overflow saturates.
fn parse_i64_prefix(s: &str) -> i64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut pos = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            pos = 1;
            true
        }
        Some(b'+') => {
            pos = 1;
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    let mut saw_digit = false;
    while let Some(d) = bytes.get(pos).and_then(|b| (*b as char).to_digit(10)) {
        saw_digit = true;
        let digit = i64::from(d);
        value = if negative {
            value
                .checked_mul(10)
                .and_then(|v| v.checked_sub(digit))
                .unwrap_or(i64::MIN)
        } else {
            value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .unwrap_or(i64::MAX)
        };
        pos += 1;
    }
    if saw_digit { value } else { 0 }
}

/// Leading-decimal-prefix parse with `strtod` semantics: consume the
/// longest prefix that parses as a decimal number, yield 0.0 when none
/// does.
fn parse_f64_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    while end < bytes.len()
        && matches!(bytes[end], b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E')
    {
        end += 1;
    }
    // Longest-valid-prefix: back off until the slice parses.
    while end > 0 {
        if let Ok(f) = s[..end].parse::<f64>() {
            return f;
        }
        end -= 1;
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_construction() {
        assert_eq!(Value::from(true).kind(), Kind::Bool);
        assert_eq!(Value::from(7i32).kind(), Kind::Int32);
        assert_eq!(Value::from(7i64).kind(), Kind::Int64);
        assert_eq!(Value::from(0.5).kind(), Kind::Float64);
        assert_eq!(Value::from("x").kind(), Kind::String);
        assert_eq!(Value::Enum(3).kind(), Kind::Enum);
    }

    #[test]
    fn integer_kinds_widen_to_int64() {
        assert_eq!(Value::Bool(true).as_int64().unwrap(), 1);
        assert_eq!(Value::Int32(-9).as_int64().unwrap(), -9);
        assert_eq!(Value::Enum(4).as_int64().unwrap(), 4);
        assert_eq!(Value::Float64(3.9).as_int64().unwrap(), 3);
        assert_eq!(Value::Float64(-3.9).as_int64().unwrap(), -3);
    }

    #[test]
    fn string_numeric_accessors_parse_leading_prefix() {
        assert_eq!(Value::from("42abc").as_int64().unwrap(), 42);
        assert_eq!(Value::from("  -17").as_int64().unwrap(), -17);
        assert_eq!(Value::from("abc").as_int64().unwrap(), 0);
        assert_eq!(Value::from("2.5x").as_float64().unwrap(), 2.5);
        assert_eq!(Value::from("1e3!").as_float64().unwrap(), 1000.0);
        assert_eq!(Value::from("nope").as_float64().unwrap(), 0.0);
    }

    #[test]
    fn string_accessor_returns_literal_content() {
        assert_eq!(Value::from("42abc").as_string().unwrap(), "42abc");
        assert_eq!(Value::Int64(14).as_string().unwrap(), "14");
    }

    #[test]
    fn unsupported_conversions_are_errors() {
        let seq = Value::Sequence(vec![Value::Int64(1)]);
        let err = seq.as_int64().unwrap_err();
        assert_eq!(err.from, Kind::Sequence);
        assert_eq!(err.to, Kind::Int64);
        assert!(Value::Untyped.as_string().is_err());
        assert!(Value::Int64(1).as_instance().is_err());
    }

    #[test]
    fn any_delegates_to_inner_value() {
        let boxed = Value::Any(Box::new(Value::Int32(5)));
        assert_eq!(boxed.as_int64().unwrap(), 5);
        assert_eq!(boxed.kind(), Kind::Any);
    }

    #[test]
    fn retype_resets_payload() {
        let mut v = Value::from("hello");
        v.retype(Kind::Int64);
        assert_eq!(v, Value::Int64(0));
        v.retype(Kind::Untyped);
        assert_eq!(v, Value::Untyped);
    }

    #[test]
    fn saturating_integer_prefix_parse() {
        assert_eq!(
            Value::from("99999999999999999999").as_int64().unwrap(),
            i64::MAX
        );
        assert_eq!(
            Value::from("-99999999999999999999").as_int64().unwrap(),
            i64::MIN
        );
    }
}
