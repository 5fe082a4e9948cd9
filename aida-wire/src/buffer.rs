//! Field buffers: the wire message container.
//!
//! A [`FieldBuffer`] is an append-only sequence of tagged values forming one
//! message. The first four values are the header (message id, connection
//! routing, type hash high/low); everything after is the body, appended in
//! exactly the order the matching decode will read it. [`FieldReader`] is a
//! non-owning cursor that consumes values front to back.
//!
//! The byte encoding is one tag byte per value followed by a fixed-width or
//! length-prefixed payload; all multi-byte integers are little-endian.
//! Decoding is fully bounds-checked and rejects unknown tags, non-UTF-8
//! strings, truncated payloads, and over-deep nesting.

use crate::ids::{ConnectionId, MessageKind, MsgId, OrbId, TypeHash};
use crate::value::{ConversionError, Kind, Value};

/// Number of header values at the front of every message.
pub const HEADER_LEN: usize = 4;

/// Nesting limit for sequence/record/any payloads during decode.
const MAX_DEPTH: usize = 64;

const TAG_UNTYPED: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_ENUM: u8 = 4;
const TAG_FLOAT64: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_SEQUENCE: u8 = 7;
const TAG_RECORD: u8 = 8;
const TAG_INSTANCE: u8 = 9;
const TAG_ANY: u8 = 10;

/// A violation of the wire protocol.
///
/// Every variant aborts dispatch of the offending message only; the
/// connection that observed it stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Byte stream ended inside a value payload.
    Truncated,
    /// A value tag outside the known range.
    UnknownValueTag(u8),
    /// A message-id kind discriminant outside the known range.
    UnknownMessageKind(u8),
    /// String payload was not valid UTF-8.
    InvalidUtf8,
    /// Sequence/record/any nesting deeper than the decoder accepts.
    DepthExceeded,
    /// Buffer shorter than the four-value header.
    MissingHeader(usize),
    /// Cursor advanced past the last value.
    ReadPastEnd,
    /// Declared argument count does not match the values present.
    ArityMismatch {
        /// Values the signature declares.
        expected: usize,
        /// Values actually remaining.
        found: usize,
    },
    /// A value could not convert to the kind the signature declares.
    BadValue(ConversionError),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "message truncated"),
            Self::UnknownValueTag(tag) => write!(f, "unknown value tag {tag}"),
            Self::UnknownMessageKind(raw) => write!(f, "unknown message kind {raw}"),
            Self::InvalidUtf8 => write!(f, "string payload is not valid UTF-8"),
            Self::DepthExceeded => write!(f, "value nesting exceeds decoder limit"),
            Self::MissingHeader(n) => {
                write!(f, "message has {n} values, header needs {HEADER_LEN}")
            }
            Self::ReadPastEnd => write!(f, "read past end of message"),
            Self::ArityMismatch { expected, found } => {
                write!(f, "arity mismatch: expected {expected} values, found {found}")
            }
            Self::BadValue(e) => write!(f, "bad value: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadValue(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConversionError> for ProtocolError {
    fn from(e: ConversionError) -> Self {
        Self::BadValue(e)
    }
}

/// One wire message under construction or under dispatch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldBuffer {
    values: Vec<Value>,
}

impl FieldBuffer {
    /// Allocate a buffer sized for the header plus `n_args` body values and
    /// write the four header values in fixed order.
    pub fn new_message(
        kind: MessageKind,
        serial: u64,
        conn: ConnectionId,
        hash: TypeHash,
        n_args: usize,
    ) -> Self {
        let mut values = Vec::with_capacity(HEADER_LEN + n_args);
        values.push(Value::Int64(MsgId::new(kind, serial).raw() as i64));
        values.push(Value::Int64(conn.raw() as i64));
        values.push(Value::Int64(hash.hi as i64));
        values.push(Value::Int64(hash.lo as i64));
        Self { values }
    }

    /// Append one value, preserving append order. That order is the
    /// implicit schema the matching reader relies on.
    pub fn add(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Number of values, header included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the buffer holds no values at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn header_u64(&self, index: usize) -> Result<u64, ProtocolError> {
        if self.values.len() < HEADER_LEN {
            return Err(ProtocolError::MissingHeader(self.values.len()));
        }
        Ok(self.values[index].as_int64()? as u64)
    }

    /// The message id from the first header slot.
    pub fn msg_id(&self) -> Result<MsgId, ProtocolError> {
        self.header_u64(0).map(MsgId::from)
    }

    /// The message kind encoded in the message id.
    pub fn kind(&self) -> Result<MessageKind, ProtocolError> {
        self.msg_id()?.kind()
    }

    /// The receiver-side routing id from the second header slot.
    pub fn routing(&self) -> Result<ConnectionId, ProtocolError> {
        self.header_u64(1).map(ConnectionId::from)
    }

    /// The 128-bit type hash from the third and fourth header slots.
    pub fn type_hash(&self) -> Result<TypeHash, ProtocolError> {
        Ok(TypeHash::new(self.header_u64(2)?, self.header_u64(3)?))
    }

    /// Repurpose a request buffer in place as a response of `kind`.
    ///
    /// Overwrites the message-kind tag and type hash, preserves the
    /// connection routing slot, and drops any body values. Avoids a second
    /// allocation when turning a call buffer into its result buffer.
    pub fn renew_into_result(
        &mut self,
        kind: MessageKind,
        serial: u64,
        hash: TypeHash,
    ) -> Result<(), ProtocolError> {
        if self.values.len() < HEADER_LEN {
            return Err(ProtocolError::MissingHeader(self.values.len()));
        }
        self.values.truncate(HEADER_LEN);
        self.values[0] = Value::Int64(MsgId::new(kind, serial).raw() as i64);
        self.values[2] = Value::Int64(hash.hi as i64);
        self.values[3] = Value::Int64(hash.lo as i64);
        Ok(())
    }

    /// A cursor positioned at the first value.
    pub fn reader(&self) -> FieldReader<'_> {
        FieldReader {
            values: &self.values,
            pos: 0,
        }
    }

    /// Encode to the byte form carried inside one transport frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 9);
        for value in &self.values {
            encode_value(value, &mut out);
        }
        out
    }

    /// Decode a whole message from its byte form.
    ///
    /// Rejects truncated payloads, unknown tags, invalid UTF-8, and
    /// buffers shorter than the header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut values = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            values.push(decode_value(bytes, &mut pos, 0)?);
        }
        if values.len() < HEADER_LEN {
            return Err(ProtocolError::MissingHeader(values.len()));
        }
        let buffer = Self { values };
        // Surface a bad kind discriminant at decode time, not at dispatch.
        buffer.kind()?;
        Ok(buffer)
    }
}

/// Non-owning cursor over a [`FieldBuffer`].
///
/// Tracks read position; [`remaining`](Self::remaining) backs the arity
/// guard handlers run before unmarshalling. Reading past the end is a
/// protocol error, never a panic.
#[derive(Debug, Clone)]
pub struct FieldReader<'buf> {
    values: &'buf [Value],
    pos: usize,
}

impl<'buf> FieldReader<'buf> {
    /// Number of unread values.
    pub fn remaining(&self) -> usize {
        self.values.len() - self.pos
    }

    /// Assert exactly `expected` values remain.
    ///
    /// A mismatch signals caller/callee stub skew, not corrupt data.
    pub fn check_arity(&self, expected: usize) -> Result<(), ProtocolError> {
        let found = self.remaining();
        if found != expected {
            return Err(ProtocolError::ArityMismatch { expected, found });
        }
        Ok(())
    }

    /// Advance past one value without materializing it.
    pub fn skip(&mut self) -> Result<(), ProtocolError> {
        if self.pos >= self.values.len() {
            return Err(ProtocolError::ReadPastEnd);
        }
        self.pos += 1;
        Ok(())
    }

    /// Advance past the four header values.
    pub fn skip_header(&mut self) -> Result<(), ProtocolError> {
        if self.values.len() < HEADER_LEN {
            return Err(ProtocolError::MissingHeader(self.values.len()));
        }
        self.pos = self.pos.max(HEADER_LEN);
        Ok(())
    }

    /// Read one value and advance.
    pub fn pop(&mut self) -> Result<&'buf Value, ProtocolError> {
        let value = self.values.get(self.pos).ok_or(ProtocolError::ReadPastEnd)?;
        self.pos += 1;
        Ok(value)
    }

    /// Read and convert to bool.
    pub fn pop_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.pop()?.as_bool()?)
    }

    /// Read and convert to i32.
    pub fn pop_int32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.pop()?.as_int32()?)
    }

    /// Read and convert to i64.
    pub fn pop_int64(&mut self) -> Result<i64, ProtocolError> {
        Ok(self.pop()?.as_int64()?)
    }

    /// Read an id-bearing value as u64.
    pub fn pop_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(self.pop()?.as_int64()? as u64)
    }

    /// Read and convert to f64.
    pub fn pop_float64(&mut self) -> Result<f64, ProtocolError> {
        Ok(self.pop()?.as_float64()?)
    }

    /// Read and convert to an owned string.
    pub fn pop_string(&mut self) -> Result<String, ProtocolError> {
        Ok(self.pop()?.as_string()?)
    }

    /// Read an object reference.
    pub fn pop_instance(&mut self) -> Result<(OrbId, &'buf str), ProtocolError> {
        Ok(self.pop()?.as_instance()?)
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Untyped => out.push(TAG_UNTYPED),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int32(i) => {
            out.push(TAG_INT32);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Int64(i) => {
            out.push(TAG_INT64);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Enum(i) => {
            out.push(TAG_ENUM);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float64(f) => {
            out.push(TAG_FLOAT64);
            out.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            encode_str(s, out);
        }
        Value::Sequence(items) => {
            out.push(TAG_SEQUENCE);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Record(fields) => {
            out.push(TAG_RECORD);
            out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
            for (name, field) in fields {
                encode_str(name, out);
                encode_value(field, out);
            }
        }
        Value::Instance { orbid, type_name } => {
            out.push(TAG_INSTANCE);
            out.extend_from_slice(&orbid.raw().to_le_bytes());
            encode_str(type_name, out);
        }
        Value::Any(inner) => {
            out.push(TAG_ANY);
            encode_value(inner, out);
        }
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], ProtocolError> {
    let end = pos.checked_add(n).ok_or(ProtocolError::Truncated)?;
    if end > bytes.len() {
        return Err(ProtocolError::Truncated);
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn take_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, ProtocolError> {
    let raw = take(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn take_u64(bytes: &[u8], pos: &mut usize) -> Result<u64, ProtocolError> {
    let raw = take(bytes, pos, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

fn decode_str(bytes: &[u8], pos: &mut usize) -> Result<String, ProtocolError> {
    let len = take_u32(bytes, pos)? as usize;
    let raw = take(bytes, pos, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn decode_value(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Value, ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::DepthExceeded);
    }
    let tag = take(bytes, pos, 1)?[0];
    Ok(match tag {
        TAG_UNTYPED => Value::Untyped,
        TAG_BOOL => Value::Bool(take(bytes, pos, 1)?[0] != 0),
        TAG_INT32 => {
            let raw = take(bytes, pos, 4)?;
            Value::Int32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        }
        TAG_INT64 => Value::Int64(take_u64(bytes, pos)? as i64),
        TAG_ENUM => Value::Enum(take_u64(bytes, pos)? as i64),
        TAG_FLOAT64 => Value::Float64(f64::from_bits(take_u64(bytes, pos)?)),
        TAG_STRING => Value::String(decode_str(bytes, pos)?),
        TAG_SEQUENCE => {
            let count = take_u32(bytes, pos)? as usize;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(decode_value(bytes, pos, depth + 1)?);
            }
            Value::Sequence(items)
        }
        TAG_RECORD => {
            let count = take_u32(bytes, pos)? as usize;
            let mut fields = Vec::new();
            for _ in 0..count {
                let name = decode_str(bytes, pos)?;
                let field = decode_value(bytes, pos, depth + 1)?;
                fields.push((name, field));
            }
            Value::Record(fields)
        }
        TAG_INSTANCE => {
            let orbid = OrbId::new(take_u64(bytes, pos)?);
            let type_name = decode_str(bytes, pos)?;
            Value::Instance { orbid, type_name }
        }
        TAG_ANY => Value::Any(Box::new(decode_value(bytes, pos, depth + 1)?)),
        other => return Err(ProtocolError::UnknownValueTag(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> FieldBuffer {
        let mut fb = FieldBuffer::new_message(
            MessageKind::Call,
            5,
            ConnectionId::new(3),
            TypeHash::new(0x1111, 0x2222),
            2,
        );
        fb.add(Value::Int64(42));
        fb.add(Value::from("hello"));
        fb
    }

    #[test]
    fn header_is_written_in_fixed_order() {
        let fb = sample_message();
        assert_eq!(fb.kind().unwrap(), MessageKind::Call);
        assert_eq!(fb.msg_id().unwrap().serial(), 5);
        assert_eq!(fb.routing().unwrap(), ConnectionId::new(3));
        assert_eq!(fb.type_hash().unwrap(), TypeHash::new(0x1111, 0x2222));
    }

    #[test]
    fn round_trip_every_kind() {
        let mut fb = FieldBuffer::new_message(
            MessageKind::Call,
            1,
            ConnectionId::ANY,
            TypeHash::new(9, 9),
            0,
        );
        fb.add(Value::Untyped);
        fb.add(Value::Bool(true));
        fb.add(Value::Int32(i32::MIN));
        fb.add(Value::Int64(i64::MAX));
        fb.add(Value::Enum(-3));
        fb.add(Value::Float64(-0.0));
        fb.add(Value::Float64(f64::MIN_POSITIVE));
        fb.add(Value::String("grüße".into()));
        fb.add(Value::Sequence(vec![Value::Int64(1), Value::from("two")]));
        fb.add(Value::Record(vec![
            ("x".into(), Value::Float64(0.5)),
            ("y".into(), Value::Bool(false)),
        ]));
        fb.add(Value::Instance {
            orbid: OrbId::new(42),
            type_name: "Aida::Widget".into(),
        });
        fb.add(Value::Any(Box::new(Value::Sequence(vec![Value::Enum(7)]))));

        let decoded = FieldBuffer::from_bytes(&fb.to_bytes()).unwrap();
        assert_eq!(decoded, fb);
    }

    #[test]
    fn float_round_trip_is_bit_exact() {
        let mut fb = FieldBuffer::new_message(
            MessageKind::Call,
            1,
            ConnectionId::ANY,
            TypeHash::default(),
            1,
        );
        fb.add(Value::Float64(f64::NAN));
        let decoded = FieldBuffer::from_bytes(&fb.to_bytes()).unwrap();
        let mut reader = decoded.reader();
        reader.skip_header().unwrap();
        let bits = reader.pop_float64().unwrap().to_bits();
        assert_eq!(bits, f64::NAN.to_bits());
    }

    #[test]
    fn arity_guard_rejects_mismatch() {
        let fb = sample_message();
        let mut reader = fb.reader();
        reader.skip_header().unwrap();
        assert_eq!(reader.remaining(), 2);
        assert_eq!(
            reader.check_arity(3),
            Err(ProtocolError::ArityMismatch {
                expected: 3,
                found: 2
            })
        );
        assert!(reader.check_arity(2).is_ok());
    }

    #[test]
    fn reading_past_end_is_an_error() {
        let fb = sample_message();
        let mut reader = fb.reader();
        reader.skip_header().unwrap();
        reader.pop_int64().unwrap();
        reader.pop_string().unwrap();
        assert_eq!(reader.pop_int64(), Err(ProtocolError::ReadPastEnd));
        assert_eq!(reader.skip(), Err(ProtocolError::ReadPastEnd));
    }

    #[test]
    fn pop_converts_with_value_rules() {
        let fb = sample_message();
        let mut reader = fb.reader();
        reader.skip_header().unwrap();
        // Int64 body value read through the float accessor.
        assert_eq!(reader.pop_float64().unwrap(), 42.0);
        // String with no numeric prefix parses to 0.
        assert_eq!(reader.pop_int64().unwrap(), 0);
    }

    #[test]
    fn renew_into_result_preserves_routing() {
        let mut fb = sample_message();
        fb.renew_into_result(MessageKind::CallResult, 5, TypeHash::new(0x1111, 0x2222))
            .unwrap();
        assert_eq!(fb.kind().unwrap(), MessageKind::CallResult);
        assert_eq!(fb.msg_id().unwrap().serial(), 5);
        assert_eq!(fb.routing().unwrap(), ConnectionId::new(3));
        assert_eq!(fb.len(), HEADER_LEN, "body values are dropped");
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = sample_message().to_bytes();
        for cut in 1..bytes.len() {
            let outcome = FieldBuffer::from_bytes(&bytes[..cut]);
            assert!(outcome.is_err(), "cut at {cut} must not decode");
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = sample_message().to_bytes();
        let last_value_tag = bytes.len() - (4 + "hello".len() + 1);
        bytes[last_value_tag] = 0x7f;
        assert_eq!(
            FieldBuffer::from_bytes(&bytes),
            Err(ProtocolError::UnknownValueTag(0x7f))
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut bytes = sample_message().to_bytes();
        let len = bytes.len();
        bytes[len - 1] = 0xff;
        assert_eq!(
            FieldBuffer::from_bytes(&bytes),
            Err(ProtocolError::InvalidUtf8)
        );
    }

    #[test]
    fn headerless_bytes_are_rejected() {
        let mut out = Vec::new();
        encode_value(&Value::Int64(1), &mut out);
        assert_eq!(
            FieldBuffer::from_bytes(&out),
            Err(ProtocolError::MissingHeader(1))
        );
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let mut bytes = sample_message().to_bytes();
        bytes.extend(std::iter::repeat(TAG_ANY).take(MAX_DEPTH + 2));
        bytes.push(TAG_UNTYPED);
        assert_eq!(
            FieldBuffer::from_bytes(&bytes),
            Err(ProtocolError::DepthExceeded)
        );
    }
}
