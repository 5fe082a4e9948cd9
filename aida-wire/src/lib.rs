#![deny(unsafe_code)]

//! Wire-level types for the Aida remote-object protocol.
//!
//! A message on the wire is one [`FieldBuffer`]: an ordered sequence of
//! tagged [`Value`]s beginning with a fixed four-value header (message id,
//! connection routing, type hash high/low). [`FieldReader`] consumes a
//! buffer in the order it was written; there is no random access during
//! decode.
//!
//! This crate has no I/O and no async; transports live in `aida-stream`,
//! connections in `aida-session`.

mod buffer;
mod ids;
mod value;

pub use buffer::{FieldBuffer, FieldReader, ProtocolError, HEADER_LEN};
pub use ids::{ConnectionId, MessageKind, MsgId, OrbId, TypeHash};
pub use value::{ConversionError, Kind, Value};
