//! Identifier types shared by both ends of a connection.

use crate::buffer::ProtocolError;

/// Kind of a wire message, stored in the low 8 bits of a [`MsgId`].
///
/// A buffer's kind never changes after construction; a request buffer is
/// turned into a response only via `FieldBuffer::renew_into_result`, which
/// rewrites the header outright.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Two-way method call; the peer must answer with [`CallResult`](Self::CallResult).
    Call = 1,
    /// Result of a [`Call`](Self::Call), correlated by call serial.
    CallResult = 2,
    /// Fire-and-forget method call; no result is ever sent.
    OnewayCall = 3,
    /// Handshake: request the peer's root object.
    Connect = 4,
    /// Answer to [`Connect`](Self::Connect), carrying the root object reference.
    ConnectResult = 5,
    /// Signal emission with no expected outcome.
    EmitOneway = 6,
    /// Signal emission expecting a correlated [`EmitResult`](Self::EmitResult).
    EmitTwoway = 7,
    /// Asynchronous outcome of an [`EmitTwoway`](Self::EmitTwoway).
    EmitResult = 8,
    /// Signal-handler teardown notification. Idempotent.
    Disconnect = 9,
}

impl MessageKind {
    /// Decode a kind from its wire discriminant.
    pub fn from_raw(raw: u8) -> Result<Self, ProtocolError> {
        Ok(match raw {
            1 => Self::Call,
            2 => Self::CallResult,
            3 => Self::OnewayCall,
            4 => Self::Connect,
            5 => Self::ConnectResult,
            6 => Self::EmitOneway,
            7 => Self::EmitTwoway,
            8 => Self::EmitResult,
            9 => Self::Disconnect,
            other => return Err(ProtocolError::UnknownMessageKind(other)),
        })
    }

    /// Whether the sender expects a correlated result message.
    pub fn expects_result(self) -> bool {
        matches!(self, Self::Call | Self::Connect | Self::EmitTwoway)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Call => "call",
            Self::CallResult => "call-result",
            Self::OnewayCall => "oneway-call",
            Self::Connect => "connect",
            Self::ConnectResult => "connect-result",
            Self::EmitOneway => "emit-oneway",
            Self::EmitTwoway => "emit-twoway",
            Self::EmitResult => "emit-result",
            Self::Disconnect => "discon",
        };
        f.write_str(name)
    }
}

/// Message id: the first value of every field buffer.
///
/// Low 8 bits encode the [`MessageKind`]; the upper 56 bits carry the call
/// serial for `Call`/`CallResult` pairs (zero everywhere else). Serials are
/// unique within a connection and monotonically increasing, so two
/// concurrent outstanding calls to the same method on the same connection
/// correlate unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MsgId(pub u64);

impl MsgId {
    const KIND_BITS: u32 = 8;
    const KIND_MASK: u64 = 0xff;

    /// Build a message id from a kind and a call serial.
    pub const fn new(kind: MessageKind, serial: u64) -> Self {
        Self((serial << Self::KIND_BITS) | kind as u64)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Extract the message kind from the low bits.
    pub fn kind(self) -> Result<MessageKind, ProtocolError> {
        MessageKind::from_raw((self.0 & Self::KIND_MASK) as u8)
    }

    /// Extract the call serial from the upper bits.
    pub const fn serial(self) -> u64 {
        self.0 >> Self::KIND_BITS
    }
}

impl From<u64> for MsgId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<MsgId> for u64 {
    fn from(id: MsgId) -> Self {
        id.0
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Ok(kind) => write!(f, "{}:{}", kind, self.serial()),
            Err(_) => write!(f, "msgid:{:#x}", self.0),
        }
    }
}

/// Connection id used for receiver-side routing.
///
/// The second header value of every message names the connection it is
/// addressed to. Id 0 means "any connection" and is what in-process
/// transports use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The wildcard id accepted by every receiver.
    pub const ANY: Self = Self(0);

    /// Create a new connection id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this message is addressed to any connection.
    pub const fn is_any(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ConnectionId> for u64 {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Process-unique 64-bit handle identifying an object across a connection
/// boundary.
///
/// Ids are allocated by a connection's object registry, stay stable for the
/// lifetime of the registration, and are never reused while the entry is
/// alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OrbId(pub u64);

impl OrbId {
    /// Create a new orb id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for OrbId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<OrbId> for u64 {
    fn from(id: OrbId) -> Self {
        id.0
    }
}

impl std::fmt::Display for OrbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "orb:{}", self.0)
    }
}

/// 128-bit identifier of an interface method or signal signature.
///
/// Produced at stub-generation time; both endpoints must agree on the hash
/// of the call being made. Equality is value equality of both halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeHash {
    /// High 64 bits.
    pub hi: u64,
    /// Low 64 bits.
    pub lo: u64,
}

impl TypeHash {
    /// Create a type hash from its two halves.
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }
}

impl std::fmt::Display for TypeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}
