//! Schema-driven value encoding.
//!
//! The server describes every query's input and output types with a
//! type-descriptor blob. [`Registry::build_codec`] interprets the blob
//! into a tree of [`Codec`]s, cached by the server-assigned type id and
//! never evicted for the life of the connection.
//!
//! - [`Value`]
//! - [`Codec`]
//! - [`Registry`]
mod build;
mod composite;
pub(crate) mod scalar;
mod value;

use bytes::Bytes;
use std::{borrow::Cow, collections::HashMap, fmt, sync::Arc};
use uuid::Uuid;

use crate::{
    buffer::{BufferError, ReadBuffer, WriteBuffer},
    protocol::ProtocolError,
};

pub use value::{BigInt, Decimal, ObjectShape, ShapeField, Value};

/// An encoder/decoder pair for one schema type.
///
/// `encode` writes the value's `i32` length prefix and payload.
/// `decode` is handed a reader already narrowed to the payload (the
/// prefix consumed by the caller) and must consume it exactly.
pub trait Codec: fmt::Debug + Send + Sync {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError>;

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError>;
}

/// Decode a length-prefixed sub-frame through `codec`, enforcing exact
/// consumption.
pub(crate) fn decode_frame(codec: &dyn Codec, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
    let len = buf.read_i32()?;
    if len < 0 {
        return Ok(Value::Nothing);
    }
    let mut payload = buf.slice(len as usize)?;
    let value = codec.decode(&mut payload)?;
    if !payload.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

/// Per-connection mapping of server type ids to codecs.
///
/// Monotonic: entries are never replaced or evicted. The base scalar
/// codecs and the null codec are resolved from their well-known ids
/// without occupying the map.
#[derive(Debug, Default)]
pub struct Registry {
    codecs: HashMap<Uuid, Arc<dyn Codec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a codec by type id, well-known scalars included.
    pub fn get(&self, id: &Uuid) -> Option<Arc<dyn Codec>> {
        match self.codecs.get(id) {
            Some(codec) => Some(codec.clone()),
            None => scalar::known_codec(id),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.codecs.contains_key(id) || scalar::known_codec(id).is_some()
    }

    /// Number of dynamically registered codecs.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    fn insert(&mut self, id: Uuid, codec: Arc<dyn Codec>) {
        self.codecs.entry(id).or_insert(codec);
    }

    fn lookup(&self, id: Uuid) -> Result<Arc<dyn Codec>, ProtocolError> {
        self.get(&id).ok_or_else(|| ProtocolError::missing_codec(id))
    }

    /// Interpret a type-descriptor blob.
    ///
    /// Descriptors are read left to right, each registered under its id
    /// so later descriptors can reference earlier ones. The last
    /// descriptor's codec is the top-level codec of the blob.
    pub fn build_codec(&mut self, descriptor: Bytes) -> Result<Arc<dyn Codec>, ProtocolError> {
        build::build(self, descriptor)
    }
}

/// An error while decoding a value payload.
pub enum DecodeError {
    Buffer(BufferError),
    /// A decoder did not consume its payload exactly.
    TrailingBytes,
    Malformed(Cow<'static, str>),
}

impl std::error::Error for DecodeError { }

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Buffer(e) => write!(f, "{e}"),
            Self::TrailingBytes => write!(f, "trailing bytes after value"),
            Self::Malformed(what) => write!(f, "{what}"),
        }
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl From<BufferError> for DecodeError {
    fn from(e: BufferError) -> Self {
        Self::Buffer(e)
    }
}

/// An error while encoding query arguments.
pub enum EncodeError {
    /// The value does not match the codec's schema type.
    TypeMismatch { expected: &'static str, got: &'static str },
    /// Element count does not match the input shape.
    Arity { expected: usize, got: usize },
    /// The schema type cannot appear as query input.
    NotSupported(&'static str),
    UnknownEnumMember(String),
}

impl EncodeError {
    pub(crate) fn mismatch(expected: &'static str, got: &Value) -> Self {
        Self::TypeMismatch { expected, got: got.type_name() }
    }
}

impl std::error::Error for EncodeError { }

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to encode arguments, ")?;
        match self {
            Self::TypeMismatch { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
            Self::Arity { expected, got } => {
                write!(f, "expected {expected} arguments, got {got}")
            }
            Self::NotSupported(what) => write!(f, "{what} cannot be encoded as input"),
            Self::UnknownEnumMember(member) => write!(f, "unknown enum member {member:?}"),
        }
    }
}

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
