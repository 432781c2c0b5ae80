//! `edgero` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    buffer::BufferError,
    codec::{DecodeError, EncodeError},
    connection::{CardinalityError, ConfigError, UnsupportedAuth},
    protocol::{ProtocolError, ServerError},
};

/// A specialized [`Result`] type for `edgero` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `edgero` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from `edgero` library.
pub enum ErrorKind {
    Config(ConfigError),
    Buffer(BufferError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(ServerError),
    Decode(DecodeError),
    Encode(EncodeError),
    Cardinality(CardinalityError),
    UnsupportedAuth(UnsupportedAuth),
    Utf8(Utf8Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<BufferError>e => ErrorKind::Buffer(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ServerError>e => ErrorKind::Database(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<EncodeError>e => ErrorKind::Encode(e));
from!(<CardinalityError>e => ErrorKind::Cardinality(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Buffer(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
            Self::Cardinality(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
