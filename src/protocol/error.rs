use bytes::Bytes;
use std::{borrow::Cow, fmt};
use uuid::Uuid;

use crate::buffer::BufferError;

/// A violation of the wire protocol, fatal to the connection.
pub struct ProtocolError {
    reason: Cow<'static, str>,
}

impl ProtocolError {
    pub(crate) fn unknown(msgtype: u8) -> Self {
        Self { reason: format!("unknown message type {:?}", msgtype as char).into() }
    }

    pub(crate) fn unexpected(name: &'static str, expect: u8, got: u8) -> Self {
        Self {
            reason: format!(
                "expected {name} ({:?}) message, got {:?}",
                expect as char, got as char,
            )
            .into(),
        }
    }

    pub(crate) fn unexpected_message(msgtype: u8, context: &'static str) -> Self {
        Self {
            reason: format!("unexpected message {:?} while {context}", msgtype as char).into(),
        }
    }

    pub(crate) fn version(major: i16, minor: i16) -> Self {
        Self {
            reason: format!("the server requested protocol version {major}.{minor}").into(),
        }
    }

    pub(crate) fn malformed_auth(status: i32) -> Self {
        Self { reason: format!("unknown authentication status {status}").into() }
    }

    pub(crate) fn missing_codec(id: Uuid) -> Self {
        Self { reason: format!("reference to unknown type descriptor {id}").into() }
    }

    pub(crate) fn malformed(what: &'static str) -> Self {
        Self { reason: format!("malformed message: {what}").into() }
    }
}

impl From<BufferError> for ProtocolError {
    fn from(e: BufferError) -> Self {
        Self { reason: format!("truncated message: {e}").into() }
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol violation: {}", self.reason)
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Payload of an `ErrorResponse` frame, surfaced to the caller verbatim
/// after the pipeline drained to the next `ReadyForCommand`.
#[derive(Debug, thiserror::Error)]
#[error("{}: {message} [0x{code:08x}]", self.severity_name())]
pub struct ServerError {
    pub severity: u8,
    pub code: u32,
    pub message: String,
    pub attributes: Vec<(u16, Bytes)>,
}

impl ServerError {
    pub fn severity_name(&self) -> &'static str {
        match self.severity {
            120 => "ERROR",
            200 => "FATAL",
            255 => "PANIC",
            _ => "ERROR",
        }
    }
}
