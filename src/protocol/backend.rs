//! Server messages.
use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

use crate::{buffer::ReadBuffer, ext::FmtExt};

use super::error::{ProtocolError, ServerError};

/// A type that can be decoded from a server protocol frame.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Server messages the core reacts to.
#[derive(Debug)]
pub enum BackendMessage {
    ServerHandshake(ServerHandshake),
    Authentication(Authentication),
    ServerKeyData(ServerKeyData),
    ParameterStatus(ParameterStatus),
    LogMessage(LogMessage),
    ErrorResponse(ErrorResponse),
    ReadyForCommand(ReadyForCommand),
    PrepareComplete(PrepareComplete),
    CommandDataDescription(CommandDataDescription),
    Data(Data),
    CommandComplete(CommandComplete),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    ServerHandshake,
    Authentication,
    ServerKeyData,
    ParameterStatus,
    LogMessage,
    ErrorResponse,
    ReadyForCommand,
    PrepareComplete,
    CommandDataDescription,
    Data,
    CommandComplete,
}

macro_rules! assert_msgtype {
    ($self:ident,$typ:ident) => {
        if $self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(stringify!($self), $self::MSGTYPE, $typ));
        }
    };
}

/// Headers are `u16 count` then `count` pairs of key and
/// length-prefixed value. The core carries none of them forward.
fn skip_headers(buf: &mut ReadBuffer) -> Result<(), ProtocolError> {
    let count = buf.read_u16()?;
    for _ in 0..count {
        let _key = buf.read_u16()?;
        let _value = buf.read_len_prefixed_bytes()?;
    }
    Ok(())
}

/// Negotiated protocol version. Extensions are ignored.
#[derive(Debug)]
pub struct ServerHandshake {
    pub major: i16,
    pub minor: i16,
}

impl ServerHandshake {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for ServerHandshake {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ServerHandshake, msgtype);
        let mut buf = ReadBuffer::new(body);
        Ok(Self {
            major: buf.read_i16()?,
            minor: buf.read_i16()?,
        })
    }
}

/// Authentication flow status.
///
/// Only status 0 (OK) completes in this core; the SASL family
/// (10, 11, 12) is recognized so the connection can refuse it with a
/// descriptive error.
#[derive(Debug)]
pub enum Authentication {
    Ok,
    Sasl { methods: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    pub fn status(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Sasl { .. } => 10,
            Self::SaslContinue { .. } => 11,
            Self::SaslFinal { .. } => 12,
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Authentication, msgtype);
        let mut buf = ReadBuffer::new(body);
        let auth = match buf.read_i32()? {
            0 => Self::Ok,
            10 => {
                let count = buf.read_u32()?;
                let mut methods = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    methods.push(buf.read_string()?);
                }
                Self::Sasl { methods }
            }
            11 => Self::SaslContinue { data: buf.read_len_prefixed_bytes()? },
            12 => Self::SaslFinal { data: buf.read_len_prefixed_bytes()? },
            status => return Err(ProtocolError::malformed_auth(status)),
        };
        Ok(auth)
    }
}

/// Opaque per-connection server secret.
#[derive(Debug)]
pub struct ServerKeyData {
    pub data: [u8; 32],
}

impl ServerKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for ServerKeyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ServerKeyData, msgtype);
        let mut buf = ReadBuffer::new(body);
        let bytes = buf.read_bytes(32)?;
        let mut data = [0u8; 32];
        data.copy_from_slice(&bytes);
        Ok(Self { data })
    }
}

/// A run-time server setting report.
#[derive(Debug)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterStatus, msgtype);
        let mut buf = ReadBuffer::new(body);
        Ok(Self {
            name: buf.read_string()?,
            value: buf.read_string()?,
        })
    }
}

/// A server-side log notice. Never aborts the connection.
#[derive(Debug)]
pub struct LogMessage {
    pub severity: u8,
    pub code: u32,
    pub text: String,
}

impl LogMessage {
    pub const MSGTYPE: u8 = b'L';

    pub fn severity_name(&self) -> &'static str {
        match self.severity {
            20 => "DEBUG",
            40 => "INFO",
            60 => "NOTICE",
            80 => "WARNING",
            _ => "NOTICE",
        }
    }
}

impl BackendProtocol for LogMessage {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(LogMessage, msgtype);
        let mut buf = ReadBuffer::new(body);
        Ok(Self {
            severity: buf.read_u8()?,
            code: buf.read_u32()?,
            text: buf.read_string()?,
        })
    }
}

/// An error report. Raised as [`ServerError`] after the pipeline is
/// drained to the next `ReadyForCommand`.
#[derive(Debug)]
pub struct ErrorResponse {
    pub severity: u8,
    pub code: u32,
    pub message: String,
    pub attributes: Vec<(u16, Bytes)>,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn into_server_error(self) -> ServerError {
        ServerError {
            severity: self.severity,
            code: self.code,
            message: self.message,
            attributes: self.attributes,
        }
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ErrorResponse, msgtype);
        let mut buf = ReadBuffer::new(body);
        let severity = buf.read_u8()?;
        let code = buf.read_u32()?;
        let message = buf.read_string()?;
        let count = buf.read_u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push((buf.read_u16()?, buf.read_len_prefixed_bytes()?));
        }
        Ok(Self { severity, code, message, attributes })
    }
}

/// Pipeline barrier acknowledgement carrying the transaction state.
#[derive(Debug)]
pub struct ReadyForCommand {
    pub transaction_status: u8,
}

impl ReadyForCommand {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForCommand {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ReadyForCommand, msgtype);
        let mut buf = ReadBuffer::new(body);
        skip_headers(&mut buf)?;
        Ok(Self { transaction_status: buf.read_u8()? })
    }
}

/// Successful `Parse` answer with the type ids of the statement.
#[derive(Debug)]
pub struct PrepareComplete {
    pub cardinality: u8,
    pub input_typedesc_id: Uuid,
    pub output_typedesc_id: Uuid,
}

impl PrepareComplete {
    pub const MSGTYPE: u8 = b'1';
}

impl BackendProtocol for PrepareComplete {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(PrepareComplete, msgtype);
        let mut buf = ReadBuffer::new(body);
        skip_headers(&mut buf)?;
        Ok(Self {
            cardinality: buf.read_u8()?,
            input_typedesc_id: buf.read_uuid()?,
            output_typedesc_id: buf.read_uuid()?,
        })
    }
}

/// Full statement description: type ids plus the descriptor blobs the
/// codec builder consumes.
#[derive(Debug)]
pub struct CommandDataDescription {
    pub cardinality: u8,
    pub input_typedesc_id: Uuid,
    pub input_typedesc: Bytes,
    pub output_typedesc_id: Uuid,
    pub output_typedesc: Bytes,
}

impl CommandDataDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for CommandDataDescription {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandDataDescription, msgtype);
        let mut buf = ReadBuffer::new(body);
        skip_headers(&mut buf)?;
        Ok(Self {
            cardinality: buf.read_u8()?,
            input_typedesc_id: buf.read_uuid()?,
            input_typedesc: buf.read_len_prefixed_bytes()?,
            output_typedesc_id: buf.read_uuid()?,
            output_typedesc: buf.read_len_prefixed_bytes()?,
        })
    }
}

/// One result row: a one-element tuple holding the encoded value.
pub struct Data {
    pub row: Bytes,
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data").field("row", &self.row[..].lossy()).finish()
    }
}

impl Data {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for Data {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Data, msgtype);
        let mut buf = ReadBuffer::new(body);
        let count = buf.read_u16()?;
        if count != 1 {
            return Err(ProtocolError::malformed("Data frame must hold exactly one element"));
        }
        let row = buf.read_len_prefixed_bytes()?;
        if !buf.is_empty() {
            return Err(ProtocolError::malformed("trailing bytes after Data element"));
        }
        Ok(Self { row })
    }
}

/// Command status string, e.g. `SELECT`.
#[derive(Debug)]
pub struct CommandComplete {
    pub status: String,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandComplete, msgtype);
        let mut buf = ReadBuffer::new(body);
        skip_headers(&mut buf)?;
        Ok(Self { status: buf.read_string()? })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ready_for_command() {
        let msg = ReadyForCommand::decode(b'Z', Bytes::from_static(&[0, 0, b'T'])).unwrap();
        assert_eq!(msg.transaction_status, b'T');
    }

    #[test]
    fn error_response_roundtrip() {
        // severity ERROR, code 0x_04_03_02_01, message "boom", one attribute
        let mut body = vec![120u8];
        body.extend_from_slice(&0x0403_0201u32.to_be_bytes());
        body.extend_from_slice(&4i32.to_be_bytes());
        body.extend_from_slice(b"boom");
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&0x0101u16.to_be_bytes());
        body.extend_from_slice(&2i32.to_be_bytes());
        body.extend_from_slice(b"42");

        let msg = ErrorResponse::decode(b'E', body.into()).unwrap();
        assert_eq!(msg.severity, 120);
        assert_eq!(msg.code, 0x0403_0201);
        assert_eq!(msg.message, "boom");
        assert_eq!(msg.attributes.len(), 1);

        let err = msg.into_server_error();
        assert_eq!(err.to_string(), "ERROR: boom [0x04030201]");
    }

    #[test]
    fn data_frame_single_element() {
        let mut body = vec![0u8, 1];
        body.extend_from_slice(&8i32.to_be_bytes());
        body.extend_from_slice(&[0, 0, 0, 4, 0, 0, 1, 164]);
        let msg = Data::decode(b'D', body.into()).unwrap();
        assert_eq!(msg.row.len(), 8);

        let bad = Data::decode(b'D', Bytes::from_static(&[0, 2]));
        assert!(bad.is_err());
    }

    #[test]
    fn dispatch_rejects_unknown_tag() {
        let res = BackendMessage::decode(b'q', Bytes::new());
        assert!(res.is_err());

        let ok = BackendMessage::decode(b'Z', Bytes::from_static(&[0, 0, b'I'])).unwrap();
        assert_eq!(ok.msgtype(), b'Z');
    }

    #[test]
    fn authentication_statuses() {
        let ok = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 0])).unwrap();
        assert_eq!(ok.status(), 0);

        let mut sasl = 10i32.to_be_bytes().to_vec();
        sasl.extend_from_slice(&1u32.to_be_bytes());
        sasl.extend_from_slice(&13i32.to_be_bytes());
        sasl.extend_from_slice(b"SCRAM-SHA-256");
        let Authentication::Sasl { methods } = Authentication::decode(b'R', sasl.into()).unwrap()
        else {
            panic!("expected SASL");
        };
        assert_eq!(methods, ["SCRAM-SHA-256"]);

        assert!(Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 5])).is_err());
    }
}
