//! Client messages.
//!
//! All struct fields here mirror the actual message sent to the server.
use crate::buffer::{BufferError, WriteMessageBuffer};

use super::{Cardinality, IoFormat, PROTO_MAJOR, PROTO_MINOR};

/// Write a client message to `buf` as a complete frame.
pub fn write<F: FrontendProtocol>(msg: &F, buf: &mut WriteMessageBuffer) -> Result<(), BufferError> {
    buf.begin_message(F::MSGTYPE)?;
    msg.encode(buf)?;
    buf.end_message()
}

/// A type which can be encoded into a client protocol frame.
///
/// `Sync` and `Flush` have no body and are emitted directly by
/// [`WriteMessageBuffer::write_sync`] and
/// [`WriteMessageBuffer::write_flush`].
pub trait FrontendProtocol {
    /// Message type tag.
    const MSGTYPE: u8;

    /// Write the message body, the frame itself is handled by [`write`].
    fn encode(&self, buf: &mut WriteMessageBuffer) -> Result<(), BufferError>;
}

/// First message of the connection: requested protocol version,
/// no parameters, no extensions.
#[derive(Debug)]
pub struct ClientHandshake {
    pub major: i16,
    pub minor: i16,
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self { major: PROTO_MAJOR, minor: PROTO_MINOR }
    }
}

impl FrontendProtocol for ClientHandshake {
    const MSGTYPE: u8 = b'V';

    fn encode(&self, buf: &mut WriteMessageBuffer) -> Result<(), BufferError> {
        buf.write_i16(self.major)?;
        buf.write_i16(self.minor)?;
        // no connection params, no protocol extensions
        buf.write_u16(0)?;
        buf.write_u16(0)
    }
}

/// Requests authentication for `user` against `database`.
#[derive(Debug)]
pub struct AuthenticationRequest<'a> {
    pub user: &'a str,
    pub database: &'a str,
}

impl FrontendProtocol for AuthenticationRequest<'_> {
    const MSGTYPE: u8 = b'0';

    fn encode(&self, buf: &mut WriteMessageBuffer) -> Result<(), BufferError> {
        buf.write_string(self.user)?;
        buf.write_string(self.database)
    }
}

/// Compile a command, the server answers with `PrepareComplete`.
#[derive(Debug)]
pub struct Parse<'a> {
    pub io_format: IoFormat,
    pub cardinality: Cardinality,
    /// The command text to compile.
    pub query: &'a str,
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn encode(&self, buf: &mut WriteMessageBuffer) -> Result<(), BufferError> {
        // no headers
        buf.write_u16(0)?;
        buf.write_u8(self.io_format.as_u8())?;
        buf.write_u8(self.cardinality.as_u8())?;
        // unnamed statement
        buf.write_string("")?;
        buf.write_string(self.query)
    }
}

/// Ask the server to describe the unnamed statement, the server answers
/// with `CommandDataDescription`.
#[derive(Debug)]
pub struct DescribeStatement;

impl FrontendProtocol for DescribeStatement {
    const MSGTYPE: u8 = b'D';

    fn encode(&self, buf: &mut WriteMessageBuffer) -> Result<(), BufferError> {
        // no headers
        buf.write_u16(0)?;
        // describe the statement itself, not a cursor over it
        buf.write_u8(b'T')?;
        buf.write_string("")
    }
}

/// Execute the unnamed statement.
#[derive(Debug)]
pub struct Execute<'a> {
    /// Argument block already encoded through the input codec.
    pub arguments: &'a [u8],
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn encode(&self, buf: &mut WriteMessageBuffer) -> Result<(), BufferError> {
        // no headers
        buf.write_u16(0)?;
        buf.write_string("")?;
        buf.write_bytes(self.arguments)
    }
}

/// Gracefully terminate the connection.
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn encode(&self, _: &mut WriteMessageBuffer) -> Result<(), BufferError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn client_handshake_frame() {
        let mut buf = WriteMessageBuffer::new();
        write(&ClientHandshake::default(), &mut buf).unwrap();
        let bytes = buf.unwrap().unwrap();
        assert_eq!(
            &bytes[..],
            &[b'V', 0, 0, 0, 12, 0, 1, 0, 0, 0, 0, 0, 0],
        );
    }

    #[test]
    fn parse_frame() {
        let mut buf = WriteMessageBuffer::new();
        let msg = Parse {
            io_format: IoFormat::Binary,
            cardinality: Cardinality::Many,
            query: "SELECT 1",
        };
        write(&msg, &mut buf).unwrap();
        let bytes = buf.unwrap().unwrap();

        assert_eq!(bytes[0], b'P');
        let len = i32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 1);
        // headers, io format, cardinality
        assert_eq!(&bytes[5..9], &[0, 0, b'b', b'm']);
        // unnamed statement
        assert_eq!(&bytes[9..13], &[0, 0, 0, 0]);
        assert_eq!(&bytes[17..], b"SELECT 1");
    }

    #[test]
    fn terminate_frame() {
        let mut buf = WriteMessageBuffer::new();
        write(&Terminate, &mut buf).unwrap();
        assert_eq!(&buf.unwrap().unwrap()[..], &[b'X', 0, 0, 0, 4]);
    }
}
