//! Connection lifecycle and the request/response engine.
//!
//! - [`ConnectOptions`]
//! - [`Connection`]
//!
//! A connection is strictly request/response: one command sequence at a
//! time, each terminated by a Sync barrier, results delivered in arrival
//! order.
pub mod config;

mod credentials;
mod dsn;
mod project;

use bytes::{Bytes, BytesMut};
use std::{collections::HashMap, fmt, io, sync::Arc, time::Duration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    buffer::{ReadBuffer, ReadMessageBuffer, WriteBuffer, WriteMessageBuffer},
    codec::{Codec, DecodeError, Registry, Value},
    common::verbose,
    error::{Error, Result},
    net::{Socket, TlsParams},
    protocol::{
        BackendMessage, BackendProtocol, Cardinality, IoFormat, PROTO_MAJOR, PROTO_MINOR,
        ProtocolError, TransactionStatus,
        backend::{Authentication, LogMessage, ReadyForCommand},
        frontend,
    },
};

pub use config::{ConfigError, ConnectOptions, ResolvedConfig};

const READ_CHUNK: usize = 8192;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    TcpConnected,
    HandshakeDone,
    Ready,
    Busy,
    Closed,
}

/// The server requested an authentication flow this client does not
/// implement (the SASL family in particular).
#[derive(Debug, thiserror::Error)]
#[error(
    "the server requested authentication method {status}, \
     only trust authentication (0) is supported"
)]
pub struct UnsupportedAuth {
    pub status: i32,
}

/// `fetch_one` requires exactly one result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalityError {
    NoResult,
    TooManyResults,
}

impl std::error::Error for CardinalityError { }

impl fmt::Display for CardinalityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResult => f.write_str("query returned no results"),
            Self::TooManyResults => f.write_str("query returned more than one result"),
        }
    }
}

/// A single connection to the server.
///
/// Obtained from [`Connection::connect`]. All queries run through the
/// parse/describe/execute cycle with codecs cached per connection.
#[derive(Debug)]
pub struct Connection {
    socket: Socket,
    rbuf: ReadMessageBuffer,
    wbuf: WriteMessageBuffer,

    codecs: Registry,
    server_settings: HashMap<String, String>,
    server_secret: Option<[u8; 32]>,
    transaction_status: TransactionStatus,
    phase: Phase,
    last_status: Option<String>,

    command_timeout: Option<Duration>,
    logging: bool,
}

impl Connection {
    /// Resolve `options`, open the transport and run the handshake.
    ///
    /// Configuration errors are raised before any I/O. The socket is
    /// released on every handshake failure path.
    pub async fn connect(options: ConnectOptions) -> Result<Connection> {
        let config = config::resolve(&options, &config::OsEnviron)?;
        Self::connect_resolved(&config, &options).await
    }

    async fn connect_resolved(config: &ResolvedConfig, options: &ConnectOptions) -> Result<Connection> {
        let socket = open_socket(config, options).await?;

        let mut conn = Connection {
            socket,
            rbuf: ReadMessageBuffer::new(),
            wbuf: WriteMessageBuffer::new(),
            codecs: Registry::new(),
            server_settings: HashMap::new(),
            server_secret: None,
            transaction_status: TransactionStatus::Unknown,
            phase: Phase::TcpConnected,
            last_status: None,
            command_timeout: options.command_timeout,
            logging: options.logging,
        };

        match conn.handshake(config).await {
            Ok(()) => Ok(conn),
            Err(err) => {
                let _ = conn.socket.shutdown().await;
                Err(err.with_context(format!(
                    "failed to connect to {}:{}",
                    config.host(),
                    config.port(),
                )))
            }
        }
    }

    /// Fetch all rows of `query`.
    pub async fn fetch_all(&mut self, query: &str, args: &[Value]) -> Result<Vec<Value>> {
        self.query(query, args, IoFormat::Binary, Cardinality::Many).await
    }

    /// Fetch the single row of `query`; zero or multiple rows fail.
    pub async fn fetch_one(&mut self, query: &str, args: &[Value]) -> Result<Value> {
        let mut rows = self.query(query, args, IoFormat::Binary, Cardinality::One).await?;
        if rows.len() > 1 {
            return Err(CardinalityError::TooManyResults.into());
        }
        match rows.pop() {
            Some(row) => Ok(row),
            None => Err(CardinalityError::NoResult.into()),
        }
    }

    /// Fetch all rows of `query` as one JSON array string.
    pub async fn fetch_all_json(&mut self, query: &str, args: &[Value]) -> Result<String> {
        let rows = self.query(query, args, IoFormat::Json, Cardinality::Many).await?;
        match unwrap_json(rows)? {
            Some(json) => Ok(json),
            None => Ok("[]".into()),
        }
    }

    /// Fetch the single row of `query` as a JSON string.
    pub async fn fetch_one_json(&mut self, query: &str, args: &[Value]) -> Result<String> {
        let rows = self.query(query, args, IoFormat::Json, Cardinality::One).await?;
        match unwrap_json(rows)? {
            Some(json) => Ok(json),
            None => Err(CardinalityError::NoResult.into()),
        }
    }

    /// Terminate the session and release the transport.
    pub async fn close(mut self) -> Result<()> {
        let mut flushed = Ok(());
        if self.phase != Phase::Closed {
            if frontend::write(&frontend::Terminate, &mut self.wbuf).is_ok() {
                flushed = self.flush().await;
            }
            self.phase = Phase::Closed;
        }
        let shutdown = self.socket.shutdown().await;
        flushed?;
        shutdown?;
        Ok(())
    }

    /// Transaction state as of the last `ReadyForCommand`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Server settings accumulated over the connection's lifetime.
    pub fn server_settings(&self) -> &HashMap<String, String> {
        &self.server_settings
    }

    /// Per-connection secret sent by the server during the handshake.
    pub fn server_secret(&self) -> Option<&[u8; 32]> {
        self.server_secret.as_ref()
    }

    /// Status string of the last completed command.
    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    // ===== receive plumbing =====

    /// Mark the connection dead. Buffer, protocol and transport errors
    /// all pass through here.
    fn fatal<E: Into<Error>>(&mut self, err: E) -> Error {
        self.phase = Phase::Closed;
        self.transaction_status = TransactionStatus::Unknown;
        err.into()
    }

    async fn wait_for_message(&mut self) -> Result<BackendMessage> {
        loop {
            let complete = match self.rbuf.take_message() {
                Ok(complete) => complete,
                Err(err) => return Err(self.fatal(err)),
            };
            if complete {
                let msgtype = self.rbuf.get_message_type();
                let body = match self.rbuf.consume_message() {
                    Ok(body) => body,
                    Err(err) => return Err(self.fatal(err)),
                };
                let message = match BackendMessage::decode(msgtype, body) {
                    Ok(message) => message,
                    Err(err) => return Err(self.fatal(err)),
                };
                verbose!("recv {:?}", message.msgtype() as char);
                return Ok(message);
            }

            let mut chunk = BytesMut::with_capacity(READ_CHUNK);
            let read = match self.socket.read_buf(&mut chunk).await {
                Ok(read) => read,
                Err(err) => return Err(self.fatal(err)),
            };
            if read == 0 {
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "the server closed the connection unexpectedly",
                );
                return Err(self.fatal(err));
            }
            // a full ring pauses the transport; reading resumes here
            // once the buffered frames are consumed
            let _full = self.rbuf.feed(chunk.freeze());
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let bytes = match self.wbuf.unwrap() {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fatal(err)),
        };
        if bytes.is_empty() {
            return Ok(());
        }
        verbose!("send {} bytes", bytes.len());
        match self.socket.write_all(&bytes).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fatal(err)),
        }
    }

    fn update_transaction(&mut self, message: &ReadyForCommand) {
        self.transaction_status = TransactionStatus::from_u8(message.transaction_status);
    }

    /// Handler for frames any phase may see. Anything not handled here
    /// or by the current phase is a protocol violation.
    fn fallthrough(&mut self, message: BackendMessage) -> Result<()> {
        match message {
            BackendMessage::ParameterStatus(msg) => {
                self.server_settings.insert(msg.name, msg.value);
                Ok(())
            }
            BackendMessage::LogMessage(msg) => {
                self.log_message(&msg);
                Ok(())
            }
            other => Err(self.fatal(ProtocolError::unexpected_message(
                other.msgtype(),
                "processing command results",
            ))),
        }
    }

    fn log_message(&self, message: &LogMessage) {
        if !self.logging {
            return;
        }
        match message.severity {
            80 => tracing::warn!(
                code = message.code,
                "server {}: {}",
                message.severity_name(),
                message.text,
            ),
            40 | 60 => tracing::info!(
                code = message.code,
                "server {}: {}",
                message.severity_name(),
                message.text,
            ),
            _ => tracing::debug!(
                code = message.code,
                "server {}: {}",
                message.severity_name(),
                message.text,
            ),
        }
    }

    // ===== handshake =====

    async fn handshake(&mut self, config: &ResolvedConfig) -> Result<()> {
        if let Err(err) = self.send_handshake(config) {
            return Err(self.fatal(err));
        }
        self.flush().await?;

        loop {
            match self.wait_for_message().await? {
                BackendMessage::ServerHandshake(msg) => {
                    if (msg.major, msg.minor) != (PROTO_MAJOR, PROTO_MINOR) {
                        return Err(self.fatal(ProtocolError::version(msg.major, msg.minor)));
                    }
                    self.phase = Phase::HandshakeDone;
                }
                BackendMessage::Authentication(Authentication::Ok) => {}
                BackendMessage::Authentication(other) => {
                    return Err(self.fatal(UnsupportedAuth { status: other.status() }));
                }
                BackendMessage::ServerKeyData(msg) => {
                    self.server_secret = Some(msg.data);
                }
                BackendMessage::ParameterStatus(msg) => {
                    self.server_settings.insert(msg.name, msg.value);
                }
                BackendMessage::LogMessage(msg) => self.log_message(&msg),
                BackendMessage::ErrorResponse(msg) => {
                    return Err(self.fatal(msg.into_server_error()));
                }
                BackendMessage::ReadyForCommand(msg) => {
                    self.update_transaction(&msg);
                    self.phase = Phase::Ready;
                    return Ok(());
                }
                other => {
                    return Err(self.fatal(ProtocolError::unexpected_message(
                        other.msgtype(),
                        "performing the handshake",
                    )));
                }
            }
        }
    }

    fn send_handshake(&mut self, config: &ResolvedConfig) -> Result<(), crate::buffer::BufferError> {
        frontend::write(&frontend::ClientHandshake::default(), &mut self.wbuf)?;
        frontend::write(
            &frontend::AuthenticationRequest {
                user: config.user(),
                database: config.database(),
            },
            &mut self.wbuf,
        )
    }

    // ===== parse / describe / execute =====

    async fn query(
        &mut self,
        query: &str,
        args: &[Value],
        io_format: IoFormat,
        cardinality: Cardinality,
    ) -> Result<Vec<Value>> {
        match self.phase {
            Phase::Ready => {}
            Phase::Closed => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "the connection is closed",
                )
                .into());
            }
            _ => {
                return Err(io::Error::other("the connection is busy").into());
            }
        }

        self.phase = Phase::Busy;
        self.transaction_status = TransactionStatus::Active;

        let result = match self.command_timeout {
            Some(timeout) => {
                match tokio::time::timeout(
                    timeout,
                    self.run_query(query, args, io_format, cardinality),
                )
                .await
                {
                    Ok(result) => result,
                    // the pipeline state is unknown after an abandoned
                    // command, the connection cannot be reused
                    Err(_) => Err(self.fatal(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "command timed out",
                    ))),
                }
            }
            None => self.run_query(query, args, io_format, cardinality).await,
        };

        if self.phase == Phase::Busy {
            self.phase = Phase::Ready;
        }
        result
    }

    async fn run_query(
        &mut self,
        query: &str,
        args: &[Value],
        io_format: IoFormat,
        cardinality: Cardinality,
    ) -> Result<Vec<Value>> {
        let parse = frontend::Parse { io_format, cardinality, query };
        if let Err(err) = frontend::write(&parse, &mut self.wbuf)
            .and_then(|()| self.wbuf.write_sync())
        {
            return Err(self.fatal(err));
        }
        self.flush().await?;

        let mut prepared = None;
        let mut failure = None;
        loop {
            match self.wait_for_message().await? {
                BackendMessage::PrepareComplete(msg) => prepared = Some(msg),
                BackendMessage::ErrorResponse(msg) => {
                    failure.get_or_insert(msg.into_server_error());
                }
                BackendMessage::ReadyForCommand(msg) => {
                    self.update_transaction(&msg);
                    break;
                }
                other => self.fallthrough(other)?,
            }
        }
        if let Some(failure) = failure {
            return Err(failure.into());
        }
        let Some(prepared) = prepared else {
            return Err(self.fatal(ProtocolError::malformed("missing type ids in Parse response")));
        };

        let codecs = (
            self.codecs.get(&prepared.input_typedesc_id),
            self.codecs.get(&prepared.output_typedesc_id),
        );
        let (input_codec, output_codec) = match codecs {
            (Some(input), Some(output)) => (input, output),
            _ => self.describe_statement().await?,
        };

        let mut args_buf = WriteBuffer::new();
        input_codec.encode(&mut args_buf, &Value::Tuple(args.to_vec()))?;
        let arguments = args_buf.unwrap();

        let execute = frontend::Execute { arguments: &arguments };
        if let Err(err) = frontend::write(&execute, &mut self.wbuf)
            .and_then(|()| self.wbuf.write_sync())
        {
            return Err(self.fatal(err));
        }
        self.flush().await?;

        let mut rows = Vec::new();
        let mut failure = None;
        let mut bad_row = None;
        loop {
            match self.wait_for_message().await? {
                BackendMessage::Data(msg) => {
                    if failure.is_none() && bad_row.is_none() {
                        match decode_row(output_codec.as_ref(), msg.row) {
                            Ok(value) => rows.push(value),
                            Err(err) => bad_row = Some(err),
                        }
                    }
                }
                BackendMessage::CommandComplete(msg) => {
                    self.last_status = Some(msg.status);
                }
                BackendMessage::ErrorResponse(msg) => {
                    failure.get_or_insert(msg.into_server_error());
                }
                BackendMessage::ReadyForCommand(msg) => {
                    self.update_transaction(&msg);
                    break;
                }
                other => self.fallthrough(other)?,
            }
        }
        if let Some(failure) = failure {
            return Err(failure.into());
        }
        if let Some(bad_row) = bad_row {
            return Err(bad_row.into());
        }
        Ok(rows)
    }

    async fn describe_statement(&mut self) -> Result<(Arc<dyn Codec>, Arc<dyn Codec>)> {
        if let Err(err) = frontend::write(&frontend::DescribeStatement, &mut self.wbuf)
            .and_then(|()| self.wbuf.write_sync())
        {
            return Err(self.fatal(err));
        }
        self.flush().await?;

        let mut described = None;
        let mut failure = None;
        loop {
            match self.wait_for_message().await? {
                BackendMessage::CommandDataDescription(msg) => described = Some(msg),
                BackendMessage::ErrorResponse(msg) => {
                    failure.get_or_insert(msg.into_server_error());
                }
                BackendMessage::ReadyForCommand(msg) => {
                    self.update_transaction(&msg);
                    break;
                }
                other => self.fallthrough(other)?,
            }
        }
        if let Some(failure) = failure {
            return Err(failure.into());
        }
        let Some(described) = described else {
            return Err(self.fatal(ProtocolError::malformed("missing statement description")));
        };

        let input = match self.codecs.get(&described.input_typedesc_id) {
            Some(codec) => codec,
            None => match self.codecs.build_codec(described.input_typedesc) {
                Ok(codec) => codec,
                Err(err) => return Err(self.fatal(err)),
            },
        };
        let output = match self.codecs.get(&described.output_typedesc_id) {
            Some(codec) => codec,
            None => match self.codecs.build_codec(described.output_typedesc) {
                Ok(codec) => codec,
                Err(err) => return Err(self.fatal(err)),
            },
        };
        Ok((input, output))
    }
}

fn decode_row(codec: &dyn Codec, row: Bytes) -> Result<Value, DecodeError> {
    let mut buf = ReadBuffer::new(row);
    let value = codec.decode(&mut buf)?;
    if !buf.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

/// JSON results arrive as a single element of the JSON scalar type.
fn unwrap_json(mut rows: Vec<Value>) -> Result<Option<String>> {
    if rows.len() > 1 {
        return Err(DecodeError::Malformed("expected a single JSON datum".into()).into());
    }
    match rows.pop() {
        Some(Value::Json(json)) => Ok(Some(json)),
        Some(Value::Str(json)) => Ok(Some(json)),
        Some(other) => Err(DecodeError::Malformed(
            format!("expected JSON, got {}", other.type_name()).into(),
        )
        .into()),
        None => Ok(None),
    }
}

async fn open_socket(config: &ResolvedConfig, options: &ConnectOptions) -> Result<Socket> {
    let (host, port) = config.address();
    let tls = config.tls_params();
    let deadline = options
        .wait_until_available
        .map(|wait| tokio::time::Instant::now() + wait);

    loop {
        let attempt = match options.connect_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, try_open(host, port, tls.as_ref())).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
                }
            }
            None => try_open(host, port, tls.as_ref()).await,
        };

        match attempt {
            Ok(socket) => return Ok(socket),
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                match deadline {
                    Some(deadline) if tokio::time::Instant::now() < deadline => {
                        verbose!("connection refused, retrying");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    _ => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn try_open(host: &str, port: u16, tls: Option<&TlsParams>) -> io::Result<Socket> {
    match tls {
        Some(tls) => Socket::connect_tls(host, port, tls).await,
        None => Socket::connect_tcp(host, port).await,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{codec::scalar, error::ErrorKind};
    use tokio::net::{TcpListener, TcpStream};

    struct MockFrame {
        tag: u8,
        #[allow(unused)]
        body: Vec<u8>,
    }

    async fn read_frame(stream: &mut TcpStream) -> Option<MockFrame> {
        let mut head = [0u8; 5];
        stream.read_exact(&mut head).await.ok()?;
        let len = u32::from_be_bytes(head[1..5].try_into().unwrap()) as usize - 4;
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.ok()?;
        Some(MockFrame { tag: head[0], body })
    }

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(body.len() as u32 + 4).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn lstring(s: &str) -> Vec<u8> {
        let mut out = (s.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn handshake_batch() -> Vec<u8> {
        let mut out = frame(b'v', &[0, 1, 0, 0, 0, 0]);
        out.extend(frame(b'R', &[0, 0, 0, 0]));
        out.extend(frame(b'K', &[7; 32]));
        let mut status = lstring("pgaddr");
        status.extend(lstring("ignored"));
        out.extend(frame(b'S', &status));
        out.extend(frame(b'Z', &[0, 0, b'I']));
        out
    }

    fn prepare_complete(input: uuid::Uuid, output: uuid::Uuid) -> Vec<u8> {
        let mut body = vec![0, 0, b'm'];
        body.extend_from_slice(input.as_bytes());
        body.extend_from_slice(output.as_bytes());
        frame(b'1', &body)
    }

    fn data_row(payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0, 1];
        body.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        body.extend_from_slice(payload);
        frame(b'D', &body)
    }

    fn command_complete(status: &str) -> Vec<u8> {
        let mut body = vec![0, 0];
        body.extend(lstring(status));
        frame(b'C', &body)
    }

    fn ready(status: u8) -> Vec<u8> {
        frame(b'Z', &[0, 0, status])
    }

    /// Drive one connection: handshake, then scripted responses per
    /// Sync, one script entry per command sequence.
    async fn mock_server(listener: TcpListener, scripts: Vec<Vec<u8>>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(read_frame(&mut stream).await.unwrap().tag, b'V');
        assert_eq!(read_frame(&mut stream).await.unwrap().tag, b'0');
        stream.write_all(&handshake_batch()).await.unwrap();

        let mut scripts = scripts.into_iter();
        loop {
            let Some(frame) = read_frame(&mut stream).await else {
                return;
            };
            match frame.tag {
                b'S' => {
                    let Some(batch) = scripts.next() else { return };
                    stream.write_all(&batch).await.unwrap();
                }
                b'X' => return,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn full_query_cycle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut parse_batch = prepare_complete(scalar::NULL_ID, scalar::STD_INT64);
        parse_batch.extend(ready(b'I'));
        let mut execute_batch = data_row(&420i64.to_be_bytes());
        execute_batch.extend(data_row(&7i64.to_be_bytes()));
        execute_batch.extend(command_complete("SELECT"));
        execute_batch.extend(ready(b'I'));

        connect_and_run(
            listener,
            vec![parse_batch, execute_batch],
            |mut conn| async move {
                let rows = conn.fetch_all("SELECT numbers", &[]).await.unwrap();
                assert_eq!(rows, [Value::Int64(420), Value::Int64(7)]);
                assert_eq!(conn.last_status(), Some("SELECT"));
                assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
                assert_eq!(conn.server_secret(), Some(&[7u8; 32]));
                assert_eq!(conn.server_settings().get("pgaddr").unwrap(), "ignored");
                conn.close().await.unwrap();
            },
        )
        .await;
    }

    #[tokio::test]
    async fn describe_builds_codecs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let custom = uuid::Uuid::from_u128(0xfeed);

        let mut parse_batch = prepare_complete(scalar::NULL_ID, custom);
        parse_batch.extend(ready(b'I'));

        // CommandDataDescription: null input, scalar alias of int32 output
        let mut typedesc = vec![3u8];
        typedesc.extend_from_slice(custom.as_bytes());
        typedesc.extend_from_slice(scalar::STD_INT32.as_bytes());
        let mut body = vec![0, 0, b'm'];
        body.extend_from_slice(scalar::NULL_ID.as_bytes());
        body.extend_from_slice(&0i32.to_be_bytes());
        body.extend_from_slice(custom.as_bytes());
        body.extend_from_slice(&(typedesc.len() as i32).to_be_bytes());
        body.extend_from_slice(&typedesc);
        let mut describe_batch = frame(b'T', &body);
        describe_batch.extend(ready(b'I'));

        let mut execute_batch = data_row(&(-5i32).to_be_bytes());
        execute_batch.extend(command_complete("SELECT"));
        execute_batch.extend(ready(b'I'));

        connect_and_run(
            listener,
            vec![parse_batch, describe_batch, execute_batch],
            |mut conn| async move {
                let row = conn.fetch_one("SELECT custom", &[]).await.unwrap();
                assert_eq!(row, Value::Int32(-5));
                conn.close().await.unwrap();
            },
        )
        .await;
    }

    #[tokio::test]
    async fn server_error_is_recoverable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut error_batch = {
            let mut body = vec![120];
            body.extend_from_slice(&0x0501_0001u32.to_be_bytes());
            body.extend(lstring("division by zero"));
            body.extend_from_slice(&0u16.to_be_bytes());
            frame(b'E', &body)
        };
        error_batch.extend(ready(b'I'));

        let mut parse_batch = prepare_complete(scalar::NULL_ID, scalar::STD_INT64);
        parse_batch.extend(ready(b'I'));
        let mut execute_batch = data_row(&1i64.to_be_bytes());
        execute_batch.extend(command_complete("SELECT"));
        execute_batch.extend(ready(b'I'));

        connect_and_run(
            listener,
            vec![error_batch, parse_batch, execute_batch],
            |mut conn| async move {
                let err = conn.fetch_all("SELECT 1/0", &[]).await.unwrap_err();
                let ErrorKind::Database(db) = err.kind() else {
                    panic!("expected a database error, got {err}");
                };
                assert_eq!(db.message, "division by zero");

                // the sync barrier drained the pipeline, the
                // connection keeps working
                assert!(!conn.is_closed());
                let rows = conn.fetch_all("SELECT 1", &[]).await.unwrap();
                assert_eq!(rows, [Value::Int64(1)]);
                conn.close().await.unwrap();
            },
        )
        .await;
    }

    #[tokio::test]
    async fn fetch_one_cardinality() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut parse_batch = prepare_complete(scalar::NULL_ID, scalar::STD_INT64);
        parse_batch.extend(ready(b'I'));
        let mut empty_batch = command_complete("SELECT");
        empty_batch.extend(ready(b'I'));

        connect_and_run(listener, vec![parse_batch, empty_batch], |mut conn| async move {
            let err = conn.fetch_one("SELECT nothing", &[]).await.unwrap_err();
            assert!(matches!(
                err.kind(),
                ErrorKind::Cardinality(CardinalityError::NoResult),
            ));
            conn.close().await.unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn unexpected_frame_closes_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        // a ServerKeyData in the middle of a command sequence
        let mut bad_batch = frame(b'K', &[1; 32]);
        bad_batch.extend(ready(b'I'));

        connect_and_run(listener, vec![bad_batch], |mut conn| async move {
            let err = conn.fetch_all("SELECT 1", &[]).await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
            assert!(conn.is_closed());

            let err = conn.fetch_all("SELECT 1", &[]).await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Io(_)));
        })
        .await;
    }

    async fn connect_and_run<F, Fut>(listener: TcpListener, scripts: Vec<Vec<u8>>, run: F)
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = ()>,
    {
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(mock_server(listener, scripts));

        let options = ConnectOptions::new().host("127.0.0.1").port(port);
        let config = config::resolve(&options, &config::test_env::TestEnviron::new()).unwrap();
        let conn = Connection::connect_resolved(&config, &options).await.unwrap();
        run(conn).await;

        server.await.unwrap();
    }
}
