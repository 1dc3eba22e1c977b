//! # Connection
//!
//! Purpose: Own one TCP socket to the server and move whole frames across it.
//!
//! ## Design Principles
//! 1. **Exclusive Ownership**: A `Connection` is only reachable through the
//!    pool's lock guard (or by value), so `&mut self` on every I/O method is
//!    the lock-held precondition, checked by the compiler.
//! 2. **Close On Failure**: Any error in `request`/`response` drops the socket
//!    before returning, so a half-written or half-read stream is never reused.
//! 3. **Per-Operation Deadlines**: Read/write timeouts are re-applied on every
//!    call; an unset or zero timeout clears the deadline (block indefinitely).
//! 4. **Buffer Reuse**: The write buffer and read buffer live on the
//!    connection to avoid per-call allocations.
//!
//! ## State Machine
//!
//! ```text
//!   Unconnected --dial ok--> Connected --I/O error--> Failed
//!        ^                       |                      |
//!        +-------- close --------+        dial ok ------+--> Connected
//! ```

use std::io::{self, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace};

use kvpb_common::{body_len, code_name, decode_body, encode_frame_into, Empty, Message, OpcodeRegistry, FRAME_HEADER_LEN};

use crate::error::{ClientError, ClientResult};

/// Default upper bound for a single response body.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Never dialed, or explicitly closed.
    Unconnected,
    /// Socket is open and usable.
    Connected,
    /// Closed because of a dial or I/O failure.
    Failed,
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    addr: String,
    // Socket present <=> healthy.
    stream: Option<BufReader<TcpStream>>,
    failed: bool,
    registry: Arc<OpcodeRegistry>,
    write_buf: BytesMut,
    read_buf: Vec<u8>,
    dial_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl Connection {
    /// Creates an unconnected connection for `addr`.
    pub fn new(addr: impl Into<String>, registry: Arc<OpcodeRegistry>) -> Self {
        Connection {
            addr: addr.into(),
            stream: None,
            failed: false,
            registry,
            write_buf: BytesMut::with_capacity(256),
            read_buf: Vec::with_capacity(256),
            dial_timeout: None,
            read_timeout: None,
            write_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Remote address this connection dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ConnState {
        match (&self.stream, self.failed) {
            (Some(_), _) => ConnState::Connected,
            (None, true) => ConnState::Failed,
            (None, false) => ConnState::Unconnected,
        }
    }

    /// Returns true when the socket is open.
    pub fn is_healthy(&self) -> bool {
        self.stream.is_some()
    }

    pub fn set_dial_timeout(&mut self, timeout: Option<Duration>) {
        self.dial_timeout = timeout;
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn set_max_frame_len(&mut self, max: usize) {
        self.max_frame_len = max;
    }

    /// Closes the socket (if open) and marks the connection unconnected.
    pub fn close(&mut self) {
        self.failed = false;
        self.drop_stream();
    }

    /// Re-dials regardless of the current state.
    pub fn recover(&mut self) -> ClientResult<()> {
        self.drop_stream();
        self.dial()
    }

    /// Encodes and writes one request frame, dialing first when needed.
    ///
    /// # Errors
    /// `Dial`, `Serialization` or `Write`; the connection is closed on any of
    /// them.
    pub fn request<M: Message>(&mut self, code: u8, message: &M) -> ClientResult<()> {
        let result = self.try_request(code, message);
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Reads and decodes one response frame.
    ///
    /// Returns `Ok(None)` for body-less responses.
    ///
    /// # Errors
    /// `Read`, `InvalidResponseHeader`, `IncompleteResponseBody`,
    /// `ResponseTooLarge` or a codec error; the connection is closed on any
    /// of them.
    pub fn response<M: Message>(&mut self) -> ClientResult<Option<M>> {
        let result = self.try_response();
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Sends the reserved ping request and expects a body-less reply.
    pub fn ping(&mut self) -> ClientResult<()> {
        let code = self.registry.ping_request();
        self.request(code, &Empty)?;
        match self.response::<Empty>()? {
            None => Ok(()),
            Some(_) => {
                // Anything but a body-less reply means the peer is not
                // speaking our protocol.
                self.fail();
                Err(ClientError::InvalidResponseCode)
            }
        }
    }

    fn try_request<M: Message>(&mut self, code: u8, message: &M) -> ClientResult<()> {
        if self.stream.is_none() {
            self.dial()?;
        }

        self.write_buf.clear();
        encode_frame_into(code, message, &mut self.write_buf)?;

        let stream = match self.stream.as_mut() {
            Some(stream) => stream.get_mut(),
            None => return Err(ClientError::write(io::ErrorKind::NotConnected.into())),
        };
        stream
            .set_write_timeout(deadline(self.write_timeout))
            .map_err(ClientError::write)?;
        stream.write_all(&self.write_buf).map_err(ClientError::write)?;
        stream.flush().map_err(ClientError::write)?;

        trace!(addr = %self.addr, code = code_name(code), bytes = self.write_buf.len(), "request written");
        Ok(())
    }

    fn try_response<M: Message>(&mut self) -> ClientResult<Option<M>> {
        let reader = match self.stream.as_mut() {
            Some(reader) => reader,
            None => return Err(ClientError::read(io::ErrorKind::NotConnected.into())),
        };
        reader
            .get_ref()
            .set_read_timeout(deadline(self.read_timeout))
            .map_err(ClientError::read)?;

        read_frame(reader, &mut self.read_buf, self.max_frame_len)?;
        trace!(addr = %self.addr, bytes = self.read_buf.len(), "response read");

        let decoded = decode_body(&self.read_buf, &self.registry)?;
        Ok(decoded)
    }

    /// Connects to the server. On failure the connection stays closed.
    fn dial(&mut self) -> ClientResult<()> {
        match connect_stream(&self.addr, self.dial_timeout) {
            Ok(stream) => {
                self.stream = Some(BufReader::new(stream));
                self.failed = false;
                debug!(addr = %self.addr, "connection dialed");
                Ok(())
            }
            Err(err) => {
                self.stream = None;
                self.failed = true;
                Err(ClientError::dial(&self.addr, err))
            }
        }
    }

    fn fail(&mut self) {
        self.failed = true;
        self.drop_stream();
    }

    fn drop_stream(&mut self) {
        if let Some(reader) = self.stream.take() {
            // Peer may already be gone; shutdown errors carry no information.
            let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Zero durations are rejected by the socket API and mean "no deadline" here.
fn deadline(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|timeout| !timeout.is_zero())
}

/// Reads one length-prefixed frame body into `buf`.
fn read_frame<R: Read>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> ClientResult<()> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => ClientError::InvalidResponseHeader,
        _ => ClientError::read(err),
    })?;

    let len = body_len(header);
    if len > max_len {
        return Err(ClientError::ResponseTooLarge { len, max: max_len });
    }

    buf.clear();
    buf.resize(len, 0);
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => ClientError::IncompleteResponseBody { expected: len },
        _ => ClientError::read(err),
    })
}

fn connect_stream(addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let stream = match deadline(timeout) {
        Some(timeout) => {
            let mut last_err = io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing");
            let mut connected = None;
            for candidate in addr.to_socket_addrs()? {
                match TcpStream::connect_timeout(&candidate, timeout) {
                    Ok(stream) => {
                        connected = Some(stream);
                        break;
                    }
                    Err(err) => last_err = err,
                }
            }
            connected.ok_or(last_err)?
        }
        None => TcpStream::connect(addr)?,
    };
    // Disable Nagle to keep request latency low for small frames.
    stream.set_nodelay(true)?;
    Ok(stream)
}
