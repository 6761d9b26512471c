//! Per-transport connection state machine
//!
//! A [`Connection`] owns one transport handle and walks it from the upgrade
//! handshake into frame exchange:
//!
//! ```text
//! Handshaking --(valid request, response written)--> Open
//!      |                                              |
//!      +----(bad request / bad frame / close())------>+--> Closed
//! ```
//!
//! All work happens synchronously inside [`Connection::on_data`] and
//! [`Connection::send`]; nothing blocks and nothing is shared between
//! connections.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::Config;
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameDecoder, encode_text};
use crate::handshake::{decode_latin1, find_header_end, negotiate};
use crate::headers::parse_headers;

/// Byte-stream transport the connection writes to
///
/// Reading is push-based: whoever owns the socket hands received bytes to
/// [`Connection::on_data`].
pub trait Transport {
    /// Write all of `data` to the peer
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Close the underlying stream
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the upgrade request
    Handshaking,
    /// Handshake done, exchanging frames
    Open,
    /// Transport closed; no further I/O
    Closed,
}

type MessageHandler = Box<dyn FnMut(Bytes) + Send>;

/// Server side of a single WebSocket connection
pub struct Connection<T: Transport> {
    phase: Phase,
    transport: Option<T>,
    on_message: Option<MessageHandler>,
    read_buf: BytesMut,
    decoder: FrameDecoder,
    config: Config,
    protocol: Option<String>,
}

impl<T: Transport> Connection<T> {
    /// Create a connection for a freshly accepted transport
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport: Some(transport),
            ..Self::detached(config)
        }
    }

    /// Create a connection with no transport attached
    ///
    /// Sends are dropped with a warning and received data is ignored.
    pub fn detached(config: Config) -> Self {
        Self {
            phase: Phase::Handshaking,
            transport: None,
            on_message: None,
            read_buf: BytesMut::new(),
            decoder: FrameDecoder::from_config(&config),
            config,
            protocol: None,
        }
    }

    /// Current phase
    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the handshake completed and the transport is still attached
    #[inline]
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Subprotocol echoed during the handshake
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Connection configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The transport, unless the connection was closed or never had one
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Mutable access to the transport
    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Register the inbound message callback, replacing any previous one
    pub fn on_message<F>(&mut self, handler: F)
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.on_message = Some(Box::new(handler));
    }

    /// Feed bytes received from the transport
    ///
    /// While handshaking, bytes are buffered until the request head is
    /// complete; once open, every complete frame is decoded and its payload
    /// handed to the message callback. Any error closes the transport before
    /// it is returned.
    pub fn on_data(&mut self, data: &[u8]) -> Result<()> {
        if self.transport.is_none() {
            debug!(len = data.len(), phase = ?self.phase, "ignoring data without transport");
            return Ok(());
        }

        match self.phase {
            Phase::Handshaking => self.read_handshake(data),
            Phase::Open => {
                if data.is_empty() {
                    return Ok(());
                }
                self.read_buf.extend_from_slice(data);
                self.read_frames()
            }
            Phase::Closed => Ok(()),
        }
    }

    /// Send a text frame carrying `payload`
    ///
    /// Without a transport this is a no-op that logs a warning. Sending
    /// before the handshake has completed is an error.
    pub fn send(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            warn!("send without an active transport, message dropped");
            return Ok(());
        };

        if self.phase != Phase::Open {
            return Err(Error::InvalidState("handshake not complete"));
        }

        let frame = encode_text(payload.as_ref());
        trace!(len = frame.len(), "sending frame");
        transport.write(&frame)
    }

    /// Close the transport and stop processing
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.phase = Phase::Closed;
        self.read_buf.clear();
    }

    fn read_handshake(&mut self, data: &[u8]) -> Result<()> {
        self.read_buf.extend_from_slice(data);

        let end = match find_header_end(&self.read_buf) {
            Some(end) if end <= self.config.max_header_size => end,
            Some(_) => return Err(self.fail(Error::InvalidHttp("request too large"))),
            None if self.read_buf.len() > self.config.max_header_size => {
                return Err(self.fail(Error::InvalidHttp("request too large")));
            }
            None => return Ok(()),
        };

        let head = self.read_buf.split_to(end);
        let headers = parse_headers(&decode_latin1(&head));

        let response = match negotiate(&headers, &self.config) {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };

        let written = match self.transport.as_mut() {
            Some(transport) => transport.write(&response.to_bytes()),
            None => Err(Error::ConnectionClosed),
        };
        if let Err(e) = written {
            return Err(self.fail(e));
        }

        debug!(protocol = ?response.protocol, "handshake accepted");
        self.protocol = response.protocol;
        self.phase = Phase::Open;

        // frames pipelined behind the request head
        if self.read_buf.is_empty() {
            Ok(())
        } else {
            self.read_frames()
        }
    }

    fn read_frames(&mut self) -> Result<()> {
        loop {
            match self.decoder.decode(&self.read_buf) {
                Ok(Some((frame, consumed))) => {
                    self.read_buf.advance(consumed);
                    self.dispatch(frame);
                }
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        if !frame.header.opcode.is_data() {
            debug!(opcode = ?frame.header.opcode, "ignoring control frame");
            return;
        }

        match self.on_message.as_mut() {
            Some(handler) => handler(frame.payload),
            None => trace!(len = frame.payload.len(), "no message handler, payload dropped"),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!(error = %err, phase = ?self.phase, "closing connection");
        self.close();
        err
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("phase", &self.phase)
            .field("has_transport", &self.transport.is_some())
            .field("has_handler", &self.on_message.is_some())
            .field("buffered", &self.read_buf.len())
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PayloadAlignment;
    use crate::frame::{OpCode, encode_frame};
    use crate::handshake::build_request;
    use std::sync::{Arc, Mutex};

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[derive(Debug, Default)]
    struct MockTransport {
        written: Vec<u8>,
        closed: bool,
        fail_writes: bool,
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(Error::ConnectionReset);
            }
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn request() -> Vec<u8> {
        build_request("localhost", "/", SAMPLE_KEY, None).to_vec()
    }

    fn client_frame(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, payload, true, Some(MASK));
        buf.to_vec()
    }

    fn collect(conn: &mut Connection<&mut MockTransport>) -> Arc<Mutex<Vec<Bytes>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        conn.on_message(move |payload| sink.lock().unwrap().push(payload));
        received
    }

    #[test]
    fn test_handshake_opens_connection() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());

        assert_eq!(conn.phase(), Phase::Handshaking);
        conn.on_data(&request()).unwrap();
        assert!(conn.is_open());
        drop(conn);

        let response = String::from_utf8(transport.written).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
        assert!(!transport.closed);
    }

    #[test]
    fn test_handshake_split_across_chunks() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        let request = request();
        let (head, tail) = request.split_at(20);

        conn.on_data(head).unwrap();
        assert_eq!(conn.phase(), Phase::Handshaking);
        assert!(conn.transport().unwrap().written.is_empty());

        conn.on_data(tail).unwrap();
        assert!(conn.is_open());
    }

    #[test]
    fn test_handshake_failure_closes_transport() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());

        let err = conn
            .on_data(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap_err();
        assert!(err.is_handshake());
        assert_eq!(conn.phase(), Phase::Closed);
        assert!(conn.transport().is_none());

        // no retry once closed
        conn.on_data(&request()).unwrap();
        assert_eq!(conn.phase(), Phase::Closed);
        drop(conn);

        assert!(transport.closed);
        assert!(transport.written.is_empty());
    }

    #[test]
    fn test_request_too_large() {
        let mut transport = MockTransport::default();
        let config = Config::builder().max_header_size(32).build();
        let mut conn = Connection::new(&mut transport, config);

        let err = conn.on_data(&[b'a'; 64]).unwrap_err();
        assert!(matches!(err, Error::InvalidHttp("request too large")));
        drop(conn);
        assert!(transport.closed);
    }

    #[test]
    fn test_messages_delivered_to_callback() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        let received = collect(&mut conn);

        conn.on_data(&request()).unwrap();
        conn.on_data(&client_frame(b"hello")).unwrap();
        conn.on_data(&[]).unwrap();

        let mut both = client_frame(b"one");
        both.extend_from_slice(&client_frame(b"two"));
        conn.on_data(&both).unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].as_ref(), b"hello");
        assert_eq!(received[1].as_ref(), b"one");
        assert_eq!(received[2].as_ref(), b"two");
    }

    #[test]
    fn test_frame_pipelined_after_request() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        let received = collect(&mut conn);

        let mut data = request();
        data.extend_from_slice(&client_frame(b"early"));
        conn.on_data(&data).unwrap();

        assert!(conn.is_open());
        assert_eq!(received.lock().unwrap()[0].as_ref(), b"early");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        let received = collect(&mut conn);
        conn.on_data(&request()).unwrap();

        let payload = vec![b'x'; 70_000];
        let frame = client_frame(&payload);
        for chunk in frame.chunks(4096) {
            conn.on_data(chunk).unwrap();
        }

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_ref(), payload.as_slice());
    }

    #[test]
    fn test_control_frames_are_skipped() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        let received = collect(&mut conn);
        conn.on_data(&request()).unwrap();

        let mut ping = BytesMut::new();
        encode_frame(&mut ping, OpCode::Ping, b"beat", true, Some(MASK));
        conn.on_data(&ping).unwrap();

        assert!(conn.is_open());
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bad_frame_closes_connection() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        conn.on_data(&request()).unwrap();

        // unmasked frame from a client
        let err = conn.on_data(&encode_text(b"nope")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.phase(), Phase::Closed);
        drop(conn);
        assert!(transport.closed);
    }

    #[test]
    fn test_on_message_replaces_handler() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        let first = collect(&mut conn);
        let second = collect(&mut conn);

        conn.on_data(&request()).unwrap();
        conn.on_data(&client_frame(b"hi")).unwrap();

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_send_writes_text_frame() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());
        conn.on_data(&request()).unwrap();
        let handshake_len = conn.transport().unwrap().written.len();

        conn.send("hello").unwrap();
        drop(conn);

        assert_eq!(&transport.written[handshake_len..], b"\x81\x05hello");
    }

    #[test]
    fn test_send_before_handshake() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());

        assert!(matches!(conn.send("early"), Err(Error::InvalidState(_))));
        assert_eq!(conn.phase(), Phase::Handshaking);
        drop(conn);
        assert!(transport.written.is_empty());
    }

    #[test]
    fn test_send_without_transport_is_noop() {
        let mut conn: Connection<MockTransport> = Connection::detached(Config::default());

        assert!(conn.send("nobody listening").is_ok());
        assert_eq!(conn.phase(), Phase::Handshaking);
        assert!(conn.transport().is_none());

        conn.on_data(&request()).unwrap();
        assert_eq!(conn.phase(), Phase::Handshaking);
    }

    #[test]
    fn test_write_failure_during_handshake() {
        let mut transport = MockTransport {
            fail_writes: true,
            ..Default::default()
        };
        let mut conn = Connection::new(&mut transport, Config::default());

        assert!(matches!(conn.on_data(&request()), Err(Error::ConnectionReset)));
        assert_eq!(conn.phase(), Phase::Closed);
    }

    #[test]
    fn test_legacy_alignment_and_protocol_echo() {
        let mut transport = MockTransport::default();
        let config = Config::builder()
            .payload_alignment(PayloadAlignment::Legacy)
            .build();
        let mut conn = Connection::new(&mut transport, config);
        let received = collect(&mut conn);

        let request = build_request("localhost", "/", SAMPLE_KEY, Some("chat"));
        conn.on_data(&request).unwrap();
        assert_eq!(conn.protocol(), Some("chat"));

        conn.on_data(&client_frame(b"abc")).unwrap();
        assert_eq!(received.lock().unwrap()[0].as_ref(), b"\0abc");
    }

    #[test]
    fn test_non_ascii_protocol_echoed_verbatim() {
        let mut transport = MockTransport::default();
        let mut conn = Connection::new(&mut transport, Config::default());

        let mut request = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: ".to_vec();
        request.extend_from_slice(SAMPLE_KEY.as_bytes());
        request.extend_from_slice(b"\r\nSec-WebSocket-Protocol: caf\xE9\r\n\r\n");

        conn.on_data(&request).unwrap();
        assert!(conn.is_open());
        drop(conn);

        let echoed = b"Sec-WebSocket-Protocol: caf\xE9\r\n\r\n";
        assert!(transport.written.ends_with(echoed));
    }
}
