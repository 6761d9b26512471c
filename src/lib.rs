//! # ws-upgrade: server-side WebSocket handshake and frame codec
//!
//! A small RFC 6455 server core that works over any raw byte stream:
//!
//! - **Header parsing**: lenient, case-insensitive `key: value` extraction
//! - **Handshake negotiation**: `Sec-WebSocket-Accept` derivation and the `101` response
//! - **Frame codec**: length-class selection on encode, mask removal on decode
//! - **Connection state machine**: handshaking → open, one instance per transport
//!
//! The transport itself (listener, socket lifecycle) stays outside the crate and is
//! injected through the [`connection::Transport`] trait, or driven asynchronously through
//! [`server::WebSocketServer`] when the `tokio-runtime` feature is enabled.
//!
//! ## Example
//!
//! ```ignore
//! use ws_upgrade::{Config, Connection};
//!
//! let mut conn = Connection::new(socket, Config::default());
//! conn.on_message(|payload| println!("{:?}", payload));
//!
//! // feed bytes as the transport delivers them
//! conn.on_data(&chunk)?;
//! conn.send("hello")?;
//! ```

pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod headers;
pub mod mask;
pub mod registry;

#[cfg(feature = "tokio-runtime")]
pub mod server;

pub use connection::{Connection, Phase, Transport};
pub use error::{Error, Result};
pub use frame::{Frame, FrameDecoder, OpCode, PayloadAlignment};
pub use headers::HeaderMap;
pub use registry::{ConnectionId, ConnectionRegistry};

#[cfg(feature = "tokio-runtime")]
pub use server::{ConnectionHandle, WebSocketServer};

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Largest payload that fits the 7-bit length field (2-byte header)
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Largest payload that fits the 16-bit extended length field (4-byte header)
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// Default cap on the size of a handshake request (8KB)
pub const MAX_HEADER_SIZE: usize = 8192;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Configuration for server connections
///
/// # Example
///
/// ```
/// use ws_upgrade::{Config, PayloadAlignment};
///
/// let config = Config::builder()
///     .max_frame_size(64 * 1024)
///     .payload_alignment(PayloadAlignment::Legacy)
///     .strict_key(false)
///     .build();
///
/// assert_eq!(config.max_frame_size, 64 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of the handshake request in bytes (default: 8KB)
    pub max_header_size: usize,
    /// Maximum declared payload length of a single frame (default: 16MB)
    pub max_frame_size: usize,
    /// How decoded payloads are laid out (default: `Exact`)
    pub payload_alignment: PayloadAlignment,
    /// Require `Sec-WebSocket-Key` to decode to a 16-byte nonce (default: true)
    pub strict_key: bool,
    /// Require a `GET` request line (default: true)
    pub require_get: bool,
    /// Reject client frames without the mask bit (default: true)
    pub require_masked: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_header_size: MAX_HEADER_SIZE,
            max_frame_size: 16 * 1024 * 1024,
            payload_alignment: PayloadAlignment::Exact,
            strict_key: true,
            require_get: true,
            require_masked: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Config that mirrors the lenient behaviour of early hand-rolled servers:
    /// any non-empty key is accepted, the request line is not checked and
    /// decoded payloads carry the legacy leading byte.
    pub fn lenient() -> Self {
        Self {
            payload_alignment: PayloadAlignment::Legacy,
            strict_key: false,
            require_get: false,
            require_masked: false,
            ..Self::default()
        }
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set maximum handshake request size
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.config.max_header_size = size;
        self
    }

    /// Set maximum frame payload size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set decoded payload alignment
    pub fn payload_alignment(mut self, alignment: PayloadAlignment) -> Self {
        self.config.payload_alignment = alignment;
        self
    }

    /// Enable or disable nonce validation of `Sec-WebSocket-Key`
    pub fn strict_key(mut self, enabled: bool) -> Self {
        self.config.strict_key = enabled;
        self
    }

    /// Enable or disable the `GET` request line check
    pub fn require_get(mut self, enabled: bool) -> Self {
        self.config.require_get = enabled;
        self
    }

    /// Enable or disable rejection of unmasked client frames
    pub fn require_masked(mut self, enabled: bool) -> Self {
        self.config.require_masked = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::connection::{Connection, Phase, Transport};
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Frame, FrameDecoder, OpCode, PayloadAlignment};
    pub use crate::registry::{ConnectionId, ConnectionRegistry};
}
