//! WebSocket frame decoding and encoding
//!
//! Frames coming from a client are masked and get unmasked on decode.
//! Frames written by the server are never masked. Fragmentation and
//! control-frame handling are not implemented; the opcode is still parsed so
//! that such frames can be recognised and skipped.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::mask::apply_mask;
use crate::{Config, MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// Layout of decoded payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadAlignment {
    /// Payload bytes exactly as the client sent them
    #[default]
    Exact,
    /// A `0x00` byte followed by the payload, for peers written against
    /// servers that shifted their output buffer by one. Empty payloads stay
    /// empty.
    Legacy,
}

/// A parsed WebSocket frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Mask flag (set on client->server frames)
    pub masked: bool,
    /// Payload length as declared on the wire.
    ///
    /// Under [`PayloadAlignment::Legacy`] the decoded payload of a non-empty
    /// frame is one byte longer than this.
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Get the total header size in bytes
    #[inline]
    pub fn header_size(&self) -> usize {
        let len_size = if self.payload_len > MEDIUM_MESSAGE_THRESHOLD as u64 {
            10
        } else if self.payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            4
        } else {
            2
        };
        len_size + if self.masked { 4 } else { 0 }
    }

    /// Encode the frame header into a buffer
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        buf.put_u8(b0);

        let mask_bit = if self.masked { 0x80 } else { 0x00 };

        if self.payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(self.payload_len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(self.payload_len);
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }
}

/// A complete WebSocket frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Frame payload (already unmasked), including the leading zero byte
    /// added under [`PayloadAlignment::Legacy`]
    pub payload: Bytes,
}

impl Frame {
    /// Create a new unmasked frame
    pub fn new(opcode: OpCode, payload: Bytes, fin: bool) -> Self {
        Self {
            header: FrameHeader {
                fin,
                opcode,
                masked: false,
                payload_len: payload.len() as u64,
                mask: None,
            },
            payload,
        }
    }

    /// Create a final text frame
    #[inline]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Text, data.into(), true)
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        self.header.opcode.is_control()
    }

    /// Check if this is the final fragment
    #[inline]
    pub fn is_final(&self) -> bool {
        self.header.fin
    }

    /// Get the payload as a string
    pub fn as_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| Error::Protocol("invalid UTF-8 in text frame"))
    }

    /// Serialize this frame, masking it with `mask` when given
    pub fn encode(&self, buf: &mut BytesMut, mask: Option<[u8; 4]>) {
        encode_frame(buf, self.header.opcode, &self.payload, self.header.fin, mask);
    }
}

/// Decoder for client-sent frames
///
/// Stateless: each call looks at the start of `buf` and either decodes one
/// whole frame or reports that more bytes are needed.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
    expect_masked: bool,
    alignment: PayloadAlignment,
}

impl FrameDecoder {
    /// Create a new decoder
    pub fn new(max_frame_size: usize, expect_masked: bool) -> Self {
        Self {
            max_frame_size,
            expect_masked,
            alignment: PayloadAlignment::Exact,
        }
    }

    /// Create a decoder from connection settings
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_frame_size, config.require_masked)
            .with_alignment(config.payload_alignment)
    }

    /// Set the payload alignment
    pub fn with_alignment(mut self, alignment: PayloadAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Decode a frame from the front of the buffer
    ///
    /// Returns:
    /// - Ok(Some((frame, consumed))) if a complete frame was decoded
    /// - Ok(None) if more data is needed
    /// - Err(e) if the frame is invalid
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0x80 != 0;
        if b0 & 0x70 != 0 {
            return Err(Error::Protocol("RSV bits must be 0"));
        }
        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::InvalidFrame("invalid opcode"))?;

        let masked = b1 & 0x80 != 0;
        let len_byte = b1 & 0x7F;

        if self.expect_masked && !masked {
            return Err(Error::Protocol("client frames must be masked"));
        }

        let (payload_len, len_end) = match len_byte {
            0..=125 => (len_byte as u64, 2),
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            _ => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                if len >> 63 != 0 {
                    return Err(Error::Protocol("payload length MSB must be 0"));
                }
                (len, 10)
            }
        };

        if opcode.is_control() && payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            return Err(Error::Protocol("control frame too large"));
        }
        if payload_len > self.max_frame_size as u64 {
            return Err(Error::FrameTooLarge);
        }

        // bounded by max_frame_size, so it fits
        let payload_len = payload_len as usize;
        let payload_start = len_end + if masked { 4 } else { 0 };
        let frame_end = payload_start + payload_len;

        if buf.len() < frame_end {
            return Ok(None);
        }

        let mask = masked.then(|| {
            [
                buf[len_end],
                buf[len_end + 1],
                buf[len_end + 2],
                buf[len_end + 3],
            ]
        });

        let payload = self.unmask(&buf[payload_start..frame_end], mask);

        let frame = Frame {
            header: FrameHeader {
                fin,
                opcode,
                masked,
                payload_len: payload_len as u64,
                mask,
            },
            payload,
        };
        Ok(Some((frame, frame_end)))
    }

    /// Decode exactly one complete frame and return its payload
    ///
    /// A buffer shorter than the frame it declares is an error. Bytes past
    /// the end of the frame are ignored.
    pub fn decode_payload(&self, buf: &[u8]) -> Result<Bytes> {
        match self.decode(buf)? {
            Some((frame, _)) => Ok(frame.payload),
            None => Err(Error::InvalidFrame("truncated frame")),
        }
    }

    fn unmask(&self, data: &[u8], mask: Option<[u8; 4]>) -> Bytes {
        let lead = match self.alignment {
            PayloadAlignment::Legacy if !data.is_empty() => 1,
            _ => 0,
        };

        let mut payload = BytesMut::with_capacity(lead + data.len());
        if lead == 1 {
            payload.put_u8(0);
        }
        payload.put_slice(data);

        if let Some(mask) = mask {
            apply_mask(&mut payload[lead..], mask);
        }
        payload.freeze()
    }
}

/// Header size for a payload of `payload_len` bytes
#[inline]
pub fn header_len(payload_len: usize, masked: bool) -> usize {
    FrameHeader {
        fin: true,
        opcode: OpCode::Text,
        masked,
        payload_len: payload_len as u64,
        mask: None,
    }
    .header_size()
}

/// Encode a frame into a buffer
///
/// For masked frames (client mode), the payload is copied and masked.
#[inline]
pub fn encode_frame(
    buf: &mut BytesMut,
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) {
    let header = FrameHeader {
        fin,
        opcode,
        masked: mask.is_some(),
        payload_len: payload.len() as u64,
        mask,
    };

    buf.reserve(header.header_size() + payload.len());
    header.encode(buf);

    let start = buf.len();
    buf.put_slice(payload);
    if let Some(m) = mask {
        apply_mask(&mut buf[start..], m);
    }
}

/// Encode a server-to-client text frame: `0x81`, length field, raw payload
pub fn encode_text(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, OpCode::Text, payload, true, None);
    buf.freeze()
}
