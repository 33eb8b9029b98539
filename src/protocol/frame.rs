//! WebSocket frame parsing and serialization (RFC 6455).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                Masking key (if MASK set)                      |
//! +---------------------------------------------------------------+
//! |                     Payload data                              |
//! +---------------------------------------------------------------+
//! ```
//!
//! Parsing never consumes a partial frame: if the buffer holds fewer bytes
//! than the header declares, [`Error::IncompleteFrame`] reports how many are
//! still missing and the caller waits for the next readiness event.

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Header fields shared by the parse entry points.
#[derive(Debug, Clone)]
struct FrameHeader {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
    header_len: usize,
}

fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < 2 {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = (byte0 & 0x80) != 0;
    if byte0 & 0x70 != 0 {
        // No extensions are negotiated, so RSV1-3 must stay clear.
        return Err(Error::InvalidFrame("reserved bits set".into()));
    }
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;

    let masked = (byte1 & 0x80) != 0;
    let base_len = byte1 & 0x7F;

    let (payload_len, len_end) = match base_len {
        0..=125 => (usize::from(base_len), 2),
        126 => {
            if buf.len() < 4 {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            }
            (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        127 => {
            if buf.len() < 10 {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            }
            let len_u64 = u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]);
            let len =
                usize::try_from(len_u64).map_err(|_| Error::PayloadTooLarge { size: len_u64 })?;
            (len, 10)
        }
        _ => unreachable!(),
    };

    let header_len = if masked { len_end + 4 } else { len_end };
    if masked && buf.len() < header_len {
        return Err(Error::IncompleteFrame {
            needed: header_len - buf.len(),
        });
    }

    let mask = if masked {
        Some([buf[len_end], buf[len_end + 1], buf[len_end + 2], buf[len_end + 3]])
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
        header_len,
    })
}

/// A single WebSocket frame.
///
/// The payload is stored unmasked; for frames parsed off the wire the
/// original client masking key is kept in [`Frame::mask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key the peer used, if any.
    pub mask: Option<[u8; 4]>,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame with the given parameters.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            opcode,
            mask: None,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = if let Some(code) = code {
            let mut data = code.to_be_bytes().to_vec();
            data.extend_from_slice(reason.as_bytes());
            data
        } else {
            Vec::new()
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// The unmasked payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed, so a buffer
    /// containing several back-to-back frames can be drained in a loop.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if the buffer ends before the declared
    ///   payload does (wait for more input, not a failure)
    /// - [`Error::InvalidOpcode`] / [`Error::ReservedOpcode`] for opcodes
    ///   outside the RFC 6455 set
    /// - [`Error::InvalidFrame`] if reserved header bits are set
    /// - [`Error::PayloadTooLarge`] if the 64-bit length exceeds `usize`
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = parse_header(buf)?;

        let total = header
            .header_len
            .checked_add(header.payload_len)
            .ok_or(Error::PayloadTooLarge {
                size: header.payload_len as u64,
            })?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok((
            Frame {
                fin: header.fin,
                opcode: header.opcode,
                mask: header.mask,
                payload,
            },
            total,
        ))
    }

    /// Parse a frame that arrived from a client.
    ///
    /// Identical to [`Frame::parse`] except that a clear MASK bit is a
    /// protocol violation: RFC 6455 requires every client frame to be
    /// masked.
    ///
    /// # Errors
    ///
    /// All of [`Frame::parse`], plus [`Error::UnmaskedClientFrame`].
    pub fn parse_client(buf: &[u8]) -> Result<(Self, usize)> {
        let (frame, consumed) = Self::parse(buf)?;
        if frame.mask.is_none() {
            return Err(Error::UnmaskedClientFrame);
        }
        Ok((frame, consumed))
    }

    /// Check control-frame rules (RFC 6455 section 5.5).
    ///
    /// # Errors
    ///
    /// - [`Error::FragmentedControlFrame`] if a control frame has FIN=0
    /// - [`Error::ControlFrameTooLarge`] if its payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Serialize as a server frame (never masked).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.encode_inner(None)
    }

    /// Serialize as a client frame masked with `key`.
    #[must_use]
    pub fn encode_masked(&self, key: [u8; 4]) -> Vec<u8> {
        self.encode_inner(Some(key))
    }

    fn encode_inner(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = Vec::with_capacity(14 + payload_len);

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        buf.push(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        if payload_len <= 125 {
            buf.push(mask_bit | payload_len as u8);
        } else if payload_len <= usize::from(u16::MAX) {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        match mask {
            Some(key) => {
                buf.extend_from_slice(&key);
                let start = buf.len();
                buf.extend_from_slice(&self.payload);
                apply_mask(&mut buf[start..], key);
            }
            None => buf.extend_from_slice(&self.payload),
        }

        buf
    }
}
