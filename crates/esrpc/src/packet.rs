//! # Packets
//!
//! Defines the request/response envelope.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Byte Stability**: `decode` followed by `encode` reproduces the frame exactly,
//!   because payload maps keep their wire order.

use espack::Decoder;
use espack::Encoder;
use espack::Map;
use espack::Value;

use crate::error::Error;
use crate::error::Result;

/// Correlates a request with its response.
pub type CallId = u32;

/// Largest id the header can carry.
pub const MAX_CALL_ID: CallId = 0x7FFF_FFFF;

/// One framed unit of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: CallId,
    pub is_request: bool,
    /// For requests the `command` entry lives here too, first by convention.
    pub payload: Map,
}

impl Packet {
    /// Builds a request, placing `command` ahead of the other entries.
    pub fn request(id: CallId, command: &str, payload: Map) -> Self {
        let mut ordered = Map::with_capacity(payload.len() + 1);
        ordered.insert("command", command);
        for (key, value) in payload {
            if key != "command" {
                ordered.insert(key, value);
            }
        }
        Self { id, is_request: true, payload: ordered }
    }

    pub fn response(id: CallId, payload: Map) -> Self {
        Self { id, is_request: false, payload }
    }

    /// A response carrying only an `error` string.
    pub fn error_response(id: CallId, message: impl Into<String>) -> Self {
        Self::response(id, Map::new().with("error", message.into()))
    }

    /// The command of a request.
    pub fn command(&self) -> Option<&str> {
        if !self.is_request {
            return None;
        }
        self.payload.get_str("command")
    }

    /// The `error` string of a response, if it failed at the protocol level.
    pub fn error(&self) -> Option<&str> {
        if self.is_request {
            return None;
        }
        self.payload.get_str("error")
    }

    fn header(&self) -> Result<u32> {
        if self.id > MAX_CALL_ID {
            return Err(Error::CallIdOutOfRange(self.id));
        }
        Ok((self.id << 1) | (!self.is_request) as u32)
    }

    /// Encodes the packet as a complete frame, length prefix included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = self.header()?;

        let mut enc = Encoder::with_prefix(&[0u8; 8]);
        enc.map(&self.payload)?;
        let mut buf = enc.into_bytes()?;

        let body_len = buf.len() - 4;
        if body_len > u32::MAX as usize {
            return Err(Error::Codec(espack::Error::TooLong(body_len)));
        }
        buf[0..4].copy_from_slice(&(body_len as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&header.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a frame body, i.e. everything after the length prefix.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let (id, is_request) = peek_header(body)?;

        let mut dec = Decoder::new(&body[4..]);
        let value = dec.value().map_err(|e| malformed(id, e))?;
        dec.finish().map_err(|e| malformed(id, e))?;

        let Value::Map(payload) = value else {
            return Err(Error::MalformedPacket(format!(
                "packet {} carries a {:?} instead of a map",
                id,
                value.tag()
            )));
        };

        Ok(Self { id, is_request, payload })
    }
}

fn malformed(id: CallId, e: espack::Error) -> Error {
    Error::MalformedPacket(format!("packet {}: {}", id, e))
}

/// Reads only the id and direction from a frame body.
///
/// Useful for routing an error back to the right call when the rest of the
/// body fails to decode.
pub fn peek_header(body: &[u8]) -> Result<(CallId, bool)> {
    let Some(header) = body.get(0..4) else {
        return Err(Error::MalformedPacket(format!(
            "frame of {} bytes is too short for a header",
            body.len()
        )));
    };
    let header = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    Ok((header >> 1, header & 1 == 0))
}

/// Decodes a buffer holding only complete frames.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Packet>> {
    let mut frames = crate::frame::FrameBuffer::new();
    let bodies = frames.push(bytes)?;
    if frames.buffered() != 0 {
        return Err(Error::MalformedPacket(format!(
            "{} bytes of an incomplete frame at end of buffer",
            frames.buffered()
        )));
    }
    bodies.iter().map(|body| Packet::decode(body)).collect()
}
