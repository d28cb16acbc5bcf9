//! # Stream Framing
//!
//! Splits a continuous byte stream into frame bodies. Bytes arrive in chunks
//! of any size; partial frames stay buffered until the rest shows up.

use crate::error::Error;
use crate::error::Result;

/// Upper bound on a single frame unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const LEN_SIZE: usize = 4;

/// Incremental frame reassembly state.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { buf: Vec::new(), max_frame_size }
    }

    /// Bytes held back as the start of an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends `bytes` and returns the body of every frame completed by them,
    /// in stream order.
    ///
    /// # Errors
    /// `FrameTooLarge` if a length prefix exceeds the limit. Frames completed
    /// before the oversized one are discarded with it; the caller is expected
    /// to tear the stream down.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut offset = 0;
        while self.buf.len() - offset >= LEN_SIZE {
            let p = &self.buf[offset..offset + LEN_SIZE];
            let len = u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as usize;
            if len > self.max_frame_size {
                return Err(Error::FrameTooLarge { len, max: self.max_frame_size });
            }
            let end = offset + LEN_SIZE + len;
            if end > self.buf.len() {
                break;
            }
            frames.push(self.buf[offset + LEN_SIZE..end].to_vec());
            offset = end;
        }

        self.buf.drain(..offset);
        Ok(frames)
    }
}
