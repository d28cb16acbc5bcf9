//! # Error Definitions
//!
//! Failures of the packet layer. All of them point at a framing or version
//! problem between client and engine, never at a build failure.

use espack::Error as PackError;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The value codec refused to encode a payload.
    Codec(PackError),
    /// A frame did not hold a well-formed packet (bad value, trailing bytes,
    /// missing header, or a payload that violates its command schema).
    MalformedPacket(String),
    /// A frame declared a length above the configured maximum. The stream
    /// offset cannot be trusted past this point.
    FrameTooLarge { len: usize, max: usize },
    /// The id does not fit in the 31 bits the header reserves for it.
    CallIdOutOfRange(u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds the {} byte limit", len, max)
            }
            Self::CallIdOutOfRange(id) => write!(f, "call id {} does not fit in 31 bits", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Codec(e) }
}

/// A specialized Result type for packet operations.
pub type Result<T> = std::result::Result<T, Error>;
