//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between the client and the
//! sandboxed engine.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about packets or frames.
//!   It moves opaque buffers; `recv` may return any slice of the stream.
//! - **Message-Atomic Sends**: One `send` is delivered as one contiguous run of
//!   bytes, even when several tasks send at once.

use std::fmt;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A duplex byte pipe to the engine.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hands `payload` to the engine's input stream.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next chunk of engine output. `Ok(None)` means the stream
    /// ended and nothing more will arrive.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
