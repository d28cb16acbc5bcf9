//! In-memory stand-ins for the engine's stdio pipes.
//!
//! A real pipe does not preserve write boundaries. [`PipeTransport::fragmented`]
//! reproduces that by handing out reads in small pieces, so the framing layer
//! sees partial headers and split bodies.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

struct Reader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Bytes received but not yet handed out.
    pending: Vec<u8>,
}

/// One end of a connected pair of in-memory pipes.
#[derive(Clone)]
pub struct PipeTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    reader: Arc<Mutex<Reader>>,
    /// Largest read handed out, `None` to return whole writes.
    chunk: Option<usize>,
}

impl PipeTransport {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx,
            reader: Arc::new(Mutex::new(Reader { rx, pending: Vec::new() })),
            chunk: None,
        }
    }

    /// Two ends where each send arrives as one read on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }

    /// Makes this end read at most `max` bytes at a time.
    pub fn fragmented(mut self, max: usize) -> Self {
        self.chunk = Some(max.max(1));
        self
    }
}

#[async_trait::async_trait]
impl Transport for PipeTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| TransportError::ConnectionLost("the other end of the pipe is gone".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        if reader.pending.is_empty() {
            match reader.rx.recv().await {
                Some(bytes) => reader.pending = bytes,
                None => return Ok(None),
            }
        }
        let take = match self.chunk {
            Some(max) => max.min(reader.pending.len()),
            None => reader.pending.len(),
        };
        let rest = reader.pending.split_off(take);
        Ok(Some(std::mem::replace(&mut reader.pending, rest)))
    }
}
