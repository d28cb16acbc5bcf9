//! # Duplex Channel with Async Pump
//!
//! The single point all traffic between client and engine flows through.
//! A background pump reads the transport and feeds [`Channel::receive`], which
//! settles pending calls and dispatches engine requests to registered handlers.
//!
//! ## Philosophy
//!
//! - **Arrival Order In, Any Order Out**: Frames are decoded and dispatched in
//!   the order they arrive. Handlers run as their own tasks, so their responses
//!   leave in whatever order they finish; the call id does the pairing.
//! - **Re-entrant Handlers**: A handler receives the channel itself and may
//!   issue outbound calls before answering.
//! - **Local Faults Stay Local**: A packet that fails to decode costs that one
//!   call. Only a framing fault, where the stream offset is lost, closes the
//!   channel.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use espack::Map;
use esrpc::FrameBuffer;
use esrpc::Packet;
use esrpc::schema;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::error::panic_message;
use crate::ledger::Ledger;
use crate::transport::Transport;

/// A type-erased inbound command handler.
pub type InboundHandler = Arc<dyn Fn(Channel, Map) -> BoxFuture<'static, Result<Map>> + Send + Sync>;

/// What the engine writes before its first packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Preamble {
    /// The first frame is already a packet.
    #[default]
    None,
    /// The first frame is a version string, accepted whatever it says.
    AnyVersion,
    /// The first frame must be exactly this version string.
    Version(String),
}

/// Tuning for a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub preamble: Preamble,
    /// Applied to each outbound call; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    pub max_frame_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            preamble: Preamble::None,
            call_timeout: None,
            max_frame_size: esrpc::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preamble(mut self, preamble: Preamble) -> Self {
        self.preamble = preamble;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

struct Inbox {
    frames: FrameBuffer,
    awaiting_preamble: bool,
}

struct Inner {
    name: String,
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    ledger: Ledger,
    handlers: DashMap<String, InboundHandler>,
    inbox: Mutex<Inbox>,
    version: OnceLock<String>,
    closed: AtomicBool,
    close_reason: OnceLock<String>,
    pump: Mutex<Option<AbortHandle>>,
}

/// Multiplexes calls in both directions over one transport.
///
/// Cloning is cheap and every clone drives the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Creates a channel and spawns the pump reading `transport`.
    ///
    /// When the transport ends or fails the channel closes with that reason.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>, config: ChannelConfig) -> Self {
        let inbox = Inbox {
            frames: FrameBuffer::with_max_frame_size(config.max_frame_size),
            awaiting_preamble: config.preamble != Preamble::None,
        };
        let channel = Self {
            inner: Arc::new(Inner {
                name: name.into(),
                transport: Arc::from(transport),
                config,
                ledger: Ledger::new(),
                handlers: DashMap::new(),
                inbox: Mutex::new(inbox),
                version: OnceLock::new(),
                closed: AtomicBool::new(false),
                close_reason: OnceLock::new(),
                pump: Mutex::new(None),
            }),
        };

        let pump = channel.clone();
        let task = tokio::spawn(async move {
            let reason = loop {
                match pump.inner.transport.recv().await {
                    Ok(Some(bytes)) => {
                        if let Err(e) = pump.receive(&bytes) {
                            break e.to_string();
                        }
                    }
                    Ok(None) => break "the engine closed its output".to_string(),
                    Err(e) => break e.to_string(),
                }
            };
            pump.close(reason);
        });

        if let Ok(mut slot) = channel.inner.pump.lock() {
            *slot = Some(task.abort_handle());
        }
        channel
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The version string the engine announced, once it has.
    pub fn engine_version(&self) -> Option<&str> {
        self.inner.version.get().map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    fn closed_error(&self) -> Error {
        let reason = self.inner.close_reason.get().cloned().unwrap_or_else(|| "closed".to_string());
        Error::ChannelClosed { reason }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    /// Sends a request and waits for the engine's response.
    ///
    /// A response carrying an `error` entry settles as [`Error::Remote`].
    pub async fn send(&self, command: &str, payload: Map) -> Result<Map> {
        self.ensure_open()?;
        let ledger = &self.inner.ledger;
        let (id, rx) = ledger.register_outbound(command)?;

        // Registered after a concurrent close drained the ledger.
        if self.is_closed() {
            ledger.forget(id);
            return Err(self.closed_error());
        }

        let bytes = match Packet::request(id, command, payload).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                ledger.forget(id);
                return Err(e.into());
            }
        };

        debug!(channel = %self.inner.name, id, command, "send");
        if let Err(e) = self.inner.transport.send(&bytes).await {
            ledger.forget(id);
            return Err(e.into());
        }

        let settled = match self.inner.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    ledger.forget(id);
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };

        match settled {
            Ok(result) => result,
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Sends a request that expects no response.
    pub async fn notify(&self, command: &str, payload: Map) -> Result<()> {
        self.ensure_open()?;
        let id = self.inner.ledger.next_id()?;
        let bytes = Packet::request(id, command, payload).encode()?;
        self.inner.transport.send(&bytes).await?;
        Ok(())
    }

    /// Registers the handler for engine requests carrying `command`,
    /// replacing any earlier one.
    ///
    /// The handler's `Ok` map becomes the response payload; an `Err` becomes
    /// an `error` response.
    pub fn on_inbound_command<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Channel, Map) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Map>> + Send + 'static,
    {
        let handler: InboundHandler =
            Arc::new(move |channel: Channel, payload: Map| -> BoxFuture<'static, Result<Map>> {
                Box::pin(handler(channel, payload))
            });
        self.inner.handlers.insert(command.into(), handler);
    }

    /// Feeds engine output into the channel.
    ///
    /// # Errors
    /// Only for faults that close the channel: an oversized frame or a
    /// preamble naming the wrong version.
    pub fn receive(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let bodies = {
            let Ok(mut inbox) = self.inner.inbox.lock() else {
                return Err(Error::Protocol("receive state poisoned".into()));
            };
            let bodies = match inbox.frames.push(bytes) {
                Ok(bodies) => bodies,
                Err(e) => {
                    error!(channel = %self.inner.name, "framing error: {}", e);
                    let err = Error::from(e);
                    self.close(err.to_string());
                    return Err(err);
                }
            };
            let mut bodies = bodies.into_iter();
            if inbox.awaiting_preamble {
                if let Some(first) = bodies.next() {
                    inbox.awaiting_preamble = false;
                    drop(inbox);
                    self.accept_preamble(&first)?;
                }
            }
            bodies
        };

        for body in bodies {
            self.dispatch(&body);
        }
        Ok(())
    }

    fn accept_preamble(&self, frame: &[u8]) -> Result<()> {
        let version = String::from_utf8_lossy(frame).into_owned();
        if let Preamble::Version(expected) = &self.inner.config.preamble {
            if *expected != version {
                let err = Error::Protocol(format!(
                    "engine version {:?} does not match expected version {:?}",
                    version, expected
                ));
                self.close(err.to_string());
                return Err(err);
            }
        }
        info!(channel = %self.inner.name, version = %version, "engine ready");
        let _ = self.inner.version.set(version);
        Ok(())
    }

    fn dispatch(&self, body: &[u8]) {
        let packet = match Packet::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                self.reject_malformed(body, e);
                return;
            }
        };

        if packet.is_request {
            self.dispatch_request(packet);
        } else {
            self.dispatch_response(packet);
        }
    }

    /// Routes a decode failure to the call it belongs to, when the header
    /// survived.
    fn reject_malformed(&self, body: &[u8], e: esrpc::Error) {
        warn!(channel = %self.inner.name, "dropping malformed packet: {}", e);
        match esrpc::peek_header(body) {
            Ok((id, true)) => self.spawn_write(Packet::error_response(id, e.to_string())),
            Ok((id, false)) => {
                if let Ok(pending) = self.inner.ledger.take(id) {
                    pending.settle(Err(e.into()));
                }
            }
            Err(_) => {}
        }
    }

    fn dispatch_response(&self, packet: Packet) {
        let id = packet.id;
        let pending = match self.inner.ledger.take(id) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(channel = %self.inner.name, "{}", e);
                return;
            }
        };

        debug!(channel = %self.inner.name, id, command = %pending.command, "response");
        let result = if let Some(message) = packet.error() {
            Err(Error::Remote(message.to_string()))
        } else {
            match schema::validate_response(&pending.command, &packet.payload) {
                Ok(()) => Ok(packet.payload),
                Err(e) => Err(e.into()),
            }
        };
        pending.settle(result);
    }

    fn dispatch_request(&self, packet: Packet) {
        let id = packet.id;
        if let Err(e) = schema::validate_request(&packet) {
            warn!(channel = %self.inner.name, id, "{}", e);
            self.spawn_write(Packet::error_response(id, e.to_string()));
            return;
        }

        let Some(command) = packet.command().map(str::to_string) else {
            return;
        };
        if command == "ping" {
            self.spawn_write(Packet::response(id, Map::new()));
            return;
        }

        let Some(handler) = self.inner.handlers.get(&command).map(|h| h.value().clone()) else {
            warn!(channel = %self.inner.name, id, command = %command, "unsupported command");
            self.spawn_write(Packet::error_response(id, format!("unsupported command: {}", command)));
            return;
        };

        if let Err(e) = self.inner.ledger.begin_inbound(id) {
            error!(channel = %self.inner.name, "{}", e);
            return;
        }

        let mut payload = packet.payload;
        payload.remove("command");

        let channel = self.clone();
        let task = tokio::spawn(async move {
            // A panicking handler still owes the engine its one response.
            let caller = channel.clone();
            let run = AssertUnwindSafe(async move { handler(caller, payload).await });
            let reply = match run.catch_unwind().await {
                Ok(Ok(response)) => Packet::response(id, response),
                Ok(Err(e)) => {
                    warn!(channel = %channel.inner.name, id, command = %command, "handler failed: {}", e);
                    Packet::error_response(id, e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    error!(channel = %channel.inner.name, id, command = %command, "handler {}", message);
                    Packet::error_response(id, format!("handler for {:?} {}", command, message))
                }
            };
            channel.inner.ledger.finish_inbound(id);
            channel.write(reply).await;
        });
        self.inner.ledger.attach_inbound(id, task.abort_handle());
    }

    async fn write(&self, packet: Packet) {
        if self.is_closed() {
            return;
        }
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(channel = %self.inner.name, id = packet.id, "cannot encode response: {}", e);
                Packet::error_response(packet.id, e.to_string()).encode().unwrap_or_default()
            }
        };
        if bytes.is_empty() {
            return;
        }
        if let Err(e) = self.inner.transport.send(&bytes).await {
            warn!(channel = %self.inner.name, id = packet.id, "cannot write response: {}", e);
        }
    }

    fn spawn_write(&self, packet: Packet) {
        let channel = self.clone();
        tokio::spawn(async move { channel.write(packet).await });
    }

    /// Tears the channel down: every pending call settles with
    /// `ChannelClosed { reason }`, running handlers are aborted and later
    /// sends fail immediately. Calling it again does nothing.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.inner.close_reason.set(reason.into());
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let reason = self.inner.close_reason.get().cloned().unwrap_or_default();
        let settled = self.inner.ledger.abort_all(&reason);
        info!(channel = %self.inner.name, settled, reason = %reason, "channel closed");

        if let Ok(mut pump) = self.inner.pump.lock() {
            if let Some(task) = pump.take() {
                task.abort();
            }
        }
    }
}
