//! A scripted stand-in for the engine, speaking the real wire format.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use esbridge::Channel;
use esbridge::ChannelConfig;
use esbridge::Map;
use esbridge::Value;
use esbridge::mock_transport::PipeTransport;
use esbridge::sandbox::EngineIo;
use esbridge::sandbox::LaunchError;
use esbridge::sandbox::ModuleRef;
use esbridge::sandbox::Sandbox;
use esbridge::transport::Transport;
use esrpc::CallId;
use esrpc::FrameBuffer;
use esrpc::Packet;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The engine's end of a mock transport.
pub struct FakeEngine {
    transport: PipeTransport,
    frames: FrameBuffer,
    backlog: VecDeque<Packet>,
    next_id: CallId,
}

impl FakeEngine {
    pub fn new(transport: PipeTransport) -> Self {
        Self { transport, frames: FrameBuffer::new(), backlog: VecDeque::new(), next_id: 1000 }
    }

    /// A channel wired to a fresh engine.
    pub fn connect(config: ChannelConfig) -> (Channel, FakeEngine) {
        init_tracing();
        let (client, engine) = PipeTransport::pair();
        let channel = Channel::new("test", Box::new(client), config);
        (channel, FakeEngine::new(engine))
    }

    /// Like [`FakeEngine::connect`], but the client reads the engine's output
    /// `max` bytes at a time.
    pub fn connect_fragmented(config: ChannelConfig, max: usize) -> (Channel, FakeEngine) {
        init_tracing();
        let (client, engine) = PipeTransport::pair();
        let channel = Channel::new("test", Box::new(client.fragmented(max)), config);
        (channel, FakeEngine::new(engine))
    }

    /// Waits for the next packet the client wrote, `None` once it is gone.
    pub async fn next(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.backlog.pop_front() {
                return Some(packet);
            }
            let bytes = self.transport.recv().await.ok()??;
            for body in self.frames.push(&bytes).ok()? {
                self.backlog.push_back(Packet::decode(&body).ok()?);
            }
        }
    }

    pub async fn expect_request(&mut self, command: &str) -> Packet {
        let packet = self.next().await.expect("client hung up");
        assert!(packet.is_request, "expected a request, got {:?}", packet);
        assert_eq!(packet.command(), Some(command));
        packet
    }

    pub async fn expect_response(&mut self, id: CallId) -> Map {
        let packet = self.next().await.expect("client hung up");
        assert!(!packet.is_request, "expected a response, got {:?}", packet);
        assert_eq!(packet.id, id);
        packet.payload
    }

    pub async fn write(&self, packet: Packet) {
        self.send_raw(&packet.encode().expect("encode")).await;
    }

    pub async fn send_raw(&self, bytes: &[u8]) {
        self.transport.send(bytes).await.expect("client hung up");
    }

    pub async fn respond(&self, id: CallId, payload: Map) {
        self.write(Packet::response(id, payload)).await;
    }

    /// Starts an engine-side call and returns its id.
    pub async fn request(&mut self, command: &str, payload: Map) -> CallId {
        let id = self.next_id;
        self.next_id += 1;
        self.write(Packet::request(id, command, payload)).await;
        id
    }

    /// Sends a request and waits for its response. The next packet from the
    /// client must be that response.
    pub async fn call(&mut self, command: &str, payload: Map) -> Map {
        let id = self.request(command, payload).await;
        self.expect_response(id).await
    }
}

pub fn empty_messages() -> Map {
    Map::new()
        .with("errors", Value::Array(vec![]))
        .with("warnings", Value::Array(vec![]))
}

pub fn version_frame(version: &str) -> Vec<u8> {
    let mut frame = (version.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(version.as_bytes());
    frame
}

/// A sandbox whose engine runs in-process on tokio duplex pipes.
///
/// Launches fail until `failures` attempts have been refused. The engine
/// answers `build` and `transform` and never answers `cancel`.
pub struct InProcessSandbox {
    pub version: String,
    pub failures: usize,
    pub launches: Arc<AtomicUsize>,
}

impl InProcessSandbox {
    pub fn new(version: &str) -> Self {
        Self { version: version.to_string(), failures: 0, launches: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn failing(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }
}

#[async_trait::async_trait]
impl Sandbox for InProcessSandbox {
    async fn launch(&self, module: &ModuleRef) -> Result<EngineIo, LaunchError> {
        let attempt = self.launches.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(format!("failed to download {}", module).into());
        }

        let (stdin, mut engine_in) = tokio::io::duplex(64 * 1024);
        let (mut engine_out, stdout) = tokio::io::duplex(64 * 1024);
        let (mut engine_err, stderr) = tokio::io::duplex(1024);
        let version = self.version.clone();

        let task = tokio::spawn(async move {
            let _ = engine_err.write_all(b"engine booted\n").await;
            if engine_out.write_all(&version_frame(&version)).await.is_err() {
                return;
            }

            let mut frames = FrameBuffer::new();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match engine_in.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                let Ok(bodies) = frames.push(&buf[..n]) else { return };
                for body in bodies {
                    let Ok(packet) = Packet::decode(&body) else { return };
                    if !packet.is_request {
                        continue;
                    }
                    let reply = match packet.command() {
                        Some("build") => {
                            let file = Map::new()
                                .with("path", "/out.js")
                                .with("contents", b"console.log(1)\n".to_vec());
                            empty_messages().with("outputFiles", Value::Array(vec![file.into()]))
                        }
                        // Left pending so callers can watch a call outlive the engine.
                        Some("cancel") => continue,
                        Some("transform") => empty_messages()
                            .with("code", packet.payload.get_str("input").unwrap_or_default())
                            .with("map", ""),
                        _ => Map::new().with("error", "not supported by the fake engine"),
                    };
                    let Ok(bytes) = Packet::response(packet.id, reply).encode() else { return };
                    if engine_out.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(EngineIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            terminate: Box::new(move || task.abort()),
        })
    }
}

/// A sandbox whose engine never finishes loading.
pub struct StalledSandbox;

#[async_trait::async_trait]
impl Sandbox for StalledSandbox {
    async fn launch(&self, _module: &ModuleRef) -> Result<EngineIo, LaunchError> {
        std::future::pending().await
    }
}
