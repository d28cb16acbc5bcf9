//! # Sandbox Transport Adapter
//!
//! Moves bytes between a [`Channel`](crate::channel::Channel) and the engine
//! running in its sandbox.
//!
//! A worker task owns the running engine. The first message it receives is
//! the module to load and it answers with exactly one ready signal, `None`
//! on success or `Some(reason)` on failure. Only after that does byte traffic
//! start: channel output goes to the engine's stdin, engine stdout comes back
//! through [`WorkerTransport::recv`], and stderr is logged line by line.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

#[cfg(feature = "wasi")]
pub use wasi::WasiSandbox;

const READ_CHUNK: usize = 16 * 1024;

/// What a sandbox may fail to launch with.
pub type LaunchError = Box<dyn std::error::Error + Send + Sync>;

/// The engine to load.
#[derive(Debug, Clone)]
pub enum ModuleRef {
    Path(PathBuf),
    /// An in-memory module, for sandboxes that can compile one.
    Bytes(Arc<[u8]>),
}

impl ModuleRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(Arc::from(bytes.into()))
    }
}

impl std::fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} byte module>", bytes.len()),
        }
    }
}

/// The byte streams of a running engine.
pub struct EngineIo {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Stops the engine. Its stdout ends afterwards.
    pub terminate: Box<dyn FnOnce() + Send>,
}

/// Loads and starts an engine.
#[async_trait::async_trait]
pub trait Sandbox: Send + Sync + 'static {
    async fn launch(&self, module: &ModuleRef) -> std::result::Result<EngineIo, LaunchError>;
}

/// Runs the engine binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    version: String,
    args: Vec<String>,
}

impl ProcessSandbox {
    /// `version` must match the engine's own version, it refuses to serve
    /// otherwise.
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait::async_trait]
impl Sandbox for ProcessSandbox {
    async fn launch(&self, module: &ModuleRef) -> std::result::Result<EngineIo, LaunchError> {
        let ModuleRef::Path(path) = module else {
            return Err("a process sandbox needs the path of the engine binary".into());
        };

        let mut child = Command::new(path)
            .arg(format!("--service={}", self.version))
            .arg("--ping")
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("cannot start {}: {}", path.display(), e))?;

        let stdin = child.stdin.take().ok_or("engine stdin is not piped")?;
        let stdout = child.stdout.take().ok_or("engine stdout is not piped")?;
        let stderr = child.stderr.take().ok_or("engine stderr is not piped")?;

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            match exited {
                Some(status) => debug!(?status, "engine process exited"),
                None => {
                    if let Err(e) = child.kill().await {
                        warn!("cannot kill engine process: {}", e);
                    }
                }
            }
        });

        Ok(EngineIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            terminate: Box::new(move || {
                let _ = kill_tx.send(());
            }),
        })
    }
}

enum WorkerMessage {
    Load(ModuleRef),
    Stdin(Vec<u8>),
    Terminate,
}

/// The channel's side of a running worker.
pub struct WorkerTransport {
    to_worker: mpsc::UnboundedSender<WorkerMessage>,
    stdout: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait::async_trait]
impl Transport for WorkerTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        self.to_worker
            .send(WorkerMessage::Stdin(payload.to_vec()))
            .map_err(|_| TransportError::ConnectionLost("the engine worker stopped".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.stdout.lock().await.recv().await)
    }
}

/// Stops a worker from outside its transport.
#[derive(Clone)]
pub struct WorkerHandle {
    to_worker: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn terminate(&self) {
        let _ = self.to_worker.send(WorkerMessage::Terminate);
    }
}

/// Spawns a worker, hands it `module` and waits for the ready signal.
///
/// # Errors
/// `SandboxInitFailed` with the sandbox's reason if the engine did not start.
pub async fn start_worker(
    sandbox: Arc<dyn Sandbox>,
    module: ModuleRef,
) -> Result<(WorkerTransport, WorkerHandle)> {
    let (to_worker, inbox) = mpsc::unbounded_channel();
    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(run_worker(sandbox, inbox, stdout_tx, ready_tx));

    if to_worker.send(WorkerMessage::Load(module)).is_err() {
        return Err(Error::SandboxInitFailed("the worker exited before loading the engine".into()));
    }
    match ready_rx.await {
        Ok(None) => {}
        Ok(Some(reason)) => return Err(Error::SandboxInitFailed(reason)),
        Err(_) => {
            return Err(Error::SandboxInitFailed("the worker exited during the handshake".into()));
        }
    }

    let handle = WorkerHandle { to_worker: to_worker.clone() };
    let transport = WorkerTransport { to_worker, stdout: Mutex::new(stdout_rx) };
    Ok((transport, handle))
}

async fn run_worker(
    sandbox: Arc<dyn Sandbox>,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    stdout_tx: mpsc::UnboundedSender<Vec<u8>>,
    ready: oneshot::Sender<Option<String>>,
) {
    let module = match inbox.recv().await {
        Some(WorkerMessage::Load(module)) => module,
        _ => {
            let _ = ready.send(Some("expected the engine module as the first message".into()));
            return;
        }
    };

    let engine = match sandbox.launch(&module).await {
        Ok(engine) => engine,
        Err(e) => {
            warn!(module = %module, "engine failed to start: {}", e);
            let _ = ready.send(Some(e.to_string()));
            return;
        }
    };
    let EngineIo { mut stdin, stdout, stderr, terminate } = engine;
    let _ = ready.send(None);
    debug!(module = %module, "engine started");

    tokio::spawn(forward_stdout(stdout, stdout_tx));
    tokio::spawn(forward_stderr(stderr));

    while let Some(message) = inbox.recv().await {
        match message {
            WorkerMessage::Stdin(bytes) => {
                let written = match stdin.write_all(&bytes).await {
                    Ok(()) => stdin.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!("cannot write to the engine: {}", e);
                    break;
                }
            }
            WorkerMessage::Terminate => break,
            WorkerMessage::Load(_) => warn!("ignoring a second module, the engine is already loaded"),
        }
    }

    drop(stdin);
    terminate();
    debug!("engine worker stopped");
}

async fn forward_stdout(mut stdout: Box<dyn AsyncRead + Send + Unpin>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("cannot read engine output: {}", e);
                break;
            }
        }
    }
}

async fn forward_stderr(stderr: Box<dyn AsyncRead + Send + Unpin>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "esbridge::engine", "{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!("cannot read engine stderr: {}", e);
                break;
            }
        }
    }
}

#[cfg(feature = "wasi")]
mod wasi {
    use tokio::io::duplex;
    use tracing::debug;
    use wasmtime::Config;
    use wasmtime::Engine;
    use wasmtime::Linker;
    use wasmtime::Module;
    use wasmtime::Store;
    use wasmtime_wasi::WasiCtxBuilder;
    use wasmtime_wasi::cli::AsyncStdinStream;
    use wasmtime_wasi::cli::AsyncStdoutStream;
    use wasmtime_wasi::p1::WasiP1Ctx;
    use wasmtime_wasi::p2::pipe::AsyncReadStream;
    use wasmtime_wasi::p2::pipe::AsyncWriteStream;

    use super::EngineIo;
    use super::LaunchError;
    use super::ModuleRef;
    use super::Sandbox;

    const PIPE_CAPACITY: usize = 64 * 1024;

    /// Runs the engine as a WASI command module inside wasmtime.
    pub struct WasiSandbox {
        engine: Engine,
        version: String,
    }

    impl WasiSandbox {
        pub fn new(version: impl Into<String>) -> std::result::Result<Self, LaunchError> {
            let mut config = Config::new();
            config.async_support(true);
            let engine = Engine::new(&config)?;
            Ok(Self { engine, version: version.into() })
        }
    }

    #[async_trait::async_trait]
    impl Sandbox for WasiSandbox {
        async fn launch(&self, module: &ModuleRef) -> std::result::Result<EngineIo, LaunchError> {
            let module = match module {
                ModuleRef::Path(path) => Module::from_file(&self.engine, path)?,
                ModuleRef::Bytes(bytes) => Module::new(&self.engine, &bytes[..])?,
            };

            let (stdin, guest_stdin) = duplex(PIPE_CAPACITY);
            let (guest_stdout, stdout) = duplex(PIPE_CAPACITY);
            let (guest_stderr, stderr) = duplex(PIPE_CAPACITY);

            let service = format!("--service={}", self.version);
            let ctx: WasiP1Ctx = WasiCtxBuilder::new()
                .args(&["esbuild", service.as_str(), "--ping"])
                .stdin(AsyncStdinStream::new(AsyncReadStream::new(guest_stdin)))
                .stdout(AsyncStdoutStream::new(AsyncWriteStream::new(PIPE_CAPACITY, guest_stdout)))
                .stderr(AsyncStdoutStream::new(AsyncWriteStream::new(PIPE_CAPACITY, guest_stderr)))
                .build_p1();

            let mut linker: Linker<WasiP1Ctx> = Linker::new(&self.engine);
            wasmtime_wasi::p1::add_to_linker_async(&mut linker, |ctx| ctx)?;
            let mut store = Store::new(&self.engine, ctx);
            let instance = linker.instantiate_async(&mut store, &module).await?;
            let start = instance.get_typed_func::<(), ()>(&mut store, "_start")?;

            let task = tokio::spawn(async move {
                if let Err(e) = start.call_async(&mut store, ()).await {
                    debug!("engine module exited: {}", e);
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
}
