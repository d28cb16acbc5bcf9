//! # Runtime
//!
//! Owns the lifecycle of the single engine session: at most one is running,
//! `initialize` starts it, `stop` ends it, and after `stop` (or after a failed
//! `initialize`) a new one can be started.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tracing::info;

use crate::channel::Channel;
use crate::channel::ChannelConfig;
use crate::channel::Preamble;
use crate::error::Error;
use crate::error::Result;
use crate::sandbox;
use crate::sandbox::ModuleRef;
use crate::sandbox::ProcessSandbox;
use crate::sandbox::Sandbox;
use crate::sandbox::WorkerHandle;
use crate::service::Service;

/// Engine version a [`ProcessSandbox`] announces when none is configured.
pub const DEFAULT_ENGINE_VERSION: &str = "0.16.17";

/// Fluent configuration for [`Runtime::initialize`].
pub struct InitializeOptions {
    module: ModuleRef,
    sandbox: Option<Arc<dyn Sandbox>>,
    channel: ChannelConfig,
}

impl InitializeOptions {
    pub fn new(module: ModuleRef) -> Self {
        Self {
            module,
            sandbox: None,
            channel: ChannelConfig::new().preamble(Preamble::AnyVersion),
        }
    }

    /// Defaults to a [`ProcessSandbox`] for the expected version.
    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Refuses an engine announcing any other version.
    pub fn expect_version(mut self, version: impl Into<String>) -> Self {
        self.channel.preamble = Preamble::Version(version.into());
        self
    }

    /// For engines that start with a packet rather than a version string.
    pub fn no_preamble(mut self) -> Self {
        self.channel.preamble = Preamble::None;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.channel.call_timeout = Some(timeout);
        self
    }

    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.channel.max_frame_size = max;
        self
    }

    fn resolve_sandbox(&self) -> Arc<dyn Sandbox> {
        if let Some(sandbox) = &self.sandbox {
            return sandbox.clone();
        }
        let version = match &self.channel.preamble {
            Preamble::Version(version) => version.as_str(),
            _ => DEFAULT_ENGINE_VERSION,
        };
        Arc::new(ProcessSandbox::new(version))
    }
}

struct Session {
    service: Service,
    worker: WorkerHandle,
}

enum State {
    Idle,
    Starting,
    Running(Session),
}

/// Holds the `Starting` slot for one `initialize`. Unless the session is
/// handed over, dropping it (an error, or the caller abandoning the future)
/// puts the runtime back to `Idle`.
struct StartGuard<'a> {
    runtime: &'a Runtime,
    armed: bool,
}

impl StartGuard<'_> {
    fn finish(mut self, session: Session) {
        self.armed = false;
        *self.runtime.lock() = State::Running(session);
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.runtime.lock();
            if matches!(*state, State::Starting) {
                *state = State::Idle;
            }
        }
    }
}

/// The explicit owner of the engine session.
pub struct Runtime {
    state: Mutex<State>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::Idle) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts the engine and returns the service talking to it.
    ///
    /// # Errors
    /// `AlreadyInitialized` while a session is starting or running;
    /// `SandboxInitFailed` if the engine did not load, after which
    /// `initialize` may be called again.
    pub async fn initialize(&self, options: InitializeOptions) -> Result<Service> {
        {
            let mut state = self.lock();
            if !matches!(*state, State::Idle) {
                return Err(Error::AlreadyInitialized);
            }
            *state = State::Starting;
        }
        let starting = StartGuard { runtime: self, armed: true };

        let sandbox = options.resolve_sandbox();
        let (transport, worker) = sandbox::start_worker(sandbox, options.module).await?;

        let channel = Channel::new("engine", Box::new(transport), options.channel);
        let service = Service::new(channel);
        starting.finish(Session { service: service.clone(), worker });
        info!("engine session started");
        Ok(service)
    }

    /// The running session's service.
    pub fn service(&self) -> Result<Service> {
        match &*self.lock() {
            State::Running(session) => Ok(session.service.clone()),
            State::Starting => Err(Error::NotInitialized { pending: true }),
            State::Idle => Err(Error::NotInitialized { pending: false }),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), State::Running(_))
    }

    /// Terminates the engine. Pending calls fail with `ChannelClosed`.
    /// Stopping an idle runtime does nothing.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock(), State::Idle);
        match previous {
            State::Running(session) => {
                session.worker.terminate();
                session.service.channel().close("stopped");
                info!("engine session stopped");
            }
            // An initialize in flight owns the slot until it settles.
            State::Starting => *self.lock() = State::Starting,
            State::Idle => {}
        }
    }
}
