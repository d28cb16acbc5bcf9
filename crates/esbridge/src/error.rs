//! # Error Definitions
//!
//! One error type for every public operation. Whatever went wrong, callers can
//! read it as `{errors, warnings}` through [`Error::errors`] and
//! [`Error::warnings`], the same shape the engine uses for a failed build.

use crate::message::Message;
use crate::transport::TransportError;

/// The messages an engine attached to a call it completed unsuccessfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Failure {
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let n = self.errors.len();
        write!(f, "failed with {} error{}", n, if n == 1 { "" } else { "s" })?;
        for (i, e) in self.errors.iter().take(5).enumerate() {
            write!(f, "{}{}", if i == 0 { ":\n" } else { "\n" }, e)?;
        }
        if n > 5 {
            write!(f, "\n...")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed packet, unknown command, id collision or version mismatch.
    Protocol(String),
    /// The channel was torn down before or while the call was in flight.
    ChannelClosed { reason: String },
    /// The sandbox could not load the engine.
    SandboxInitFailed(String),
    /// A plugin's setup or hook failed on the client side.
    PluginHandler { plugin: String, message: String },
    /// The engine finished the call and reported errors.
    EngineReported(Failure),
    /// The engine answered with a bare `error` string.
    Remote(String),
    Transport(TransportError),
    Timeout,
    ExhaustedIdSpace,
    /// The build context was already disposed.
    HandleDisposed,
    NotInitialized { pending: bool },
    AlreadyInitialized,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::ChannelClosed { reason } => write!(f, "the service was stopped: {}", reason),
            Self::SandboxInitFailed(msg) => write!(f, "failed to start the engine: {}", msg),
            Self::PluginHandler { plugin, message } => write!(f, "[plugin {}] {}", plugin, message),
            Self::EngineReported(failure) => write!(f, "{}", failure),
            Self::Remote(msg) => write!(f, "{}", msg),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Timeout => write!(f, "request timed out"),
            Self::ExhaustedIdSpace => write!(f, "ran out of call ids"),
            Self::HandleDisposed => write!(f, "cannot use a build context after it was disposed"),
            Self::NotInitialized { pending: true } => {
                write!(f, "wait for \"initialize\" to finish before calling this")
            }
            Self::NotInitialized { pending: false } => {
                write!(f, "call \"initialize\" before calling this")
            }
            Self::AlreadyInitialized => write!(f, "cannot call \"initialize\" more than once"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The error messages of this failure. Engine-reported failures carry
    /// their own list, anything else becomes a single message.
    pub fn errors(&self) -> Vec<Message> {
        match self {
            Self::EngineReported(failure) => failure.errors.clone(),
            Self::PluginHandler { plugin, message } => {
                vec![Message::new(message.as_str()).with_plugin(plugin.as_str())]
            }
            other => vec![Message::new(other.to_string())],
        }
    }

    pub fn warnings(&self) -> Vec<Message> {
        match self {
            Self::EngineReported(failure) => failure.warnings.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<esrpc::Error> for Error {
    fn from(e: esrpc::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<espack::Error> for Error {
    fn from(e: espack::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        Self::EngineReported(failure)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The text of a caught panic, when it carried one.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
