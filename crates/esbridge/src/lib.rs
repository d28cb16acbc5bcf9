//! # esbridge
//!
//! Drives a bundler engine running in a sandbox over its byte-oriented
//! stdin/stdout protocol. Many concurrent calls in both directions share one
//! stream: the client's builds and transforms going out, the engine's plugin
//! hook requests coming in.
//!
//! Layers, bottom up: [`transport`] moves bytes, [`ledger`] pairs responses
//! with calls, [`channel`] multiplexes, [`plugin`] answers hooks, [`service`]
//! is the typed call surface, [`sandbox`] and [`runtime`] start and stop the
//! engine.

pub mod channel;
pub mod error;
pub mod ledger;
pub mod message;
pub mod mock_transport;
pub mod plugin;
pub mod runtime;
pub mod sandbox;
pub mod service;
pub mod transport;


pub use channel::Channel;
pub use channel::ChannelConfig;
pub use channel::Preamble;
pub use error::Error;
pub use error::Failure;
pub use error::Result;
pub use message::Location;
pub use message::Message;
pub use message::Note;
pub use plugin::HookFilter;
pub use plugin::HookMessages;
pub use plugin::LoadResult;
pub use plugin::Plugin;
pub use plugin::PluginBuild;
pub use plugin::PluginContext;
pub use plugin::ResolveResult;
pub use runtime::InitializeOptions;
pub use runtime::Runtime;
pub use sandbox::ModuleRef;
pub use sandbox::ProcessSandbox;
pub use sandbox::Sandbox;
pub use service::BuildContext;
pub use service::BuildOptions;
pub use service::BuildResult;
pub use service::OutputFile;
pub use service::Service;
pub use service::TransformOptions;
pub use service::TransformResult;

pub use espack::Map;
pub use espack::Value;
