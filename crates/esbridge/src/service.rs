//! # Service
//!
//! The public call surface. Each operation builds one outbound request, sends
//! it over the [`Channel`] and turns the response into a typed result.
//! A response with a non-empty `errors` array becomes
//! [`Error::EngineReported`], so callers get build errors the same way as any
//! other failure.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

use espack::Map;
use espack::Value;
use tracing::debug;

use crate::channel::Channel;
use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;
use crate::message;
use crate::message::Message;
use crate::plugin::Plugin;
use crate::plugin::PluginHost;

/// Identifies a build (and its plugins) on both sides of the channel.
pub type BuildKey = i32;

/// One file the build produced, when it was asked not to write to disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputFile {
    pub path: String,
    pub contents: Vec<u8>,
}

impl OutputFile {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildResult {
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
    pub output_files: Option<Vec<OutputFile>>,
    pub metafile: Option<String>,
    pub mangle_cache: Option<Map>,
}

impl BuildResult {
    /// Reads a build response. Fields the engine left out stay `None`.
    pub fn from_map(map: &Map) -> Self {
        let output_files = map.get_array("outputFiles").map(|files| {
            files
                .iter()
                .filter_map(Value::as_map)
                .map(|file| OutputFile {
                    path: file.get_str("path").unwrap_or_default().to_string(),
                    contents: file.get_bytes("contents").unwrap_or_default().to_vec(),
                })
                .collect()
        });
        Self {
            errors: message::from_field(map, "errors"),
            warnings: message::from_field(map, "warnings"),
            output_files,
            metafile: map.get_str("metafile").map(str::to_string),
            mangle_cache: map.get_map("mangleCache").cloned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformResult {
    pub code: String,
    pub map: String,
    pub warnings: Vec<Message>,
    pub legal_comments: Option<String>,
    pub mangle_cache: Option<Map>,
}

/// Options for [`Service::build`] and [`Service::context`].
///
/// Engine flags are passed through as the engine's own command-line syntax
/// (`--bundle`, `--format=esm`); they are not interpreted here.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub entry_points: Vec<(String, String)>,
    pub flags: Vec<String>,
    pub write: bool,
    pub abs_working_dir: String,
    pub plugins: Vec<Plugin>,
    pub mangle_cache: Option<Map>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            entry_points: Vec::new(),
            flags: Vec::new(),
            write: false,
            abs_working_dir: "/".to_string(),
            plugins: Vec::new(),
            mangle_cache: None,
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_point(mut self, path: impl Into<String>) -> Self {
        self.entry_points.push((String::new(), path.into()));
        self
    }

    /// An entry point with an explicit output name.
    pub fn named_entry_point(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.entry_points.push((name.into(), path.into()));
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn abs_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.abs_working_dir = dir.into();
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn mangle_cache(mut self, cache: Map) -> Self {
        self.mangle_cache = Some(cache);
        self
    }

    fn request(&self, key: BuildKey, context: bool) -> Map {
        let entries: Vec<Value> = self
            .entry_points
            .iter()
            .map(|(name, path)| Value::Array(vec![name.as_str().into(), path.as_str().into()]))
            .collect();
        let mut request = Map::new()
            .with("key", key)
            .with("entries", entries)
            .with("flags", strings(&self.flags))
            .with("write", self.write)
            .with("absWorkingDir", self.abs_working_dir.as_str())
            .with("context", context);
        request.insert_opt("mangleCache", self.mangle_cache.clone());
        request
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub flags: Vec<String>,
    pub mangle_cache: Option<Map>,
}

impl TransformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn mangle_cache(mut self, cache: Map) -> Self {
        self.mangle_cache = Some(cache);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageKind {
    #[default]
    Error,
    Warning,
}

#[derive(Debug, Clone, Default)]
pub struct FormatMessagesOptions {
    pub kind: MessageKind,
    pub color: Option<bool>,
    pub terminal_width: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeMetafileOptions {
    pub color: Option<bool>,
    pub verbose: Option<bool>,
}

fn strings(items: &[String]) -> Vec<Value> {
    items.iter().map(|s| Value::from(s.as_str())).collect()
}

/// Turns a response into a failure when the engine reported errors.
fn check(response: &Map) -> Result<()> {
    let errors = message::from_field(response, "errors");
    if errors.is_empty() {
        return Ok(());
    }
    let warnings = message::from_field(response, "warnings");
    Err(Error::EngineReported(Failure { errors, warnings }))
}

struct ServiceInner {
    channel: Channel,
    plugins: Arc<PluginHost>,
    next_key: AtomicI32,
}

/// A live connection to the engine. Cheap to clone.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").finish_non_exhaustive()
    }
}

impl Service {
    /// Wraps a channel and installs the plugin handlers on it.
    pub fn new(channel: Channel) -> Self {
        let plugins = PluginHost::install(&channel);
        Self {
            inner: Arc::new(ServiceInner { channel, plugins, next_key: AtomicI32::new(0) }),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    pub fn plugins(&self) -> &PluginHost {
        &self.inner.plugins
    }

    fn next_key(&self) -> BuildKey {
        self.inner.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends the build request, registering plugins first when there are any.
    async fn start_build(&self, options: &BuildOptions, context: bool) -> Result<(BuildKey, Map)> {
        let key = self.next_key();
        let mut request = options.request(key, context);
        if !options.plugins.is_empty() {
            let details = self.inner.plugins.register(key, &options.plugins, &request)?;
            request.insert("plugins", details);
        }

        debug!(key, context, "build");
        match self.inner.channel.send("build", request).await {
            Ok(response) => Ok((key, response)),
            Err(e) => {
                self.inner.plugins.dispose(key);
                Err(e)
            }
        }
    }

    /// Runs one build to completion.
    pub async fn build(&self, options: BuildOptions) -> Result<BuildResult> {
        let (key, response) = self.start_build(&options, false).await?;
        self.inner.plugins.dispose(key);
        check(&response)?;
        Ok(BuildResult::from_map(&response))
    }

    /// Prepares an incremental build without running it.
    pub async fn context(&self, options: BuildOptions) -> Result<BuildContext> {
        let (key, response) = self.start_build(&options, true).await?;
        if let Err(e) = check(&response) {
            self.inner.plugins.dispose(key);
            return Err(e);
        }
        Ok(BuildContext {
            service: self.clone(),
            key,
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn transform(&self, input: &str, options: TransformOptions) -> Result<TransformResult> {
        let mut request = Map::new()
            .with("flags", strings(&options.flags))
            .with("inputFS", false)
            .with("input", input);
        request.insert_opt("mangleCache", options.mangle_cache);

        let response = self.inner.channel.send("transform", request).await?;
        check(&response)?;
        Ok(TransformResult {
            code: response.get_str("code").unwrap_or_default().to_string(),
            map: response.get_str("map").unwrap_or_default().to_string(),
            warnings: message::from_field(&response, "warnings"),
            legal_comments: response.get_str("legalComments").map(str::to_string),
            mangle_cache: response.get_map("mangleCache").cloned(),
        })
    }

    /// Renders messages the way the engine prints them.
    pub async fn format_messages(&self, messages: &[Message], options: FormatMessagesOptions) -> Result<Vec<String>> {
        let mut request = Map::new()
            .with("messages", message::to_array(messages))
            .with("isWarning", options.kind == MessageKind::Warning);
        request.insert_opt("color", options.color);
        request.insert_opt("terminalWidth", options.terminal_width);

        let response = self.inner.channel.send("format-msgs", request).await?;
        Ok(response
            .get_array("messages")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    /// Summarizes a JSON metafile as text.
    pub async fn analyze_metafile(&self, metafile: &str, options: AnalyzeMetafileOptions) -> Result<String> {
        let mut request = Map::new().with("metafile", metafile);
        request.insert_opt("color", options.color);
        request.insert_opt("verbose", options.verbose);

        let response = self.inner.channel.send("analyze-metafile", request).await?;
        Ok(response.get_str("result").unwrap_or_default().to_string())
    }
}

/// A handle to an engine-side build that outlives a single call.
#[derive(Clone)]
pub struct BuildContext {
    service: Service,
    key: BuildKey,
    disposed: Arc<AtomicBool>,
}

impl BuildContext {
    pub fn key(&self) -> BuildKey {
        self.key
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::HandleDisposed);
        }
        Ok(())
    }

    pub async fn rebuild(&self) -> Result<BuildResult> {
        self.ensure_live()?;
        let response = self
            .service
            .inner
            .channel
            .send("rebuild", Map::new().with("key", self.key))
            .await?;
        check(&response)?;
        Ok(BuildResult::from_map(&response))
    }

    /// Asks the engine to abandon the current build cycle. The handle stays
    /// usable.
    pub async fn cancel(&self) -> Result<()> {
        self.ensure_live()?;
        self.service
            .inner
            .channel
            .send("cancel", Map::new().with("key", self.key))
            .await?;
        Ok(())
    }

    /// Releases the engine-side build and its plugins. Disposing twice is a
    /// no-op.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let sent = self
            .service
            .inner
            .channel
            .send("dispose", Map::new().with("key", self.key))
            .await;
        self.service.inner.plugins.dispose(self.key);
        sent.map(|_| ())
    }
}
