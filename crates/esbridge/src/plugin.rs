//! # Plugin Callback Bridge
//!
//! Answers the hook requests the engine sends while a build with plugins runs.
//!
//! ## Philosophy
//!
//! - **Hooks Are Data**: Each registration is a row (id, plugin, filter,
//!   namespace, callback) in a per-build table. Dispatch is a linear scan in
//!   registration order, nothing more.
//! - **Two Composition Rules**: `on-resolve` and `on-load` stop at the first
//!   hook that returns a result. `on-start` and `on-end` run every hook and
//!   concatenate what they report.
//! - **Faults Are Messages**: A failing hook becomes an error message tagged
//!   with its plugin's name. It never fails the channel or another hook chain.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use espack::Map;
use espack::Value;
use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use tracing::debug;
use tracing::warn;

use crate::channel::Channel;
use crate::error::Error;
use crate::error::Result;
use crate::error::panic_message;
use crate::message;
use crate::message::Message;
use crate::service::BuildKey;
use crate::service::BuildResult;

/// Opaque client data threaded through resolve and load hooks.
pub type PluginData = Arc<dyn Any + Send + Sync>;

/// What a hook or setup function may fail with.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

pub type HookResult<T> = std::result::Result<T, HookError>;

type SetupFn = Arc<dyn Fn(&mut PluginBuild) -> HookResult<()> + Send + Sync>;
type StartFn = Arc<dyn Fn(PluginContext) -> BoxFuture<'static, HookResult<HookMessages>> + Send + Sync>;
type EndFn = Arc<dyn Fn(PluginContext, BuildResult) -> BoxFuture<'static, HookResult<HookMessages>> + Send + Sync>;
type ResolveFn = Arc<dyn Fn(PluginContext, ResolveArgs) -> BoxFuture<'static, HookResult<Option<ResolveResult>>> + Send + Sync>;
type LoadFn = Arc<dyn Fn(PluginContext, LoadArgs) -> BoxFuture<'static, HookResult<Option<LoadResult>>> + Send + Sync>;
type DisposeFn = Arc<dyn Fn() + Send + Sync>;

/// A named set of hooks, installed by running `setup` when a build starts.
#[derive(Clone)]
pub struct Plugin {
    name: String,
    setup: SetupFn,
}

impl Plugin {
    pub fn new<F>(name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&mut PluginBuild) -> HookResult<()> + Send + Sync + 'static,
    {
        Self { name: name.into(), setup: Arc::new(setup) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name).finish()
    }
}

/// Which paths a resolve or load hook wants to see.
#[derive(Debug, Clone)]
pub struct HookFilter {
    pub filter: String,
    /// `None` matches every namespace.
    pub namespace: Option<String>,
}

impl HookFilter {
    pub fn new(filter: impl Into<String>) -> Self {
        Self { filter: filter.into(), namespace: None }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Messages returned by start and end hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookMessages {
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveArgs {
    pub path: String,
    pub importer: String,
    pub namespace: String,
    pub resolve_dir: String,
    pub kind: String,
    pub plugin_data: Option<PluginData>,
}

/// A resolve hook's answer. Unset fields are left to the engine.
#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    pub path: Option<String>,
    pub external: Option<bool>,
    pub side_effects: Option<bool>,
    pub namespace: Option<String>,
    pub suffix: Option<String>,
    pub plugin_data: Option<PluginData>,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
    pub watch_files: Vec<String>,
    pub watch_dirs: Vec<String>,
}

impl ResolveResult {
    pub fn path(path: impl Into<String>) -> Self {
        Self { path: Some(path.into()), ..Self::default() }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_plugin_data(mut self, data: PluginData) -> Self {
        self.plugin_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub path: String,
    pub namespace: String,
    pub suffix: String,
    pub plugin_data: Option<PluginData>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub contents: Option<Vec<u8>>,
    pub resolve_dir: Option<String>,
    pub loader: Option<String>,
    pub plugin_data: Option<PluginData>,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
    pub watch_files: Vec<String>,
    pub watch_dirs: Vec<String>,
}

impl LoadResult {
    pub fn contents(contents: impl Into<Vec<u8>>) -> Self {
        Self { contents: Some(contents.into()), ..Self::default() }
    }

    pub fn loader(mut self, loader: impl Into<String>) -> Self {
        self.loader = Some(loader.into());
        self
    }
}

/// Options for a nested [`PluginContext::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub importer: Option<String>,
    pub namespace: Option<String>,
    pub resolve_dir: Option<String>,
    pub kind: Option<String>,
    pub plugin_data: Option<PluginData>,
}

struct Hook<F> {
    plugin_name: String,
    callback: F,
}

struct FilteredHook<F> {
    id: i32,
    plugin_name: String,
    filter: Regex,
    namespace: Option<String>,
    callback: F,
}

impl<F> FilteredHook<F> {
    fn matches(&self, ids: Option<&[i32]>, path: &str, namespace: &str) -> bool {
        if let Some(ids) = ids {
            if !ids.contains(&self.id) {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            if ns != namespace {
                return false;
            }
        }
        self.filter.is_match(path)
    }

    fn describe(&self) -> Value {
        Map::new()
            .with("id", self.id)
            .with("filter", self.filter.as_str())
            .with("namespace", self.namespace.as_deref().unwrap_or_default())
            .into()
    }
}

#[derive(Default)]
struct Hooks {
    start: Vec<Hook<StartFn>>,
    end: Vec<Hook<EndFn>>,
    resolve: Vec<FilteredHook<ResolveFn>>,
    load: Vec<FilteredHook<LoadFn>>,
    dispose: Vec<Hook<DisposeFn>>,
}

impl Hooks {
    fn append(&mut self, other: Hooks) {
        self.start.extend(other.start);
        self.end.extend(other.end);
        self.resolve.extend(other.resolve);
        self.load.extend(other.load);
        self.dispose.extend(other.dispose);
    }
}

/// The registrar handed to a plugin's setup function.
pub struct PluginBuild {
    plugin_name: String,
    initial_options: Map,
    next_id: i32,
    hooks: Hooks,
}

impl PluginBuild {
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The build request's payload as the plugin's build will see it.
    pub fn initial_options(&self) -> &Map {
        &self.initial_options
    }

    pub fn on_start<F, Fut>(&mut self, callback: F)
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<HookMessages>> + Send + 'static,
    {
        let callback: StartFn = Arc::new(
            move |ctx: PluginContext| -> BoxFuture<'static, HookResult<HookMessages>> {
                Box::pin(callback(ctx))
            },
        );
        self.hooks.start.push(Hook { plugin_name: self.plugin_name.clone(), callback });
    }

    pub fn on_end<F, Fut>(&mut self, callback: F)
    where
        F: Fn(PluginContext, BuildResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<HookMessages>> + Send + 'static,
    {
        let callback: EndFn = Arc::new(
            move |ctx: PluginContext, result: BuildResult| -> BoxFuture<'static, HookResult<HookMessages>> {
                Box::pin(callback(ctx, result))
            },
        );
        self.hooks.end.push(Hook { plugin_name: self.plugin_name.clone(), callback });
    }

    /// # Errors
    /// If `options.filter` is not a valid regular expression.
    pub fn on_resolve<F, Fut>(&mut self, options: HookFilter, callback: F) -> HookResult<()>
    where
        F: Fn(PluginContext, ResolveArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Option<ResolveResult>>> + Send + 'static,
    {
        let filter = compile_filter("onResolve", &options.filter)?;
        let callback: ResolveFn = Arc::new(
            move |ctx: PluginContext, args: ResolveArgs| -> BoxFuture<'static, HookResult<Option<ResolveResult>>> {
                Box::pin(callback(ctx, args))
            },
        );
        let id = self.take_id();
        self.hooks.resolve.push(FilteredHook {
            id,
            plugin_name: self.plugin_name.clone(),
            filter,
            namespace: options.namespace,
            callback,
        });
        Ok(())
    }

    /// # Errors
    /// If `options.filter` is not a valid regular expression.
    pub fn on_load<F, Fut>(&mut self, options: HookFilter, callback: F) -> HookResult<()>
    where
        F: Fn(PluginContext, LoadArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Option<LoadResult>>> + Send + 'static,
    {
        let filter = compile_filter("onLoad", &options.filter)?;
        let callback: LoadFn = Arc::new(
            move |ctx: PluginContext, args: LoadArgs| -> BoxFuture<'static, HookResult<Option<LoadResult>>> {
                Box::pin(callback(ctx, args))
            },
        );
        let id = self.take_id();
        self.hooks.load.push(FilteredHook {
            id,
            plugin_name: self.plugin_name.clone(),
            filter,
            namespace: options.namespace,
            callback,
        });
        Ok(())
    }

    pub fn on_dispose<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.dispose.push(Hook {
            plugin_name: self.plugin_name.clone(),
            callback: Arc::new(callback),
        });
    }

    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The plugin entry of the build request.
    fn describe(&self) -> Value {
        Map::new()
            .with("name", self.plugin_name.as_str())
            .with("onStart", !self.hooks.start.is_empty())
            .with("onEnd", !self.hooks.end.is_empty())
            .with("onResolve", self.hooks.resolve.iter().map(FilteredHook::describe).collect::<Vec<_>>())
            .with("onLoad", self.hooks.load.iter().map(FilteredHook::describe).collect::<Vec<_>>())
            .into()
    }
}

fn compile_filter(hook: &str, pattern: &str) -> HookResult<Regex> {
    Regex::new(pattern).map_err(|e| format!("{} filter {:?} is invalid: {}", hook, pattern, e).into())
}

/// Client values that cross the boundary as integer handles.
///
/// The engine only ever sees the handle and hands it back unchanged.
#[derive(Default)]
pub struct ObjectStash {
    next: AtomicI32,
    objects: DashMap<i32, PluginData>,
}

impl ObjectStash {
    pub fn store(&self, value: Option<&PluginData>) -> Value {
        let Some(value) = value else {
            return Value::Null;
        };
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(id, value.clone());
        Value::Int(id)
    }

    pub fn load(&self, handle: Option<&Value>) -> Option<PluginData> {
        let id = handle?.as_int()?;
        self.objects.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// The hooks of one running build.
struct Registration {
    hooks: Hooks,
    stash: ObjectStash,
}

/// What a hook can reach while it runs.
#[derive(Clone)]
pub struct PluginContext {
    channel: Channel,
    key: BuildKey,
    plugin_name: String,
    registration: Arc<Registration>,
}

impl PluginContext {
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn build_key(&self) -> BuildKey {
        self.key
    }

    /// Asks the engine to resolve `path` the way the build would.
    ///
    /// Resolution errors come back inside the result, not as a failure.
    pub async fn resolve(&self, path: &str, options: ResolveOptions) -> Result<ResolveResult> {
        let stash = &self.registration.stash;
        let mut request = Map::new()
            .with("key", self.key)
            .with("pluginName", self.plugin_name.as_str())
            .with("path", path);
        request.insert_opt("importer", options.importer);
        request.insert_opt("namespace", options.namespace);
        request.insert_opt("resolveDir", options.resolve_dir);
        request.insert_opt("kind", options.kind);
        if options.plugin_data.is_some() {
            request.insert("pluginData", stash.store(options.plugin_data.as_ref()));
        }

        let response = self.channel.send("resolve", request).await?;
        Ok(ResolveResult {
            path: response.get_str("path").map(str::to_string),
            external: response.get_bool("external"),
            side_effects: response.get_bool("sideEffects"),
            namespace: response.get_str("namespace").map(str::to_string),
            suffix: response.get_str("suffix").map(str::to_string),
            plugin_data: stash.load(response.get("pluginData")),
            errors: message::from_field(&response, "errors"),
            warnings: message::from_field(&response, "warnings"),
            watch_files: Vec::new(),
            watch_dirs: Vec::new(),
        })
    }
}

/// Owns the hook tables of every build with plugins and answers the
/// engine's hook requests for them.
#[derive(Default)]
pub struct PluginHost {
    builds: DashMap<BuildKey, Arc<Registration>>,
}

impl PluginHost {
    /// Creates a host and installs its inbound handlers on `channel`.
    pub fn install(channel: &Channel) -> Arc<Self> {
        let host = Arc::new(Self::default());

        let h = host.clone();
        channel.on_inbound_command("on-start", move |channel, payload| {
            let h = h.clone();
            async move { h.on_start(channel, payload).await }
        });
        let h = host.clone();
        channel.on_inbound_command("on-end", move |channel, payload| {
            let h = h.clone();
            async move { h.on_end(channel, payload).await }
        });
        let h = host.clone();
        channel.on_inbound_command("on-resolve", move |channel, payload| {
            let h = h.clone();
            async move { h.on_resolve(channel, payload).await }
        });
        let h = host.clone();
        channel.on_inbound_command("on-load", move |channel, payload| {
            let h = h.clone();
            async move { h.on_load(channel, payload).await }
        });
        let h = host.clone();
        channel.on_inbound_command("on-dispose", move |_channel, payload| {
            let h = h.clone();
            async move {
                if let Some(key) = payload.get_int("key") {
                    h.dispose(key);
                }
                Ok(Map::new())
            }
        });

        host
    }

    /// Runs every plugin's setup and records the hooks under `key`.
    ///
    /// Returns the `plugins` array for the build request. If any setup fails
    /// nothing is recorded.
    pub fn register(&self, key: BuildKey, plugins: &[Plugin], initial_options: &Map) -> Result<Value> {
        let mut hooks = Hooks::default();
        let mut details = Vec::with_capacity(plugins.len());
        let mut next_id = 0;

        for (i, plugin) in plugins.iter().enumerate() {
            if plugin.name.is_empty() {
                return Err(Error::PluginHandler {
                    plugin: String::new(),
                    message: format!("plugin at index {} is missing a name", i),
                });
            }
            let mut build = PluginBuild {
                plugin_name: plugin.name.clone(),
                initial_options: initial_options.clone(),
                next_id,
                hooks: Hooks::default(),
            };
            if let Err(e) = (plugin.setup)(&mut build) {
                warn!(plugin = %plugin.name, "plugin setup failed: {}", e);
                return Err(Error::PluginHandler { plugin: plugin.name.clone(), message: e.to_string() });
            }
            next_id = build.next_id;
            details.push(build.describe());
            hooks.append(build.hooks);
        }

        self.builds.insert(key, Arc::new(Registration { hooks, stash: ObjectStash::default() }));
        debug!(key, plugins = plugins.len(), "plugins registered");
        Ok(Value::Array(details))
    }

    /// Runs the dispose hooks of `key` and forgets it. Unknown keys are ignored.
    pub fn dispose(&self, key: BuildKey) {
        let Some((_, registration)) = self.builds.remove(&key) else {
            return;
        };
        for hook in &registration.hooks.dispose {
            (hook.callback)();
        }
        debug!(key, "plugins disposed");
    }

    pub fn is_registered(&self, key: BuildKey) -> bool {
        self.builds.contains_key(&key)
    }

    fn lookup(&self, payload: &Map) -> Result<(BuildKey, Arc<Registration>)> {
        let Some(key) = payload.get_int("key") else {
            return Err(Error::Protocol("hook request without a build key".into()));
        };
        match self.builds.get(&key) {
            Some(entry) => Ok((key, entry.value().clone())),
            None => Err(Error::Protocol(format!("no plugins registered for build {}", key))),
        }
    }

    fn context(channel: &Channel, key: BuildKey, plugin_name: &str, registration: &Arc<Registration>) -> PluginContext {
        PluginContext {
            channel: channel.clone(),
            key,
            plugin_name: plugin_name.to_string(),
            registration: registration.clone(),
        }
    }

    async fn on_start(&self, channel: Channel, payload: Map) -> Result<Map> {
        let (key, registration) = self.lookup(&payload)?;
        let mut all = HookMessages::default();
        for hook in &registration.hooks.start {
            let ctx = Self::context(&channel, key, &hook.plugin_name, &registration);
            collect(&mut all, &hook.plugin_name, guarded(async move { (hook.callback)(ctx).await }).await);
        }
        Ok(messages_response(all))
    }

    async fn on_end(&self, channel: Channel, payload: Map) -> Result<Map> {
        let (key, registration) = self.lookup(&payload)?;
        let result = payload
            .get_map("value")
            .map(BuildResult::from_map)
            .unwrap_or_default();
        let mut all = HookMessages::default();
        for hook in &registration.hooks.end {
            let ctx = Self::context(&channel, key, &hook.plugin_name, &registration);
            let seen = result.clone();
            collect(&mut all, &hook.plugin_name, guarded(async move { (hook.callback)(ctx, seen).await }).await);
        }
        Ok(messages_response(all))
    }

    async fn on_resolve(&self, channel: Channel, payload: Map) -> Result<Map> {
        let (key, registration) = self.lookup(&payload)?;
        let ids = requested_ids(&payload);
        let args = ResolveArgs {
            path: string(&payload, "path"),
            importer: string(&payload, "importer"),
            namespace: string(&payload, "namespace"),
            resolve_dir: string(&payload, "resolveDir"),
            kind: string(&payload, "kind"),
            plugin_data: registration.stash.load(payload.get("pluginData")),
        };

        for hook in &registration.hooks.resolve {
            if !hook.matches(ids.as_deref(), &args.path, &args.namespace) {
                continue;
            }
            let ctx = Self::context(&channel, key, &hook.plugin_name, &registration);
            let call_args = args.clone();
            match guarded(async move { (hook.callback)(ctx, call_args).await }).await {
                Ok(Some(result)) => {
                    let stash = &registration.stash;
                    let mut response = hook_response(hook.id, &hook.plugin_name);
                    response.insert_opt("path", result.path);
                    response.insert_opt("external", result.external);
                    response.insert_opt("sideEffects", result.side_effects);
                    response.insert_opt("namespace", result.namespace);
                    response.insert_opt("suffix", result.suffix);
                    if result.plugin_data.is_some() {
                        response.insert("pluginData", stash.store(result.plugin_data.as_ref()));
                    }
                    fill_messages(&mut response, &hook.plugin_name, result.errors, result.warnings);
                    fill_watch(&mut response, result.watch_files, result.watch_dirs);
                    return Ok(response);
                }
                Ok(None) => {}
                Err(e) => return Ok(hook_failure(hook.id, &hook.plugin_name, "onResolve", e)),
            }
        }
        Ok(Map::new())
    }

    async fn on_load(&self, channel: Channel, payload: Map) -> Result<Map> {
        let (key, registration) = self.lookup(&payload)?;
        let ids = requested_ids(&payload);
        let args = LoadArgs {
            path: string(&payload, "path"),
            namespace: string(&payload, "namespace"),
            suffix: string(&payload, "suffix"),
            plugin_data: registration.stash.load(payload.get("pluginData")),
        };

        for hook in &registration.hooks.load {
            if !hook.matches(ids.as_deref(), &args.path, &args.namespace) {
                continue;
            }
            let ctx = Self::context(&channel, key, &hook.plugin_name, &registration);
            let call_args = args.clone();
            match guarded(async move { (hook.callback)(ctx, call_args).await }).await {
                Ok(Some(result)) => {
                    let stash = &registration.stash;
                    let mut response = hook_response(hook.id, &hook.plugin_name);
                    response.insert_opt("contents", result.contents);
                    response.insert_opt("resolveDir", result.resolve_dir);
                    response.insert_opt("loader", result.loader);
                    if result.plugin_data.is_some() {
                        response.insert("pluginData", stash.store(result.plugin_data.as_ref()));
                    }
                    fill_messages(&mut response, &hook.plugin_name, result.errors, result.warnings);
                    fill_watch(&mut response, result.watch_files, result.watch_dirs);
                    return Ok(response);
                }
                Ok(None) => {}
                Err(e) => return Ok(hook_failure(hook.id, &hook.plugin_name, "onLoad", e)),
            }
        }
        Ok(Map::new())
    }
}

fn string(map: &Map, key: &str) -> String {
    map.get_str(key).unwrap_or_default().to_string()
}

fn requested_ids(payload: &Map) -> Option<Vec<i32>> {
    payload
        .get_array("ids")
        .map(|ids| ids.iter().filter_map(Value::as_int).collect())
}

fn tag(messages: Vec<Message>, plugin_name: &str) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut m| {
            if m.plugin_name.is_empty() {
                m.plugin_name = plugin_name.to_string();
            }
            m
        })
        .collect()
}

fn collect(all: &mut HookMessages, plugin_name: &str, outcome: HookResult<HookMessages>) {
    match outcome {
        Ok(messages) => {
            all.errors.extend(tag(messages.errors, plugin_name));
            all.warnings.extend(tag(messages.warnings, plugin_name));
        }
        Err(e) => {
            warn!(plugin = %plugin_name, "hook failed: {}", e);
            all.errors.push(Message::new(e.to_string()).with_plugin(plugin_name));
        }
    }
}

/// Runs one hook, turning a panic into that hook's failure.
async fn guarded<T>(hook: impl Future<Output = HookResult<T>>) -> HookResult<T> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(panic_message(panic).into()),
    }
}

fn messages_response(all: HookMessages) -> Map {
    Map::new()
        .with("errors", message::to_array(&all.errors))
        .with("warnings", message::to_array(&all.warnings))
}

fn hook_response(id: i32, plugin_name: &str) -> Map {
    Map::new().with("id", id).with("pluginName", plugin_name)
}

fn hook_failure(id: i32, plugin_name: &str, hook: &str, e: HookError) -> Map {
    warn!(plugin = %plugin_name, hook, "hook failed: {}", e);
    let error = Message::new(e.to_string()).with_plugin(plugin_name);
    hook_response(id, plugin_name).with("errors", message::to_array(&[error]))
}

fn fill_messages(response: &mut Map, plugin_name: &str, errors: Vec<Message>, warnings: Vec<Message>) {
    if !errors.is_empty() {
        response.insert("errors", message::to_array(&tag(errors, plugin_name)));
    }
    if !warnings.is_empty() {
        response.insert("warnings", message::to_array(&tag(warnings, plugin_name)));
    }
}

fn fill_watch(response: &mut Map, files: Vec<String>, dirs: Vec<String>) {
    if !files.is_empty() {
        response.insert("watchFiles", files.into_iter().map(Value::from).collect::<Vec<_>>());
    }
    if !dirs.is_empty() {
        response.insert("watchDirs", dirs.into_iter().map(Value::from).collect::<Vec<_>>());
    }
}
