//! Client plugin system.
//!
//! Plugins see protocol events and may add `/commands`. They are compiled
//! into the binary and resolved by name through a [`Registry`] of
//! factories, so `/load`, `/reload` and `/unload` work at runtime.
//!
//! # Writing a plugin
//!
//! 1. Implement the [`Plugin`] trait. Keep state behind interior
//!    mutability; every hook takes `&self`.
//! 2. Say which events you want in [`Plugin::handles`] and which verbs you
//!    answer in [`Plugin::commands`]. Anything not listed is skipped.
//! 3. Register a factory in [`crate::plugins::builtin`].
//!
//! # Reload
//!
//! `/reload name` builds a fresh instance, runs its `load` hook, then its
//! `reload` hook with the instance being replaced. State worth keeping is
//! copied there; background tasks are re-armed by the new instance, never
//! shared. The old instance's `unload` hook does not run.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use twirc_sdk::{Connection, Event};

use crate::config::Resolved;
use crate::terminal::{Line, Output};

/// Trait that all plugins implement.
#[async_trait]
pub trait Plugin: Any + Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether [`Plugin::on_event`] wants events of this kind.
    fn handles(&self, kind: &str) -> bool {
        let _ = kind;
        false
    }

    async fn on_event(&self, connection: &Connection, event: &Event) -> anyhow::Result<()> {
        let _ = (connection, event);
        Ok(())
    }

    /// Verbs this plugin answers, lower-case.
    fn commands(&self) -> &'static [&'static str] {
        &[]
    }

    /// Run `/verb args`. Returned text is printed to the operator.
    async fn command(
        &self,
        verb: &str,
        host: &HostContext,
        args: &str,
        line: &Line,
    ) -> anyhow::Result<Option<String>> {
        let _ = (verb, host, args, line);
        Ok(None)
    }

    /// Called once before the plugin receives anything.
    async fn load(&self, host: &HostContext) -> anyhow::Result<()> {
        let _ = host;
        Ok(())
    }

    /// Called after `load` when this instance replaces `previous`.
    async fn reload(&self, previous: &dyn Plugin, host: &HostContext) -> anyhow::Result<()> {
        let _ = (previous, host);
        Ok(())
    }

    /// Release files and stop background tasks.
    async fn unload(&self, host: &HostContext) -> anyhow::Result<()> {
        let _ = host;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

/// What plugins can reach of the running client.
#[derive(Clone)]
pub struct HostContext {
    config: Arc<Resolved>,
    output: Output,
    /// The current session's connection; replaced on every reconnect.
    connection: Arc<RwLock<Option<Connection>>>,
    last_default_msg: Arc<Mutex<String>>,
}

impl HostContext {
    pub fn new(config: Arc<Resolved>, output: Output) -> Self {
        Self {
            config,
            output,
            connection: Arc::new(RwLock::new(None)),
            last_default_msg: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn config(&self) -> &Resolved {
        &self.config
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn connection(&self) -> Option<Connection> {
        self.connection.read().clone()
    }

    pub fn set_connection(&self, connection: Option<Connection>) {
        *self.connection.write() = connection;
    }

    /// Pre-fill the input line with `msg`, unless the operator has typed
    /// something of their own since the last pre-fill.
    pub fn set_default_msg(&self, msg: &str) {
        let mut last = self.last_default_msg.lock();
        let current = self.output.get_buffer();
        if current.is_empty() || current == *last {
            self.output.set_buffer(msg);
            *last = msg.to_string();
        } else {
            self.output
                .println(format!("Not overriding {current:?} with {msg:?}"));
        }
    }
}

/// The step of loading a plugin that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Resolve,
    Instantiate,
    LoadHook,
    ReloadHook,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "resolve",
            Self::Instantiate => "instantiate",
            Self::LoadHook => "load hook",
            Self::ReloadHook => "reload hook",
        })
    }
}

#[derive(Debug, Error)]
#[error("plugin '{name}': {phase} failed: {message}")]
pub struct PluginLoadError {
    pub name: String,
    pub phase: LoadPhase,
    pub message: String,
}

impl PluginLoadError {
    fn new(name: &str, phase: LoadPhase, message: impl fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            phase,
            message: message.to_string(),
        }
    }
}

/// A factory function that creates a plugin instance.
pub type PluginFactory = fn(&HostContext) -> anyhow::Result<Box<dyn Plugin>>;

/// Name → factory.
#[derive(Clone, Default)]
pub struct Registry {
    factories: Vec<(&'static str, PluginFactory)>,
}

impl Registry {
    pub fn register(&mut self, name: &'static str, factory: PluginFactory) {
        self.factories.retain(|(n, _)| *n != name);
        self.factories.push((name, factory));
    }

    pub fn resolve(&self, name: &str) -> Option<PluginFactory> {
        self.factories
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, factory)| *factory)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|(n, _)| *n).collect()
    }
}

/// Loaded plugins, in load order.
pub struct PluginHost {
    host: HostContext,
    registry: Registry,
    loaded: RwLock<Vec<(String, Arc<dyn Plugin>)>>,
}

impl PluginHost {
    pub fn new(host: HostContext, registry: Registry) -> Self {
        Self {
            host,
            registry,
            loaded: RwLock::new(Vec::new()),
        }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.loaded
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.loaded.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.loaded.read().iter().map(|(_, p)| p.clone()).collect()
    }

    /// Load `name`. A plugin that is already loaded is reloaded instead.
    pub async fn load(&self, name: &str) -> Result<(), PluginLoadError> {
        if self.contains(name) {
            return self.reload(name).await;
        }
        let plugin = self.instantiate(name).await?;
        self.insert(name, plugin);
        tracing::info!(plugin = name, "Loaded plugin");
        Ok(())
    }

    /// Replace `name` with a fresh instance, handing it the old one.
    /// Loads it when it was not loaded yet.
    pub async fn reload(&self, name: &str) -> Result<(), PluginLoadError> {
        let Some(previous) = self.get(name) else {
            let plugin = self.instantiate(name).await?;
            self.insert(name, plugin);
            tracing::info!(plugin = name, "Loaded plugin");
            return Ok(());
        };
        let plugin = self.instantiate(name).await?;

        let hook = isolate(plugin.reload(previous.as_ref(), &self.host)).await;
        if let Err(message) = hook {
            if let Err(e) = isolate(plugin.unload(&self.host)).await {
                tracing::warn!(plugin = name, error = %e, "unload after failed reload");
            }
            return Err(PluginLoadError::new(name, LoadPhase::ReloadHook, message));
        }

        self.insert(name, plugin);
        tracing::info!(plugin = name, "Reloaded plugin");
        Ok(())
    }

    /// Run the unload hook and forget the plugin.
    ///
    /// `None` when nothing by that name is loaded. The plugin is removed
    /// even if its hook fails.
    pub async fn unload(&self, name: &str) -> Option<Result<(), String>> {
        let plugin = self.get(name)?;
        let result = isolate(plugin.unload(&self.host)).await;
        self.loaded
            .write()
            .retain(|(n, p)| !(n == name && Arc::ptr_eq(p, &plugin)));
        tracing::info!(plugin = name, "Unloaded plugin");
        Some(result)
    }

    /// Unload everything, last loaded first.
    pub async fn unload_all(&self) {
        let mut names = self.names();
        names.reverse();
        for name in names {
            if let Some(Err(e)) = self.unload(&name).await {
                tracing::warn!(plugin = %name, error = %e, "unload failed");
            }
        }
    }

    /// Replace in place, keeping load order, or append.
    fn insert(&self, name: &str, plugin: Arc<dyn Plugin>) {
        let mut loaded = self.loaded.write();
        match loaded.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = plugin,
            None => loaded.push((name.to_string(), plugin)),
        }
    }

    async fn instantiate(&self, name: &str) -> Result<Arc<dyn Plugin>, PluginLoadError> {
        let factory = self.registry.resolve(name).ok_or_else(|| {
            PluginLoadError::new(name, LoadPhase::Resolve, "no such plugin")
        })?;
        let plugin: Arc<dyn Plugin> = match std::panic::catch_unwind(AssertUnwindSafe(|| factory(&self.host))) {
            Ok(Ok(plugin)) => Arc::from(plugin),
            Ok(Err(e)) => return Err(PluginLoadError::new(name, LoadPhase::Instantiate, e)),
            Err(panic) => {
                return Err(PluginLoadError::new(
                    name,
                    LoadPhase::Instantiate,
                    panic_message(panic.as_ref()),
                ));
            }
        };
        isolate(plugin.load(&self.host))
            .await
            .map_err(|message| PluginLoadError::new(name, LoadPhase::LoadHook, message))?;
        Ok(plugin)
    }

    /// Hand `event` to every plugin that handles its kind, in load order.
    pub async fn dispatch(&self, connection: &Connection, event: &Event) {
        for plugin in self.snapshot() {
            if !plugin.handles(&event.kind) {
                continue;
            }
            if let Err(message) = isolate(plugin.on_event(connection, event)).await {
                tracing::error!(plugin = plugin.name(), event = %event.kind, error = %message, "Plugin event handler failed");
            }
        }
    }

    /// The first plugin, in load order, answering `verb`.
    pub fn find_command(&self, verb: &str) -> Option<Arc<dyn Plugin>> {
        self.snapshot()
            .into_iter()
            .find(|plugin| plugin.commands().contains(&verb))
    }
}

/// Await a hook, turning both errors and panics into a message.
pub(crate) async fn isolate<T, F>(hook: F) -> Result<T, String>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}
