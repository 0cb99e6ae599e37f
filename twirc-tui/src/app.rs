//! The client's primary event handler.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use twirc_sdk::event::ALL_RAW_MESSAGES;
use twirc_sdk::{ClientError, Connection, Event, EventHandler};

use crate::plugin::{HostContext, PluginHost, Registry};

/// Ties the connection to the plugins and the operator.
///
/// Installed as the connection's primary handler; every parsed event is
/// routed to the loaded plugins. Operator input arrives through
/// [`App::input_line`](crate::commands).
pub struct App {
    plugins: PluginHost,
    /// Set when the operator asked to leave; the session loop stops
    /// instead of reconnecting.
    intentional_quit: AtomicBool,
}

impl App {
    pub fn new(host: HostContext, registry: Registry) -> Self {
        Self {
            plugins: PluginHost::new(host, registry),
            intentional_quit: AtomicBool::new(false),
        }
    }

    pub fn plugins(&self) -> &PluginHost {
        &self.plugins
    }

    pub fn host(&self) -> &HostContext {
        self.plugins.host()
    }

    pub fn is_intentional_quit(&self) -> bool {
        self.intentional_quit.load(Ordering::SeqCst)
    }

    pub fn set_intentional_quit(&self) {
        self.intentional_quit.store(true, Ordering::SeqCst);
    }

    /// Load the startup plugins, reporting failures without stopping.
    pub async fn load_plugins(&self, names: &[String]) {
        for name in names {
            if let Err(e) = self.plugins.load(name).await {
                tracing::error!(error = %e, "startup plugin failed");
                self.host().output().println(e.to_string());
            }
        }
        if !self.plugins.contains("say") {
            tracing::warn!("say plugin not loaded");
            self.host()
                .output()
                .println("Warning: say plugin not loaded, plain lines will not be sent");
        }
    }

    /// Leave on purpose: QUIT if we can, then drop the connection.
    pub async fn quit(&self, message: &str) {
        self.set_intentional_quit();
        let Some(connection) = self.host().connection() else {
            return;
        };
        match connection.quit(message).await {
            Ok(()) | Err(ClientError::NotConnected) => {}
            Err(e) => self.host().output().println(format!("QUIT failed: {e}")),
        }
        connection.disconnect(None).await;
    }
}

#[async_trait]
impl EventHandler for App {
    async fn handle(&self, connection: &Connection, event: &Event) -> anyhow::Result<()> {
        if event.kind == ALL_RAW_MESSAGES {
            return Ok(());
        }
        self.plugins.dispatch(connection, event).await;
        Ok(())
    }
}
