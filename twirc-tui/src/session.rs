//! Connect, run, reconnect.
//!
//! Each session gets a fresh [`Connection`]. While it is up, the terminal
//! reader and the connection's read loop run side by side; when the
//! connection drops, the terminal task is cancelled (restoring the tty)
//! before anything else happens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use twirc_sdk::dispatch::FnHandler;
use twirc_sdk::{Connection, Event, EventHandler};

use crate::app::App;
use crate::terminal::Terminal;

/// How the session loop decides to wait before reconnecting.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Sessions shorter than this count as failed.
    pub threshold: Duration,
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(60),
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Doubling delay across consecutive short sessions.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    delay: Option<Duration>,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            delay: None,
        }
    }

    /// Delay before the next attempt, given how long the last session lasted.
    pub fn next(&mut self, session: Duration) -> Duration {
        if session >= self.config.threshold {
            self.delay = None;
            return Duration::ZERO;
        }
        let delay = match self.delay {
            Some(delay) => delay * 2,
            None => self.config.base_delay,
        };
        self.delay = Some(delay);
        delay
    }
}

/// Run sessions until the operator quits.
pub async fn run(app: Arc<App>, terminal: Terminal) {
    let config = app.host().config().clone();
    let mut backoff = Backoff::new(ReconnectConfig {
        threshold: config.reconnect_threshold,
        base_delay: config.reconnect_base_delay,
    });

    loop {
        let welcomed = run_once(&app, &terminal).await;
        if app.is_intentional_quit() {
            break;
        }

        // a session that never got a welcome lasted no time at all
        let lasted = welcomed.map_or(Duration::ZERO, |at| at.elapsed());
        let delay = backoff.next(lasted);
        tracing::info!(?delay, "connection lost, reconnecting");
        if !delay.is_zero() {
            terminal
                .output()
                .println(format!("Reconnecting in {}s", delay.as_secs()));
            tokio::time::sleep(delay).await;
        }
    }
    app.plugins().unload_all().await;
}

/// One connection, from connect to disconnect. Returns when the server
/// welcomed us, if it did.
pub async fn run_once(app: &Arc<App>, terminal: &Terminal) -> Option<Instant> {
    let host = app.host().clone();
    let config = host.config();
    let primary: Arc<dyn EventHandler> = app.clone();
    let connection = Connection::new(Some(primary));

    let welcomed = Arc::new(Notify::new());
    let notify = welcomed.clone();
    connection.dispatcher().add_handler(
        "welcome",
        Arc::new(FnHandler(move |_: &Connection, _: &Event| -> anyhow::Result<()> {
            notify.notify_one();
            Ok(())
        })),
    );
    host.set_connection(Some(connection.clone()));

    let mut welcomed_at = None;
    let addr = format!("{}:{}", config.server, config.port);
    terminal.output().println(format!("Connecting to {addr}"));
    match connection.connect(config.connect_config()).await {
        Ok(()) => {
            let input = tokio::spawn(read_input(app.clone(), terminal.clone()));
            tokio::select! {
                _ = welcomed.notified() => {
                    welcomed_at = Some(Instant::now());
                    join_channels(&connection, &config.channels).await;
                }
                _ = connection.wait_disconnected() => {}
            }
            connection.wait_disconnected().await;
            input.abort();
            // the task owns the raw-mode guard; wait for it to restore the tty
            let _ = input.await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "connect failed");
            terminal.output().println(e.to_string());
        }
    }

    connection.dispatcher().clear_handlers();
    host.set_connection(None);
    welcomed_at
}

async fn join_channels(connection: &Connection, channels: &[String]) {
    for channel in channels {
        if let Err(e) = connection.join(&format!("#{channel}"), "").await {
            tracing::warn!(channel = %channel, error = %e, "join failed");
        }
    }
}

async fn read_input(app: Arc<App>, terminal: Terminal) {
    let mut lines = match terminal.lines().await {
        Ok(lines) => lines,
        Err(e) => {
            tracing::error!(error = %e, "cannot read terminal");
            return;
        }
    };
    while let Some(line) = lines.next().await {
        app.input_line(&line).await;
    }
    drop(lines);
    tracing::info!("end of input");
    app.quit("").await;
}
