//! Keep-alive: answers server PINGs and notices dead connections.
//!
//! Every event counts as a sign of life. After `ping_every` without one,
//! we send `PING <counter>`; if the matching PONG is not back within
//! `ping_timeout`, the connection is torn down so the session loop can
//! reconnect.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use twirc_sdk::{Connection, Event};

use crate::plugin::{HostContext, Plugin};
use crate::terminal::Line;

const MIN_PING_EVERY: u64 = 2;

struct PingState {
    counter: AtomicU64,
    every: Mutex<Duration>,
    timeout: Mutex<Duration>,
    last_event: Mutex<Instant>,
    /// Re-evaluate the idle deadline.
    wake: Notify,
    /// The counter we sent and who is waiting for its PONG.
    awaiting: Mutex<Option<(String, oneshot::Sender<()>)>>,
}

impl PingState {
    fn touch(&self) {
        *self.last_event.lock() = Instant::now();
    }

    fn deadline(&self) -> Instant {
        *self.last_event.lock() + *self.every.lock()
    }
}

pub struct PingPlugin {
    state: Arc<PingState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PingPlugin {
    pub fn new(host: &HostContext) -> Self {
        let config = host.config();
        Self {
            state: Arc::new(PingState {
                counter: AtomicU64::new(0),
                every: Mutex::new(config.ping_every),
                timeout: Mutex::new(config.ping_timeout),
                last_event: Mutex::new(Instant::now()),
                wake: Notify::new(),
                awaiting: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn ping_every(&self) -> Duration {
        *self.state.every.lock()
    }

    pub fn counter(&self) -> u64 {
        self.state.counter.load(Ordering::SeqCst)
    }

    fn start(&self, host: &HostContext) {
        let task = tokio::spawn(idle_loop(self.state.clone(), host.clone()));
        if let Some(old) = self.task.lock().replace(task) {
            old.abort();
        }
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn idle_loop(state: Arc<PingState>, host: HostContext) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(state.deadline()) => {}
            _ = state.wake.notified() => continue,
        }
        if Instant::now() < state.deadline() {
            continue;
        }
        let connection = match host.connection() {
            Some(connection) if connection.is_connected() => connection,
            _ => {
                state.touch();
                continue;
            }
        };

        let token = (state.counter.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let (tx, rx) = oneshot::channel();
        *state.awaiting.lock() = Some((token.clone(), tx));
        if let Err(e) = connection.ping(&token, "").await {
            tracing::warn!(error = %e, "keep-alive ping failed");
        }

        let timeout = *state.timeout.lock();
        let answered = tokio::time::timeout(timeout, rx).await.is_ok();
        state.awaiting.lock().take();
        if !answered {
            tracing::warn!(?timeout, "PING timeout");
            host.output().println("PING timeout");
            let _ = connection.quit("PING timeout").await;
            connection.disconnect(None).await;
        }
        state.touch();
    }
}

#[async_trait]
impl Plugin for PingPlugin {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn handles(&self, _kind: &str) -> bool {
        true
    }

    async fn on_event(&self, connection: &Connection, event: &Event) -> anyhow::Result<()> {
        self.state.touch();
        match event.kind.as_str() {
            "ping" => {
                let target = event.target.as_deref().unwrap_or_default();
                connection.pong(target, "").await?;
            }
            "pong" => {
                let mut awaiting = self.state.awaiting.lock();
                let matches = awaiting
                    .as_ref()
                    .is_some_and(|(token, _)| event.arguments.iter().any(|a| a == token));
                if matches && let Some((_, tx)) = awaiting.take() {
                    let _ = tx.send(());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn commands(&self) -> &'static [&'static str] {
        &["pingevery"]
    }

    async fn command(
        &self,
        _verb: &str,
        _host: &HostContext,
        args: &str,
        line: &Line,
    ) -> anyhow::Result<Option<String>> {
        line.show();
        let Ok(secs) = args.trim().parse::<u64>() else {
            return Ok(Some(format!(
                "Currently pinging after {}s of silence",
                self.ping_every().as_secs()
            )));
        };
        if secs < MIN_PING_EVERY {
            return Ok(Some(format!("Minimum is {MIN_PING_EVERY} seconds")));
        }
        *self.state.every.lock() = Duration::from_secs(secs);
        self.state.wake.notify_one();
        Ok(Some(format!("Pinging after {secs}s of silence")))
    }

    async fn load(&self, host: &HostContext) -> anyhow::Result<()> {
        self.start(host);
        Ok(())
    }

    async fn reload(&self, previous: &dyn Plugin, _host: &HostContext) -> anyhow::Result<()> {
        let Some(previous) = previous.as_any().downcast_ref::<PingPlugin>() else {
            return Ok(());
        };
        previous.stop();
        let old = &previous.state;
        self.state
            .counter
            .store(old.counter.load(Ordering::SeqCst), Ordering::SeqCst);
        *self.state.every.lock() = *old.every.lock();
        *self.state.timeout.lock() = *old.timeout.lock();
        *self.state.last_event.lock() = *old.last_event.lock();
        self.state.wake.notify_one();
        Ok(())
    }

    async fn unload(&self, _host: &HostContext) -> anyhow::Result<()> {
        self.stop();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PingPlugin {
    fn drop(&mut self) {
        self.stop();
    }
}
