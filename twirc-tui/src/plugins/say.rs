//! `/say`: talk in the joined channel.
//!
//! Plain input lines end up here too. When the server rejects a message
//! for being sent too fast, the last one is sent again after a delay.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use twirc_sdk::{Connection, Event};

use super::log::log_sent;
use crate::plugin::{HostContext, Plugin};
use crate::terminal::Line;

const RATE_LIMIT_ID: &str = "msg_ratelimit";

#[derive(Debug, Clone)]
struct Sent {
    target: String,
    text: String,
}

pub struct SayPlugin {
    host: HostContext,
    last_sent: Mutex<Option<Sent>>,
    /// Held while a repost is waiting to go out.
    repost: Arc<tokio::sync::Mutex<()>>,
    repost_delay: Duration,
}

impl SayPlugin {
    pub fn new(host: &HostContext) -> Self {
        Self {
            host: host.clone(),
            last_sent: Mutex::new(None),
            repost: Arc::new(tokio::sync::Mutex::new(())),
            repost_delay: host.config().repost_delay,
        }
    }

    pub fn last_sent(&self) -> Option<String> {
        self.last_sent.lock().as_ref().map(|sent| sent.text.clone())
    }

    fn is_rate_limit(event: &Event) -> bool {
        event.tag("msg-id") == Some(RATE_LIMIT_ID)
            || event.arguments.iter().any(|a| a.contains("too quickly"))
    }

    fn repost(&self, connection: &Connection) {
        let Some(sent) = self.last_sent.lock().take() else {
            return;
        };
        let Ok(guard) = self.repost.clone().try_lock_owned() else {
            // one repost in flight already; leave this one to the operator
            self.host.set_default_msg(&sent.text);
            return;
        };

        let connection = connection.clone();
        let output = self.host.output().clone();
        let delay = self.repost_delay;
        tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            match connection.privmsg(&sent.target, &sent.text).await {
                Ok(()) => log_sent(&output, &sent.target, &sent.text),
                Err(e) => {
                    tracing::warn!(error = %e, "repost failed");
                    output.println(format!("Repost failed: {e}"));
                }
            }
        });
    }
}

#[async_trait]
impl Plugin for SayPlugin {
    fn name(&self) -> &'static str {
        "say"
    }

    fn handles(&self, kind: &str) -> bool {
        matches!(kind, "notice" | "pubnotice")
    }

    async fn on_event(&self, connection: &Connection, event: &Event) -> anyhow::Result<()> {
        if Self::is_rate_limit(event) {
            tracing::info!("rate limited, reposting last message");
            self.repost(connection);
        }
        Ok(())
    }

    fn commands(&self) -> &'static [&'static str] {
        &["say"]
    }

    async fn command(
        &self,
        _verb: &str,
        host: &HostContext,
        args: &str,
        line: &Line,
    ) -> anyhow::Result<Option<String>> {
        if args.trim().is_empty() {
            line.hide();
            return Ok(None);
        }
        let config = host.config();
        if !config.logged_in {
            line.show();
            return Ok(Some("Not logged in!".to_string()));
        }
        let [channel] = config.channels.as_slice() else {
            line.show();
            return Ok(Some(format!(
                "Joined to {} channels, use /privmsg #channel text",
                config.channels.len()
            )));
        };

        let target = format!("#{channel}");
        let connection = host.connection().context("not connected")?;
        if let Err(e) = connection.privmsg(&target, args).await {
            line.show();
            return Err(e.into());
        }
        line.hide();
        log_sent(host.output(), &target, args);
        *self.last_sent.lock() = Some(Sent {
            target,
            text: args.to_string(),
        });
        Ok(None)
    }

    async fn reload(&self, previous: &dyn Plugin, _host: &HostContext) -> anyhow::Result<()> {
        if let Some(previous) = previous.as_any().downcast_ref::<SayPlugin>() {
            *self.last_sent.lock() = previous.last_sent.lock().clone();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
