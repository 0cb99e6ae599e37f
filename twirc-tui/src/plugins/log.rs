//! Prints traffic to the terminal.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use twirc_sdk::{Connection, Event};

use crate::plugin::{HostContext, Plugin};
use crate::terminal::Output;

/// Joins and parts arriving closer together than this share one line.
const MEMBERSHIP_QUIET: Duration = Duration::from_millis(100);

const CHAT_KINDS: &[&str] = &[
    "pubmsg",
    "privmsg",
    "pubnotice",
    "notice",
    "action",
    "whisper",
    "usernotice",
    "mode",
];
const IGNORED_KINDS: &[&str] = &["ping", "userstate"];

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Echo a message we sent, in the same shape as received chat.
pub fn log_sent(output: &Output, target: &str, text: &str) {
    tracing::info!(channel = %target, "sent: {text}");
    output.println(format!("[{} {target} sent] {text}", timestamp()));
}

#[derive(Default)]
struct Membership {
    joined: Vec<String>,
    parted: Vec<String>,
}

impl Membership {
    fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.joined.is_empty() {
            lines.push(format!("{} joined", self.joined.join(", ")));
            self.joined.clear();
        }
        if !self.parted.is_empty() {
            lines.push(format!("{} parted", self.parted.join(", ")));
            self.parted.clear();
        }
        lines
    }
}

pub struct LogPlugin {
    output: Output,
    membership: Arc<Mutex<Membership>>,
    flush: Mutex<Option<JoinHandle<()>>>,
}

impl LogPlugin {
    pub fn new(host: &HostContext) -> Self {
        Self {
            output: host.output().clone(),
            membership: Arc::new(Mutex::new(Membership::default())),
            flush: Mutex::new(None),
        }
    }

    fn print(&self, line: String) {
        tracing::info!("{line}");
        self.output.println(line);
    }

    fn chat(&self, event: &Event) {
        let source = event
            .tag("display-name")
            .unwrap_or_else(|| event.source_nick());
        let target = event.target.as_deref().unwrap_or_default();
        let text = event.arguments.join(" ");
        let text = if event.kind == "action" {
            format!("* {source} {text}")
        } else {
            text
        };
        self.print(format!("[{} {target} {source}] {text}", timestamp()));
    }

    /// Queue a join or part and restart the quiet window.
    fn membership(&self, event: &Event) {
        let nick = event.source_nick().to_string();
        {
            let mut membership = self.membership.lock();
            if event.kind == "join" {
                membership.joined.push(nick);
            } else {
                membership.parted.push(nick);
            }
        }
        let pending = self.membership.clone();
        let output = self.output.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(MEMBERSHIP_QUIET).await;
            let lines = pending.lock().take_lines();
            for line in lines {
                tracing::info!("{line}");
                output.println(format!("[{}] {line}", timestamp()));
            }
        });
        if let Some(previous) = self.flush.lock().replace(task) {
            previous.abort();
        }
    }

    fn flush_now(&self) {
        if let Some(task) = self.flush.lock().take() {
            task.abort();
        }
        let lines = self.membership.lock().take_lines();
        for line in lines {
            self.print(format!("[{}] {line}", timestamp()));
        }
    }
}

#[async_trait]
impl Plugin for LogPlugin {
    fn name(&self) -> &'static str {
        "log"
    }

    fn handles(&self, kind: &str) -> bool {
        !IGNORED_KINDS.contains(&kind)
    }

    async fn on_event(&self, _connection: &Connection, event: &Event) -> anyhow::Result<()> {
        let kind = event.kind.as_str();
        match kind {
            "join" | "part" => self.membership(event),
            // the derived `action` event carries the text
            "ctcp" if event.arg(0) == Some("ACTION") => {}
            _ if CHAT_KINDS.contains(&kind) => self.chat(event),
            _ => {
                let args = event.arguments.join(" ");
                self.print(format!("[{} {kind}] {args}", timestamp()));
            }
        }
        Ok(())
    }

    async fn unload(&self, _host: &HostContext) -> anyhow::Result<()> {
        self.flush_now();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use twirc_sdk::{NickMask, Tag};

    use super::*;
    use crate::terminal::output::Capture;

    fn plugin() -> (LogPlugin, Capture) {
        let capture = Capture::default();
        let plugin = LogPlugin {
            output: Output::new(Box::new(capture.clone()), false),
            membership: Arc::new(Mutex::new(Membership::default())),
            flush: Mutex::new(None),
        };
        (plugin, capture)
    }

    fn event(kind: &str, source: &str, target: &str, args: &[&str]) -> Event {
        Event::new(
            kind,
            Some(NickMask::new(source)),
            Some(target.to_string()),
            args.iter().map(|a| a.to_string()).collect(),
        )
    }

    /// Drop the leading `[HH:MM:SS` so lines can be compared.
    fn strip_times(text: &str) -> Vec<String> {
        text.lines().map(|l| l[9..].to_string()).collect()
    }

    #[tokio::test]
    async fn chat_prefers_display_name() {
        let (plugin, capture) = plugin();
        let connection = Connection::new(None);
        let tagged = event("pubmsg", "bob!bob@tmi", "#chan", &["hello"]).with_tags(vec![Tag {
            key: "display-name".into(),
            value: Some("Bob".into()),
        }]);
        plugin.on_event(&connection, &tagged).await.unwrap();
        plugin
            .on_event(&connection, &event("privmsg", "amy!a@h", "me", &["psst"]))
            .await
            .unwrap();
        plugin
            .on_event(&connection, &event("clearchat", "tmi", "#chan", &["spammer"]))
            .await
            .unwrap();

        assert_eq!(
            strip_times(&capture.take()),
            vec![" #chan Bob] hello", " me amy] psst", " clearchat] spammer"]
        );
    }

    #[tokio::test]
    async fn usernotice_and_mode_print_like_chat() {
        let (plugin, capture) = plugin();
        let connection = Connection::new(None);
        plugin
            .on_event(&connection, &event("usernotice", "tmi.twitch.tv", "#chan", &["great stream"]))
            .await
            .unwrap();
        plugin
            .on_event(&connection, &event("mode", "op!o@h", "#chan", &["+o", "bob"]))
            .await
            .unwrap();

        assert_eq!(
            strip_times(&capture.take()),
            vec![" #chan tmi.twitch.tv] great stream", " #chan op] +o bob"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn joins_and_parts_are_coalesced() {
        let (plugin, capture) = plugin();
        let connection = Connection::new(None);
        plugin
            .on_event(&connection, &event("join", "a!a@h", "#chan", &[]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        plugin
            .on_event(&connection, &event("join", "b!b@h", "#chan", &[]))
            .await
            .unwrap();
        plugin
            .on_event(&connection, &event("part", "c!c@h", "#chan", &[]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(capture.take(), "");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            strip_times(&capture.take()),
            vec!["] a, b joined", "] c parted"]
        );
    }

    #[test]
    fn ping_and_userstate_are_ignored() {
        let (plugin, _) = plugin();
        assert!(!plugin.handles("ping"));
        assert!(!plugin.handles("userstate"));
        assert!(plugin.handles("pubmsg"));
    }
}
