//! The session loop against a local TCP server.

use std::any::Any;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use twirc_sdk::{Connection, Event};
use twirc_tui::app::App;
use twirc_tui::config::{Cli, Config, Resolved};
use twirc_tui::plugin::{HostContext, Plugin, Registry};
use twirc_tui::session;
use twirc_tui::terminal::{Mode, Output, Terminal};

static DISCONNECTS: AtomicUsize = AtomicUsize::new(0);

struct Disconnects;

#[async_trait]
impl Plugin for Disconnects {
    fn name(&self) -> &'static str {
        "disconnects"
    }

    fn handles(&self, kind: &str) -> bool {
        kind == "disconnect"
    }

    async fn on_event(&self, _: &Connection, _: &Event) -> anyhow::Result<()> {
        DISCONNECTS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Default)]
struct Screen(Arc<Mutex<Vec<u8>>>);

impl Write for Screen {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Peer {
    lines: BufReader<TcpStream>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            lines: BufReader::new(stream),
        }
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.lines.read_line(&mut line).await.unwrap();
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn send(&mut self, line: &str) {
        self.lines
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn registered(&mut self) {
        while !self.read_line().await.starts_with("USER ") {}
    }
}

#[tokio::test(start_paused = true)]
async fn short_session_reconnects_after_the_base_delay_until_quit() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = Config {
        server: Some("127.0.0.1".into()),
        port: Some(listener.local_addr().unwrap().port()),
        username: Some("me".into()),
        password: Some("oauth:token".into()),
        caps: Some(String::new()),
        channels: Some(vec!["chan".into()]),
        reconnect_base_delay_secs: Some(2),
        ..Default::default()
    };
    let resolved = Arc::new(Resolved::merge(&Cli::default(), &config));

    let screen = Screen::default();
    let output = Output::new(Box::new(screen.clone()), false);
    let (keys, chunks) = mpsc::channel(4);
    let terminal = Terminal::from_chunks(chunks, output.clone(), Mode::Dumb);

    let mut registry = Registry::default();
    registry.register("disconnects", |_| Ok(Box::new(Disconnects)));
    let app = Arc::new(App::new(HostContext::new(resolved, output), registry));
    app.plugins().load("disconnects").await.unwrap();
    let run = tokio::spawn(session::run(app.clone(), terminal));

    let mut first = Peer::accept(&listener).await;
    first.registered().await;
    first.send(":tmi.twitch.tv 001 me :Welcome, GLHF!").await;
    assert_eq!(first.read_line().await, "JOIN #chan");
    first.send(":a!a@a PRIVMSG #chan :hi").await;
    drop(first);
    let closed = Instant::now();

    let mut second = Peer::accept(&listener).await;
    assert!(closed.elapsed() >= Duration::from_secs(2));
    assert_eq!(DISCONNECTS.load(Ordering::SeqCst), 1);
    second.registered().await;

    keys.send(b"/quit bye\n".to_vec()).await.unwrap();
    assert_eq!(second.read_line().await, "QUIT :bye");
    drop(second);

    run.await.unwrap();
    assert!(app.is_intentional_quit());
    assert_eq!(DISCONNECTS.load(Ordering::SeqCst), 2);
    assert!(app.host().connection().is_none());
    assert!(!app.plugins().contains("disconnects"));

    let text = String::from_utf8_lossy(&screen.0.lock()).into_owned();
    assert!(text.contains("Reconnecting in 2s"), "{text}");
}
