//! The connection to one IRC server.
//!
//! [`Connection`] owns the socket. It sends registration, runs the read
//! loop as its own task, turns each line into one or more [`Event`]s and
//! hands them to its [`Dispatcher`] strictly in wire order.
//!
//! ## Teardown
//!
//! Whoever takes the writer out of its slot performs the teardown; a
//! concurrent [`Connection::disconnect`] finds the slot empty and returns.
//! The `disconnect` event therefore fires exactly once per connection,
//! whether the peer hung up or we did.
//!
//! ## Reconnection
//!
//! The connection does not reconnect on its own. Callers watch
//! [`Connection::wait_disconnected`] and call [`Connection::connect`] or
//! [`Connection::reconnect`] again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ctcp::{self, Segment};
use crate::dispatch::{Dispatcher, EventHandler};
use crate::error::ClientError;
use crate::event::{self, Event, NickMask, Tag, is_channel};
use crate::features::FeatureSet;
use crate::irc::Message;
use crate::numeric;

/// RFC2812 line limit, CR/LF included.
pub const MAX_LINE_BYTES: usize = 512;

/// How long `disconnect` waits for the read loop before aborting it.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const CAP_SUBCOMMANDS: &[&str] = &["LS", "LIST", "REQ", "ACK", "CLEAR", "END"];

/// Verbs reachable through [`Connection::call`].
const PASS_THROUGH: &[&str] = &[
    "action",
    "admin",
    "cap",
    "ctcp",
    "disconnect",
    "globops",
    "info",
    "invite",
    "ison",
    "join",
    "kick",
    "links",
    "list",
    "lusers",
    "mode",
    "motd",
    "names",
    "nick",
    "notice",
    "oper",
    "part",
    "pass",
    "ping",
    "pong",
    "privmsg",
    "quit",
    "squit",
    "stats",
    "time",
    "topic",
    "trace",
    "user",
    "userhost",
    "users",
    "version",
    "wallops",
    "who",
    "whois",
    "whowas",
];

tokio::task_local! {
    /// Set inside the read loop task, which must never wait on itself.
    static IN_READ_LOOP: ();
}

fn in_read_loop() -> bool {
    IN_READ_LOOP.try_with(|_| ()).is_ok()
}

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub server: String,
    pub port: u16,
    /// Desired nickname.
    pub nick: String,
    /// Sent as PASS before registration, when set.
    pub password: Option<String>,
    /// Username (ident); defaults to the nick.
    pub username: Option<String>,
    /// Real name; defaults to the nick.
    pub realname: Option<String>,
    /// Space-separated capabilities to request with `CAP REQ`.
    pub caps: Option<String>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: 6667,
            nick: "user".to_string(),
            password: None,
            username: None,
            realname: None,
            caps: None,
        }
    }
}

impl ConnectConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// What we learned about the server during this connection.
#[derive(Debug, Default)]
struct Session {
    server: String,
    real_server_name: Option<String>,
    real_nickname: String,
    features: FeatureSet,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The running read loop and its stop flag, checked after every line.
struct ReadLoop {
    task: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

struct Inner {
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader_task: Mutex<Option<ReadLoop>>,
    session: Mutex<Session>,
    saved_config: Mutex<Option<ConnectConfig>>,
}

/// A handle to one IRC connection. Cheap to clone; all clones share
/// the same socket, state and handlers.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// A disconnected connection whose events go to `primary` first.
    pub fn new(primary: Option<Arc<dyn EventHandler>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                dispatcher: Dispatcher::new(primary),
                state,
                writer: tokio::sync::Mutex::new(None),
                reader_task: Mutex::new(None),
                session: Mutex::new(Session::default()),
                saved_config: Mutex::new(None),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolves once the connection reaches `Disconnected`, after the
    /// `disconnect` event has been dispatched.
    pub async fn wait_disconnected(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    /// What the server calls itself, or `""` before the first line.
    pub fn server_name(&self) -> String {
        self.inner
            .session
            .lock()
            .real_server_name
            .clone()
            .unwrap_or_default()
    }

    /// Our nick as the server last confirmed it.
    pub fn nickname(&self) -> String {
        self.inner.session.lock().real_nickname.clone()
    }

    pub fn features(&self) -> FeatureSet {
        self.inner.session.lock().features.clone()
    }

    // ── Connecting ──

    /// Connect (or reconnect) to `config.server`.
    ///
    /// An existing connection is quit with "Changing servers" and fully
    /// torn down first.
    pub async fn connect(&self, config: ConnectConfig) -> Result<(), ClientError> {
        tracing::debug!(server = %config.server, port = config.port, nick = %config.nick, "connect");
        if self.is_connected() {
            if let Err(e) = self.quit("Changing servers").await {
                tracing::debug!(error = %e, "QUIT before reconnect failed");
            }
            self.disconnect(None).await;
        }

        self.inner.state.send_replace(ConnectionState::Connecting);
        let addr = config.addr();
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(source) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::ConnectFailed { addr, source });
            }
        };
        tracing::debug!("TCP connected to {addr}");
        self.connect_with_stream(stream, config).await
    }

    /// Run the protocol over an already-established stream.
    ///
    /// Starts the read loop, then sends CAP REQ (if any caps), PASS (if a
    /// password), NICK and USER, without waiting for CAP ACK.
    pub async fn connect_with_stream<S>(
        &self,
        stream: S,
        config: ConnectConfig,
    ) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        *self.inner.session.lock() = Session {
            server: config.server.clone(),
            real_server_name: None,
            real_nickname: config.nick.clone(),
            features: FeatureSet::default(),
        };
        *self.inner.saved_config.lock() = Some(config.clone());
        *self.inner.writer.lock().await = Some(Box::new(writer));
        self.inner.state.send_replace(ConnectionState::Connected);

        let conn = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let task = tokio::spawn(IN_READ_LOOP.scope((), async move {
            conn.read_loop(BufReader::new(reader), &flag).await;
        }));
        *self.inner.reader_task.lock() = Some(ReadLoop { task, stop });

        if let Some(caps) = config.caps.as_deref().filter(|c| !c.is_empty()) {
            let request = format!(":{caps}");
            self.cap("REQ", &[request.as_str()]).await?;
        }
        if let Some(password) = config.password.as_deref() {
            self.pass(password).await?;
        }
        self.nick(&config.nick).await?;
        let username = config.username.as_deref().unwrap_or(&config.nick);
        let realname = config.realname.as_deref().unwrap_or(&config.nick);
        self.user(username, realname).await
    }

    /// Connect again with the arguments of the last `connect`.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let config = self.inner.saved_config.lock().clone();
        match config {
            Some(config) => self.connect(config).await,
            None => Err(ClientError::NotConnected),
        }
    }

    /// Hang up. Waits up to `timeout` (default one second) for the server
    /// to close its side before aborting the read loop.
    pub async fn disconnect(&self, timeout: Option<Duration>) {
        self.teardown("Disconnected", timeout).await;
    }

    async fn teardown(&self, reason: &str, timeout: Option<Duration>) {
        let Some(mut writer) = self.inner.writer.lock().await.take() else {
            // Another teardown owns the socket.
            return;
        };
        self.inner.state.send_replace(ConnectionState::Disconnecting);

        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "shutdown failed");
        }

        let reader = self.inner.reader_task.lock().take();
        if let Some(ReadLoop { mut task, stop }) = reader {
            // the loop finishes its current line and reads no more
            stop.store(true, Ordering::SeqCst);
            if in_read_loop() {
                drop(task);
            } else {
                self.await_read_loop(&mut task, timeout).await;
            }
        }
        drop(writer);

        let server = self.inner.session.lock().server.clone();
        let event = Event::new(
            event::DISCONNECT,
            Some(NickMask::new(server)),
            None,
            vec![reason.to_string()],
        );
        self.inner.dispatcher.dispatch(self, &event).await;
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    async fn await_read_loop(&self, task: &mut JoinHandle<()>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DISCONNECT_TIMEOUT);
        if tokio::time::timeout(timeout, &mut *task).await.is_err() {
            tracing::error!(
                timeout_ms = timeout.as_millis() as u64,
                "Server did not close connection, aborting"
            );
            task.abort();
            let _ = task.await;
        }
    }

    // ── Read loop ──

    async fn read_loop<R: AsyncBufRead + Unpin>(&self, mut reader: R, stop: &AtomicBool) {
        let mut buf = Vec::new();
        while !stop.load(Ordering::SeqCst) {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    tracing::info!("EOF from server");
                    self.connection_lost("Connection closed by server").await;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Read failed");
                    self.connection_lost("Read error").await;
                    break;
                }
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\r' | b'\n')) {
                        buf.pop();
                    }
                    if buf.is_empty() {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    tracing::debug!("FROM SERVER: {line}");
                    self.process_line(&line).await;
                }
            }
        }
        tracing::info!("Read loop is done");
    }

    async fn connection_lost(&self, reason: &str) {
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnecting;
                true
            } else {
                false
            }
        });
        if let Err(e) = self.quit(reason).await {
            tracing::debug!(error = %e, "QUIT after connection loss failed");
        }
        self.teardown(reason, None).await;
    }

    async fn process_line(&self, line: &str) {
        let server_name = self.inner.session.lock().real_server_name.clone();
        let raw = Event::new(
            event::ALL_RAW_MESSAGES,
            server_name.map(NickMask::new),
            None,
            vec![line.to_string()],
        );
        self.inner.dispatcher.dispatch(self, &raw).await;

        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparseable line");
                return;
            }
        };
        let source = msg.prefix.map(NickMask::new);
        let command = numeric::command_name(&msg.command);
        let arguments = msg.params;

        {
            let mut session = self.inner.session.lock();
            if let Some(source) = &source
                && session.real_server_name.is_none()
            {
                session.real_server_name = Some(source.to_string());
            }
            match command.as_str() {
                "nick" => {
                    if let (Some(source), Some(new_nick)) = (&source, arguments.first())
                        && source.nick() == session.real_nickname
                    {
                        session.real_nickname = new_nick.clone();
                    }
                }
                "welcome" => {
                    if let Some(nick) = arguments.first() {
                        session.real_nickname = nick.clone();
                    }
                }
                "featurelist" => {
                    if arguments.len() > 2 {
                        session.features.load(&arguments[1..arguments.len() - 1]);
                    }
                }
                _ => {}
            }
        }

        if command == "privmsg" || command == "notice" {
            self.handle_message(&command, source, arguments, msg.tags)
                .await;
        } else {
            self.handle_other(command, source, arguments, msg.tags)
                .await;
        }
    }

    async fn handle_message(
        &self,
        command: &str,
        source: Option<NickMask>,
        arguments: Vec<String>,
        tags: Vec<Tag>,
    ) {
        let Some(target) = arguments.first().cloned() else {
            tracing::warn!(command, "message without a target");
            return;
        };
        let body = arguments.get(1).map_or("", String::as_str);
        let is_privmsg = command == "privmsg";
        let kind = match (is_privmsg, is_channel(&target)) {
            (true, true) => "pubmsg",
            (true, false) => "privmsg",
            (false, true) => "pubnotice",
            (false, false) => "notice",
        };

        for segment in ctcp::dequote(body) {
            match segment {
                Segment::Text(text) => {
                    let event = Event::new(kind, source.clone(), Some(target.clone()), vec![text])
                        .with_tags(tags.clone());
                    self.emit(event).await;
                }
                Segment::Tagged { tag, data } => {
                    let ctcp_kind = if is_privmsg { "ctcp" } else { "ctcpreply" };
                    let is_action = is_privmsg && tag == "ACTION";
                    let mut args = vec![tag];
                    args.extend(data.clone());
                    let event = Event::new(ctcp_kind, source.clone(), Some(target.clone()), args)
                        .with_tags(tags.clone());
                    self.emit(event).await;
                    if is_action {
                        let event = Event::new(
                            "action",
                            source.clone(),
                            Some(target.clone()),
                            data.into_iter().collect(),
                        )
                        .with_tags(tags.clone());
                        self.emit(event).await;
                    }
                }
            }
        }
    }

    async fn handle_other(
        &self,
        command: String,
        source: Option<NickMask>,
        arguments: Vec<String>,
        tags: Vec<Tag>,
    ) {
        let (target, arguments) = match command.as_str() {
            "quit" => (None, arguments.into_iter().take(1).collect()),
            "ping" => (arguments.first().cloned(), arguments),
            _ => {
                let mut args = arguments.into_iter();
                (args.next(), args.collect())
            }
        };
        let kind = if command == "mode" && !target.as_deref().is_some_and(is_channel) {
            "umode".to_string()
        } else {
            command
        };
        self.emit(Event::new(kind, source, target, arguments).with_tags(tags))
            .await;
    }

    async fn emit(&self, event: Event) {
        if self.state() == ConnectionState::Disconnected {
            // a handler hung up earlier in this line
            return;
        }
        tracing::debug!("{event}");
        self.inner.dispatcher.dispatch(self, &event).await;
    }

    // ── Sending ──

    /// Send a raw line; CR/LF is appended.
    pub async fn send_raw(&self, line: &str) -> Result<(), ClientError> {
        let bytes = prep_message(line)?;
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        tracing::debug!("TO SERVER: {line}");
        Ok(())
    }

    /// Send all non-empty items, separated by spaces.
    pub async fn send_items(&self, items: &[&str]) -> Result<(), ClientError> {
        let line = items
            .iter()
            .filter(|item| !item.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        self.send_raw(&line).await
    }

    /// Send a CTCP ACTION.
    pub async fn action(&self, target: &str, action: &str) -> Result<(), ClientError> {
        self.ctcp("ACTION", target, action).await
    }

    pub async fn admin(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["ADMIN", server]).await
    }

    /// `CAP <subcommand> [args]`. The first argument carries the `:`
    /// sentinel only when more than one capability is named.
    pub async fn cap(&self, subcommand: &str, args: &[&str]) -> Result<(), ClientError> {
        if !CAP_SUBCOMMANDS.contains(&subcommand) {
            return Err(ClientError::InvalidCapSubcommand(subcommand.to_string()));
        }
        let first;
        let mut items = vec!["CAP", subcommand];
        match args {
            [] => {}
            [only] => items.push(*only),
            [head, rest @ ..] => {
                first = format!(":{head}");
                items.push(&first);
                items.extend_from_slice(rest);
            }
        }
        self.send_items(&items).await
    }

    pub async fn ctcp(&self, ctcp_type: &str, target: &str, parameter: &str) -> Result<(), ClientError> {
        let ctcp_type = ctcp_type.to_ascii_uppercase();
        let body = if parameter.is_empty() {
            format!("\x01{ctcp_type}\x01")
        } else {
            format!("\x01{ctcp_type} {parameter}\x01")
        };
        self.privmsg(target, &body).await
    }

    pub async fn ctcp_reply(&self, target: &str, parameter: &str) -> Result<(), ClientError> {
        self.notice(target, &format!("\x01{parameter}\x01")).await
    }

    pub async fn globops(&self, text: &str) -> Result<(), ClientError> {
        self.send_items(&["GLOBOPS", &format!(":{text}")]).await
    }

    pub async fn info(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["INFO", server]).await
    }

    pub async fn invite(&self, nick: &str, channel: &str) -> Result<(), ClientError> {
        self.send_items(&["INVITE", nick, channel]).await
    }

    pub async fn ison(&self, nicks: &[&str]) -> Result<(), ClientError> {
        let mut items = vec!["ISON"];
        items.extend_from_slice(nicks);
        self.send_items(&items).await
    }

    pub async fn join(&self, channel: &str, key: &str) -> Result<(), ClientError> {
        self.send_items(&["JOIN", channel, key]).await
    }

    pub async fn kick(&self, channel: &str, nick: &str, comment: &str) -> Result<(), ClientError> {
        self.send_items(&["KICK", channel, nick, &trailing(comment)])
            .await
    }

    pub async fn links(&self, remote_server: &str, server_mask: &str) -> Result<(), ClientError> {
        self.send_items(&["LINKS", remote_server, server_mask]).await
    }

    pub async fn list(&self, channels: &[&str], server: &str) -> Result<(), ClientError> {
        self.send_items(&["LIST", &channels.join(","), server]).await
    }

    pub async fn lusers(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["LUSERS", server]).await
    }

    pub async fn mode(&self, target: &str, command: &str) -> Result<(), ClientError> {
        self.send_items(&["MODE", target, command]).await
    }

    pub async fn motd(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["MOTD", server]).await
    }

    pub async fn names(&self, channels: &[&str]) -> Result<(), ClientError> {
        self.send_items(&["NAMES", &channels.join(",")]).await
    }

    pub async fn nick(&self, new_nick: &str) -> Result<(), ClientError> {
        self.send_items(&["NICK", new_nick]).await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.send_items(&["NOTICE", target, &format!(":{text}")])
            .await
    }

    pub async fn oper(&self, nick: &str, password: &str) -> Result<(), ClientError> {
        self.send_items(&["OPER", nick, password]).await
    }

    pub async fn part(&self, channels: &[&str], message: &str) -> Result<(), ClientError> {
        self.send_items(&["PART", &channels.join(","), &trailing(message)])
            .await
    }

    pub async fn pass(&self, password: &str) -> Result<(), ClientError> {
        self.send_items(&["PASS", password]).await
    }

    pub async fn ping(&self, target: &str, target2: &str) -> Result<(), ClientError> {
        self.send_items(&["PING", target, target2]).await
    }

    pub async fn pong(&self, target: &str, target2: &str) -> Result<(), ClientError> {
        self.send_items(&["PONG", target, target2]).await
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.send_items(&["PRIVMSG", target, &format!(":{text}")])
            .await
    }

    pub async fn privmsg_many(&self, targets: &[&str], text: &str) -> Result<(), ClientError> {
        self.privmsg(&targets.join(","), text).await
    }

    /// Send QUIT. This does not close the socket; see [`Connection::disconnect`].
    pub async fn quit(&self, message: &str) -> Result<(), ClientError> {
        self.send_items(&["QUIT", &trailing(message)]).await
    }

    pub async fn squit(&self, server: &str, comment: &str) -> Result<(), ClientError> {
        self.send_items(&["SQUIT", server, &trailing(comment)]).await
    }

    pub async fn stats(&self, stats_type: &str, server: &str) -> Result<(), ClientError> {
        self.send_items(&["STATS", stats_type, server]).await
    }

    pub async fn time(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["TIME", server]).await
    }

    /// Query the topic, or set it when `new_topic` is non-empty.
    pub async fn topic(&self, channel: &str, new_topic: &str) -> Result<(), ClientError> {
        self.send_items(&["TOPIC", channel, &trailing(new_topic)])
            .await
    }

    pub async fn trace(&self, target: &str) -> Result<(), ClientError> {
        self.send_items(&["TRACE", target]).await
    }

    pub async fn user(&self, username: &str, realname: &str) -> Result<(), ClientError> {
        self.send_raw(&format!("USER {username} 0 * :{realname}"))
            .await
    }

    pub async fn userhost(&self, nicks: &[&str]) -> Result<(), ClientError> {
        self.send_items(&["USERHOST", &nicks.join(",")]).await
    }

    pub async fn users(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["USERS", server]).await
    }

    pub async fn version(&self, server: &str) -> Result<(), ClientError> {
        self.send_items(&["VERSION", server]).await
    }

    pub async fn wallops(&self, text: &str) -> Result<(), ClientError> {
        self.send_items(&["WALLOPS", &format!(":{text}")]).await
    }

    pub async fn who(&self, target: &str, operators_only: bool) -> Result<(), ClientError> {
        self.send_items(&["WHO", target, if operators_only { "o" } else { "" }])
            .await
    }

    pub async fn whois(&self, targets: &[&str]) -> Result<(), ClientError> {
        self.send_items(&["WHOIS", &targets.join(",")]).await
    }

    pub async fn whowas(&self, nick: &str, max: &str, server: &str) -> Result<(), ClientError> {
        self.send_items(&["WHOWAS", nick, max, server]).await
    }

    // ── Operator pass-through ──

    /// Run a send verb by name with whitespace-separated arguments, for
    /// `/join #chan`-style input. The text after a verb's positional
    /// arguments becomes its trailing parameter (message bodies, reasons).
    ///
    /// Returns `None` when `verb` is not a pass-through verb.
    pub async fn call(&self, verb: &str, args: &str) -> Option<Result<(), ClientError>> {
        let verb = verb.to_ascii_lowercase();
        if !PASS_THROUGH.contains(&verb.as_str()) {
            return None;
        }
        Some(self.call_verb(&verb, args).await)
    }

    async fn call_verb(&self, verb: &str, args: &str) -> Result<(), ClientError> {
        let all = || args.split_whitespace().collect::<Vec<_>>();
        match verb {
            "action" | "notice" | "privmsg" => {
                let (head, text) = leading(args, 1);
                let [target] = exactly::<1>(verb, &head)?;
                match verb {
                    "action" => self.action(target, text).await,
                    "notice" => self.notice(target, text).await,
                    _ => self.privmsg(target, text).await,
                }
            }
            "admin" | "info" | "lusers" | "motd" | "time" | "trace" | "users" | "version" => {
                let words = all();
                arity(verb, &words, 0, 1)?;
                let server = opt(&words, 0);
                match verb {
                    "admin" => self.admin(server).await,
                    "info" => self.info(server).await,
                    "lusers" => self.lusers(server).await,
                    "motd" => self.motd(server).await,
                    "time" => self.time(server).await,
                    "trace" => self.trace(server).await,
                    "users" => self.users(server).await,
                    _ => self.version(server).await,
                }
            }
            "cap" => {
                let words = all();
                arity(verb, &words, 1, usize::MAX)?;
                self.cap(&words[0].to_ascii_uppercase(), &words[1..]).await
            }
            "ctcp" => {
                let (head, text) = leading(args, 2);
                let [ctcp_type, target] = exactly::<2>(verb, &head)?;
                self.ctcp(ctcp_type, target, text).await
            }
            "disconnect" => {
                arity(verb, &all(), 0, 0)?;
                self.disconnect(None).await;
                Ok(())
            }
            "globops" | "wallops" | "quit" => {
                let text = args.trim();
                match verb {
                    "globops" => self.globops(text).await,
                    "wallops" => self.wallops(text).await,
                    _ => self.quit(text).await,
                }
            }
            "invite" | "oper" => {
                let words = all();
                let [a, b] = exactly::<2>(verb, &words)?;
                if verb == "invite" {
                    self.invite(a, b).await
                } else {
                    self.oper(a, b).await
                }
            }
            "ison" | "names" | "userhost" | "whois" => {
                let words = all();
                arity(verb, &words, 1, usize::MAX)?;
                match verb {
                    "ison" => self.ison(&words).await,
                    "names" => self.names(&words).await,
                    "userhost" => self.userhost(&words).await,
                    _ => self.whois(&words).await,
                }
            }
            "join" => {
                let words = all();
                arity(verb, &words, 1, 2)?;
                self.join(words[0], opt(&words, 1)).await
            }
            "kick" => {
                let (head, comment) = leading(args, 2);
                let [channel, nick] = exactly::<2>(verb, &head)?;
                self.kick(channel, nick, comment).await
            }
            "links" => {
                let words = all();
                arity(verb, &words, 0, 2)?;
                self.links(opt(&words, 0), opt(&words, 1)).await
            }
            "list" => {
                let words = all();
                arity(verb, &words, 0, 2)?;
                let channels: Vec<&str> = words
                    .first()
                    .map(|c| c.split(',').collect())
                    .unwrap_or_default();
                self.list(&channels, opt(&words, 1)).await
            }
            "mode" => {
                let (head, modes) = leading(args, 1);
                let [target] = exactly::<1>(verb, &head)?;
                self.mode(target, modes).await
            }
            "nick" | "pass" => {
                let words = all();
                let [value] = exactly::<1>(verb, &words)?;
                if verb == "nick" {
                    self.nick(value).await
                } else {
                    self.pass(value).await
                }
            }
            "part" | "squit" | "topic" => {
                let (head, text) = leading(args, 1);
                let [first] = exactly::<1>(verb, &head)?;
                match verb {
                    "part" => {
                        let channels: Vec<&str> = first.split(',').collect();
                        self.part(&channels, text).await
                    }
                    "squit" => self.squit(first, text).await,
                    _ => self.topic(first, text).await,
                }
            }
            "ping" | "pong" => {
                let words = all();
                arity(verb, &words, 1, 2)?;
                if verb == "ping" {
                    self.ping(words[0], opt(&words, 1)).await
                } else {
                    self.pong(words[0], opt(&words, 1)).await
                }
            }
            "stats" => {
                let words = all();
                arity(verb, &words, 1, 2)?;
                self.stats(words[0], opt(&words, 1)).await
            }
            "user" => {
                let (head, realname) = leading(args, 1);
                let [username] = exactly::<1>(verb, &head)?;
                if realname.is_empty() {
                    return Err(bad_arguments(verb, "usage: user <username> <realname>"));
                }
                self.user(username, realname).await
            }
            "who" => {
                let words = all();
                arity(verb, &words, 0, 2)?;
                self.who(opt(&words, 0), opt(&words, 1) == "o").await
            }
            "whowas" => {
                let words = all();
                arity(verb, &words, 1, 3)?;
                self.whowas(words[0], opt(&words, 1), opt(&words, 2)).await
            }
            _ => Err(bad_arguments(verb, "no such command")),
        }
    }
}

/// Encode a line for the wire, refusing anything the server would
/// misread as more than one line or that exceeds the line limit.
fn prep_message(line: &str) -> Result<Vec<u8>, ClientError> {
    if line.contains(['\n', '\r']) {
        return Err(ClientError::InvalidCharacters);
    }
    let mut bytes = Vec::with_capacity(line.len() + 2);
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    if bytes.len() > MAX_LINE_BYTES {
        return Err(ClientError::MessageTooLong(bytes.len()));
    }
    Ok(bytes)
}

/// `:text` for non-empty optional trailing text, `""` otherwise.
fn trailing(text: &str) -> String {
    if text.is_empty() {
        String::new()
    } else {
        format!(":{text}")
    }
}

/// Split up to `n` leading words off `args`; the remainder is returned
/// as one piece with its inner spacing intact.
fn leading(args: &str, n: usize) -> (Vec<&str>, &str) {
    let mut rest = args.trim_start();
    let mut words = Vec::with_capacity(n);
    while words.len() < n && !rest.is_empty() {
        let (word, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        words.push(word);
        rest = tail.trim_start();
    }
    (words, rest)
}

fn opt<'a>(words: &[&'a str], i: usize) -> &'a str {
    words.get(i).copied().unwrap_or("")
}

fn bad_arguments(verb: &str, message: impl Into<String>) -> ClientError {
    ClientError::BadArguments {
        verb: verb.to_string(),
        message: message.into(),
    }
}

fn arity(verb: &str, words: &[&str], min: usize, max: usize) -> Result<(), ClientError> {
    if words.len() < min || words.len() > max {
        let expected = match (min, max) {
            (min, max) if min == max => format!("{min}"),
            (min, usize::MAX) => format!("at least {min}"),
            (min, max) => format!("{min} to {max}"),
        };
        return Err(bad_arguments(
            verb,
            format!("expected {expected} arguments, got {}", words.len()),
        ));
    }
    Ok(())
}

fn exactly<'a, const N: usize>(verb: &str, words: &[&'a str]) -> Result<[&'a str; N], ClientError> {
    arity(verb, words, N, N)?;
    let mut out = [""; N];
    out.copy_from_slice(words);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prep_appends_crlf() {
        assert_eq!(prep_message("PING x").unwrap(), b"PING x\r\n");
    }

    #[test]
    fn prep_rejects_newlines() {
        assert!(matches!(
            prep_message("PRIVMSG #a :one\ntwo"),
            Err(ClientError::InvalidCharacters)
        ));
    }

    #[test]
    fn prep_limit_includes_crlf() {
        assert!(prep_message(&"a".repeat(510)).is_ok());
        assert!(matches!(
            prep_message(&"a".repeat(511)),
            Err(ClientError::MessageTooLong(513))
        ));
    }

    #[test]
    fn prep_counts_bytes_not_chars() {
        // 255 two-byte chars = 510 bytes, plus CRLF = 512
        assert!(prep_message(&"é".repeat(255)).is_ok());
        assert!(prep_message(&"é".repeat(256)).is_err());
    }

    #[test]
    fn leading_keeps_inner_spacing() {
        assert_eq!(
            leading("  #chan   hello  there ", 1),
            (vec!["#chan"], "hello  there ")
        );
        assert_eq!(leading("", 2), (vec![], ""));
        assert_eq!(leading("a", 2), (vec!["a"], ""));
    }

    #[test]
    fn arity_messages() {
        let err = arity("join", &[], 1, 2).unwrap_err();
        assert_eq!(err.to_string(), "join: expected 1 to 2 arguments, got 0");
        let err = arity("ison", &[], 1, usize::MAX).unwrap_err();
        assert_eq!(err.to_string(), "ison: expected at least 1 arguments, got 0");
        assert!(exactly::<2>("invite", &["a", "b"]).is_ok());
    }
}
