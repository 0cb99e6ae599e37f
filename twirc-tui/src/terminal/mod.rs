//! Terminal input multiplexer.
//!
//! Input comes from one stdin reader thread that lives as long as the
//! process (a blocking read cannot be cancelled, so it must not belong to
//! a session). Each session opens [`Terminal::lines`] and pulls completed
//! [`Line`]s from it until end of input.
//!
//! Two strategies share that contract:
//! - dumb: stdin is not a terminal; chunks are split on `\n`.
//! - raw: the terminal is put in raw mode and [`editor::Editor`] does the
//!   editing; concurrent output is routed through [`Output`] so it lands
//!   above the line being typed.

pub mod editor;
pub mod output;

use std::collections::VecDeque;
use std::io::{self, IsTerminal, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

use editor::{CLEAR_TO_EOL, Edit};
pub use output::Output;

type Chunks = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

/// One line of operator input.
///
/// Exactly one of [`Line::show`] / [`Line::hide`] takes effect, the first
/// one called; later calls do nothing.
pub struct Line {
    bytes: Vec<u8>,
    settled: AtomicBool,
    /// Present in raw mode, where we draw the line ourselves.
    screen: Option<Output>,
}

impl Line {
    pub fn new(bytes: Vec<u8>, screen: Option<Output>) -> Self {
        Self {
            bytes,
            settled: AtomicBool::new(false),
            screen,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Leave the line on screen as entered.
    pub fn show(&self) {
        if !self.settled.swap(true, Ordering::SeqCst)
            && let Some(screen) = &self.screen
        {
            screen.put_raw(b"\r\n");
        }
    }

    /// Erase the line from the screen.
    pub fn hide(&self) {
        if !self.settled.swap(true, Ordering::SeqCst)
            && let Some(screen) = &self.screen
        {
            let mut erase = b"\r".to_vec();
            erase.extend_from_slice(CLEAR_TO_EOL);
            screen.put_raw(&erase);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dumb,
    Raw,
}

/// Restores cooked mode when dropped, including when the owning task is
/// cancelled.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Both halves of the operator's terminal.
#[derive(Clone)]
pub struct Terminal {
    chunks: Chunks,
    output: Output,
    mode: Mode,
    /// Whether opening `lines` should switch the real tty to raw mode.
    manage_tty: bool,
}

impl Terminal {
    /// The process's stdin/stdout. Raw mode is used when both are a tty.
    pub fn stdio() -> Self {
        static STDIN: OnceLock<Chunks> = OnceLock::new();
        let chunks = STDIN.get_or_init(spawn_stdin_reader).clone();
        let tty = io::stdin().is_terminal() && io::stdout().is_terminal();
        let mode = if tty { Mode::Raw } else { Mode::Dumb };
        Self {
            chunks,
            output: Output::stdout(tty),
            mode,
            manage_tty: tty,
        }
    }

    /// A terminal fed from `chunks`; an empty chunk or a closed channel
    /// means end of input.
    pub fn from_chunks(chunks: mpsc::Receiver<Vec<u8>>, output: Output, mode: Mode) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(chunks)),
            output,
            mode,
            manage_tty: false,
        }
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Start reading lines. Only one reader may be open at a time; a second
    /// call waits until the first [`Lines`] is dropped.
    pub async fn lines(&self) -> io::Result<Lines> {
        let chunks = self.chunks.clone().lock_owned().await;
        let raw_mode = if self.mode == Mode::Raw && self.manage_tty {
            Some(RawModeGuard::enter()?)
        } else {
            None
        };
        Ok(Lines {
            chunks,
            output: self.output.clone(),
            mode: self.mode,
            ready: VecDeque::new(),
            partial: Vec::new(),
            eof: false,
            _raw_mode: raw_mode,
        })
    }
}

fn spawn_stdin_reader() -> Chunks {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let mut guard = stdin.lock();
        let mut buf = [0u8; 4096];
        loop {
            match guard.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let _ = tx.blocking_send(Vec::new());
                    break;
                }
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

/// A single pass over the operator's input lines.
pub struct Lines {
    chunks: OwnedMutexGuard<mpsc::Receiver<Vec<u8>>>,
    output: Output,
    mode: Mode,
    ready: VecDeque<Line>,
    /// Dumb mode: bytes after the last newline.
    partial: Vec<u8>,
    eof: bool,
    _raw_mode: Option<RawModeGuard>,
}

impl Lines {
    /// The next completed line, or `None` at end of input.
    /// Cancel-safe: no input is lost if the future is dropped.
    pub async fn next(&mut self) -> Option<Line> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }
            if self.eof {
                return None;
            }
            match self.chunks.recv().await {
                Some(chunk) if !chunk.is_empty() => self.feed(&chunk),
                _ => self.finish(),
            }
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        match self.mode {
            Mode::Dumb => {
                self.partial.extend_from_slice(chunk);
                if let Some(end) = self.partial.iter().rposition(|&b| b == b'\n') {
                    let rest = self.partial.split_off(end + 1);
                    let complete = std::mem::replace(&mut self.partial, rest);
                    for line in complete[..end].split(|&b| b == b'\n') {
                        self.ready.push_back(Line::new(line.to_vec(), None));
                    }
                }
            }
            Mode::Raw => {
                for &byte in chunk {
                    match self.output.key(byte) {
                        Edit::Line(bytes) => {
                            self.ready
                                .push_back(Line::new(bytes, Some(self.output.clone())));
                        }
                        Edit::Eof => {
                            self.eof = true;
                            break;
                        }
                        Edit::Echo(_) => {}
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        self.eof = true;
        if !self.partial.is_empty() {
            let last = std::mem::take(&mut self.partial);
            self.ready.push_back(Line::new(last, None));
        }
    }
}

impl Drop for Lines {
    fn drop(&mut self) {
        self.output.flush_partial();
    }
}
