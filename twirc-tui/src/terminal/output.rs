//! The single writer everything visible goes through.
//!
//! In raw mode the bottom screen line belongs to the input being typed.
//! Output arriving while that line is non-empty is drawn above it: back
//! to column zero, clear the line, write the complete output lines, then
//! redraw the pending input.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use super::editor::{CLEAR_TO_EOL, Edit, Editor, redraw};

struct Screen {
    sink: Box<dyn Write + Send>,
    /// Raw mode turns off output post-processing, so LF needs a CR.
    raw: bool,
    editor: Editor,
    /// Text written since the last newline, held back until it completes.
    partial: String,
}

impl Screen {
    fn put(&mut self, bytes: &[u8]) {
        let result = self.sink.write_all(bytes).and_then(|()| self.sink.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, "terminal write failed");
        }
    }

    fn put_text(&mut self, text: &str) {
        if self.raw {
            let translated = text.replace('\n', "\r\n");
            self.put(translated.as_bytes());
        } else {
            self.put(text.as_bytes());
        }
    }
}

/// Cloneable handle to the terminal's output side.
#[derive(Clone)]
pub struct Output {
    screen: Arc<Mutex<Screen>>,
}

impl Output {
    pub fn new(sink: Box<dyn Write + Send>, raw: bool) -> Self {
        Self {
            screen: Arc::new(Mutex::new(Screen {
                sink,
                raw,
                editor: Editor::default(),
                partial: String::new(),
            })),
        }
    }

    pub fn stdout(raw: bool) -> Self {
        Self::new(Box::new(io::stdout()), raw)
    }

    /// Write `text` followed by a newline.
    pub fn println(&self, text: impl AsRef<str>) {
        let mut text = text.as_ref().to_string();
        text.push('\n');
        self.write_str(&text);
    }

    /// Write text; only complete lines are shown, the tail waits for its
    /// newline (or for [`Output::flush_partial`]).
    pub fn write_str(&self, text: &str) {
        let mut screen = self.screen.lock();
        screen.partial.push_str(text);
        let Some(end) = screen.partial.rfind('\n') else {
            return;
        };
        let rest = screen.partial.split_off(end + 1);
        let lines = std::mem::replace(&mut screen.partial, rest);

        if screen.raw && !screen.editor.buffer().is_empty() {
            let mut out = b"\r".to_vec();
            out.extend_from_slice(CLEAR_TO_EOL);
            out.extend_from_slice(lines.replace('\n', "\r\n").as_bytes());
            out.extend_from_slice(screen.editor.buffer());
            screen.put(&out);
        } else {
            screen.put_text(&lines);
        }
    }

    /// Write out any held-back partial line.
    pub fn flush_partial(&self) {
        let mut screen = self.screen.lock();
        if !screen.partial.is_empty() {
            let partial = std::mem::take(&mut screen.partial);
            screen.put_text(&partial);
        }
    }

    /// The input line currently being typed.
    pub fn get_buffer(&self) -> String {
        String::from_utf8_lossy(self.screen.lock().editor.buffer()).into_owned()
    }

    /// Replace the input line being typed and redraw it.
    pub fn set_buffer(&self, text: &str) {
        let mut screen = self.screen.lock();
        screen.editor.set_buffer(text.as_bytes());
        if screen.raw {
            screen.put(&redraw(text.as_bytes()));
        }
    }

    pub(crate) fn key(&self, byte: u8) -> Edit {
        let mut screen = self.screen.lock();
        let edit = screen.editor.key(byte);
        if let Edit::Echo(bytes) = &edit
            && !bytes.is_empty()
        {
            screen.put(bytes);
        }
        edit
    }

    /// Write control bytes as-is, bypassing line buffering.
    pub(crate) fn put_raw(&self, bytes: &[u8]) {
        self.screen.lock().put(bytes);
    }
}

/// An in-memory sink for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Capture(pub Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Capture {
    pub fn take(&self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut *self.0.lock())).into_owned()
    }
}

#[cfg(test)]
impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(raw: bool) -> (Output, Capture) {
        let capture = Capture::default();
        (Output::new(Box::new(capture.clone()), raw), capture)
    }

    #[test]
    fn partial_lines_wait_for_newline() {
        let (out, capture) = output(false);
        out.write_str("hello ");
        assert_eq!(capture.take(), "");
        out.write_str("world\nand");
        assert_eq!(capture.take(), "hello world\n");
        out.flush_partial();
        assert_eq!(capture.take(), "and");
    }

    #[test]
    fn raw_mode_translates_newlines() {
        let (out, capture) = output(true);
        out.println("a\nb");
        assert_eq!(capture.take(), "a\r\nb\r\n");
    }

    #[test]
    fn output_is_drawn_above_pending_input() {
        let (out, capture) = output(true);
        for &b in b"typing" {
            out.key(b);
        }
        assert_eq!(capture.take(), "typing");

        out.println("<bob> hi");
        assert_eq!(capture.take(), "\r\x1b[K<bob> hi\r\ntyping");
    }

    #[test]
    fn set_buffer_redraws() {
        let (out, capture) = output(true);
        out.set_buffer("/say again");
        assert_eq!(capture.take(), "\r\x1b[K/say again");
        assert_eq!(out.get_buffer(), "/say again");
    }
}
