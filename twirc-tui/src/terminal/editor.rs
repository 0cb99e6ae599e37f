//! Local line editing for raw-mode input.
//!
//! The terminal driver does neither echo nor editing once raw mode is on,
//! so every keystroke goes through [`Editor::key`], which updates the
//! pending buffer and says what to draw.

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const INTERRUPT: u8 = 0x03; // ^C
const END_OF_TRANSMISSION: u8 = 0x04; // ^D
const LINE_KILL: u8 = 0x15; // ^U
const WORD_ERASE: u8 = 0x17; // ^W

/// Clear from the cursor to the end of the screen line.
pub const CLEAR_TO_EOL: &[u8] = b"\x1b[K";

/// Outcome of one keystroke.
#[derive(Debug, PartialEq, Eq)]
pub enum Edit {
    /// Bytes to write to the screen (may be empty).
    Echo(Vec<u8>),
    /// A finished line; the buffer is now empty.
    Line(Vec<u8>),
    /// End of input.
    Eof,
}

#[derive(Debug, Default)]
pub struct Editor {
    buf: Vec<u8>,
    /// The last key was CR; a LF right after it belongs to the same Enter.
    after_cr: bool,
}

impl Editor {
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub fn set_buffer(&mut self, text: &[u8]) {
        self.buf = text.to_vec();
    }

    pub fn key(&mut self, byte: u8) -> Edit {
        let after_cr = std::mem::take(&mut self.after_cr);
        match byte {
            INTERRUPT => Edit::Eof,
            END_OF_TRANSMISSION if self.buf.is_empty() => Edit::Eof,
            b'\r' => {
                self.after_cr = true;
                Edit::Line(std::mem::take(&mut self.buf))
            }
            b'\n' if after_cr => Edit::Echo(Vec::new()),
            b'\n' => Edit::Line(std::mem::take(&mut self.buf)),
            BACKSPACE | DELETE => {
                if self.pop_char() {
                    let mut echo = vec![BACKSPACE];
                    echo.extend_from_slice(CLEAR_TO_EOL);
                    Edit::Echo(echo)
                } else {
                    Edit::Echo(Vec::new())
                }
            }
            LINE_KILL => {
                if self.buf.is_empty() {
                    return Edit::Echo(Vec::new());
                }
                self.buf.clear();
                Edit::Echo(redraw(&[]))
            }
            WORD_ERASE => {
                if self.buf.is_empty() {
                    return Edit::Echo(Vec::new());
                }
                while self.buf.last().is_some_and(u8::is_ascii_whitespace) {
                    self.buf.pop();
                }
                let keep = self
                    .buf
                    .iter()
                    .rposition(|&b| b == b' ')
                    .map_or(0, |i| i + 1);
                self.buf.truncate(keep);
                Edit::Echo(redraw(&self.buf))
            }
            control if control < b' ' => {
                let caret = [b'^', control + 64];
                self.buf.extend_from_slice(&caret);
                Edit::Echo(caret.to_vec())
            }
            byte => {
                self.buf.push(byte);
                Edit::Echo(vec![byte])
            }
        }
    }

    /// Remove the last UTF-8 character. False when the buffer was empty.
    fn pop_char(&mut self) -> bool {
        let Some(mut byte) = self.buf.pop() else {
            return false;
        };
        // Continuation bytes are 0b10xx_xxxx; stop after the lead byte.
        while byte & 0xc0 == 0x80 {
            match self.buf.pop() {
                Some(b) => byte = b,
                None => break,
            }
        }
        true
    }
}

/// Return to column zero, clear the line and draw `buf`.
pub fn redraw(buf: &[u8]) -> Vec<u8> {
    let mut out = b"\r".to_vec();
    out.extend_from_slice(CLEAR_TO_EOL);
    out.extend_from_slice(buf);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_all(editor: &mut Editor, input: &[u8]) -> Vec<Edit> {
        input.iter().map(|&b| editor.key(b)).collect()
    }

    #[test]
    fn enter_finishes_line() {
        let mut editor = Editor::default();
        let edits = type_all(&mut editor, b"hi\r");
        assert_eq!(edits[0], Edit::Echo(b"h".to_vec()));
        assert_eq!(edits[2], Edit::Line(b"hi".to_vec()));
        assert!(editor.buffer().is_empty());
    }

    #[test]
    fn crlf_is_one_enter() {
        let mut editor = Editor::default();
        let edits = type_all(&mut editor, b"a\r\nb\n");
        let lines: Vec<_> = edits
            .into_iter()
            .filter_map(|e| match e {
                Edit::Line(l) => Some(l),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn empty_enter_yields_empty_line() {
        let mut editor = Editor::default();
        assert_eq!(editor.key(b'\r'), Edit::Line(Vec::new()));
    }

    #[test]
    fn backspace_erases_one_character() {
        let mut editor = Editor::default();
        type_all(&mut editor, "né".as_bytes());
        assert_eq!(editor.key(DELETE), Edit::Echo(b"\x08\x1b[K".to_vec()));
        assert_eq!(editor.buffer(), b"n");
        editor.key(BACKSPACE);
        assert_eq!(editor.key(BACKSPACE), Edit::Echo(Vec::new()));
    }

    #[test]
    fn line_kill_clears_everything() {
        let mut editor = Editor::default();
        type_all(&mut editor, b"some text");
        assert_eq!(editor.key(LINE_KILL), Edit::Echo(b"\r\x1b[K".to_vec()));
        assert!(editor.buffer().is_empty());
    }

    #[test]
    fn word_erase_trims_then_cuts_to_space() {
        let mut editor = Editor::default();
        type_all(&mut editor, b"/say hello world  ");
        assert_eq!(
            editor.key(WORD_ERASE),
            Edit::Echo(b"\r\x1b[K/say hello ".to_vec())
        );
        editor.key(WORD_ERASE);
        assert_eq!(editor.buffer(), b"/say ");
        editor.key(WORD_ERASE);
        assert_eq!(editor.buffer(), b"");
    }

    #[test]
    fn control_characters_use_caret_form() {
        let mut editor = Editor::default();
        assert_eq!(editor.key(0x1b), Edit::Echo(b"^[".to_vec()));
        assert_eq!(editor.key(0x01), Edit::Echo(b"^A".to_vec()));
        assert_eq!(editor.buffer(), b"^[^A");
    }

    #[test]
    fn ctrl_d_ends_input_only_on_empty_line() {
        let mut editor = Editor::default();
        editor.key(b'x');
        assert_eq!(editor.key(END_OF_TRANSMISSION), Edit::Echo(b"^D".to_vec()));
        editor.key(LINE_KILL);
        assert_eq!(editor.key(END_OF_TRANSMISSION), Edit::Eof);
    }

    #[test]
    fn ctrl_c_ends_input() {
        let mut editor = Editor::default();
        editor.key(b'x');
        assert_eq!(editor.key(INTERRUPT), Edit::Eof);
    }
}
