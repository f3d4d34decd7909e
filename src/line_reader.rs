//! Raw-mode line input with local echo, backspace and single-line recall.
//!
//! [`LineEditor`] is the byte-at-a-time state machine and knows nothing about
//! terminals; [`LineReader`] feeds it from an input stream while a
//! [`RawModeGuard`] keeps the terminal in non-canonical, non-echoing mode.

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use tracing::debug;

/// Longest line accepted; input is truncated once it is reached.
pub const MAX_LINE_LEN: usize = 4096;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const TAB: u8 = b'\t';
const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';
const ESC: u8 = 0x1b;
const BACKSPACE: u8 = 0x7f;

/// Moves the cursor back one column, blanks it and moves back again.
const ERASE_COLUMN: &[u8] = b"\x08 \x08";

/// What a read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A finished line, without its newline.
    Line(String),
    /// Ctrl+D or end of input: the session should end.
    Exit,
    /// Ctrl+C: the line was discarded.
    Interrupted,
}

/// The previously accepted raw line, offered again on up-arrow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySlot {
    previous: String,
}

impl HistorySlot {
    pub fn get(&self) -> &str {
        &self.previous
    }

    pub fn record(&mut self, line: &str) {
        self.previous.clear();
        self.previous.push_str(line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    None,
    EscSeen,
    BracketSeen,
    /// Inside `ESC [` after parameter bytes, waiting for the final byte.
    Parameters,
}

/// Byte-driven editing state for one line.
pub struct LineEditor<'a> {
    buffer: Vec<u8>,
    state: EscapeState,
    recall: &'a str,
}

impl<'a> LineEditor<'a> {
    /// Start an empty line; `recall` is what up-arrow restores.
    pub fn new(recall: &'a str) -> Self {
        LineEditor {
            buffer: Vec::new(),
            state: EscapeState::None,
            recall,
        }
    }

    /// Bytes typed so far.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Apply one input byte, echoing to `echo`.
    ///
    /// Returns the outcome once the byte finishes the read.
    pub fn feed(&mut self, byte: u8, echo: &mut dyn Write) -> io::Result<Option<ReadOutcome>> {
        match (self.state, byte) {
            (EscapeState::None, ESC) => {
                self.state = EscapeState::EscSeen;
                return Ok(None);
            }
            (EscapeState::EscSeen, b'[') => {
                self.state = EscapeState::BracketSeen;
                return Ok(None);
            }
            (EscapeState::BracketSeen, b'A') => {
                self.state = EscapeState::None;
                self.recall_previous(echo)?;
                return Ok(None);
            }
            (EscapeState::BracketSeen | EscapeState::Parameters, 0x30..=0x3f) => {
                self.state = EscapeState::Parameters;
                return Ok(None);
            }
            (EscapeState::EscSeen | EscapeState::BracketSeen | EscapeState::Parameters, _) => {
                // Unsupported sequence: drop it whole.
                self.state = EscapeState::None;
                return Ok(None);
            }
            (EscapeState::None, _) => {}
        }

        match byte {
            NEWLINE | CARRIAGE_RETURN => {
                echo.write_all(b"\n")?;
                Ok(Some(self.take_line()))
            }
            TAB => {
                if self.is_full() && self.erase_last_char() {
                    echo.write_all(ERASE_COLUMN)?;
                }
                self.buffer.push(b'?');
                echo.write_all(b"?\n")?;
                Ok(Some(self.take_line()))
            }
            CTRL_D => Ok(Some(ReadOutcome::Exit)),
            CTRL_C => {
                self.buffer.clear();
                echo.write_all(b"^C\n")?;
                Ok(Some(ReadOutcome::Interrupted))
            }
            BACKSPACE => {
                if self.erase_last_char() {
                    echo.write_all(ERASE_COLUMN)?;
                }
                Ok(None)
            }
            b if b < 0x20 => Ok(None),
            _ if self.is_full() => Ok(Some(self.take_line())),
            b => {
                self.buffer.push(b);
                echo.write_all(&[b])?;
                if self.is_full() {
                    return Ok(Some(self.take_line()));
                }
                Ok(None)
            }
        }
    }

    fn recall_previous(&mut self, echo: &mut dyn Write) -> io::Result<()> {
        for _ in 0..column_count(&self.buffer) {
            echo.write_all(ERASE_COLUMN)?;
        }
        let mut end = self.recall.len().min(MAX_LINE_LEN);
        while !self.recall.is_char_boundary(end) {
            end -= 1;
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(&self.recall.as_bytes()[..end]);
        echo.write_all(&self.buffer)
    }

    fn is_full(&self) -> bool {
        self.buffer.len() >= MAX_LINE_LEN
    }

    /// Remove the last character, including all bytes of a UTF-8 sequence.
    fn erase_last_char(&mut self) -> bool {
        let Some(mut byte) = self.buffer.pop() else {
            return false;
        };
        while is_continuation(byte) {
            match self.buffer.pop() {
                Some(b) => byte = b,
                None => break,
            }
        }
        true
    }

    fn take_line(&mut self) -> ReadOutcome {
        let bytes = std::mem::take(&mut self.buffer);
        ReadOutcome::Line(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xc0 == 0x80
}

/// Number of terminal columns the buffer occupies, one per character.
fn column_count(buffer: &[u8]) -> usize {
    buffer.iter().filter(|&&b| !is_continuation(b)).count()
}

/// Puts a terminal in raw mode until dropped.
///
/// Canonical line editing, echo and signal keys are turned off so every byte
/// reaches the reader. When the descriptor is not a terminal nothing is
/// changed and dropping the guard is a no-op.
pub struct RawModeGuard<F: AsFd> {
    terminal: F,
    saved: Option<Termios>,
}

impl<F: AsFd> RawModeGuard<F> {
    pub fn enter(terminal: F) -> Self {
        let saved = match termios::tcgetattr(&terminal) {
            Ok(saved) => saved,
            Err(e) => {
                debug!(error = %e, "input is not a terminal, raw mode skipped");
                return RawModeGuard { terminal, saved: None };
            }
        };

        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        if let Err(e) = termios::tcsetattr(&terminal, SetArg::TCSANOW, &raw) {
            debug!(error = %e, "failed to enter raw mode");
            return RawModeGuard { terminal, saved: None };
        }
        RawModeGuard {
            terminal,
            saved: Some(saved),
        }
    }
}

impl<F: AsFd> Drop for RawModeGuard<F> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = termios::tcsetattr(&self.terminal, SetArg::TCSANOW, &saved) {
                debug!(error = %e, "failed to restore terminal mode");
            }
        }
    }
}

/// Unbuffered reader over file descriptor 0.
///
/// Child processes inherit the same descriptor, so nothing may be read ahead
/// of the current line.
pub struct TerminalInput;

impl Read for TerminalInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(libc::STDIN_FILENO, buf).map_err(io::Error::from)
    }
}

/// Reads finished lines from an input stream, echoing to an output stream.
pub struct LineReader<R, W, T = io::Stdin> {
    input: R,
    output: W,
    /// Switched to raw mode for the duration of each read.
    terminal: Option<T>,
}

impl LineReader<TerminalInput, io::Stdout> {
    /// Reader on the process terminal.
    pub fn stdio() -> Self {
        LineReader {
            input: TerminalInput,
            output: io::stdout(),
            terminal: Some(io::stdin()),
        }
    }
}

impl<R: Read, W: Write> LineReader<R, W> {
    /// Reader over arbitrary streams; no terminal mode is touched.
    pub fn new(input: R, output: W) -> Self {
        LineReader {
            input,
            output,
            terminal: None,
        }
    }
}

impl<R: Read, W: Write, T: AsFd> LineReader<R, W, T> {
    pub fn with_terminal(input: R, output: W, terminal: T) -> Self {
        LineReader {
            input,
            output,
            terminal: Some(terminal),
        }
    }

    /// Write text such as the prompt to the echo stream.
    pub fn print(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes())?;
        self.output.flush()
    }

    /// Read one line, recording it in `history` when it is accepted.
    pub fn read_line(&mut self, history: &mut HistorySlot) -> io::Result<ReadOutcome> {
        let _guard = self.terminal.as_ref().map(RawModeGuard::enter);

        let outcome = {
            let mut editor = LineEditor::new(history.get());
            loop {
                let Some(byte) = read_byte(&mut self.input)? else {
                    break ReadOutcome::Exit;
                };
                let step = editor.feed(byte, &mut self.output);
                self.output.flush()?;
                if let Some(outcome) = step? {
                    break outcome;
                }
            }
        };

        if let ReadOutcome::Line(line) = &outcome {
            history.record(line);
        }
        Ok(outcome)
    }
}

fn read_byte(input: &mut impl Read) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::openpty;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::os::fd::OwnedFd;

    fn feed_all(
        editor: &mut LineEditor<'_>,
        bytes: &[u8],
        echo: &mut Vec<u8>,
    ) -> Option<ReadOutcome> {
        for &b in bytes {
            if let Some(outcome) = editor.feed(b, echo).unwrap() {
                return Some(outcome);
            }
        }
        None
    }

    fn read(input: &[u8], history: &mut HistorySlot) -> (ReadOutcome, Vec<u8>) {
        let mut out = Vec::new();
        let outcome = LineReader::new(Cursor::new(input.to_vec()), &mut out)
            .read_line(history)
            .unwrap();
        (outcome, out)
    }

    #[test]
    fn test_printable_bytes_are_echoed_and_buffered() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("");
        assert_eq!(feed_all(&mut editor, b"ls -l", &mut echo), None);
        assert_eq!(editor.buffer(), b"ls -l");
        assert_eq!(echo, b"ls -l");
    }

    #[test]
    fn test_newline_finishes_line_without_newline() {
        let mut history = HistorySlot::default();
        let (outcome, echo) = read(b"echo hi\nignored", &mut history);
        assert_eq!(outcome, ReadOutcome::Line("echo hi".to_string()));
        assert_eq!(echo, b"echo hi\n");
        assert_eq!(history.get(), "echo hi");
    }

    #[test]
    fn test_backspace_erases_last_character() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("");
        feed_all(&mut editor, b"lss\x7f", &mut echo);
        assert_eq!(editor.buffer(), b"ls");
        assert_eq!(echo, b"lss\x08 \x08");
    }

    #[test]
    fn test_backspace_on_empty_buffer_is_noop() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("");
        feed_all(&mut editor, b"\x7f\x7f", &mut echo);
        assert!(editor.buffer().is_empty());
        assert!(echo.is_empty());
    }

    #[test]
    fn test_backspace_removes_whole_utf8_character() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("");
        feed_all(&mut editor, "aé".as_bytes(), &mut echo);
        feed_all(&mut editor, b"\x7f", &mut echo);
        assert_eq!(editor.buffer(), b"a");
    }

    #[test]
    fn test_up_arrow_recalls_previous_line() {
        let mut history = HistorySlot::default();
        history.record(r#"grep "a b" <in >out"#);
        let (outcome, _) = read(b"\x1b[A\n", &mut history);
        assert_eq!(outcome, ReadOutcome::Line(r#"grep "a b" <in >out"#.to_string()));
    }

    #[test]
    fn test_up_arrow_replaces_typed_text_visually() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("pwd");
        feed_all(&mut editor, b"ab\x1b[A", &mut echo);
        assert_eq!(editor.buffer(), b"pwd");
        assert_eq!(echo, b"ab\x08 \x08\x08 \x08pwd");
    }

    #[test]
    fn test_recall_after_reading_previous_line() {
        let mut history = HistorySlot::default();
        let (first, _) = read(b"ls | wc -l\n", &mut history);
        assert_eq!(first, ReadOutcome::Line("ls | wc -l".to_string()));
        let (second, _) = read(b"\x1b[A\n", &mut history);
        assert_eq!(second, first);
    }

    #[test]
    fn test_empty_line_is_recorded() {
        let mut history = HistorySlot::default();
        history.record("old");
        let (outcome, _) = read(b"\n", &mut history);
        assert_eq!(outcome, ReadOutcome::Line(String::new()));
        assert_eq!(history.get(), "");
    }

    #[test]
    fn test_unknown_escape_sequence_is_dropped() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("prev");
        feed_all(&mut editor, b"a\x1b[Bb\x1bxc", &mut echo);
        assert_eq!(editor.buffer(), b"abc");
        assert_eq!(echo, b"abc");
    }

    #[test]
    fn test_tab_appends_marker_and_finishes() {
        let mut history = HistorySlot::default();
        let (outcome, _) = read(b"ec\tmore", &mut history);
        assert_eq!(outcome, ReadOutcome::Line("ec?".to_string()));
    }

    #[test]
    fn test_ctrl_d_exits_without_touching_history() {
        let mut history = HistorySlot::default();
        history.record("keep");
        let (outcome, _) = read(b"abc\x04", &mut history);
        assert_eq!(outcome, ReadOutcome::Exit);
        assert_eq!(history.get(), "keep");
    }

    #[test]
    fn test_end_of_input_exits() {
        let mut history = HistorySlot::default();
        let (outcome, _) = read(b"partial", &mut history);
        assert_eq!(outcome, ReadOutcome::Exit);
    }

    #[test]
    fn test_ctrl_c_discards_line() {
        let mut history = HistorySlot::default();
        let (outcome, echo) = read(b"rm -rf\x03", &mut history);
        assert_eq!(outcome, ReadOutcome::Interrupted);
        assert!(echo.ends_with(b"^C\n"));
        assert_eq!(history.get(), "");
    }

    #[test]
    fn test_other_control_bytes_are_ignored() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("");
        feed_all(&mut editor, b"a\x01\x02b", &mut echo);
        assert_eq!(editor.buffer(), b"ab");
    }

    #[test]
    fn test_line_is_truncated_at_maximum_length() {
        let mut history = HistorySlot::default();
        let input = vec![b'x'; MAX_LINE_LEN + 10];
        let (outcome, echo) = read(&input, &mut history);
        match outcome {
            ReadOutcome::Line(line) => assert_eq!(line.len(), MAX_LINE_LEN),
            other => panic!("expected a line, got {:?}", other),
        }
        assert!(!echo.contains(&b'\n'));
    }

    #[test]
    fn test_recalled_line_respects_maximum_length() {
        let mut history = HistorySlot::default();
        history.record(&"x".repeat(MAX_LINE_LEN));
        let (outcome, _) = read(b"\x1b[Ayz\n", &mut history);
        assert_eq!(outcome, ReadOutcome::Line("x".repeat(MAX_LINE_LEN)));

        history.record(&"y".repeat(MAX_LINE_LEN + 100));
        let (outcome, _) = read(b"\x1b[A\n", &mut history);
        assert_eq!(outcome, ReadOutcome::Line("y".repeat(MAX_LINE_LEN)));
    }

    #[test]
    fn test_tab_on_full_line_keeps_maximum_length() {
        let mut history = HistorySlot::default();
        history.record(&"x".repeat(MAX_LINE_LEN));
        let (outcome, _) = read(b"\x1b[A\t", &mut history);
        let ReadOutcome::Line(line) = outcome else {
            panic!("expected a line");
        };
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert!(line.ends_with("x?"));
    }

    #[test]
    fn test_escape_sequence_with_parameters_is_dropped_whole() {
        let mut echo = Vec::new();
        let mut editor = LineEditor::new("prev");
        // Delete key, then Ctrl+Up.
        feed_all(&mut editor, b"ab\x1b[3~c\x1b[1;5Ad", &mut echo);
        assert_eq!(editor.buffer(), b"abcd");
        assert_eq!(echo, b"abcd");
    }

    fn raw_flags() -> LocalFlags {
        LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG
    }

    fn local_flags(terminal: &OwnedFd) -> LocalFlags {
        termios::tcgetattr(terminal).unwrap().local_flags
    }

    /// Remembers the terminal flags in effect at every read.
    struct ModeRecorder<'a, R> {
        inner: R,
        terminal: &'a OwnedFd,
        seen: &'a RefCell<Vec<LocalFlags>>,
    }

    impl<R: Read> Read for ModeRecorder<'_, R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.seen.borrow_mut().push(local_flags(self.terminal));
            self.inner.read(buf)
        }
    }

    struct BrokenInput;

    impl Read for BrokenInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"))
        }
    }

    /// Read one line on a fresh pseudo-terminal and check its mode is back
    /// to what it was before the read.
    fn read_on_terminal(input: impl Read) -> (io::Result<ReadOutcome>, Vec<LocalFlags>) {
        let pty = openpty(None, None).unwrap();
        let before = local_flags(&pty.slave);
        assert!(before.contains(raw_flags()));

        let seen = RefCell::new(Vec::new());
        let recorder = ModeRecorder {
            inner: input,
            terminal: &pty.slave,
            seen: &seen,
        };
        let mut out = Vec::new();
        let outcome = LineReader::with_terminal(recorder, &mut out, &pty.slave)
            .read_line(&mut HistorySlot::default());

        assert_eq!(local_flags(&pty.slave), before);
        (outcome, seen.into_inner())
    }

    #[test]
    fn test_raw_mode_guard_clears_and_restores_flags() {
        let pty = openpty(None, None).unwrap();
        let before = local_flags(&pty.slave);
        {
            let _guard = RawModeGuard::enter(&pty.slave);
            assert!(!local_flags(&pty.slave).intersects(raw_flags()));
        }
        assert_eq!(local_flags(&pty.slave), before);
    }

    #[test]
    fn test_raw_mode_guard_ignores_non_terminal() {
        let file = tempfile::tempfile().unwrap();
        let guard = RawModeGuard::enter(&file);
        assert!(guard.saved.is_none());
    }

    #[test]
    fn test_terminal_restored_after_ctrl_d() {
        let (outcome, seen) = read_on_terminal(Cursor::new(b"ls\x04".to_vec()));
        assert_eq!(outcome.unwrap(), ReadOutcome::Exit);
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|flags| !flags.intersects(raw_flags())));
    }

    #[test]
    fn test_terminal_restored_after_ctrl_c() {
        let (outcome, seen) = read_on_terminal(Cursor::new(b"rm\x03".to_vec()));
        assert_eq!(outcome.unwrap(), ReadOutcome::Interrupted);
        assert!(seen.iter().all(|flags| !flags.intersects(raw_flags())));
    }

    #[test]
    fn test_terminal_restored_after_input_error() {
        let (outcome, seen) = read_on_terminal(BrokenInput);
        assert_eq!(outcome.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].intersects(raw_flags()));
    }
}
