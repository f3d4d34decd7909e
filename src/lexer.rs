//! Lexical analysis of a command line into whitespace separated tokens.
//!
//! Quoted spans (`"..."` and `'...'`) keep their inner blanks, so `"a b"` is a
//! single token. The tokens keep their raw text: the parser decides which
//! ones are operators and strips quotes only from plain words.

/// A raw token as typed, quotes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// The token exactly as typed.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token with one pair of wrapping quotes removed.
    ///
    /// Only a token fully wrapped in the same quote character is unwrapped;
    /// anything else, including an unterminated quote, is returned verbatim.
    pub fn text(&self) -> &str {
        strip_quotes(&self.0)
    }
}

/// Remove one pair of matching `"` or `'` quotes that wrap the whole string.
pub fn strip_quotes(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(&open), Some(&close))
            if bytes.len() >= 2 && open == close && (open == b'"' || open == b'\'') =>
        {
            &raw[1..raw.len() - 1]
        }
        _ => raw,
    }
}

pub fn is_blank(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM<'a> {
    input: std::str::Chars<'a>,
    state: LexingState,
    buffer: String,
}

impl<'a> LexingFSM<'a> {
    fn new(line: &'a str) -> Self {
        LexingFSM {
            input: line.chars(),
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Run the machine over the whole line.
    ///
    /// Never fails: a quote left open at the end of the line simply ends the
    /// last token, which then keeps its opening quote as literal text.
    fn make_tokens(mut self) -> Vec<Token> {
        let mut out = Vec::new();

        while let Some(ch) = self.input.next() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_quoted(ch, '\''),
                LexingState::ReadingDoubleQuote => self.handle_quoted(ch, '"'),
            }
        }

        if !self.buffer.is_empty() {
            out.push(Token(self.buffer));
        }
        out
    }

    fn handle_start(&mut self, ch: char) {
        if is_blank(ch) {
            return;
        }
        self.buffer.push(ch);
        self.state = match ch {
            '\'' => LexingState::ReadingSingleQuote,
            '"' => LexingState::ReadingDoubleQuote,
            _ => LexingState::ReadingWord,
        };
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            c if is_blank(c) => {
                out.push(Token(std::mem::take(&mut self.buffer)));
                self.state = LexingState::Start;
            }
            '\'' => {
                self.buffer.push(ch);
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.buffer.push(ch);
                self.state = LexingState::ReadingDoubleQuote;
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_quoted(&mut self, ch: char, quote: char) {
        self.buffer.push(ch);
        if ch == quote {
            self.state = LexingState::ReadingWord;
        }
    }
}

/// Split a line into raw tokens on runs of spaces and tabs, honouring quotes.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    LexingFSM::new(line).make_tokens()
}
