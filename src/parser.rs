//! Turns a raw input line into a chain of [`Stage`]s.
//!
//! The grammar is small: words, `<`/`>`/`>>` redirections,
//! `|` to link the next stage, and the trailing `&` and `?` markers. Parsing
//! never fails; malformed input degrades to a best-effort classification.

use crate::command::{RedirectKind, Stage};
use crate::lexer::{self, Token, is_blank, strip_quotes};

const PIPE: &str = "|";
const BACKGROUND: &str = "&";
const AUTO_COMPLETE: char = '?';

/// Markers that may close a line, in the order they are checked.
#[derive(Debug, Default, Clone, Copy)]
struct TrailingMarkers {
    background: bool,
    auto_complete: bool,
}

impl TrailingMarkers {
    /// Strip trailing `?` and `&` from the trimmed line.
    ///
    /// Each marker is taken at most once, so both `cmd &?` and `cmd ?&` set
    /// both flags, while `cmd ??` keeps one `?` for the tokenizer.
    fn strip(mut line: &str) -> (Self, &str) {
        let mut markers = TrailingMarkers::default();
        loop {
            if !markers.auto_complete && line.ends_with(AUTO_COMPLETE) {
                markers.auto_complete = true;
                line = line[..line.len() - 1].trim_end_matches(is_blank);
            } else if !markers.background && line.ends_with(BACKGROUND) {
                markers.background = true;
                line = line[..line.len() - 1].trim_end_matches(is_blank);
            } else {
                return (markers, line);
            }
        }
    }
}

struct StageBuilder {
    tokens: Vec<Token>,
    pos: usize,
    background: bool,
}

impl StageBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        StageBuilder {
            tokens,
            pos: 0,
            background: false,
        }
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Parse one stage; on `|` the rest of the line becomes its `next` chain.
    fn parse_chain(&mut self) -> Stage {
        let mut stage = Stage::default();
        let mut has_name = false;

        while let Some(token) = self.consume() {
            let raw = token.as_str();
            if raw == PIPE {
                stage.next = Some(Box::new(self.parse_chain()));
                break;
            }
            if !has_name {
                stage.executable_name = token.text().to_string();
                has_name = true;
                continue;
            }
            if raw == BACKGROUND {
                self.background = true;
            } else if let Some((kind, path)) = Self::split_redirect(raw) {
                let path = if path.is_empty() {
                    self.redirect_target()
                } else {
                    strip_quotes(path).to_string()
                };
                stage.redirects.set(kind, path);
            } else {
                stage.arguments.push(token.text().to_string());
            }
        }

        stage
    }

    /// Recognize `<path`, `>>path` and `>path`, returning the path part.
    fn split_redirect(raw: &str) -> Option<(RedirectKind, &str)> {
        if let Some(path) = raw.strip_prefix('<') {
            Some((RedirectKind::Stdin, path))
        } else if let Some(path) = raw.strip_prefix(">>") {
            Some((RedirectKind::StdoutAppend, path))
        } else {
            raw.strip_prefix('>').map(|path| (RedirectKind::Stdout, path))
        }
    }

    /// Target of a detached operator (`> out.txt`): the following word, or
    /// an empty path when an operator follows or the stage ends.
    fn redirect_target(&mut self) -> String {
        let is_path = |raw: &str| {
            raw != PIPE && raw != BACKGROUND && Self::split_redirect(raw).is_none()
        };
        match self.peek() {
            Some(next) if is_path(next.as_str()) => {
                let path = next.text().to_string();
                self.pos += 1;
                path
            }
            _ => String::new(),
        }
    }
}

/// Parse a raw line into a stage chain.
///
/// A blank line yields a single stage with an empty executable name.
pub fn parse(line: &str) -> Stage {
    let trimmed = line.trim_matches(is_blank);
    let (markers, body) = TrailingMarkers::strip(trimmed);

    let mut builder = StageBuilder::from(lexer::split_into_tokens(body));
    let mut head = builder.parse_chain();

    let last = head.last_mut();
    last.background = markers.background || builder.background;
    last.auto_complete_requested = markers.auto_complete;
    head
}
