use crate::error::{Diagnostic, LexError, Position};
use crate::token::{Span, Token, TokenKind};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("number pattern"));
static NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?").expect("number prefix pattern"));
static BOOLEAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(true|false)$").expect("boolean pattern"));

/// The output of [`tokenize`]: the token sequence, the newline-normalized
/// source the spans refer to, and any non-fatal diagnostics.
#[derive(Debug, Clone)]
pub struct Lexed {
    pub source: String,
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Convert source text into tokens, synthesizing `Indent`/`Outdent` from
/// an indentation stack.
///
/// Unrecognized input never aborts lexing: each run becomes an `Unknown`
/// token plus a diagnostic. Only a misaligned list item or an internal
/// failure to make progress is fatal.
pub fn tokenize(source: &str) -> Result<Lexed, LexError> {
    if source.is_empty() {
        return Ok(Lexed {
            source: String::new(),
            tokens: vec![Token::new(TokenKind::Eof, 0, 0)],
            diagnostics: Vec::new(),
        });
    }

    let mut normalized = source.replace("\r\n", "\n");
    if !normalized.ends_with('\n') {
        normalized.push('\n');
    }

    let mut lexer = Lexer {
        input: &normalized,
        pos: 0,
        tokens: Vec::new(),
        levels: vec![0],
        diagnostics: Vec::new(),
        error_start: None,
    };
    lexer.run()?;

    let Lexer {
        tokens,
        diagnostics,
        ..
    } = lexer;
    debug!(
        tokens = tokens.len(),
        diagnostics = diagnostics.len(),
        "tokenized source"
    );
    Ok(Lexed {
        source: normalized,
        tokens,
        diagnostics,
    })
}

/// Lexer state: tracks position in the input string and the indentation stack.
struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    /// Indentation levels in half-columns: `2 * column` for ordinary lines,
    /// `2 * column + 1` for the half-level a list hyphen introduces.
    levels: Vec<usize>,
    diagnostics: Vec<Diagnostic>,
    /// Start of the pending run of unrecognized input.
    error_start: Option<usize>,
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<(), LexError> {
        self.begin_line(0, false)?;

        while self.pos < self.input.len() {
            let before = self.pos;
            self.lex_one()?;
            if self.pos == before {
                return Err(LexError::NoProgress { offset: self.pos });
            }
        }

        self.flush_error();
        let end = self.input.len();
        while self.levels.len() > 1 {
            self.levels.pop();
            self.tokens.push(Token::new(TokenKind::Outdent, end, end));
        }
        self.tokens.push(Token::new(TokenKind::Eof, end, end));
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.remaining().chars().nth(offset)
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn starts_with(&self, s: &str) -> bool {
        self.remaining().starts_with(s)
    }

    /// Column of the current position within its line.
    fn column(&self) -> usize {
        let line_begin = self.input[..self.pos].rfind('\n').map_or(0, |i| i + 1);
        self.input[line_begin..self.pos].chars().count()
    }

    /// True when only whitespace precedes the current position on this line.
    fn at_line_start(&self) -> bool {
        let line_begin = self.input[..self.pos].rfind('\n').map_or(0, |i| i + 1);
        self.input[line_begin..self.pos]
            .chars()
            .all(|c| c == ' ' || c == '\t')
    }

    /// The rest of the current line, excluding the newline.
    fn rest_of_line(&self) -> &'a str {
        let rest = self.remaining();
        match rest.find('\n') {
            Some(i) => &rest[..i],
            None => rest,
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.flush_error();
        self.tokens.push(Token::new(kind, start, end));
    }

    /// Emit the pending run of unrecognized input, if any.
    fn flush_error(&mut self) {
        if let Some(start) = self.error_start.take() {
            let text = &self.input[start..self.pos.max(start)];
            let end = start + text.len();
            self.diagnostics.push(Diagnostic::unrecognized_input(
                text,
                Position::at(self.input, start),
                Position::at(self.input, end),
            ));
            self.tokens
                .push(Token::new(TokenKind::Unknown(text.to_string()), start, end));
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn lex_one(&mut self) -> Result<(), LexError> {
        let ch = match self.peek_char() {
            Some(ch) => ch,
            None => return Ok(()),
        };

        match ch {
            '\n' => {
                let start = self.pos;
                self.flush_error();
                self.advance(1);
                self.begin_line(start, true)?;
            }
            ' ' | '\t' => {
                self.flush_error();
                self.advance(1);
            }
            '#' => self.lex_comment(),
            '-' if self.is_list_hyphen() => self.lex_list_item()?,
            _ => {
                if !self.lex_fixed_symbol()
                    && !self.lex_colon()
                    && !self.lex_string()
                    && !self.lex_number()
                    && !self.lex_symbol()
                {
                    self.error_start.get_or_insert(self.pos);
                    self.advance(ch.len_utf8());
                }
            }
        }
        Ok(())
    }

    // ── Lines & indentation ─────────────────────────────────────────

    /// Called with `pos` at the beginning of a line. Skips blank and
    /// comment-only lines, then moves the indentation stack to the level
    /// of the next content line. Trailing blank lines only unwind the stack.
    fn begin_line(&mut self, newline_start: usize, emit_newline: bool) -> Result<(), LexError> {
        let (column, at_end) = loop {
            let rest = self.remaining();
            let indent_len = rest
                .find(|c: char| c != ' ' && c != '\t')
                .unwrap_or(rest.len());
            let column = rest[..indent_len].chars().count();
            match rest[indent_len..].chars().next() {
                None => {
                    self.advance(indent_len);
                    break (column, true);
                }
                Some('\n') => self.advance(indent_len + 1),
                Some('#') => {
                    let line_len = rest.find('\n').map_or(rest.len(), |i| i + 1);
                    self.advance(line_len);
                }
                Some(_) => {
                    self.advance(indent_len);
                    break (column, false);
                }
            }
        };

        let list = self.is_list_hyphen();
        let level = if at_end {
            0
        } else {
            2 * column + usize::from(list)
        };
        let span = Span::new(newline_start, self.pos);
        self.move_to_level(level, column, list, span, emit_newline && !at_end)
    }

    /// A dedent must land exactly on an open level.
    fn move_to_level(
        &mut self,
        level: usize,
        column: usize,
        list: bool,
        span: Span,
        emit_newline: bool,
    ) -> Result<(), LexError> {
        let top = self.current_level();
        if level > top {
            self.levels.push(level);
            self.push(TokenKind::Indent, span.start, span.end);
        } else if level < top {
            while self.current_level() > level {
                self.levels.pop();
                self.push(TokenKind::Outdent, span.start, span.end);
            }
            if self.current_level() < level {
                let width = self.peek_char().map_or(0, char::len_utf8);
                let span = Span::new(self.pos, self.pos + width);
                return Err(if list {
                    LexError::MisalignedListItem { column, span }
                } else {
                    LexError::InconsistentIndent { column, span }
                });
            }
        } else if emit_newline && !self.suppress_newline() {
            self.push(TokenKind::Newline { indent: column }, span.start, span.end);
        }
        Ok(())
    }

    fn current_level(&self) -> usize {
        self.levels.last().copied().unwrap_or(0)
    }

    /// Newlines directly after structure (or at the very start) carry no information.
    fn suppress_newline(&self) -> bool {
        match self.tokens.last() {
            None => true,
            Some(tok) => matches!(
                tok.kind,
                TokenKind::Newline { .. } | TokenKind::Indent | TokenKind::Outdent
            ),
        }
    }

    // ── Rules ───────────────────────────────────────────────────────

    fn lex_comment(&mut self) {
        let start = self.pos;
        let text = self.rest_of_line();
        self.push(TokenKind::Comment(text[1..].trim().to_string()), start, start + text.len());
        self.advance(text.len());
    }

    fn is_list_hyphen(&self) -> bool {
        self.peek_char() == Some('-')
            && matches!(self.peek_char_at(1), Some(' ') | Some('\t') | Some('\n'))
            && self.at_line_start()
    }

    /// `- item` is sugar for `yield item`. The newline that led here has
    /// already moved the stack to this hyphen's half-level; a block-shaped
    /// item additionally opens a full level at its content column.
    fn lex_list_item(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let hyphen_column = self.column();
        if self.current_level() != 2 * hyphen_column + 1 {
            return Err(LexError::MisalignedListItem {
                column: hyphen_column,
                span: Span::new(start, start + 1),
            });
        }

        self.push(TokenKind::Symbol("yield".to_string()), start, start + 1);
        self.advance(1);
        while matches!(self.peek_char(), Some(' ') | Some('\t')) {
            self.advance(1);
        }

        if line_has_assignment(self.rest_of_line()) {
            let content_column = self.column();
            self.levels.push(2 * content_column);
            self.push(TokenKind::Indent, start, self.pos);
        }
        Ok(())
    }

    fn lex_fixed_symbol(&mut self) -> bool {
        let start = self.pos;
        if self.starts_with("---") && self.at_line_start() {
            if matches!(self.peek_char_at(3), Some(' ') | Some('\t') | Some('\n') | None) {
                self.advance(3);
                self.push(TokenKind::SectionStart, start, self.pos);
                return true;
            }
        }

        const FIXED: &[(&str, fn() -> TokenKind)] = &[
            ("{}", || TokenKind::EmptyObject),
            ("[]", || TokenKind::EmptyList),
            ("->", || TokenKind::Fn),
            ("+?", || TokenKind::SoftMerge),
            ("(", || TokenKind::OpenParen),
            (")", || TokenKind::CloseParen),
            ("^", || TokenKind::Lift),
            ("|", || TokenKind::Pipeline),
            ("+", || TokenKind::HardMerge),
            ("?", || TokenKind::PatternMatch),
        ];
        for (text, kind) in FIXED {
            if self.starts_with(text) {
                self.advance(text.len());
                self.push(kind(), start, self.pos);
                return true;
            }
        }
        false
    }

    /// Assignment forms and the field accessor.
    fn lex_colon(&mut self) -> bool {
        if self.peek_char() != Some(':') {
            return false;
        }
        let start = self.pos;

        match self.peek_char_at(1) {
            Some('=') => {
                self.advance(2);
                self.push(TokenKind::Assignment { literal: false }, start, self.pos);
                true
            }
            Some('\n') | None => {
                self.advance(1);
                self.push(TokenKind::Assignment { literal: false }, start, self.pos);
                true
            }
            Some(' ') | Some('\t') => {
                self.advance(1);
                let tail = self.rest_of_line().trim_start();
                let literal = !(tail.is_empty() || tail.starts_with('#'));
                self.push(TokenKind::Assignment { literal }, start, self.pos);
                if literal {
                    self.lex_literal_value();
                }
                true
            }
            Some(ch) if is_symbol_start(ch) && self.follows_symbol() => {
                self.advance(1);
                self.push(TokenKind::Accessor, start, self.pos);
                true
            }
            _ => false,
        }
    }

    /// Whether the previous token is a symbol ending exactly here.
    fn follows_symbol(&self) -> bool {
        self.tokens
            .last()
            .is_some_and(|t| matches!(t.kind, TokenKind::Symbol(_)) && t.span.end == self.pos)
    }

    /// The raw YAML-style scalar after a literal assignment.
    fn lex_literal_value(&mut self) {
        while matches!(self.peek_char(), Some(' ') | Some('\t')) {
            self.advance(1);
        }
        if self.lex_string() {
            return;
        }

        let start = self.pos;
        let line = self.rest_of_line();
        let raw = match line.find('#') {
            Some(i) => &line[..i],
            None => line,
        };
        let text = raw.trim_end();
        let end = start + text.len();
        self.advance(text.len());

        let kind = if text == "{}" {
            TokenKind::EmptyObject
        } else if text == "[]" {
            TokenKind::EmptyList
        } else {
            classify_scalar(text)
        };
        self.push(kind, start, end);
    }

    /// Quoted strings. An unterminated quote is left to the error run.
    fn lex_string(&mut self) -> bool {
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return false,
        };
        let start = self.pos;
        let line = self.rest_of_line();
        let mut value = String::new();
        let mut chars = line.char_indices().skip(1).peekable();

        while let Some((i, ch)) = chars.next() {
            if ch == quote {
                if quote == '\'' && chars.peek().map(|&(_, c)| c) == Some('\'') {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                self.advance(i + 1);
                self.push(TokenKind::StringLit(value), start, self.pos);
                return true;
            }
            if ch == '\\' && quote == '"' {
                match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, c)) => value.push(c),
                    None => break,
                }
                continue;
            }
            value.push(ch);
        }

        // Unterminated: the rest of the line is unrecognized input.
        self.error_start.get_or_insert(start);
        self.advance(line.len());
        true
    }

    fn lex_number(&mut self) -> bool {
        let rest = self.remaining();
        let m = match NUMBER_PREFIX.find(rest) {
            Some(m) => m,
            None => return false,
        };
        if rest[m.end()..].chars().next().is_some_and(is_symbol_char) {
            return false;
        }
        let start = self.pos;
        let value = match m.as_str().parse::<f64>() {
            Ok(v) => v,
            Err(_) => return false,
        };
        self.advance(m.end());
        self.push(TokenKind::NumberLit(value), start, self.pos);
        true
    }

    fn lex_symbol(&mut self) -> bool {
        match self.peek_char() {
            Some(ch) if is_symbol_start(ch) => {}
            _ => return false,
        }
        let start = self.pos;
        let rest = self.remaining();
        let mut len = 0;
        for (i, ch) in rest.char_indices() {
            if !is_symbol_char(ch) || rest[i..].starts_with("->") {
                break;
            }
            len = i + ch.len_utf8();
        }
        let text = &rest[..len];
        self.advance(len);

        let kind = if BOOLEAN.is_match(text) {
            TokenKind::BoolLit(text.eq_ignore_ascii_case("true"))
        } else {
            TokenKind::Symbol(text.to_string())
        };
        self.push(kind, start, self.pos);
        true
    }
}

/// Classify an unquoted literal: number, boolean, or string.
pub fn classify_scalar(text: &str) -> TokenKind {
    if NUMBER.is_match(text) {
        if let Ok(n) = text.parse::<f64>() {
            return TokenKind::NumberLit(n);
        }
    }
    if BOOLEAN.is_match(text) {
        return TokenKind::BoolLit(text.eq_ignore_ascii_case("true"));
    }
    TokenKind::StringLit(text.to_string())
}

fn is_symbol_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_symbol_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '-' | '.' | '/')
}

/// Whether a line (after a list hyphen) holds a `key: value`, `key:=` or
/// `key:` assignment outside of quotes.
fn line_has_assignment(line: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '#' => return false,
                ':' => {
                    if matches!(chars.peek(), None | Some(' ') | Some('\t') | Some('=')) {
                        return true;
                    }
                }
                _ => {}
            },
        }
    }
    false
}
