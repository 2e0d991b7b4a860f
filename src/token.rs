/// Byte-offset span in the (newline-normalized) source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `:` followed by whitespace (`literal: true`) or `:=` / `:` at end of line (`literal: false`).
    Assignment { literal: bool },
    /// Column of the first non-whitespace character of the next line.
    Newline { indent: usize },
    Indent,
    Outdent,
    Symbol(String),
    /// `---`
    SectionStart,
    /// `{}`
    EmptyObject,
    /// `[]`
    EmptyList,
    OpenParen,
    CloseParen,
    Comment(String),
    /// `^`
    Lift,
    /// `|`
    Pipeline,
    /// `+`
    HardMerge,
    /// `+?`
    SoftMerge,
    /// `?`
    PatternMatch,
    /// `:` between two symbols
    Accessor,
    /// `->`
    Fn,
    StringLit(String),
    NumberLit(f64),
    BoolLit(bool),
    /// A run of input no lexing rule accepted.
    Unknown(String),
    Eof,
}

impl TokenKind {
    /// Short kind name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Assignment { literal: true } => "literal assignment",
            TokenKind::Assignment { literal: false } => "assignment",
            TokenKind::Newline { .. } => "newline",
            TokenKind::Indent => "indent",
            TokenKind::Outdent => "outdent",
            TokenKind::Symbol(_) => "symbol",
            TokenKind::SectionStart => "section start",
            TokenKind::EmptyObject => "empty object",
            TokenKind::EmptyList => "empty list",
            TokenKind::OpenParen => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::Comment(_) => "comment",
            TokenKind::Lift => "lift",
            TokenKind::Pipeline => "pipeline",
            TokenKind::HardMerge => "hard merge",
            TokenKind::SoftMerge => "soft merge",
            TokenKind::PatternMatch => "pattern match",
            TokenKind::Accessor => "accessor",
            TokenKind::Fn => "function arrow",
            TokenKind::StringLit(_) => "string literal",
            TokenKind::NumberLit(_) => "number literal",
            TokenKind::BoolLit(_) => "boolean literal",
            TokenKind::Unknown(_) => "unrecognized input",
            TokenKind::Eof => "end of input",
        }
    }

    /// Whether this token can begin an expression chain term.
    pub fn starts_term(&self) -> bool {
        matches!(
            self,
            TokenKind::Symbol(_)
                | TokenKind::StringLit(_)
                | TokenKind::NumberLit(_)
                | TokenKind::BoolLit(_)
                | TokenKind::EmptyObject
                | TokenKind::EmptyList
                | TokenKind::OpenParen
                | TokenKind::Lift
                | TokenKind::Indent
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize, end: usize) -> Self {
        Token {
            kind,
            span: Span::new(start, end),
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
