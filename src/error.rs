use std::fmt;
use thiserror::Error;

use crate::token::Span;

/// A 0-based position in the source text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// 0-based line number
    pub line: usize,
    /// 0-based column (character offset within the line)
    pub column: usize,
    /// 0-based absolute byte offset from the start of input
    pub offset: usize,
}

impl Position {
    /// Locate a byte offset in `source`.
    pub fn at(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let consumed = &source[..offset];
        let line = consumed.matches('\n').count();
        let last_newline = consumed.rfind('\n').map(|i| i + 1).unwrap_or(0);
        Position {
            line,
            column: consumed[last_newline..].chars().count(),
            offset,
        }
    }
}

/// A non-fatal lexical diagnostic with span information (begin..end).
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    /// Start of the offending region
    pub begin: Position,
    /// End of the offending region (exclusive)
    pub end: Position,
}

impl Diagnostic {
    pub fn unrecognized_input(text: &str, begin: Position, end: Position) -> Self {
        Diagnostic {
            code: "unrecognized-input".to_string(),
            message: format!("Unrecognized input \"{}\"", text),
            begin,
            end,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.begin == self.end {
            write!(
                f,
                "{}:{}: {} ({})",
                self.begin.line, self.begin.column, self.message, self.code
            )
        } else {
            write!(
                f,
                "{}:{}-{}:{}: {} ({})",
                self.begin.line,
                self.begin.column,
                self.end.line,
                self.end.column,
                self.message,
                self.code
            )
        }
    }
}

/// Fatal lexer failures. Unrecognized characters are never fatal; they
/// become `Unknown` tokens plus a [`Diagnostic`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("list item at column {column} does not line up with the enclosing indentation")]
    MisalignedListItem { column: usize, span: Span },

    #[error("dedent to column {column} does not match any enclosing indentation")]
    InconsistentIndent { column: usize, span: Span },

    #[error("lexer made no progress at offset {offset}")]
    NoProgress { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected {found} while parsing {context}")]
    UnexpectedToken {
        found: &'static str,
        context: &'static str,
        span: Span,
    },

    #[error("unrecognized input \"{text}\"")]
    UnrecognizedInput { text: String, span: Span },

    #[error("section contains no expressions")]
    EmptySection { span: Span },

    #[error("operator {operator} has no left operand")]
    StackUnderflow { operator: &'static str, span: Span },

    #[error("expected a single expression but found {count}")]
    StackShape { count: usize, span: Span },

    #[error("function parameters must be bare identifiers")]
    InvalidParameter { span: Span },

    #[error("cannot backtrack {requested} token(s) from position {position}")]
    Backtrack { requested: usize, position: usize },

    #[error("token sequence does not end with end-of-input")]
    MissingEof,
}

impl ParseError {
    /// Source span of the offending token, when one is known.
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::UnrecognizedInput { span, .. }
            | ParseError::EmptySection { span }
            | ParseError::StackUnderflow { span, .. }
            | ParseError::StackShape { span, .. }
            | ParseError::InvalidParameter { span } => Some(*span),
            ParseError::Backtrack { .. } | ParseError::MissingEof => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unresolved identifier \"{0}\"")]
    UnresolvedIdentifier(String),

    #[error("\"{0}\" is defined in terms of itself")]
    Cycle(String),

    #[error("function \"{0}\" was called without an argument")]
    MissingArgument(String),

    #[error("\"{0}\" is not a function but was given an argument")]
    NotAFunction(String),

    #[error("cannot merge into {lhs}: left side of a vector merge must be a sequence")]
    NotASequence { lhs: &'static str },

    #[error("cannot merge {rhs} into {lhs} at \"{path}\"")]
    MergeMismatch {
        lhs: &'static str,
        rhs: &'static str,
        path: String,
    },

    #[error("field \"{field}\" not found on {target}")]
    NoSuchField { field: String, target: &'static str },

    #[error("{0} expressions cannot be evaluated")]
    Unsupported(&'static str),
}

/// Any fatal compilation failure, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
}

impl CompileError {
    /// Name of the failing stage.
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "lex",
            CompileError::Parse(_) => "parse",
            CompileError::Eval(_) => "eval",
        }
    }

    /// Source span of the failure, when the stage records one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex(
                LexError::MisalignedListItem { span, .. } | LexError::InconsistentIndent { span, .. },
            ) => Some(*span),
            CompileError::Lex(LexError::NoProgress { offset }) => Some(Span::new(*offset, *offset)),
            CompileError::Parse(err) => err.span(),
            CompileError::Eval(_) => None,
        }
    }
}

/// A failure in one document of a multi-document compilation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name}: {source}")]
pub struct DocumentError {
    pub name: String,
    #[source]
    pub source: CompileError,
}

/// Initial bindings could not be loaded from JSON.
#[derive(Debug, Error)]
pub enum BindingsError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bindings must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}
