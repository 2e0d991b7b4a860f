use crate::ast::*;
use crate::error::ParseError;
use crate::stream::TokenStream;
use crate::token::{Token, TokenKind};
use crate::tree::Value;
use std::rc::Rc;
use tracing::{debug, trace};

/// What closes the block being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockEnd {
    Outdent,
    Eof,
}

/// Parser state: the token cursor and every scope created so far.
struct Parser<'t> {
    stream: TokenStream<'t>,
    scopes: ScopeArena,
}

/// Parse a token stream into a document rooted at a top-level `Scope`
/// wrapping the outermost `Block`. The stream must end with `Eof`.
pub fn parse(stream: TokenStream<'_>) -> Result<Document, ParseError> {
    if !stream.ends_with_eof() {
        return Err(ParseError::MissingEof);
    }
    let mut parser = Parser {
        stream,
        scopes: ScopeArena::new(),
    };
    let root = parser.scopes.push(None);
    let block = parser.parse_block(root, BlockEnd::Eof)?;
    debug!(
        sections = block.sections.len(),
        scopes = parser.scopes.len(),
        "parsed document"
    );

    Ok(Document {
        root: Expression::Scope {
            scope: root,
            operand: Box::new(Expression::Block(block)),
        },
        scopes: parser.scopes,
    })
}

/// Parse a complete token sequence (as produced by the lexer).
pub fn parse_tokens(tokens: &[Token]) -> Result<Document, ParseError> {
    parse(TokenStream::new(tokens))
}

fn unexpected(tok: &Token, context: &'static str) -> ParseError {
    match &tok.kind {
        TokenKind::Unknown(text) => ParseError::UnrecognizedInput {
            text: text.clone(),
            span: tok.span,
        },
        kind => ParseError::UnexpectedToken {
            found: kind.name(),
            context,
            span: tok.span,
        },
    }
}

impl<'t> Parser<'t> {
    // ── Blocks & sections ───────────────────────────────────────────

    fn parse_block(&mut self, parent: ScopeId, end: BlockEnd) -> Result<Block, ParseError> {
        let markers = self.count_section_markers();
        let mut sections: Vec<Section> = Vec::with_capacity(markers + 1);
        let mut current = Section::new(self.scopes.push(Some(parent)));
        // A `---` before any content opens the document rather than an empty section.
        let mut leading_marker = true;

        loop {
            let tok = self.stream.next();
            match &tok.kind {
                TokenKind::Outdent if end == BlockEnd::Outdent => break,
                TokenKind::Eof if end == BlockEnd::Eof => break,
                TokenKind::Newline { .. } | TokenKind::Comment(_) => continue,
                TokenKind::SectionStart => {
                    if current.is_empty() {
                        if sections.is_empty() && leading_marker {
                            leading_marker = false;
                            continue;
                        }
                        return Err(ParseError::EmptySection { span: tok.span });
                    }
                    // Later sections see the first section's bindings.
                    let front_matter = sections.first().map_or(current.scope, |s| s.scope);
                    let next = Section::new(self.scopes.push(Some(front_matter)));
                    sections.push(std::mem::replace(&mut current, next));
                }
                TokenKind::Indent => {
                    let nested = self.parse_block(current.scope, BlockEnd::Outdent)?;
                    current.expressions.push(Expression::Block(nested));
                }
                TokenKind::Symbol(name) => {
                    let expr = self.parse_statement(name, current.scope)?;
                    current.expressions.push(expr);
                }
                kind if kind.starts_term() => {
                    self.stream.backtrack(1)?;
                    let expr = self.expression_chain(current.scope)?;
                    current.expressions.push(expr);
                }
                _ => return Err(unexpected(tok, "block")),
            }
            leading_marker = false;
        }

        if current.is_empty() {
            if !sections.is_empty() {
                return Err(ParseError::EmptySection {
                    span: self.stream.peek(-1).span,
                });
            }
        } else {
            sections.push(current);
        }

        trace!(sections = sections.len(), "parsed block");
        Ok(Block { sections })
    }

    /// Count `---` markers at this block's depth without moving the cursor.
    fn count_section_markers(&self) -> usize {
        let mut scan = self.stream.range();
        let mut depth = 0usize;
        let mut markers = 0;
        loop {
            match scan.next().kind {
                TokenKind::Eof => return markers,
                TokenKind::Indent => depth += 1,
                TokenKind::Outdent => {
                    if depth == 0 {
                        return markers;
                    }
                    depth -= 1;
                }
                TokenKind::SectionStart if depth == 0 => markers += 1,
                _ => {}
            }
        }
    }

    /// A statement starting with `name` (already consumed).
    fn parse_statement(&mut self, name: &str, scope: ScopeId) -> Result<Expression, ParseError> {
        let next = self.stream.peek(0);

        if name == "yield" && next.kind.starts_term() {
            let operand = self.expression_chain(scope)?;
            return Ok(Expression::Yield(Box::new(operand)));
        }

        if let TokenKind::Assignment { .. } = next.kind {
            self.stream.next();
            let operand = self.expression_chain(scope)?;
            self.scopes
                .bind(scope, name, Binding::Expression(operand.clone()));
            return Ok(Expression::Assignment {
                key: name.to_string(),
                operand: Box::new(operand),
            });
        }

        self.stream.backtrack(1)?;
        self.expression_chain(scope)
    }

    // ── Expression chains ───────────────────────────────────────────

    /// Parse one right-hand-side expression. Stops, without consuming, at
    /// a token that cannot continue an expression. An empty chain is `Unit`.
    fn expression_chain(&mut self, scope: ScopeId) -> Result<Expression, ParseError> {
        let mut stack: Vec<Expression> = Vec::new();

        loop {
            let tok = self.stream.peek(0);
            match &tok.kind {
                TokenKind::Newline { .. }
                | TokenKind::Outdent
                | TokenKind::Eof
                | TokenKind::Comment(_)
                | TokenKind::SectionStart
                | TokenKind::CloseParen => break,
                TokenKind::HardMerge
                | TokenKind::SoftMerge
                | TokenKind::Pipeline
                | TokenKind::PatternMatch => {
                    let operator = self.stream.next();
                    let lhs = stack.pop().ok_or(ParseError::StackUnderflow {
                        operator: operator.kind.name(),
                        span: operator.span,
                    })?;
                    let rhs = self.term(scope)?;
                    stack.push(combine(&operator.kind, lhs, rhs));
                }
                TokenKind::Fn => {
                    let arrow = self.stream.next();
                    let mut parameters = Vec::new();
                    for head in stack.drain(..) {
                        collect_parameters(head, &mut parameters, arrow)?;
                    }
                    if parameters.is_empty() {
                        return Err(ParseError::InvalidParameter { span: arrow.span });
                    }
                    let function = self.function_definition(scope, parameters)?;
                    stack.push(function);
                }
                kind if kind.starts_term() => {
                    if !stack.is_empty() {
                        return Err(ParseError::StackShape {
                            count: stack.len() + 1,
                            span: tok.span,
                        });
                    }
                    let term = self.term(scope)?;
                    stack.push(term);
                }
                _ => return Err(unexpected(tok, "expression")),
            }

            // A nested block ends the chain; what follows belongs to the enclosing block.
            if matches!(self.stream.peek(-1).kind, TokenKind::Outdent) {
                break;
            }
        }

        match stack.len() {
            0 => Ok(Expression::Unit),
            1 => Ok(stack.pop().unwrap_or(Expression::Unit)),
            count => Err(ParseError::StackShape {
                count,
                span: self.stream.peek(0).span,
            }),
        }
    }

    /// A single operand: literal, group, lift, nested block, or application.
    fn term(&mut self, scope: ScopeId) -> Result<Expression, ParseError> {
        let tok = self.stream.next();
        match &tok.kind {
            TokenKind::StringLit(s) => Ok(Expression::Scalar(Value::String(s.clone()))),
            TokenKind::NumberLit(n) => Ok(Expression::Scalar(Value::Number(*n))),
            TokenKind::BoolLit(b) => Ok(Expression::Scalar(Value::Boolean(*b))),
            TokenKind::EmptyObject => Ok(Expression::Scalar(Value::empty_struct())),
            TokenKind::EmptyList => Ok(Expression::Vector(Vec::new())),
            TokenKind::Lift => {
                let operand = self.term(scope)?;
                Ok(Expression::Lift(Box::new(operand)))
            }
            TokenKind::OpenParen => {
                let inner = self.expression_chain(scope)?;
                let close = self.stream.next();
                if close.kind != TokenKind::CloseParen {
                    return Err(unexpected(close, "parenthesized expression"));
                }
                Ok(inner)
            }
            TokenKind::Indent => {
                let block = self.parse_block(scope, BlockEnd::Outdent)?;
                Ok(Expression::Block(block))
            }
            TokenKind::Symbol(name) => self.application(name, scope),
            _ => Err(unexpected(tok, "expression")),
        }
    }

    /// A symbol (already consumed) followed by either an accessor path or
    /// its operands. Every following term is an operand until something
    /// that cannot start one. Functions visible in the enclosing scopes
    /// are resolved here; anything else is left for evaluation.
    fn application(&mut self, name: &str, scope: ScopeId) -> Result<Expression, ParseError> {
        if self.stream.peek(0).kind == TokenKind::Accessor {
            return self.access_path(name);
        }

        let mut operands = Vec::new();
        while self.takes_operand() {
            operands.push(self.operand(scope)?);
        }
        Ok(self.reference(name, operands, scope))
    }

    /// Whether the next token continues the current operand list. A nested
    /// block or the key of a following assignment does not.
    fn takes_operand(&self) -> bool {
        let next = self.stream.peek(0);
        next.kind.starts_term()
            && next.kind != TokenKind::Indent
            && !(matches!(next.kind, TokenKind::Symbol(_))
                && matches!(self.stream.peek(1).kind, TokenKind::Assignment { .. }))
    }

    /// One operand of an application. A symbol here is a plain reference
    /// (with an optional accessor path); it does not take operands itself.
    fn operand(&mut self, scope: ScopeId) -> Result<Expression, ParseError> {
        let tok = self.stream.peek(0);
        match &tok.kind {
            TokenKind::Symbol(name) => {
                self.stream.next();
                if self.stream.peek(0).kind == TokenKind::Accessor {
                    self.access_path(name)
                } else {
                    Ok(self.reference(name, Vec::new(), scope))
                }
            }
            TokenKind::Lift => {
                self.stream.next();
                let operand = self.operand(scope)?;
                Ok(Expression::Lift(Box::new(operand)))
            }
            _ => self.term(scope),
        }
    }

    /// `name:field:field`, with the cursor on the first accessor.
    fn access_path(&mut self, name: &str) -> Result<Expression, ParseError> {
        let mut expr = Expression::reference(name);
        while self.stream.peek(0).kind == TokenKind::Accessor {
            self.stream.next();
            let field_tok = self.stream.next();
            match &field_tok.kind {
                TokenKind::Symbol(field) => {
                    expr = Expression::Access {
                        target: Box::new(expr),
                        field: field.clone(),
                    };
                }
                _ => return Err(unexpected(field_tok, "field access")),
            }
        }
        Ok(expr)
    }

    fn reference(&self, name: &str, operands: Vec<Expression>, scope: ScopeId) -> Expression {
        let function = match self.scopes.lookup(scope, name) {
            Some(Binding::Expression(Expression::Function(def))) => Some(Rc::clone(def)),
            _ => None,
        };
        Expression::Application {
            identifier: name.to_string(),
            operands,
            function,
        }
    }

    /// `params -> body`. Parameters shadow outer names inside the body.
    fn function_definition(
        &mut self,
        scope: ScopeId,
        parameters: Vec<String>,
    ) -> Result<Expression, ParseError> {
        let body_scope = self.scopes.push(Some(scope));
        for parameter in &parameters {
            self.scopes
                .bind(body_scope, parameter.as_str(), Binding::Parameter);
        }
        let body = self.expression_chain(body_scope)?;
        let body = Expression::Scope {
            scope: body_scope,
            operand: Box::new(body),
        };

        Ok(parameters.into_iter().rev().fold(body, |body, parameter| {
            Expression::Function(Rc::new(FunctionDefinition { parameter, body }))
        }))
    }
}

fn combine(operator: &TokenKind, lhs: Expression, rhs: Expression) -> Expression {
    let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
    match operator {
        TokenKind::SoftMerge => Expression::Merge {
            lhs,
            rhs,
            mode: MergeMode::Soft,
        },
        TokenKind::Pipeline => Expression::Pipeline { lhs, rhs },
        TokenKind::PatternMatch => Expression::PatternMatch {
            subject: lhs,
            pattern: rhs,
        },
        _ => Expression::Merge {
            lhs,
            rhs,
            mode: MergeMode::Hard,
        },
    }
}

/// Reinterpret application heads before `->` as parameter names:
/// `x y ->` parses as `x` applied to `y`, giving parameters `[x, y]`.
fn collect_parameters(
    head: Expression,
    parameters: &mut Vec<String>,
    arrow: &Token,
) -> Result<(), ParseError> {
    match head {
        Expression::Application {
            identifier,
            operands,
            ..
        } => {
            parameters.push(identifier);
            for operand in operands {
                match operand {
                    Expression::Application {
                        identifier,
                        operands,
                        ..
                    } if operands.is_empty() => parameters.push(identifier),
                    _ => return Err(ParseError::InvalidParameter { span: arrow.span }),
                }
            }
            Ok(())
        }
        _ => Err(ParseError::InvalidParameter { span: arrow.span }),
    }
}
