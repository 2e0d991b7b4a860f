use crate::error::ParseError;
use crate::token::{Token, TokenKind};

/// A cursor over a token sequence. The sequence always ends with `Eof`;
/// reading past the end keeps returning that final token.
#[derive(Debug, Clone)]
pub struct TokenStream<'t> {
    tokens: &'t [Token],
    /// Lowest position `backtrack` may rewind to.
    start: usize,
    pos: usize,
}

impl<'t> TokenStream<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        TokenStream {
            tokens,
            start: 0,
            pos: 0,
        }
    }

    /// Current cursor position (index into the backing sequence).
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether the backing sequence is terminated by `Eof`. Every other
    /// method assumes it is.
    pub fn ends_with_eof(&self) -> bool {
        self.tokens.last().is_some_and(Token::is_eof)
    }

    pub fn is_at_end(&self) -> bool {
        self.peek(0).is_eof()
    }

    /// Consume and return the current token.
    pub fn next(&mut self) -> &'t Token {
        let tok = self.peek(0);
        if self.pos < self.tokens.len().saturating_sub(1) {
            self.pos += 1;
        }
        tok
    }

    /// Look at the token `offset` positions from the cursor without
    /// consuming. Negative offsets look behind; both directions are clamped
    /// to this stream's start and the final token.
    pub fn peek(&self, offset: isize) -> &'t Token {
        let last = self.tokens.len().saturating_sub(1);
        let target = self.pos as isize + offset;
        let index = target.clamp(self.start as isize, last as isize) as usize;
        &self.tokens[index]
    }

    /// Rewind the cursor by `n` tokens.
    pub fn backtrack(&mut self, n: usize) -> Result<(), ParseError> {
        if n > self.pos - self.start {
            return Err(ParseError::Backtrack {
                requested: n,
                position: self.pos,
            });
        }
        self.pos -= n;
        Ok(())
    }

    /// Consume tokens while `predicate` holds, returning them.
    pub fn consume_while(&mut self, mut predicate: impl FnMut(&TokenKind) -> bool) -> Vec<&'t Token> {
        let mut taken = Vec::new();
        while !self.is_at_end() && predicate(&self.peek(0).kind) {
            taken.push(self.next());
        }
        taken
    }

    /// Skip up to `n` tokens (stopping at `Eof`), returning them.
    pub fn consume(&mut self, n: usize) -> Vec<&'t Token> {
        let mut taken = Vec::with_capacity(n);
        for _ in 0..n {
            if self.is_at_end() {
                break;
            }
            taken.push(self.next());
        }
        taken
    }

    /// A new cursor over the same tokens starting at the current position.
    /// Advancing it leaves this stream untouched, and it cannot backtrack
    /// before the position it was created at.
    pub fn range(&self) -> TokenStream<'t> {
        TokenStream {
            tokens: self.tokens,
            start: self.pos,
            pos: self.pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn stream_tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().tokens
    }

    #[test]
    fn next_stops_at_eof() {
        let tokens = stream_tokens("a: 1");
        let mut stream = TokenStream::new(&tokens);
        assert_eq!(stream.consume(10).len(), 3);
        assert!(stream.next().is_eof());
        assert!(stream.next().is_eof());
    }

    #[test]
    fn peek_is_clamped() {
        let tokens = stream_tokens("a: 1");
        let stream = TokenStream::new(&tokens);
        assert_eq!(stream.peek(-3).kind, TokenKind::Symbol("a".to_string()));
        assert!(stream.peek(99).is_eof());
        assert_eq!(stream.peek(2).kind, TokenKind::NumberLit(1.0));
    }

    #[test]
    fn backtrack_respects_start() {
        let tokens = stream_tokens("a: 1");
        let mut stream = TokenStream::new(&tokens);
        stream.next();
        stream.next();
        assert!(stream.backtrack(1).is_ok());
        assert_eq!(stream.position(), 1);
        assert!(matches!(
            stream.backtrack(2),
            Err(ParseError::Backtrack { requested: 2, .. })
        ));
    }

    #[test]
    fn consume_while_collects_matches() {
        let tokens = stream_tokens("a := b c d\n");
        let mut stream = TokenStream::new(&tokens);
        stream.consume(2);
        let symbols = stream.consume_while(|k| matches!(k, TokenKind::Symbol(_)));
        assert_eq!(symbols.len(), 3);
        assert!(stream.is_at_end());
    }

    #[test]
    fn range_does_not_move_parent() {
        let tokens = stream_tokens("a: 1\n---\nb: 2");
        let mut stream = TokenStream::new(&tokens);
        stream.next();
        let mut scan = stream.range();
        let found = scan
            .consume_while(|k| *k != TokenKind::SectionStart)
            .len();
        assert_eq!(found, 3);
        assert_eq!(stream.position(), 1);
        assert!(scan.backtrack(found + 1).is_err());
    }
}
