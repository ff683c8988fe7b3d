//! A cursor over a flat token vector supporting unbounded peek-ahead,
//! bookmarking, and lazy token replacement (`equ` bodies and macro
//! parameter bindings).
//!
//! Replacement is modeled as a `Vec<Token>` plus a splice at the cursor
//! rather than a linked list: each token carries a `checked` flag so a given
//! occurrence is substituted at most once.

use std::collections::HashMap;

use crate::token::{Token, TokenKind};

/// One token stream: either a file's full token vector, or the tokens
/// produced for a macro call's body (with its parameter replacements
/// registered locally).
pub struct TokenStream {
    tokens: Vec<Token>,
    cursor: usize,
    /// Macro-parameter-name -> bound token sequence, local to this stream.
    local_replacements: HashMap<String, Vec<Token>>,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        TokenStream { tokens, cursor: 0, local_replacements: HashMap::new() }
    }

    pub fn bind_local(&mut self, name: impl Into<String>, replacement: Vec<Token>) {
        self.local_replacements.insert(name.into(), replacement);
    }

    pub fn bookmark(&self) -> usize {
        self.cursor
    }

    pub fn restore(&mut self, mark: usize) {
        self.cursor = mark.min(self.tokens.len().saturating_sub(1));
    }

    /// Resolves any pending replacement at the cursor against the local
    /// (macro-parameter) table and the given global (`equ`) table, looping
    /// to follow replacement chains, then returns the resulting token.
    pub fn resolve(&mut self, global_equs: &HashMap<String, Vec<Token>>) -> &Token {
        // Transitive equ/macro-param chains are legal, but an accidental
        // cycle (only direct self-reference is rejected at definition time)
        // must not hang the assembler -- bail out of further substitution
        // past this depth and let the parser see whatever token chain
        // resulted.
        const MAX_CHAIN: u32 = 256;
        let mut steps = 0;
        loop {
            if self.cursor >= self.tokens.len() || steps >= MAX_CHAIN {
                break;
            }
            steps += 1;
            let tok = &self.tokens[self.cursor];
            if tok.checked {
                break;
            }
            let name = match tok.identifier_text() {
                Some(n) => n.to_string(),
                None => {
                    self.tokens[self.cursor].checked = true;
                    break;
                }
            };
            // Macro parameters keep the caller's exact spelling; `equ`
            // names are looked up case-insensitively, matching how
            // `SymbolTable` keys every other identifier.
            let replacement = self
                .local_replacements
                .get(&name)
                .or_else(|| global_equs.get(&name.to_ascii_lowercase()))
                .cloned();
            match replacement {
                Some(repl) => {
                    self.tokens[self.cursor].checked = true;
                    let repl_len = repl.len();
                    self.tokens.splice(self.cursor..self.cursor + 1, repl);
                    if repl_len == 0 {
                        // Nothing took this token's place; stay put so the
                        // next loop iteration reads whatever followed it.
                        continue;
                    }
                }
                None => {
                    self.tokens[self.cursor].checked = true;
                    break;
                }
            }
        }
        self.tokens.get(self.cursor).unwrap_or_else(|| self.tokens.last().expect("token stream is never empty"))
    }

    pub fn peek_raw(&self, lookahead: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + lookahead)
    }

    /// Advances the cursor by `count` positions without calling `resolve` on
    /// any of them. For callers that already scanned ahead with `peek_raw`
    /// and need to commit past what they saw (macro body capture, which must
    /// preserve the unexpanded token span verbatim).
    pub fn skip_raw(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.tokens.len().saturating_sub(1));
    }

    pub fn eat(&mut self, global_equs: &HashMap<String, Vec<Token>>) -> Token {
        let tok = self.resolve(global_equs).clone();
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
        tok
    }

    pub fn at_eof(&self) -> bool {
        self.tokens
            .get(self.cursor)
            .map(|t| matches!(t.kind, TokenKind::Eof))
            .unwrap_or(true)
    }

    /// Consumes tokens up to and including the next [`TokenKind::Separator`]
    /// or EOF, used by error recovery.
    pub fn skip_to_separator(&mut self, global_equs: &HashMap<String, Vec<Token>>) {
        loop {
            let tok = self.resolve(global_equs).clone();
            if matches!(tok.kind, TokenKind::Separator | TokenKind::Eof) {
                if matches!(tok.kind, TokenKind::Separator) {
                    self.cursor += 1;
                }
                break;
            }
            self.cursor += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::tokenize(src).unwrap()
    }

    #[test]
    fn equ_replacement_splices_in_place() {
        let mut equs = HashMap::new();
        equs.insert("foo".to_string(), toks("1 + 2"));
        let base = toks("FOO ; done");
        let mut stream = TokenStream::new(base);
        let t1 = stream.eat(&equs);
        assert!(matches!(t1.kind, TokenKind::Integer(1)));
        let t2 = stream.eat(&equs);
        assert!(matches!(t2.kind, TokenKind::Punct(crate::token::Punct::Plus)));
    }

    #[test]
    fn local_binding_shadows_global_equ() {
        let mut equs = HashMap::new();
        equs.insert("X".to_string(), toks("99"));
        let base = toks("X");
        let mut stream = TokenStream::new(base);
        stream.bind_local("X", toks("7"));
        let t = stream.eat(&equs);
        assert!(matches!(t.kind, TokenKind::Integer(7)));
    }

    #[test]
    fn self_referential_binding_does_not_hang() {
        let equs = HashMap::new();
        let base = toks("A");
        let mut stream = TokenStream::new(base);
        stream.bind_local("A", toks("A"));
        let t = stream.eat(&equs);
        assert!(matches!(t.kind, TokenKind::Identifier(ref s) if s == "A"));
    }
}
