//! Line-driven tokenizer with block-comment, line-continuation and `equ`
//! raw-value handling.

use crate::error::{Error, Result};
use crate::token::{Punct, Token, TokenKind};

/// Tokenizes one already-decoded source file into a flat token vector.
///
/// The whole file is lexed eagerly (not streamed): `equ`/macro replacement
/// operates on this vector via [`crate::token_stream::TokenStream`], not on
/// the lexer itself.
pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer { chars: source.chars().collect(), pos: 0, line: 1, column: 1, source }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Eats spaces/tabs, `;`/`//` line comments, and `/* */` block comments
    /// (which may span lines). Returns `Ok(true)` if a statement separator
    /// should be emitted (a newline was crossed without a trailing `\`
    /// continuation), `Ok(false)` otherwise.
    fn skip_trivia(&mut self) -> Result<bool> {
        let mut crossed_newline = false;
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    crossed_newline = true;
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(c) = self.peek() {
                        if c == '*' && self.peek_at(1) == Some('/') {
                            self.advance();
                            self.advance();
                            closed = true;
                            break;
                        }
                        self.advance();
                    }
                    if !closed {
                        return Err(Error::UnterminatedBlockComment);
                    }
                }
                Some('\\') => {
                    // Line continuation only if nothing but whitespace
                    // follows on this line.
                    let mut lookahead = 1;
                    let mut only_whitespace = true;
                    while let Some(c) = self.peek_at(lookahead) {
                        if c == '\n' {
                            break;
                        }
                        if c != ' ' && c != '\t' && c != '\r' {
                            only_whitespace = false;
                            break;
                        }
                        lookahead += 1;
                    }
                    if only_whitespace {
                        self.advance(); // '\'
                        while self.peek().is_some() && self.peek() != Some('\n') {
                            self.advance();
                        }
                        if self.peek() == Some('\n') {
                            self.advance();
                        }
                        // Continuation: no separator for this newline.
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        Ok(crossed_newline)
    }

    fn make_token(&self, kind: TokenKind, start_line: u32, start_col: usize, start_idx: usize) -> Token {
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        Token::new(kind, start_line, start_col as u32, text)
    }

    fn is_ident_start(c: char) -> bool {
        c.is_alphabetic() || c == '_' || c == '.' || c == '@'
    }

    fn is_ident_continue(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '.'
    }

    fn lex_number_or_ident(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.column as usize;
        let start_idx = self.pos;

        if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            while self.peek().map(Self::is_ident_continue).unwrap_or(false) {
                self.advance();
            }
            return self.finish_number(start_line, start_col, start_idx);
        }

        // Identifier: @, @@, or letter/_/. start.
        if self.peek() == Some('@') {
            self.advance();
            if self.peek() == Some('@') {
                self.advance();
            }
        } else {
            self.advance();
        }
        while self.peek().map(Self::is_ident_continue).unwrap_or(false) {
            self.advance();
        }
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        if text.eq_ignore_ascii_case("equ") {
            Token::new(TokenKind::Equ, start_line, start_col as u32, text)
        } else {
            Token::new(TokenKind::Identifier(text.clone()), start_line, start_col as u32, text)
        }
    }

    fn finish_number(&mut self, start_line: u32, start_col: usize, start_idx: usize) -> Token {
        let raw: String = self.chars[start_idx..self.pos].iter().collect();

        let parsed = Self::convert_number(&raw);
        match parsed {
            Some(NumberLiteral::Int(v)) => Token::new(TokenKind::Integer(v), start_line, start_col as u32, raw),
            Some(NumberLiteral::Float(v)) => Token::new(TokenKind::Float(v), start_line, start_col as u32, raw),
            None => Token::new(TokenKind::NumberString(raw.clone()), start_line, start_col as u32, raw),
        }
    }

    fn convert_number(body: &str) -> Option<NumberLiteral> {
        let lower = body.to_ascii_lowercase();
        if let Some(hex) = lower.strip_prefix("0x") {
            return i64::from_str_radix(hex, 16).ok().map(NumberLiteral::Int);
        }
        if let Some(oct) = lower.strip_prefix("0o") {
            return i64::from_str_radix(oct, 8).ok().map(NumberLiteral::Int);
        }
        if let Some(bin) = lower.strip_prefix("0b") {
            return i64::from_str_radix(bin, 2).ok().map(NumberLiteral::Int);
        }
        if let Some(hex) = lower.strip_suffix('h') {
            if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return i64::from_str_radix(hex, 16).ok().map(NumberLiteral::Int);
            }
            return None;
        }
        if let Some(bin) = lower.strip_suffix('b') {
            if !bin.is_empty() && bin.chars().all(|c| c == '0' || c == '1') {
                return i64::from_str_radix(bin, 2).ok().map(NumberLiteral::Int);
            }
            return None;
        }
        if let Some(oct) = lower.strip_suffix('o') {
            if !oct.is_empty() && oct.chars().all(|c| ('0'..='7').contains(&c)) {
                return i64::from_str_radix(oct, 8).ok().map(NumberLiteral::Int);
            }
            return None;
        }
        if lower.contains('.') {
            return lower.parse::<f64>().ok().map(NumberLiteral::Float);
        }
        lower.parse::<i64>().ok().map(NumberLiteral::Int)
    }

    fn lex_string(&mut self) -> Result<Token> {
        let start_line = self.line;
        let start_col = self.column as usize;
        let start_idx = self.pos;
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(Error::UnterminatedString),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => return Err(Error::UnterminatedString),
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        Ok(Token::new(TokenKind::Str(value), start_line, start_col as u32, text))
    }

    fn lex_char_literal(&mut self) -> Result<Token> {
        let start_line = self.line;
        let start_col = self.column as usize;
        let start_idx = self.pos;
        self.advance(); // opening quote
        let value = match self.advance() {
            Some('\\') => match self.advance() {
                Some('n') => '\n',
                Some('t') => '\t',
                Some('\\') => '\\',
                Some('\'') => '\'',
                Some(c) => c,
                None => return Err(Error::UnterminatedString),
            },
            Some(c) => c,
            None => return Err(Error::UnterminatedString),
        };
        if self.peek() != Some('\'') {
            return Err(Error::UnterminatedString);
        }
        self.advance();
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        Ok(Token::new(TokenKind::Integer(value as i64), start_line, start_col as u32, text))
    }

    fn lex_equ_value(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.column as usize;
        let start_idx = self.pos;
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if c == ';' || (c == '/' && self.peek_at(1) == Some('/')) {
                break;
            }
            self.advance();
        }
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        let trimmed = text.trim().to_string();
        Token::new(TokenKind::EquValue(trimmed), start_line, start_col as u32, text)
    }

    fn punct(&mut self) -> Option<Punct> {
        let pairs: &[(&str, Punct)] = &[
            ("<<", Punct::Shl),
            (">>", Punct::Shr),
            ("<=", Punct::Le),
            (">=", Punct::Ge),
            ("==", Punct::EqEq),
            ("!=", Punct::Ne),
            ("&&", Punct::AmpAmp),
            ("||", Punct::PipePipe),
        ];
        for (text, kind) in pairs {
            if self.matches_str(text) {
                for _ in 0..text.chars().count() {
                    self.advance();
                }
                return Some(*kind);
            }
        }
        let single = match self.peek()? {
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '+' => Punct::Plus,
            '-' => Punct::Minus,
            '*' => Punct::Star,
            '/' => Punct::Slash,
            '%' => Punct::Percent,
            '^' => Punct::Caret,
            '~' => Punct::Tilde,
            '<' => Punct::Lt,
            '>' => Punct::Gt,
            '&' => Punct::Amp,
            '|' => Punct::Pipe,
            '!' => Punct::Bang,
            '?' => Punct::Question,
            ':' => Punct::Colon,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            '{' => Punct::LBrace,
            '}' => Punct::RBrace,
            ',' => Punct::Comma,
            '=' => Punct::Eq,
            '#' => Punct::Hash,
            '$' => Punct::Dollar,
            '\u{B0}' => Punct::Degree,
            _ => return None,
        };
        self.advance();
        Some(single)
    }

    fn matches_str(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    /// Tokenizes the whole source into a flat token vector, one
    /// [`crate::token::TokenKind::Separator`] per statement boundary.
    pub fn tokenize(source: &'a str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        let mut in_equ_value = false;

        loop {
            let crossed_newline = lexer.skip_trivia()?;
            if crossed_newline && !tokens.is_empty() {
                if !matches!(tokens.last().map(|t: &Token| &t.kind), Some(TokenKind::Separator)) {
                    tokens.push(Token::new(TokenKind::Separator, lexer.line, lexer.column, ""));
                }
                in_equ_value = false;
            }
            let Some(c) = lexer.peek() else { break };

            if in_equ_value {
                tokens.push(lexer.lex_equ_value());
                in_equ_value = false;
                continue;
            }

            if c == '"' {
                tokens.push(lexer.lex_string()?);
                continue;
            }
            if c == '\'' {
                tokens.push(lexer.lex_char_literal()?);
                continue;
            }
            if c.is_ascii_digit() {
                tokens.push(lexer.lex_number_or_ident());
                continue;
            }
            if Self::is_ident_start(c) {
                let tok = lexer.lex_number_or_ident();
                let is_equ = matches!(tok.kind, TokenKind::Equ);
                tokens.push(tok);
                if is_equ {
                    in_equ_value = true;
                }
                continue;
            }
            if let Some(p) = lexer.punct() {
                let line = lexer.line;
                let col = lexer.column;
                tokens.push(Token::new(TokenKind::Punct(p), line, col, p.as_str()));
                continue;
            }
            // Unrecognized character: emit as Invalid and skip it so the
            // parser can surface a diagnostic without the lexer aborting
            // the whole file.
            let line = lexer.line;
            let col = lexer.column;
            let bad = c.to_string();
            lexer.advance();
            tokens.push(Token::new(TokenKind::Invalid(bad.clone()), line, col, bad));
        }
        if !matches!(tokens.last().map(|t: &Token| &t.kind), Some(TokenKind::Separator) | None) {
            tokens.push(Token::new(TokenKind::Separator, lexer.line, lexer.column, ""));
        }
        tokens.push(Token::eof(lexer.line));
        Ok(tokens)
    }
}

enum NumberLiteral {
    Int(i64),
    Float(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_simple_instruction() {
        let k = kinds("ADD V0, 1");
        assert!(matches!(k[0], TokenKind::Identifier(ref s) if s == "ADD"));
        assert!(matches!(k[1], TokenKind::Identifier(ref s) if s == "V0"));
        assert!(matches!(k[2], TokenKind::Punct(Punct::Comma)));
        assert!(matches!(k[3], TokenKind::Integer(1)));
        assert!(matches!(k[4], TokenKind::Separator));
        assert!(matches!(k[5], TokenKind::Eof));
    }

    #[test]
    fn line_comment_is_dropped() {
        let k = kinds("nop ; a comment\nnop");
        let idents: Vec<_> = k.iter().filter(|t| matches!(t, TokenKind::Identifier(_))).count();
        assert_eq!(idents, 2);
    }

    #[test]
    fn block_comment_spans_lines() {
        let k = kinds("a /* multi\nline */ b");
        assert!(matches!(k[0], TokenKind::Identifier(ref s) if s == "a"));
        assert!(matches!(k[1], TokenKind::Identifier(ref s) if s == "b"));
    }

    #[test]
    fn unterminated_block_comment_errors() {
        assert!(Lexer::tokenize("a /* oops").is_err());
    }

    #[test]
    fn line_continuation_suppresses_separator() {
        let k = kinds("a \\\n  b");
        assert!(!k.iter().any(|t| matches!(t, TokenKind::Separator)));
    }

    #[test]
    fn hex_suffix_and_prefix_numbers() {
        assert!(matches!(kinds("0x1F")[0], TokenKind::Integer(0x1F)));
        assert!(matches!(kinds("1Fh")[0], TokenKind::Integer(0x1F)));
    }

    #[test]
    fn dollar_register_sigil_lexes_as_punct_and_identifier() {
        let k = kinds("$a0");
        assert!(matches!(k[0], TokenKind::Punct(Punct::Dollar)));
        assert!(matches!(k[1], TokenKind::Identifier(ref s) if s == "a0"));
    }

    #[test]
    fn number_like_identifier_becomes_number_string() {
        let k = kinds("0q");
        assert!(matches!(k[0], TokenKind::NumberString(ref s) if s == "0q"));
    }

    #[test]
    fn equ_captures_raw_remainder_of_line() {
        let k = kinds("FOO equ 1 + 2 ; comment");
        assert!(matches!(k[0], TokenKind::Identifier(ref s) if s == "FOO"));
        assert!(matches!(k[1], TokenKind::Equ));
        assert!(matches!(k[2], TokenKind::EquValue(ref s) if s == "1 + 2"));
    }

    #[test]
    fn shift_operators_lex_as_one_token() {
        let k = kinds("1 << 2");
        assert!(matches!(k[1], TokenKind::Punct(Punct::Shl)));
    }
}
