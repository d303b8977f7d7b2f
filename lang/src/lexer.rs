use vm86::Diagnostic;

use crate::token::{Token, TokenKind, KEYWORDS};

/// Turns source text into a token stream plus any lexical diagnostics.
/// Mirrors the reference's single-pass character scanner: unknown
/// characters are skipped with a diagnostic rather than aborting the scan.
pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    diagnostics: Vec<Diagnostic>,
    line_has_content: bool,
    _marker: std::marker::PhantomData<&'a str>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            diagnostics: Vec::new(),
            line_has_content: false,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            self.skip_spaces_and_comments();
            match self.peek() {
                None => {
                    if self.line_has_content {
                        tokens.push(self.make(TokenKind::Newline, String::new()));
                    }
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        text: String::new(),
                        line: self.line,
                        column: self.column,
                    });
                    break;
                }
                Some('\n') => {
                    let emit_newline = self.line_has_content;
                    self.advance();
                    if emit_newline {
                        tokens.push(Token {
                            kind: TokenKind::Newline,
                            text: String::new(),
                            line: self.line - 1,
                            column: self.column,
                        });
                    }
                    self.line_has_content = false;
                }
                Some(c) if c.is_ascii_digit() => tokens.push(self.scan_number()),
                Some(c) if is_ident_start(c) => tokens.push(self.scan_word()),
                Some('"') | Some('\'') => tokens.push(self.scan_string()),
                Some(_) => {
                    if let Some(tok) = self.scan_operator() {
                        tokens.push(tok);
                    } else {
                        let line = self.line;
                        let bad = self.peek().unwrap();
                        self.diagnostics
                            .push(Diagnostic::error(line, format!("unexpected character '{}'", bad)));
                        self.advance();
                    }
                }
            }
        }
        (tokens, self.diagnostics)
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

    fn make(&self, kind: TokenKind, text: String) -> Token {
        Token {
            kind,
            text,
            line: self.line,
            column: self.column,
        }
    }

    fn skip_spaces_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c != '\n' && c.is_whitespace() => {
                    self.advance();
                }
                Some(';') | Some('#') => {
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
                _ => break,
            }
        }
    }

    fn scan_word(&mut self) -> Token {
        let line = self.line;
        let column = self.column;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        self.line_has_content = true;
        let lower = text.to_ascii_lowercase();
        if KEYWORDS.contains(&lower.as_str()) {
            Token {
                kind: TokenKind::Keyword,
                text: lower,
                line,
                column,
            }
        } else {
            Token {
                kind: TokenKind::Identifier,
                text,
                line,
                column,
            }
        }
    }

    /// Length of a `[0-9A-Fa-f]+[hH]` run starting at the current position,
    /// if one exists; used to disambiguate `1Fh` from a bare decimal run
    /// immediately followed by an identifier.
    fn lookahead_hex_suffix_len(&self) -> Option<usize> {
        let mut i = self.pos;
        while i < self.chars.len() && self.chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        if i > self.pos && i < self.chars.len() && matches!(self.chars[i], 'h' | 'H') {
            Some(i + 1 - self.pos)
        } else {
            None
        }
    }

    fn scan_number(&mut self) -> Token {
        let line = self.line;
        let column = self.column;
        let mut text = String::new();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            text.push(self.advance().unwrap());
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        } else if self.peek() == Some('0') && matches!(self.peek_at(1), Some('b') | Some('B')) {
            text.push(self.advance().unwrap());
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c == '0' || c == '1' {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        } else if let Some(len) = self.lookahead_hex_suffix_len() {
            for _ in 0..len {
                text.push(self.advance().unwrap());
            }
        } else {
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.line_has_content = true;
        Token {
            kind: TokenKind::Number,
            text,
            line,
            column,
        }
    }

    fn scan_string(&mut self) -> Token {
        let line = self.line;
        let column = self.column;
        let quote = self.advance().unwrap();
        let mut text = String::new();
        let mut terminated = false;
        while let Some(c) = self.peek() {
            if c == quote {
                self.advance();
                terminated = true;
                break;
            }
            if c == '\n' {
                break;
            }
            if c == '\\' {
                self.advance();
                match self.peek() {
                    Some('n') => {
                        text.push('\n');
                        self.advance();
                    }
                    Some('t') => {
                        text.push('\t');
                        self.advance();
                    }
                    Some('\\') => {
                        text.push('\\');
                        self.advance();
                    }
                    Some('"') => {
                        text.push('"');
                        self.advance();
                    }
                    Some('\'') => {
                        text.push('\'');
                        self.advance();
                    }
                    Some(other) => {
                        text.push(other);
                        self.advance();
                    }
                    None => {}
                }
            } else {
                text.push(c);
                self.advance();
            }
        }
        if !terminated {
            self.diagnostics
                .push(Diagnostic::error(line, "unterminated string literal"));
        }
        self.line_has_content = true;
        Token {
            kind: TokenKind::String,
            text,
            line,
            column,
        }
    }

    fn scan_operator(&mut self) -> Option<Token> {
        let line = self.line;
        let column = self.column;
        let two: Option<String> = {
            let a = self.peek()?;
            let b = self.peek_at(1);
            b.map(|b| format!("{}{}", a, b))
        };
        const TWO_CHAR: &[&str] = &["==", "!=", "<=", ">="];
        if let Some(op) = two {
            if TWO_CHAR.contains(&op.as_str()) {
                self.advance();
                self.advance();
                self.line_has_content = true;
                return Some(Token {
                    kind: TokenKind::Operator,
                    text: op,
                    line,
                    column,
                });
            }
        }
        const ONE_CHAR: &str = "<>=+-*/%(),";
        let c = self.peek()?;
        if ONE_CHAR.contains(c) {
            self.advance();
            self.line_has_content = true;
            Some(Token {
                kind: TokenKind::Operator,
                text: c.to_string(),
                line,
                column,
            })
        } else {
            None
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive_and_lowered() {
        let (tokens, diags) = tokenize("IF x THEN end");
        assert!(diags.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[0].text, "if");
    }

    #[test]
    fn number_forms() {
        let (tokens, _) = tokenize("10 0x1F 1Fh 0b101");
        let texts: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(texts, vec!["10", "0x1F", "1Fh", "0b101"]);
    }

    #[test]
    fn unterminated_string_still_emits_token_and_diagnostic() {
        let (tokens, diags) = tokenize("print \"hello");
        assert_eq!(diags.len(), 1);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::String));
    }

    #[test]
    fn two_char_operators_preferred_over_one_char() {
        let (tokens, _) = tokenize("a <= b");
        assert_eq!(tokens[1].text, "<=");
    }

    #[test]
    fn unknown_character_is_skipped_with_diagnostic() {
        let (_, diags) = tokenize("x = 1 @ 2");
        assert_eq!(diags.len(), 1);
    }
}
