use std::sync::Arc;

use crate::error::{CompileError, ErrorCode};
use crate::frontend::token::{Source, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub source: Source,
}

/// Splits the source text of a single file into tokens.
pub fn tokenize(file: &str, source: &str) -> Result<Vec<Spanned>, CompileError> {
    Lexer::new(file, source).tokenize()
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    file: Arc<str>,
    tokens: Vec<Spanned>,
}

impl Lexer {
    pub fn new(file: &str, source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            file: Arc::from(file),
            tokens: Vec::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    /// Consumes one char. A CRLF pair counts as a single line break.
    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        match ch {
            Some('\n') => self.line += 1,
            Some('\r') if self.peek() != Some('\n') => self.line += 1,
            _ => {}
        }
        self.pos += 1;
        ch
    }

    fn source_here(&self) -> Source {
        Source {
            line: self.line,
            file: Arc::clone(&self.file),
        }
    }

    fn error(&self, code: ErrorCode) -> CompileError {
        CompileError::new(code, self.source_here())
    }

    fn push(&mut self, token: Token, source: Source) {
        self.tokens.push(Spanned { token, source });
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' || ch == '\r' {
                break;
            }
            self.advance();
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::keyword(&ident).unwrap_or(Token::Identifier(ident))
    }

    /// Reads an integer or float literal. `_` separators are dropped.
    ///
    /// Right after a `.` token only digits are consumed, so that `t.0.1`
    /// reads as two tuple member accesses instead of a float.
    fn read_number(&mut self) -> Result<Token, CompileError> {
        let start = self.source_here();
        let member_index = matches!(self.tokens.last(), Some(s) if s.token == Token::Dot);

        let mut digits = String::new();
        let mut has_dot = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
            } else if ch == '_' {
                // separator
            } else if ch == '.' && !member_index {
                if has_dot {
                    return Err(self.error(ErrorCode::MultipleDotsInNumeric));
                }
                has_dot = true;
                digits.push('.');
            } else {
                break;
            }
            self.advance();
        }

        if has_dot {
            digits
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| CompileError::new(ErrorCode::InvalidNumericLiteral, start))
        } else {
            digits
                .parse::<i64>()
                .map(Token::Int)
                .map_err(|_| CompileError::new(ErrorCode::InvalidNumericLiteral, start))
        }
    }

    fn read_string(&mut self) -> Result<Token, CompileError> {
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                None => return Err(self.error(ErrorCode::UnclosedStringLiteral)),
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        None => return Err(self.error(ErrorCode::UnclosedStringLiteral)),
                        // escaped line break is dropped
                        Some('\r') => {
                            self.advance();
                            if self.current() == Some('\n') {
                                self.advance();
                            }
                            continue;
                        }
                        Some('\n') => {}
                        Some('n') => string.push('\n'),
                        Some('r') => string.push('\r'),
                        Some('t') => string.push('\t'),
                        Some('b') => string.push('\u{8}'),
                        Some(ch) => string.push(ch),
                    }
                    self.advance();
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let token = match (ch, next) {
            ('<', Some('=')) => Token::LtEq,
            ('>', Some('=')) => Token::GtEq,
            ('=', Some('=')) => Token::Eq,
            ('!', Some('=')) => Token::NotEq,
            _ => {
                let single = match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '.' => Token::Dot,
                    ',' => Token::Comma,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '<' => Token::Lt,
                    '>' => Token::Gt,
                    '=' => Token::Assign,
                    _ => return None,
                };
                self.advance();
                return Some(single);
            }
        };
        self.advance();
        self.advance();
        Some(token)
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, CompileError> {
        loop {
            self.skip_whitespace();
            let Some(ch) = self.current() else {
                break;
            };
            let source = self.source_here();

            if ch == '#' {
                self.skip_comment();
            } else if ch.is_ascii_alphabetic() || ch == '_' {
                let token = self.read_identifier();
                self.push(token, source);
            } else if ch.is_ascii_digit() {
                let token = self.read_number()?;
                self.push(token, source);
            } else if ch == '"' {
                let token = self.read_string()?;
                self.push(token, source);
            } else if let Some(token) = self.read_operator() {
                self.push(token, source);
            } else {
                return Err(self.error(ErrorCode::InvalidToken));
            }
        }
        Ok(self.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize("test.bt", src)
            .expect("lexing should succeed")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    fn lines(src: &str) -> Vec<u32> {
        tokenize("test.bt", src)
            .expect("lexing should succeed")
            .into_iter()
            .map(|s| s.source.line)
            .collect()
    }

    fn assert_error(src: &str, code: ErrorCode, line: u32) {
        match tokenize("test.bt", src) {
            Ok(t) => panic!("expected {:?}, got tokens {:?}", code, t),
            Err(e) => {
                assert_eq!(e.code, code);
                assert_eq!(e.location.line, line);
            }
        }
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            tokens("var fun loop while tick continue break return and or not if else null foo _bar9"),
            vec![
                Token::Var,
                Token::Fun,
                Token::Loop,
                Token::While,
                Token::Tick,
                Token::Continue,
                Token::Break,
                Token::Return,
                Token::And,
                Token::Or,
                Token::Not,
                Token::If,
                Token::Else,
                Token::Null,
                Token::Identifier("foo".into()),
                Token::Identifier("_bar9".into()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 1_000_000 3.25 1_0.5"),
            vec![
                Token::Int(42),
                Token::Int(1_000_000),
                Token::Float(3.25),
                Token::Float(10.5),
            ]
        );
    }

    #[test]
    fn test_multiple_dots() {
        assert_error("\n1.2.3", ErrorCode::MultipleDotsInNumeric, 2);
    }

    #[test]
    fn test_int_out_of_range() {
        assert_error("99999999999999999999", ErrorCode::InvalidNumericLiteral, 1);
    }

    #[test]
    fn test_tuple_member_chain() {
        assert_eq!(
            tokens("t.0.1"),
            vec![
                Token::Identifier("t".into()),
                Token::Dot,
                Token::Int(0),
                Token::Dot,
                Token::Int(1),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("<= >= == != < > = + - * / % ( ) { } [ ] . ,"),
            vec![
                Token::LtEq,
                Token::GtEq,
                Token::Eq,
                Token::NotEq,
                Token::Lt,
                Token::Gt,
                Token::Assign,
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::Dot,
                Token::Comma,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\"b\\c\nd\te\x""#),
            vec![Token::String("a\"b\\c\nd\tex".into())]
        );
    }

    #[test]
    fn test_string_raw_line_break_counts_lines() {
        assert_eq!(
            tokens("\"a\nb\" x"),
            vec![Token::String("a\nb".into()), Token::Identifier("x".into())]
        );
        assert_eq!(lines("\"a\nb\" x"), vec![1, 2]);
    }

    #[test]
    fn test_unclosed_string() {
        assert_error("x = \"abc", ErrorCode::UnclosedStringLiteral, 1);
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokens("a # comment ( ]\nb"),
            vec![Token::Identifier("a".into()), Token::Identifier("b".into())]
        );
    }

    #[test]
    fn test_crlf_counts_one_line() {
        assert_eq!(lines("a\r\nb\nc\r\n\r\nd"), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_invalid_token() {
        assert_error("a\nb $", ErrorCode::InvalidToken, 2);
        assert_error("!x", ErrorCode::InvalidToken, 1);
    }

    #[test]
    fn test_file_is_recorded() {
        let toks = tokenize("robot.bt", "x").unwrap();
        assert_eq!(&*toks[0].source.file, "robot.bt");
    }
}
