use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Where a token, node or instruction came from. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub line: u32,
    pub file: Arc<str>,
}

impl Source {
    pub fn new(line: u32, file: &str) -> Self {
        Source {
            line,
            file: Arc::from(file),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, file '{}'", self.line, self.file)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Identifier(String),
    Int(i64),
    Float(f64),
    String(String),

    // Keywords
    Var,
    Fun,
    Loop,
    While,
    Tick,
    Continue,
    Break,
    Return,
    And,
    Or,
    Not,
    If,
    Else,
    Null,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Dot,
    Comma,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    NotEq,
    Assign,
}

impl Token {
    pub fn keyword(ident: &str) -> Option<Token> {
        let token = match ident {
            "var" => Token::Var,
            "fun" => Token::Fun,
            "loop" => Token::Loop,
            "while" => Token::While,
            "tick" => Token::Tick,
            "continue" => Token::Continue,
            "break" => Token::Break,
            "return" => Token::Return,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "if" => Token::If,
            "else" => Token::Else,
            "null" => Token::Null,
            _ => return None,
        };
        Some(token)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Var
                | Token::Fun
                | Token::Loop
                | Token::While
                | Token::Tick
                | Token::Continue
                | Token::Break
                | Token::Return
                | Token::And
                | Token::Or
                | Token::Not
                | Token::If
                | Token::Else
                | Token::Null
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Token::Int(_) | Token::Float(_) | Token::String(_) | Token::Null
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{:?}", n),
            Token::String(s) => write!(f, "{:?}", s),
            Token::Var => write!(f, "var"),
            Token::Fun => write!(f, "fun"),
            Token::Loop => write!(f, "loop"),
            Token::While => write!(f, "while"),
            Token::Tick => write!(f, "tick"),
            Token::Continue => write!(f, "continue"),
            Token::Break => write!(f, "break"),
            Token::Return => write!(f, "return"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::Null => write!(f, "null"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::LtEq => write!(f, "<="),
            Token::GtEq => write!(f, ">="),
            Token::Eq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Assign => write!(f, "="),
        }
    }
}
