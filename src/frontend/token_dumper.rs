use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints tokens as they appear in source
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        for line in self.render(tokens) {
            println!("{line}");
        }
    }

    pub fn render(&self, tokens: &[Spanned]) -> Vec<String> {
        tokens.iter().map(|s| self.render_one(s)).collect()
    }

    fn render_one(&self, s: &Spanned) -> String {
        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };
        let text = if self.show_debug_repr {
            format!("{:?}", s.token)
        } else {
            s.token.to_string()
        };
        format!(
            "[{}:{:03}] {}{:<8} {}{}",
            s.source.file, s.source.line, colr, kind, text, reset
        )
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            // literals
            Int(_) => "INT",
            Float(_) => "FLOAT",
            String(_) => "STRING",
            Null => "NULL",

            // names
            Identifier(_) => "IDENT",

            // structure
            LParen | RParen => "PAREN",
            LBracket | RBracket => "BRACKET",
            LBrace | RBrace => "BRACE",
            Comma => "COMMA",

            // ops / comparisons
            Plus | Minus | Star | Slash | Percent | Dot | Assign => "OP",
            Eq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",

            // everything else = keyword
            _ => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            String(_) => Self::GRN,
            Int(_) | Float(_) | Null => Self::CYN,
            Identifier(_) => Self::YEL,
            Plus | Minus | Star | Slash | Percent | Dot | Assign => Self::MAG,
            Eq | NotEq | Lt | LtEq | Gt | GtEq => Self::MAG,
            t if t.is_keyword() => Self::BLU,
            _ => Self::RESET,
        }
    }
}
