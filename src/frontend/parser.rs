use crate::error::{CompileError, ErrorCode};
use crate::frontend::lexer::Spanned;
use crate::frontend::token::{Source, Token};
use crate::lang::ast::{BinaryOp, Expr, ExprKind, FunctionDecl, Stmt, StmtKind, UnaryOp};

/// Binding power of postfix forms (call, member access, indexing).
const POSTFIX_POWER: u8 = 7;

/// Deepest expression or block nesting accepted. Every later pass walks the
/// tree recursively, so this bounds their stack use too.
pub const MAX_NESTING: usize = 256;

fn unary_power(token: &Token) -> Option<(u8, UnaryOp)> {
    match token {
        Token::Minus => Some((6, UnaryOp::Negate)),
        Token::Not => Some((2, UnaryOp::Not)),
        _ => None,
    }
}

fn binary_power(token: &Token) -> Option<u8> {
    let power = match token {
        Token::LParen | Token::Dot | Token::LBracket => POSTFIX_POWER,
        Token::Star | Token::Slash | Token::Percent => 5,
        Token::Plus | Token::Minus => 4,
        Token::Lt | Token::Gt | Token::LtEq | Token::GtEq | Token::Eq | Token::NotEq => 3,
        Token::And | Token::Or => 1,
        _ => return None,
    };
    Some(power)
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::Star => BinaryOp::Mul,
        Token::Slash => BinaryOp::Div,
        Token::Percent => BinaryOp::Rem,
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Lt => BinaryOp::Lt,
        Token::Gt => BinaryOp::Gt,
        Token::LtEq => BinaryOp::Le,
        Token::GtEq => BinaryOp::Ge,
        Token::Eq => BinaryOp::Eq,
        Token::NotEq => BinaryOp::Ne,
        Token::And => BinaryOp::And,
        Token::Or => BinaryOp::Or,
        _ => return None,
    };
    Some(op)
}

/// Recursive-descent parser for statements with a precedence-climbing
/// expression parser.
///
/// Tokens of several files may be concatenated into one stream; every
/// node takes its location from the token it started at.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    /// Location reported for errors at end of input.
    eof: Source,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        let eof = tokens
            .last()
            .map(|s| s.source.clone())
            .unwrap_or_else(|| Source::new(1, "<unknown>"));
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            eof,
        }
    }

    /// Parses the complete token stream into top-level statements.
    pub fn parse(mut self) -> Result<Vec<Stmt>, CompileError> {
        let statements = self.parse_statement_list()?;
        // the list only stops early at a stray '}'
        if self.peek().is_some() {
            return Err(self.error(ErrorCode::MissingExpectedUnaryOrValue));
        }
        Ok(statements)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn source(&self) -> Source {
        self.tokens
            .get(self.pos)
            .map(|s| s.source.clone())
            .unwrap_or_else(|| self.eof.clone())
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn error(&self, code: ErrorCode) -> CompileError {
        CompileError::new(code, self.source())
    }

    fn expect(&mut self, token: &Token, code: ErrorCode) -> Result<(), CompileError> {
        if !self.at(token) {
            return Err(self.error(code));
        }
        self.advance();
        Ok(())
    }

    fn expect_identifier(&mut self, code: ErrorCode) -> Result<String, CompileError> {
        match self.peek() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(code)),
        }
    }

    // ==== Expressions ====

    /// Parses comma separated expressions up to (not including) `end`.
    fn parse_value_list(&mut self, end: &Token) -> Result<Vec<Expr>, CompileError> {
        let mut values = Vec::new();
        while !self.at(end) {
            values.push(self.parse_expression(0)?);
            if self.at(&Token::Comma) {
                self.advance();
            } else if !self.at(end) {
                return Err(self.error(ErrorCode::MissingExpectedComma));
            }
        }
        Ok(values)
    }

    fn parse_object_members(&mut self) -> Result<Vec<(String, Expr)>, CompileError> {
        let mut members = Vec::new();
        while !self.at(&Token::RBrace) {
            let name = self.expect_identifier(ErrorCode::MissingExpectedMemberName)?;
            self.expect(&Token::Assign, ErrorCode::MissingExpectedMemberEquals)?;
            members.push((name, self.parse_expression(0)?));
            if self.at(&Token::Comma) {
                self.advance();
            } else if !self.at(&Token::RBrace) {
                return Err(self.error(ErrorCode::MissingExpectedComma));
            }
        }
        Ok(members)
    }

    fn parse_value(&mut self) -> Result<Expr, CompileError> {
        let start = self.source();
        let Some(token) = self.peek().cloned() else {
            return Err(self.error(ErrorCode::MissingExpectedUnaryOrValue));
        };

        let kind = match token {
            Token::Identifier(name) => ExprKind::Identifier(name),
            Token::Int(n) => ExprKind::Int(n),
            Token::Float(n) => ExprKind::Float(n),
            Token::String(s) => ExprKind::String(s),
            Token::Null => ExprKind::Null,
            Token::LParen => {
                self.advance();
                let mut values = self.parse_value_list(&Token::RParen)?;
                self.advance();
                return match values.len() {
                    0 => Err(CompileError::new(ErrorCode::EmptyParentheses, start)),
                    1 => Ok(values.remove(0)),
                    _ => Ok(Expr::new(ExprKind::Tuple(values), start)),
                };
            }
            Token::LBracket => {
                self.advance();
                let values = self.parse_value_list(&Token::RBracket)?;
                self.advance();
                return Ok(Expr::new(ExprKind::Array(values), start));
            }
            Token::LBrace => {
                self.advance();
                let members = self.parse_object_members()?;
                self.advance();
                return Ok(Expr::new(ExprKind::Object(members), start));
            }
            other => {
                let Some((power, op)) = unary_power(&other) else {
                    return Err(self.error(ErrorCode::MissingExpectedUnaryOrValue));
                };
                self.advance();
                let value = self.parse_expression(power)?;
                return Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        value: Box::new(value),
                    },
                    start,
                ));
            }
        };
        self.advance();
        Ok(Expr::new(kind, start))
    }

    /// Counts one more level of nesting below the current node.
    fn nest(&mut self) -> Result<(), CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(ErrorCode::NestingTooDeep));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn parse_expression(&mut self, parent_power: u8) -> Result<Expr, CompileError> {
        let entry = self.depth;
        let result = self.nest().and_then(|()| self.fold_expression(parent_power));
        self.depth = entry;
        result
    }

    /// Precedence climbing: keeps folding operators that bind tighter than
    /// `parent_power` into the accumulated expression.
    fn fold_expression(&mut self, parent_power: u8) -> Result<Expr, CompileError> {
        let mut acc = self.parse_value()?;
        loop {
            let Some(op) = self.peek().cloned() else {
                return Ok(acc);
            };
            let Some(power) = binary_power(&op) else {
                return Ok(acc);
            };
            if power <= parent_power {
                return Ok(acc);
            }
            let op_source = self.source();
            self.advance();
            // each fold deepens the left spine
            self.nest()?;

            acc = match op {
                Token::LParen => {
                    let ExprKind::Identifier(name) = acc.kind else {
                        return Err(CompileError::new(ErrorCode::CallingExpression, op_source));
                    };
                    let args = self.parse_value_list(&Token::RParen)?;
                    self.advance();
                    Expr::new(ExprKind::Call { name, args }, op_source)
                }
                Token::Dot => {
                    let kind = match self.peek() {
                        Some(Token::Int(index)) => {
                            let index = u32::try_from(*index)
                                .map_err(|_| self.error(ErrorCode::InvalidNumericLiteral))?;
                            ExprKind::TupleMember {
                                value: Box::new(acc),
                                index,
                            }
                        }
                        Some(Token::Identifier(name)) => ExprKind::ObjectMember {
                            value: Box::new(acc),
                            name: name.clone(),
                        },
                        _ => return Err(self.error(ErrorCode::InvalidMemberSyntax)),
                    };
                    self.advance();
                    Expr::new(kind, op_source)
                }
                Token::LBracket => {
                    let index = self.parse_expression(0)?;
                    self.expect(&Token::RBracket, ErrorCode::MissingExpectedClosingBracket)?;
                    Expr::new(
                        ExprKind::Index {
                            value: Box::new(acc),
                            index: Box::new(index),
                        },
                        op_source,
                    )
                }
                other => {
                    let Some(op) = binary_op(&other) else {
                        return Err(CompileError::new(
                            ErrorCode::MissingExpectedUnaryOrValue,
                            op_source,
                        ));
                    };
                    let right = self.parse_expression(power)?;
                    Expr::new(
                        ExprKind::Binary {
                            op,
                            left: Box::new(acc),
                            right: Box::new(right),
                        },
                        op_source,
                    )
                }
            };
        }
    }

    // ==== Statements ====

    fn parse_braced_statement_list(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(&Token::LBrace, ErrorCode::MissingExpectedOpeningBrace)?;
        let entry = self.depth;
        let statements = self.nest().and_then(|()| self.parse_statement_list());
        self.depth = entry;
        let statements = statements?;
        self.expect(&Token::RBrace, ErrorCode::MissingExpectedClosingBrace)?;
        Ok(statements)
    }

    fn parse_statement_list(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut statements = Vec::new();
        while !matches!(self.peek(), None | Some(Token::RBrace)) {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, CompileError> {
        let name = self.expect_identifier(ErrorCode::MissingExpectedFunctionName)?;
        self.expect(&Token::LParen, ErrorCode::MissingExpectedFuncArgsOpen)?;
        let mut args = Vec::new();
        while !self.at(&Token::RParen) {
            args.push(self.expect_identifier(ErrorCode::MissingExpectedArgumentName)?);
            if self.at(&Token::Comma) {
                self.advance();
            } else if !self.at(&Token::RParen) {
                return Err(self.error(ErrorCode::MissingExpectedComma));
            }
        }
        self.advance();
        let body = self.parse_braced_statement_list()?;
        Ok(FunctionDecl { name, args, body })
    }

    pub fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.source();
        let kind = match self.peek() {
            Some(Token::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Some(Token::Break) => {
                self.advance();
                StmtKind::Break
            }
            Some(Token::Return) => {
                self.advance();
                StmtKind::Return(self.parse_expression(0)?)
            }
            Some(Token::Loop) => {
                self.advance();
                StmtKind::Loop(self.parse_braced_statement_list()?)
            }
            Some(Token::Tick) => {
                self.advance();
                StmtKind::Tick(self.parse_braced_statement_list()?)
            }
            Some(Token::While) => {
                self.advance();
                let cond = self.parse_expression(0)?;
                let body = self.parse_braced_statement_list()?;
                StmtKind::While { cond, body }
            }
            Some(Token::Var) => {
                self.advance();
                let name = self.expect_identifier(ErrorCode::MissingExpectedVariableName)?;
                self.expect(&Token::Assign, ErrorCode::MissingExpectedVarEquals)?;
                let value = self.parse_expression(0)?;
                StmtKind::Var { name, value }
            }
            Some(Token::If) => {
                self.advance();
                let cond = self.parse_expression(0)?;
                let then_body = self.parse_braced_statement_list()?;
                let else_body = if self.at(&Token::Else) {
                    self.advance();
                    if self.at(&Token::If) {
                        let entry = self.depth;
                        let chained = self.nest().and_then(|()| self.parse_statement());
                        self.depth = entry;
                        vec![chained?]
                    } else {
                        self.parse_braced_statement_list()?
                    }
                } else {
                    Vec::new()
                };
                StmtKind::If {
                    cond,
                    then_body,
                    else_body,
                }
            }
            Some(Token::Fun) => {
                self.advance();
                StmtKind::Function(self.parse_function()?)
            }
            _ => {
                let target = self.parse_expression(0)?;
                if !self.at(&Token::Assign) {
                    return Ok(Stmt::new(StmtKind::Expr(target), start));
                }
                let op_source = self.source();
                self.advance();
                let value = self.parse_expression(0)?;
                return Ok(Stmt::new(StmtKind::Assign { target, value }, op_source));
            }
        };
        Ok(Stmt::new(kind, start))
    }
}
