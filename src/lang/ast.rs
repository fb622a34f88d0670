use crate::frontend::token::Source;

/// An expression node. Every node carries the source location of the token
/// it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub source: Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    // ───────────────────────────── Values ──────────────────────────────
    Identifier(String),
    Null,
    Int(i64),
    Float(f64),
    String(String),

    /// `(a, b, ...)` with at least two members.
    Tuple(Vec<Expr>),

    /// `{ name = value, ... }`. Member order defines the object's shape.
    Object(Vec<(String, Expr)>),

    /// `[a, b, ...]`
    Array(Vec<Expr>),

    // ─────────────────────────── Postfix forms ─────────────────────────
    /// Calls are only allowed on plain names.
    Call { name: String, args: Vec<Expr> },

    /// `value.0`
    TupleMember { value: Box<Expr>, index: u32 },

    /// `value.name`
    ObjectMember { value: Box<Expr>, name: String },

    /// `value[index]`
    Index { value: Box<Expr>, index: Box<Expr> },

    // ──────────────────────────── Operators ────────────────────────────
    Unary { op: UnaryOp, value: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, source: Source) -> Self {
        Expr { kind, source }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub args: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `target = value`. Any expression may appear on the left here; the
    /// emitter rejects those that cannot be assigned to.
    Assign { target: Expr, value: Expr },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    Loop(Vec<Stmt>),
    Tick(Vec<Stmt>),
    While { cond: Expr, body: Vec<Stmt> },
    Continue,
    Break,
    Return(Expr),
    Var { name: String, value: Expr },
    Function(FunctionDecl),
    Expr(Expr),
}

impl Stmt {
    pub fn new(kind: StmtKind, source: Source) -> Self {
        Stmt { kind, source }
    }
}
