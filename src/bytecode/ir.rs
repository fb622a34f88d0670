use serde::{Deserialize, Serialize};

use crate::frontend::token::Source;

/// Compiler-side instruction. Structured control flow nests whole
/// instruction lists instead of jumping to offsets.
///
/// Stack effects are written as `( before -- after )`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ───────────────────────────── Diagnostics ─────────────────────────
    SourceLine(u32),
    SourceFile(String),

    /// `( x -- )`
    Discard,

    // ───────────────────────────── Values ──────────────────────────────
    LoadNull,
    LoadInt(i64),
    LoadFloat(f64),
    LoadString(String),
    /// `( a b ... -- (a, b, ...) )`
    LoadTuple(u32),
    /// Member values in shape order. `( a b ... -- {..} )`
    LoadObject(Vec<String>),
    /// `( a b ... -- [a, b, ...] )`
    LoadArray(u32),
    /// `( t -- t.n )`
    LoadTupleMember(u32),
    /// `( o -- o.name )`
    LoadObjectMember(String),
    /// `( a i -- a[i] )`
    LoadArrayElement,
    LoadGlobal(u32),
    /// Slot counted from the top of the local stack.
    LoadLocal(u32),

    // ──────────────────────────── Operators ────────────────────────────
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Negate,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,

    // ───────────────────────────── Stores ──────────────────────────────
    /// `( x -- )`
    StoreGlobal(u32),
    /// Moves the top operand onto the local stack. `( x -- )`
    PushLocal,
    /// `( x -- )`
    StoreLocal(u32),
    /// `( o x -- )`
    StoreObjectMember(String),
    /// `( a i x -- )`
    StoreArrayElement,

    // ─────────────────────────── Control flow ──────────────────────────
    /// `( cond -- )`
    If {
        then_body: Vec<Instr>,
        else_body: Vec<Instr>,
    },
    Loop(Vec<Instr>),
    Tick(Vec<Instr>),
    Continue,
    Break,
    /// Calls the user function with the given id.
    Call(u32),
    /// Calls the host builtin with the given id.
    CallBuiltin(u32),
    /// `( x -- )` then resumes the caller with `x` on its stack.
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinSignature {
    pub name: String,
    pub arity: u32,
    /// Charged against the tick's instruction budget per call.
    pub cost: u32,
}

/// Names, arities and costs of the host functions a program may call.
/// A function's id is its index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinTable {
    pub functions: Vec<BuiltinSignature>,
}

impl BuiltinTable {
    pub fn find(&self, name: &str) -> Option<(u32, &BuiltinSignature)> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| (i as u32, &self.functions[i]))
    }

    pub fn get(&self, id: u32) -> Option<&BuiltinSignature> {
        self.functions.get(id as usize)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub arity: u32,
    pub source: Source,
    pub body: Vec<Instr>,
}

/// Output of the emitter: everything the encoder needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
    /// Global variable names; a global's slot is its index.
    pub globals: Vec<String>,
    pub global_body: Vec<Instr>,
    pub builtins: BuiltinTable,
}
