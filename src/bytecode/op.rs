use std::sync::Arc;

// =============================================================================
// Opcodes - the first byte of every encoded instruction
// =============================================================================

pub mod opcode {
    pub const SOURCE_LINE: u8 = 0x00;
    pub const SOURCE_FILE: u8 = 0x01;
    pub const DISCARD: u8 = 0x02;

    pub const LOAD_NULL: u8 = 0x10;
    pub const LOAD_INT: u8 = 0x11;
    pub const LOAD_FLOAT: u8 = 0x12;
    pub const LOAD_STRING: u8 = 0x13;
    pub const LOAD_TUPLE: u8 = 0x14;
    pub const LOAD_OBJECT: u8 = 0x15;
    pub const LOAD_ARRAY: u8 = 0x16;
    pub const LOAD_TUPLE_MEMBER: u8 = 0x17;
    pub const LOAD_OBJECT_MEMBER: u8 = 0x18;
    pub const LOAD_ARRAY_ELEMENT: u8 = 0x19;
    pub const LOAD_GLOBAL: u8 = 0x1A;
    pub const LOAD_LOCAL: u8 = 0x1B;

    pub const ADD: u8 = 0x20;
    pub const SUB: u8 = 0x21;
    pub const MUL: u8 = 0x22;
    pub const DIV: u8 = 0x23;
    pub const REM: u8 = 0x24;
    pub const NEGATE: u8 = 0x25;
    pub const LT: u8 = 0x26;
    pub const LE: u8 = 0x27;
    pub const GT: u8 = 0x28;
    pub const GE: u8 = 0x29;
    pub const EQ: u8 = 0x2A;
    pub const NE: u8 = 0x2B;
    pub const AND: u8 = 0x2C;
    pub const OR: u8 = 0x2D;
    pub const NOT: u8 = 0x2E;

    pub const STORE_GLOBAL: u8 = 0x30;
    pub const PUSH_LOCAL: u8 = 0x31;
    pub const STORE_LOCAL: u8 = 0x32;
    pub const STORE_OBJECT_MEMBER: u8 = 0x33;
    pub const STORE_ARRAY_ELEMENT: u8 = 0x34;

    pub const IF: u8 = 0x40;
    pub const LOOP: u8 = 0x41;
    pub const TICK: u8 = 0x42;
    pub const CONTINUE: u8 = 0x43;
    pub const BREAK: u8 = 0x44;
    pub const CALL: u8 = 0x45;
    pub const CALL_BUILTIN: u8 = 0x46;
    pub const RETURN: u8 = 0x47;
}

/// Shared, immutable instruction list. Frames hold a clone of the body
/// they execute.
pub type Body = Arc<[Op]>;

// =============================================================================
// OP - decoded instructions as the VM executes them
// =============================================================================

/// Mirrors the compiler's `Instr`, with strings and shapes replaced by
/// table ids.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    SourceLine(u32),
    SourceFile(u32),
    Discard,

    // values
    LoadNull,
    LoadInt(i64),
    LoadFloat(f64),
    LoadString(u32),
    LoadTuple(u32),
    LoadObject(u32),
    LoadArray(u32),
    LoadTupleMember(u32),
    LoadObjectMember(u32),
    LoadArrayElement,
    LoadGlobal(u32),
    LoadLocal(u32),

    // operators
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

    // stores
    StoreGlobal(u32),
    PushLocal,
    StoreLocal(u32),
    StoreObjectMember(u32),
    StoreArrayElement,

    // control flow
    If { then_body: Body, else_body: Body },
    Loop(Body),
    Tick(Body),
    Continue,
    Break,
    Call(u32),
    CallBuiltin(u32),
    Return,
}
