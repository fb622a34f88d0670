use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::bytecode::encode::{MAGIC, VERSION};
use crate::bytecode::op::{Body, Op, opcode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of program at offset {offset}")]
    UnexpectedEnd { offset: usize },
    #[error("not a program binary")]
    BadMagic,
    #[error("unsupported program version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },
    #[error("string {0} is not valid UTF-16")]
    InvalidString(u32),
    #[error("{0} trailing bytes after program")]
    TrailingBytes(usize),
}

/// Reads values written by `BinaryWriter`, honouring the same alignment.
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BinaryReader { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn align(&mut self, alignment: usize) {
        self.pos += (alignment - self.pos % alignment) % alignment;
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.align(N);
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEnd { offset: self.pos })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Reads a `u32` element count, rejecting counts that cannot possibly
    /// fit in the remaining bytes.
    fn read_count(&mut self) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let count = self.read_u32()? as usize;
        if count > self.remaining() {
            return Err(DecodeError::UnexpectedEnd { offset });
        }
        Ok(count)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBuiltin {
    pub name: u32,
    pub arity: u32,
    pub cost: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFunction {
    pub name: u32,
    pub arity: u32,
    pub line: u32,
    pub file: u32,
    pub body: Body,
}

/// A program binary unpacked into the form the VM executes.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProgram {
    pub strings: Vec<Arc<str>>,
    /// Property name string ids, in member order.
    pub shapes: Vec<Arc<[u32]>>,
    pub builtins: Vec<LoadedBuiltin>,
    /// Global name string ids, by slot.
    pub globals: Vec<u32>,
    pub functions: Vec<LoadedFunction>,
    pub global_body: Body,
}

impl LoadedProgram {
    pub fn string(&self, id: u32) -> Option<&Arc<str>> {
        self.strings.get(id as usize)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BinaryReader::new(bytes);
        if r.read_u32()? != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let count = r.read_count()?;
        let mut strings = Vec::with_capacity(count);
        for id in 0..count {
            let len = r.read_count()?;
            let mut units = Vec::with_capacity(len);
            for _ in 0..len {
                units.push(r.read_u16()?);
            }
            let s = String::from_utf16(&units).map_err(|_| DecodeError::InvalidString(id as u32))?;
            strings.push(Arc::from(s));
        }

        let count = r.read_count()?;
        let mut shapes = Vec::with_capacity(count);
        for _ in 0..count {
            let len = r.read_count()?;
            let mut names = Vec::with_capacity(len);
            for _ in 0..len {
                names.push(r.read_u32()?);
            }
            shapes.push(Arc::from(names));
        }

        let count = r.read_count()?;
        let mut builtins = Vec::with_capacity(count);
        for _ in 0..count {
            builtins.push(LoadedBuiltin {
                name: r.read_u32()?,
                arity: r.read_u32()?,
                cost: r.read_u32()?,
            });
        }

        let count = r.read_count()?;
        let mut globals = Vec::with_capacity(count);
        for _ in 0..count {
            globals.push(r.read_u32()?);
        }

        let count = r.read_count()?;
        r.align(8);
        let mut functions = Vec::with_capacity(count);
        for _ in 0..count {
            let name = r.read_u32()?;
            let arity = r.read_u32()?;
            let line = r.read_u32()?;
            let file = r.read_u32()?;
            let body = read_list(&mut r)?;
            functions.push(LoadedFunction {
                name,
                arity,
                line,
                file,
                body,
            });
        }
        let global_body = read_list(&mut r)?;

        if r.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(r.remaining()));
        }

        debug!(
            bytes = bytes.len(),
            strings = strings.len(),
            shapes = shapes.len(),
            functions = functions.len(),
            "decoded program"
        );

        Ok(LoadedProgram {
            strings,
            shapes,
            builtins,
            globals,
            functions,
            global_body,
        })
    }
}

fn read_list(r: &mut BinaryReader<'_>) -> Result<Body, DecodeError> {
    let count = r.read_count()?;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        ops.push(read_op(r)?);
    }
    Ok(Arc::from(ops))
}

fn read_op(r: &mut BinaryReader<'_>) -> Result<Op, DecodeError> {
    let offset = r.position();
    let op = match r.read_u8()? {
        opcode::SOURCE_LINE => Op::SourceLine(r.read_u32()?),
        opcode::SOURCE_FILE => Op::SourceFile(r.read_u32()?),
        opcode::DISCARD => Op::Discard,

        opcode::LOAD_NULL => Op::LoadNull,
        opcode::LOAD_INT => Op::LoadInt(r.read_i64()?),
        opcode::LOAD_FLOAT => Op::LoadFloat(r.read_f64()?),
        opcode::LOAD_STRING => Op::LoadString(r.read_u32()?),
        opcode::LOAD_TUPLE => Op::LoadTuple(r.read_u32()?),
        opcode::LOAD_OBJECT => Op::LoadObject(r.read_u32()?),
        opcode::LOAD_ARRAY => Op::LoadArray(r.read_u32()?),
        opcode::LOAD_TUPLE_MEMBER => Op::LoadTupleMember(r.read_u32()?),
        opcode::LOAD_OBJECT_MEMBER => Op::LoadObjectMember(r.read_u32()?),
        opcode::LOAD_ARRAY_ELEMENT => Op::LoadArrayElement,
        opcode::LOAD_GLOBAL => Op::LoadGlobal(r.read_u32()?),
        opcode::LOAD_LOCAL => Op::LoadLocal(r.read_u32()?),

        opcode::ADD => Op::Add,
        opcode::SUB => Op::Sub,
        opcode::MUL => Op::Mul,
        opcode::DIV => Op::Div,
        opcode::REM => Op::Rem,
        opcode::NEGATE => Op::Negate,
        opcode::LT => Op::Lt,
        opcode::LE => Op::Le,
        opcode::GT => Op::Gt,
        opcode::GE => Op::Ge,
        opcode::EQ => Op::Eq,
        opcode::NE => Op::Ne,
        opcode::AND => Op::And,
        opcode::OR => Op::Or,
        opcode::NOT => Op::Not,

        opcode::STORE_GLOBAL => Op::StoreGlobal(r.read_u32()?),
        opcode::PUSH_LOCAL => Op::PushLocal,
        opcode::STORE_LOCAL => Op::StoreLocal(r.read_u32()?),
        opcode::STORE_OBJECT_MEMBER => Op::StoreObjectMember(r.read_u32()?),
        opcode::STORE_ARRAY_ELEMENT => Op::StoreArrayElement,

        opcode::IF => {
            let then_body = read_list(r)?;
            let else_body = read_list(r)?;
            Op::If {
                then_body,
                else_body,
            }
        }
        opcode::LOOP => Op::Loop(read_list(r)?),
        opcode::TICK => Op::Tick(read_list(r)?),
        opcode::CONTINUE => Op::Continue,
        opcode::BREAK => Op::Break,
        opcode::CALL => Op::Call(r.read_u32()?),
        opcode::CALL_BUILTIN => Op::CallBuiltin(r.read_u32()?),
        opcode::RETURN => Op::Return,
        other => {
            return Err(DecodeError::InvalidOpcode {
                opcode: other,
                offset,
            });
        }
    };
    Ok(op)
}
