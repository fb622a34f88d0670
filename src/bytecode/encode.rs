//! Binary program encoding.
//!
//! Layout (all integers little endian, every value aligned to its own size
//! relative to the start of the buffer):
//!
//! ```text
//! u32 magic "BGTN"   u16 version
//! u32 count  { u32 len  u16 units[len] }          string table (UTF-16)
//! u32 count  { u32 len  u32 string_ids[len] }     shape table
//! u32 count  { u32 name  u32 arity  u32 cost }    builtin table
//! u32 count  { u32 name }                         global table
//! u32 count  { u32 name  u32 arity  u32 line  u32 file  list }
//! list                                            global body
//! ```
//!
//! A `list` is `u32 count` followed by `count` records of `u8 opcode` and
//! an optional operand. `IF` carries two lists, `LOOP` and `TICK` one.

use std::collections::HashMap;
use std::hash::Hash;

use crate::bytecode::ir::{Instr, Program};
use crate::bytecode::op::opcode;

pub const MAGIC: u32 = u32::from_le_bytes(*b"BGTN");
pub const VERSION: u16 = 1;

// ==== Writer ====

/// Appends naturally aligned little endian values, zero padding as needed.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    bytes: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn align(&mut self, alignment: usize) {
        let padding = (alignment - self.bytes.len() % alignment) % alignment;
        self.bytes.resize(self.bytes.len() + padding, 0);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.align(2);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.align(4);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.align(8);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.align(8);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends another writer's output. `other` must have been written
    /// assuming a base offset aligned to 8.
    pub fn append(&mut self, other: BinaryWriter) {
        self.align(8);
        self.bytes.extend(other.bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ==== Interning ====

/// Assigns ids in first-seen order.
#[derive(Debug)]
pub struct Interner<T> {
    ids: HashMap<T, u32>,
    items: Vec<T>,
}

impl<T> Default for Interner<T> {
    fn default() -> Self {
        Interner {
            ids: HashMap::new(),
            items: Vec::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> Interner<T> {
    pub fn intern(&mut self, item: &T) -> u32 {
        if let Some(&id) = self.ids.get(item) {
            return id;
        }
        let id = self.items.len() as u32;
        self.ids.insert(item.clone(), id);
        self.items.push(item.clone());
        id
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

// ==== Encoder ====

#[derive(Debug, Default)]
pub struct Encoder {
    strings: Interner<String>,
    shapes: Interner<Vec<u32>>,
}

/// Encodes a program into its binary form.
pub fn encode(program: &Program) -> Vec<u8> {
    Encoder::default().encode(program)
}

impl Encoder {
    pub fn strings(&self) -> &[String] {
        self.strings.items()
    }

    pub fn shapes(&self) -> &[Vec<u32>] {
        self.shapes.items()
    }

    fn string(&mut self, s: &str) -> u32 {
        self.strings.intern(&s.to_string())
    }

    pub fn encode(&mut self, program: &Program) -> Vec<u8> {
        // table names first, so their ids do not depend on code order
        let builtin_names: Vec<u32> = program
            .builtins
            .functions
            .iter()
            .map(|f| self.string(&f.name))
            .collect();
        let global_names: Vec<u32> = program.globals.iter().map(|g| self.string(g)).collect();
        let function_names: Vec<(u32, u32)> = program
            .functions
            .iter()
            .map(|f| (self.string(&f.name), self.string(&f.source.file)))
            .collect();

        let mut code = BinaryWriter::new();
        for (function, (name, file)) in program.functions.iter().zip(&function_names) {
            code.write_u32(*name);
            code.write_u32(function.arity);
            code.write_u32(function.source.line);
            code.write_u32(*file);
            self.write_list(&mut code, &function.body);
        }
        self.write_list(&mut code, &program.global_body);

        let mut out = BinaryWriter::new();
        out.write_u32(MAGIC);
        out.write_u16(VERSION);

        out.write_u32(self.strings.items().len() as u32);
        for s in self.strings.items() {
            let units: Vec<u16> = s.encode_utf16().collect();
            out.write_u32(units.len() as u32);
            for unit in units {
                out.write_u16(unit);
            }
        }

        out.write_u32(self.shapes.items().len() as u32);
        for shape in self.shapes.items() {
            out.write_u32(shape.len() as u32);
            for id in shape {
                out.write_u32(*id);
            }
        }

        out.write_u32(builtin_names.len() as u32);
        for (sig, name) in program.builtins.functions.iter().zip(builtin_names) {
            out.write_u32(name);
            out.write_u32(sig.arity);
            out.write_u32(sig.cost);
        }

        out.write_u32(global_names.len() as u32);
        for name in global_names {
            out.write_u32(name);
        }

        out.write_u32(program.functions.len() as u32);
        out.append(code);
        out.into_bytes()
    }

    fn write_list(&mut self, w: &mut BinaryWriter, instrs: &[Instr]) {
        w.write_u32(instrs.len() as u32);
        for instr in instrs {
            self.write_instr(w, instr);
        }
    }

    fn write_instr(&mut self, w: &mut BinaryWriter, instr: &Instr) {
        match instr {
            Instr::SourceLine(line) => {
                w.write_u8(opcode::SOURCE_LINE);
                w.write_u32(*line);
            }
            Instr::SourceFile(file) => {
                w.write_u8(opcode::SOURCE_FILE);
                let id = self.string(file);
                w.write_u32(id);
            }
            Instr::Discard => w.write_u8(opcode::DISCARD),

            Instr::LoadNull => w.write_u8(opcode::LOAD_NULL),
            Instr::LoadInt(n) => {
                w.write_u8(opcode::LOAD_INT);
                w.write_i64(*n);
            }
            Instr::LoadFloat(n) => {
                w.write_u8(opcode::LOAD_FLOAT);
                w.write_f64(*n);
            }
            Instr::LoadString(s) => {
                w.write_u8(opcode::LOAD_STRING);
                let id = self.string(s);
                w.write_u32(id);
            }
            Instr::LoadTuple(n) => {
                w.write_u8(opcode::LOAD_TUPLE);
                w.write_u32(*n);
            }
            Instr::LoadObject(names) => {
                w.write_u8(opcode::LOAD_OBJECT);
                let shape: Vec<u32> = names.iter().map(|n| self.string(n)).collect();
                let id = self.shapes.intern(&shape);
                w.write_u32(id);
            }
            Instr::LoadArray(n) => {
                w.write_u8(opcode::LOAD_ARRAY);
                w.write_u32(*n);
            }
            Instr::LoadTupleMember(i) => {
                w.write_u8(opcode::LOAD_TUPLE_MEMBER);
                w.write_u32(*i);
            }
            Instr::LoadObjectMember(name) => {
                w.write_u8(opcode::LOAD_OBJECT_MEMBER);
                let id = self.string(name);
                w.write_u32(id);
            }
            Instr::LoadArrayElement => w.write_u8(opcode::LOAD_ARRAY_ELEMENT),
            Instr::LoadGlobal(slot) => {
                w.write_u8(opcode::LOAD_GLOBAL);
                w.write_u32(*slot);
            }
            Instr::LoadLocal(slot) => {
                w.write_u8(opcode::LOAD_LOCAL);
                w.write_u32(*slot);
            }

            Instr::Add => w.write_u8(opcode::ADD),
            Instr::Sub => w.write_u8(opcode::SUB),
            Instr::Mul => w.write_u8(opcode::MUL),
            Instr::Div => w.write_u8(opcode::DIV),
            Instr::Rem => w.write_u8(opcode::REM),
            Instr::Negate => w.write_u8(opcode::NEGATE),
            Instr::Lt => w.write_u8(opcode::LT),
            Instr::Le => w.write_u8(opcode::LE),
            Instr::Gt => w.write_u8(opcode::GT),
            Instr::Ge => w.write_u8(opcode::GE),
            Instr::Eq => w.write_u8(opcode::EQ),
            Instr::Ne => w.write_u8(opcode::NE),
            Instr::And => w.write_u8(opcode::AND),
            Instr::Or => w.write_u8(opcode::OR),
            Instr::Not => w.write_u8(opcode::NOT),

            Instr::StoreGlobal(slot) => {
                w.write_u8(opcode::STORE_GLOBAL);
                w.write_u32(*slot);
            }
            Instr::PushLocal => w.write_u8(opcode::PUSH_LOCAL),
            Instr::StoreLocal(slot) => {
                w.write_u8(opcode::STORE_LOCAL);
                w.write_u32(*slot);
            }
            Instr::StoreObjectMember(name) => {
                w.write_u8(opcode::STORE_OBJECT_MEMBER);
                let id = self.string(name);
                w.write_u32(id);
            }
            Instr::StoreArrayElement => w.write_u8(opcode::STORE_ARRAY_ELEMENT),

            Instr::If {
                then_body,
                else_body,
            } => {
                w.write_u8(opcode::IF);
                self.write_list(w, then_body);
                self.write_list(w, else_body);
            }
            Instr::Loop(body) => {
                w.write_u8(opcode::LOOP);
                self.write_list(w, body);
            }
            Instr::Tick(body) => {
                w.write_u8(opcode::TICK);
                self.write_list(w, body);
            }
            Instr::Continue => w.write_u8(opcode::CONTINUE),
            Instr::Break => w.write_u8(opcode::BREAK),
            Instr::Call(id) => {
                w.write_u8(opcode::CALL);
                w.write_u32(*id);
            }
            Instr::CallBuiltin(id) => {
                w.write_u8(opcode::CALL_BUILTIN);
                w.write_u32(*id);
            }
            Instr::Return => w.write_u8(opcode::RETURN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{BuiltinTable, Function};
    use crate::frontend::token::Source;

    fn program(global_body: Vec<Instr>) -> Program {
        Program {
            functions: vec![],
            globals: vec![],
            global_body,
            builtins: BuiltinTable::default(),
        }
    }

    #[test]
    fn test_writer_alignment() {
        let mut w = BinaryWriter::new();
        w.write_u8(1);
        w.write_u16(2);
        w.write_u8(3);
        w.write_u32(4);
        w.write_u8(5);
        w.write_i64(6);
        assert_eq!(
            w.into_bytes(),
            vec![
                1, 0, 2, 0, // u8, pad, u16
                3, 0, 0, 0, 4, 0, 0, 0, // u8, pad, u32
                5, 0, 0, 0, 6, 0, 0, 0, 0, 0, 0, 0, // u8, pad, i64
            ]
        );
    }

    #[test]
    fn test_header() {
        let bytes = encode(&program(vec![]));
        assert_eq!(&bytes[0..4], b"BGTN");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), VERSION);
    }

    #[test]
    fn test_strings_are_interned_once() {
        let mut encoder = Encoder::default();
        encoder.encode(&program(vec![
            Instr::LoadString("hello".into()),
            Instr::LoadString("world".into()),
            Instr::LoadString("hello".into()),
            Instr::LoadObjectMember("hello".into()),
        ]));
        assert_eq!(encoder.strings(), ["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_shapes_are_interned_once() {
        let mut encoder = Encoder::default();
        encoder.encode(&program(vec![
            Instr::LoadObject(vec!["x".into(), "y".into()]),
            Instr::LoadObject(vec!["y".into(), "x".into()]),
            Instr::LoadObject(vec!["x".into(), "y".into()]),
        ]));
        assert_eq!(encoder.shapes(), [vec![0u32, 1], vec![1u32, 0]]);
    }

    #[test]
    fn test_table_names_come_first() {
        let mut encoder = Encoder::default();
        let mut p = program(vec![Instr::LoadString("z".into())]);
        p.globals = vec!["g".into()];
        p.functions = vec![Function {
            name: "f".into(),
            arity: 0,
            source: Source::new(1, "main.bt"),
            body: vec![Instr::LoadString("y".into())],
        }];
        encoder.encode(&p);
        assert_eq!(encoder.strings(), ["g", "f", "main.bt", "y", "z"].map(String::from));
    }
}
