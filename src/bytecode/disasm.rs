use std::fmt::Write;

use crate::bytecode::decode::LoadedProgram;
use crate::bytecode::op::Op;

/// Print disassembly of a loaded program
pub fn print_bc(program: &LoadedProgram) {
    print!("{}", disassemble(program));
}

/// Render the tables and every instruction list of a program
pub fn disassemble(program: &LoadedProgram) -> String {
    let mut out = String::new();
    out.push_str("=== BYTECODE PROGRAM ===\n\n");

    out.push_str("strings:\n");
    for (id, s) in program.strings.iter().enumerate() {
        let _ = writeln!(out, "  #{:<4} {:?}", id, s);
    }
    if !program.shapes.is_empty() {
        out.push_str("shapes:\n");
        for (id, shape) in program.shapes.iter().enumerate() {
            let names: Vec<String> = shape.iter().map(|n| string(program, *n)).collect();
            let _ = writeln!(out, "  @{:<4} {{{}}}", id, names.join(", "));
        }
    }
    if !program.builtins.is_empty() {
        out.push_str("builtins:\n");
        for (id, b) in program.builtins.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {:<5} {}/{} cost {}",
                id,
                string(program, b.name),
                b.arity,
                b.cost
            );
        }
    }
    if !program.globals.is_empty() {
        out.push_str("globals:\n");
        for (slot, name) in program.globals.iter().enumerate() {
            let _ = writeln!(out, "  {:<5} {}", slot, string(program, *name));
        }
    }
    out.push('\n');

    for (id, f) in program.functions.iter().enumerate() {
        let title = format!(
            "fun[{}] {}/{}  ({}:{})",
            id,
            string(program, f.name),
            f.arity,
            string(program, f.file),
            f.line
        );
        print_code_object(&mut out, program, &title, &f.body);
    }
    print_code_object(&mut out, program, "global", &program.global_body);
    out
}

fn string(program: &LoadedProgram, id: u32) -> String {
    match program.string(id) {
        Some(s) => s.to_string(),
        None => format!("<bad string #{}>", id),
    }
}

fn print_code_object(out: &mut String, program: &LoadedProgram, name: &str, ops: &[Op]) {
    out.push_str("════════════════════════════════════════\n");
    let _ = writeln!(out, " {}", name);
    let _ = writeln!(out, " {} instructions", ops.len());
    out.push_str("════════════════════════════════════════\n");
    disassemble_ops(out, program, ops, 0);
    out.push('\n');
}

/// Disassemble a slice of ops, nested bodies indented under their owner
pub fn disassemble_ops(out: &mut String, program: &LoadedProgram, ops: &[Op], indent: usize) {
    let prefix = "│ ".repeat(indent);
    for (ip, op) in ops.iter().enumerate() {
        let _ = write!(out, "{}{:04}  ", prefix, ip);
        match op {
            Op::If {
                then_body,
                else_body,
            } => {
                out.push_str("IF\n");
                nested(out, program, &prefix, "then", then_body, indent);
                if !else_body.is_empty() {
                    nested(out, program, &prefix, "else", else_body, indent);
                }
            }
            Op::Loop(body) => {
                out.push_str("LOOP\n");
                nested(out, program, &prefix, "body", body, indent);
            }
            Op::Tick(body) => {
                out.push_str("TICK\n");
                nested(out, program, &prefix, "body", body, indent);
            }
            _ => {
                out.push_str(&format_op(program, op));
                out.push('\n');
            }
        }
    }
}

fn nested(
    out: &mut String,
    program: &LoadedProgram,
    prefix: &str,
    label: &str,
    body: &[Op],
    indent: usize,
) {
    let _ = writeln!(out, "{}┌─ {} ({} instructions)", prefix, label, body.len());
    disassemble_ops(out, program, body, indent + 1);
    let _ = writeln!(out, "{}└─", prefix);
}

fn format_op(program: &LoadedProgram, op: &Op) -> String {
    match op {
        // Source tracking
        Op::SourceLine(line) => format!("SOURCE_LINE   {}", line),
        Op::SourceFile(id) => format!("SOURCE_FILE   #{} ; {}", id, string(program, *id)),
        Op::Discard => "DISCARD".to_string(),

        // Values
        Op::LoadNull => "LOAD_NULL".to_string(),
        Op::LoadInt(n) => format!("LOAD_INT      {}", n),
        Op::LoadFloat(n) => format!("LOAD_FLOAT    {:?}", n),
        Op::LoadString(id) => format!("LOAD_STRING   #{} ; {:?}", id, string(program, *id)),
        Op::LoadTuple(n) => format!("LOAD_TUPLE    {}", n),
        Op::LoadObject(shape) => format!("LOAD_OBJECT   @{}", shape),
        Op::LoadArray(n) => format!("LOAD_ARRAY    {}", n),
        Op::LoadTupleMember(i) => format!("LOAD_MEMBER   .{}", i),
        Op::LoadObjectMember(id) => format!("LOAD_MEMBER   .{}", string(program, *id)),
        Op::LoadArrayElement => "LOAD_ELEMENT".to_string(),
        Op::LoadGlobal(slot) => global(program, "LOAD_GLOBAL", *slot),
        Op::LoadLocal(slot) => format!("LOAD_LOCAL    {}", slot),

        // Operators
        Op::Add => "ADD".to_string(),
        Op::Sub => "SUB".to_string(),
        Op::Mul => "MUL".to_string(),
        Op::Div => "DIV".to_string(),
        Op::Rem => "REM".to_string(),
        Op::Negate => "NEGATE".to_string(),
        Op::Lt => "LT".to_string(),
        Op::Le => "LE".to_string(),
        Op::Gt => "GT".to_string(),
        Op::Ge => "GE".to_string(),
        Op::Eq => "EQ".to_string(),
        Op::Ne => "NE".to_string(),
        Op::And => "AND".to_string(),
        Op::Or => "OR".to_string(),
        Op::Not => "NOT".to_string(),

        // Stores
        Op::StoreGlobal(slot) => global(program, "STORE_GLOBAL", *slot),
        Op::PushLocal => "PUSH_LOCAL".to_string(),
        Op::StoreLocal(slot) => format!("STORE_LOCAL   {}", slot),
        Op::StoreObjectMember(id) => format!("STORE_MEMBER  .{}", string(program, *id)),
        Op::StoreArrayElement => "STORE_ELEMENT".to_string(),

        // Control flow
        Op::Continue => "CONTINUE".to_string(),
        Op::Break => "BREAK".to_string(),
        Op::Return => "RETURN".to_string(),
        Op::Call(id) => {
            let name = program
                .functions
                .get(*id as usize)
                .map(|f| string(program, f.name))
                .unwrap_or_else(|| "?".to_string());
            format!("CALL          {} ; {}", id, name)
        }
        Op::CallBuiltin(id) => {
            let name = program
                .builtins
                .get(*id as usize)
                .map(|b| string(program, b.name))
                .unwrap_or_else(|| "?".to_string());
            format!("CALL_BUILTIN  {} ; {}", id, name)
        }
        Op::If { .. } => "IF".to_string(),
        Op::Loop(_) => "LOOP".to_string(),
        Op::Tick(_) => "TICK".to_string(),
    }
}

fn global(program: &LoadedProgram, mnemonic: &str, slot: u32) -> String {
    let name = program
        .globals
        .get(slot as usize)
        .map(|id| string(program, *id))
        .unwrap_or_else(|| "?".to_string());
    format!("{:<13} {} ; {}", mnemonic, slot, name)
}
