use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bytecode::decode::{LoadedBuiltin, LoadedFunction, LoadedProgram};
use crate::bytecode::op::{Body, Op};
use crate::error::ErrorCode;
use crate::frontend::token::Source;
use crate::lang::value::{Heap, Str, VALUE_SIZE, Value};
use crate::runtime::runtime_error::{RuntimeError, TraceEntry};

/// Per-instance resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Instructions per tick, builtin calls weighted by their cost.
    pub instruction_limit: u64,
    /// Bytes of operands, variables and compound values.
    pub memory_limit: usize,
    pub max_call_depth: usize,
    /// Maximum flattened length of a tuple.
    pub max_tuple_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            instruction_limit: 1000,
            memory_limit: 1024,
            max_call_depth: 32,
            max_tuple_size: 4,
        }
    }
}

/// What the host has to do after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecStatus {
    /// Keep stepping.
    Continue,
    /// Run builtin `id` with `args`, then hand the result to `push_result`.
    ExecBuiltin { id: u32, args: Vec<Value> },
    /// A `tick` body finished a pass; resume next tick.
    AwaitNextTick,
    /// The global body ran to its end.
    Complete,
    /// This tick's budget is used up; resume next tick.
    ExceededInstrLimit,
    /// The program faulted and will not run again.
    Error(RuntimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Global,
    Function,
    Loop,
    Tick,
    If,
}

#[derive(Debug, Clone)]
struct Frame {
    kind: FrameKind,
    body: Body,
    pc: usize,
    /// Length of the local stack when the frame was entered.
    locals_base: usize,
}

#[derive(Debug, Clone)]
struct CallRecord {
    name: Arc<str>,
    line: u32,
    file: Arc<str>,
}

#[derive(Debug, Clone)]
enum State {
    Running,
    AwaitingBuiltin,
    Complete,
    Faulted(RuntimeError),
}

/// Stack machine executing one loaded program. Suspends at tick
/// boundaries, at builtin calls and when the tick budget runs out.
pub struct Vm {
    config: VmConfig,
    strings: Vec<Arc<Str>>,
    shapes: Vec<Arc<[Arc<str>]>>,
    functions: Vec<LoadedFunction>,
    builtins: Vec<LoadedBuiltin>,
    global_names: Vec<u32>,
    heap: Heap,

    operands: Vec<Value>,
    locals: Vec<Value>,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    calls: Vec<CallRecord>,

    line: u32,
    file: Arc<str>,
    used_instructions: u64,
    log: Vec<String>,
    state: State,
}

fn unknown_file() -> Arc<str> {
    Arc::from("<unknown>")
}

impl Vm {
    /// Loads a program binary.
    pub fn new(binary: &[u8], config: VmConfig) -> Result<Vm, RuntimeError> {
        let malformed = |detail: String| {
            RuntimeError::new(ErrorCode::MalformedProgram, Source::new(0, "<unknown>"))
                .with_detail(detail)
        };
        let program = LoadedProgram::decode(binary).map_err(|e| malformed(e.to_string()))?;

        let shapes: Vec<Arc<[Arc<str>]>> = program
            .shapes
            .iter()
            .map(|shape| {
                shape
                    .iter()
                    .map(|id| program.string(*id).cloned())
                    .collect::<Option<Vec<_>>>()
                    .map(Arc::from)
                    .ok_or_else(|| malformed("shape references a missing string".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let strings = program.strings.iter().cloned().map(Str::constant).collect();

        debug!(
            functions = program.functions.len(),
            globals = program.globals.len(),
            builtins = program.builtins.len(),
            "loaded program"
        );

        let global_frame = Frame {
            kind: FrameKind::Global,
            body: Arc::clone(&program.global_body),
            pc: 0,
            locals_base: 0,
        };
        Ok(Vm {
            config,
            strings,
            shapes,
            globals: vec![Value::Null; program.globals.len()],
            functions: program.functions,
            builtins: program.builtins,
            global_names: program.globals,
            heap: Heap::new(),
            operands: Vec::new(),
            locals: Vec::new(),
            frames: vec![global_frame],
            calls: Vec::new(),
            line: 0,
            file: unknown_file(),
            used_instructions: 0,
            log: Vec::new(),
            state: State::Running,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Allocator for compound values owned by this program.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Resets the instruction budget. Call once per simulation tick.
    pub fn start_tick(&mut self) {
        self.used_instructions = 0;
    }

    pub fn used_instructions(&self) -> u64 {
        self.used_instructions
    }

    pub fn used_memory(&self) -> usize {
        let slots = self.operands.len() + self.locals.len() + self.globals.len();
        self.heap.used() + slots * VALUE_SIZE
    }

    pub fn current_line(&self) -> u32 {
        self.line
    }

    pub fn current_file(&self) -> &str {
        &self.file
    }

    pub fn current_source(&self) -> Source {
        Source {
            line: self.line,
            file: Arc::clone(&self.file),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    pub fn fault(&self) -> Option<&RuntimeError> {
        match &self.state {
            State::Faulted(err) => Some(err),
            _ => None,
        }
    }

    /// Name of builtin `id` as recorded in the loaded program.
    pub fn builtin_name(&self, id: u32) -> Option<&str> {
        let builtin = self.builtins.get(id as usize)?;
        self.strings.get(builtin.name as usize).map(|s| s.as_str())
    }

    /// Current value of a global variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        let slot = self
            .global_names
            .iter()
            .position(|id| self.strings.get(*id as usize).map(|s| s.as_str()) == Some(name))?;
        self.globals.get(slot).cloned()
    }

    /// Active calls, latest first, each with its call site.
    pub fn collect_backtrace(&self) -> Vec<TraceEntry> {
        self.calls
            .iter()
            .rev()
            .map(|c| TraceEntry {
                name: Arc::clone(&c.name),
                line: c.line,
                file: Arc::clone(&c.file),
            })
            .collect()
    }

    pub fn log_line(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn drain_log_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log)
    }

    /// Builds an error at the current location with the current backtrace.
    pub fn error(&self, code: ErrorCode) -> RuntimeError {
        RuntimeError::new(code, self.current_source()).with_backtrace(self.collect_backtrace())
    }

    /// Halts the program permanently with `err`.
    pub fn fail(&mut self, err: RuntimeError) -> ExecStatus {
        debug!(code = err.code.id(), line = err.location.line, "program faulted");
        self.state = State::Faulted(err.clone());
        ExecStatus::Error(err)
    }

    /// Completes a pending builtin call with its result.
    pub fn push_result(&mut self, value: Value) -> Result<(), RuntimeError> {
        if !matches!(self.state, State::AwaitingBuiltin) {
            let err = self.error(ErrorCode::NotAwaitingBuiltin);
            self.fail(err.clone());
            return Err(err);
        }
        self.operands.push(value);
        self.state = State::Running;
        Ok(())
    }

    /// Steps until something other than `Continue` happens.
    pub fn step_batch(&mut self) -> ExecStatus {
        loop {
            let status = self.step();
            if status != ExecStatus::Continue {
                return status;
            }
        }
    }

    /// Executes one instruction or frame transition.
    pub fn step(&mut self) -> ExecStatus {
        match &self.state {
            State::Running => {}
            State::Complete => return ExecStatus::Complete,
            State::Faulted(err) => return ExecStatus::Error(err.clone()),
            State::AwaitingBuiltin => {
                let err = self.error(ErrorCode::AwaitingBuiltin);
                return self.fail(err);
            }
        }
        if self.used_instructions >= self.config.instruction_limit {
            return ExecStatus::ExceededInstrLimit;
        }
        if self.used_memory() > self.config.memory_limit {
            let err = self.error(ErrorCode::ExceededMemoryLimit);
            return self.fail(err);
        }
        self.used_instructions += 1;

        match self.exec_next() {
            Ok(status) => status,
            Err(err) => self.fail(err),
        }
    }

    // ==== Execution ====

    fn exec_next(&mut self) -> Result<ExecStatus, RuntimeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(self.error(ErrorCode::MalformedProgram));
        };
        let Some(op) = frame.body.get(frame.pc).cloned() else {
            return self.end_frame();
        };
        frame.pc += 1;
        self.exec(op)
    }

    fn end_frame(&mut self) -> Result<ExecStatus, RuntimeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(self.error(ErrorCode::MalformedProgram));
        };
        let base = frame.locals_base;
        match frame.kind {
            FrameKind::Global => {
                self.state = State::Complete;
                trace!("program complete");
                return Ok(ExecStatus::Complete);
            }
            FrameKind::Loop => {
                frame.pc = 0;
                self.locals.truncate(base);
            }
            FrameKind::Tick => {
                frame.pc = 0;
                self.locals.truncate(base);
                return Ok(ExecStatus::AwaitNextTick);
            }
            FrameKind::If => {
                self.frames.pop();
                self.locals.truncate(base);
            }
            FrameKind::Function => {
                self.frames.pop();
                self.locals.truncate(base);
                self.return_to_caller();
                self.operands.push(Value::Null);
            }
        }
        Ok(ExecStatus::Continue)
    }

    fn return_to_caller(&mut self) {
        if let Some(call) = self.calls.pop() {
            self.line = call.line;
            self.file = call.file;
        }
    }

    fn enter(&mut self, kind: FrameKind, body: Body) {
        self.frames.push(Frame {
            kind,
            body,
            pc: 0,
            locals_base: self.locals.len(),
        });
    }

    /// Pops `If` frames, leaving the innermost loop-like frame on top.
    fn unwind_to_loop(&mut self) -> Result<(), RuntimeError> {
        while let Some(frame) = self.frames.last() {
            match frame.kind {
                FrameKind::If => {
                    let base = frame.locals_base;
                    self.frames.pop();
                    self.locals.truncate(base);
                }
                FrameKind::Loop | FrameKind::Tick => return Ok(()),
                FrameKind::Global | FrameKind::Function => break,
            }
        }
        Err(self.error(ErrorCode::MalformedProgram))
    }

    fn exec(&mut self, op: Op) -> Result<ExecStatus, RuntimeError> {
        match op {
            Op::SourceLine(line) => self.line = line,
            Op::SourceFile(id) => {
                let file = self.string(id)?;
                self.file = Arc::from(file.as_str());
            }
            Op::Discard => {
                self.pop()?;
            }

            // ==== Values ====
            Op::LoadNull => self.operands.push(Value::Null),
            Op::LoadInt(n) => self.operands.push(Value::Int(n)),
            Op::LoadFloat(n) => self.operands.push(Value::Float(n)),
            Op::LoadString(id) => {
                let s = self.string(id)?;
                self.operands.push(Value::String(s));
            }
            Op::LoadTuple(n) => {
                let items = self.pop_n(n as usize)?;
                let tuple = self.heap.tuple(items);
                if tuple.flat_len() > self.config.max_tuple_size {
                    return Err(self.error(ErrorCode::TupleTooBig));
                }
                self.operands.push(tuple);
            }
            Op::LoadObject(id) => {
                let names = self
                    .shapes
                    .get(id as usize)
                    .cloned()
                    .ok_or_else(|| self.error(ErrorCode::ShapeIdInvalid))?;
                let values = self.pop_n(names.len())?;
                let object = self.heap.object(names, values);
                self.operands.push(object);
            }
            Op::LoadArray(n) => {
                let n = n as usize;
                if n > self.max_array_size() {
                    return Err(self.error(ErrorCode::ArrayTooBig));
                }
                let items = self.pop_n(n)?;
                let array = self.heap.array(items);
                self.operands.push(array);
            }
            Op::LoadTupleMember(i) => {
                let value = match self.pop()? {
                    Value::Tuple(t) => t.items().get(i as usize).cloned(),
                    _ => return Err(self.error(ErrorCode::OperandNotTuple)),
                };
                let value = value.ok_or_else(|| self.error(ErrorCode::TupleIndexOob))?;
                self.operands.push(value);
            }
            Op::LoadObjectMember(id) => {
                let name = self.string(id)?;
                let value = match self.pop()? {
                    Value::Object(o) => o.get(name.as_str()),
                    _ => return Err(self.error(ErrorCode::OperandNotObject)),
                };
                let value = value.ok_or_else(|| self.error(ErrorCode::InvalidObjectMember))?;
                self.operands.push(value);
            }
            Op::LoadArrayElement => {
                let index = self.pop_int()?;
                let value = match self.pop()? {
                    Value::Array(a) => usize::try_from(index).ok().and_then(|i| a.get(i)),
                    _ => return Err(self.error(ErrorCode::OperandNotArray)),
                };
                let value = value.ok_or_else(|| self.error(ErrorCode::ArrayIndexOob))?;
                self.operands.push(value);
            }
            Op::LoadGlobal(slot) => {
                let value = self
                    .globals
                    .get(slot as usize)
                    .cloned()
                    .ok_or_else(|| self.error(ErrorCode::GlobalRefInvalid))?;
                self.operands.push(value);
            }
            Op::LoadLocal(slot) => {
                let idx = self.local_index(slot)?;
                self.operands.push(self.locals[idx].clone());
            }

            // ==== Operators ====
            Op::Add => self.arith(i64::wrapping_add, |a, b| a + b)?,
            Op::Sub => self.arith(i64::wrapping_sub, |a, b| a - b)?,
            Op::Mul => self.arith(i64::wrapping_mul, |a, b| a * b)?,
            Op::Div | Op::Rem => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = match (a, b) {
                    (Value::Int(_), Value::Int(0)) => {
                        return Err(self.error(ErrorCode::IntDivisionByZero));
                    }
                    (Value::Int(a), Value::Int(b)) if op == Op::Div => Value::Int(a.wrapping_div(b)),
                    (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_rem(b)),
                    (Value::Float(a), Value::Float(b)) if op == Op::Div => Value::Float(a / b),
                    (Value::Float(a), Value::Float(b)) => Value::Float(a % b),
                    _ => return Err(self.error(ErrorCode::OperandsNotNumbers)),
                };
                self.operands.push(result);
            }
            Op::Negate => {
                let result = match self.pop()? {
                    Value::Int(n) => Value::Int(n.wrapping_neg()),
                    Value::Float(n) => Value::Float(-n),
                    _ => return Err(self.error(ErrorCode::OperandsNotNumbers)),
                };
                self.operands.push(result);
            }
            Op::Lt => self.compare(|o| o.is_lt())?,
            Op::Le => self.compare(|o| o.is_le())?,
            Op::Gt => self.compare(|o| o.is_gt())?,
            Op::Ge => self.compare(|o| o.is_ge())?,
            Op::Eq | Op::Ne => {
                let b = self.pop()?;
                let a = self.pop()?;
                let equal = a == b;
                self.operands
                    .push(Value::from_bool(if op == Op::Eq { equal } else { !equal }));
            }
            Op::And => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.operands.push(if a.is_truthy() { b } else { a });
            }
            Op::Or => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.operands.push(if a.is_truthy() { a } else { b });
            }
            Op::Not => {
                let a = self.pop()?;
                self.operands.push(Value::from_bool(!a.is_truthy()));
            }

            // ==== Stores ====
            Op::StoreGlobal(slot) => {
                let value = self.pop()?;
                let slot = slot as usize;
                if slot >= self.globals.len() {
                    return Err(self.error(ErrorCode::GlobalRefInvalid));
                }
                self.globals[slot] = value;
            }
            Op::PushLocal => {
                let value = self.pop()?;
                self.locals.push(value);
            }
            Op::StoreLocal(slot) => {
                let value = self.pop()?;
                let idx = self.local_index(slot)?;
                self.locals[idx] = value;
            }
            Op::StoreObjectMember(id) => {
                let value = self.pop()?;
                let name = self.string(id)?;
                let stored = match self.pop()? {
                    Value::Object(o) => o.set(name.as_str(), value),
                    _ => return Err(self.error(ErrorCode::OperandNotObject)),
                };
                if !stored {
                    return Err(self.error(ErrorCode::InvalidObjectMember));
                }
            }
            Op::StoreArrayElement => {
                let value = self.pop()?;
                let index = self.pop_int()?;
                let stored = match self.pop()? {
                    Value::Array(a) => usize::try_from(index).is_ok_and(|i| a.set(i, value)),
                    _ => return Err(self.error(ErrorCode::OperandNotArray)),
                };
                if !stored {
                    return Err(self.error(ErrorCode::ArrayIndexOob));
                }
            }

            // ==== Control flow ====
            Op::If {
                then_body,
                else_body,
            } => {
                let body = if self.pop()?.is_truthy() {
                    then_body
                } else {
                    else_body
                };
                if !body.is_empty() {
                    self.enter(FrameKind::If, body);
                }
            }
            Op::Loop(body) => self.enter(FrameKind::Loop, body),
            Op::Tick(body) => self.enter(FrameKind::Tick, body),
            Op::Continue => {
                self.unwind_to_loop()?;
                // a tick pass still ends with its yield
                return self.end_frame();
            }
            Op::Break => {
                self.unwind_to_loop()?;
                if let Some(frame) = self.frames.pop() {
                    self.locals.truncate(frame.locals_base);
                }
            }
            Op::Call(id) => {
                let function = self
                    .functions
                    .get(id as usize)
                    .ok_or_else(|| self.error(ErrorCode::FunctionRefInvalid))?;
                let body = Arc::clone(&function.body);
                let name = self.string(function.name)?;
                if self.calls.len() + 1 > self.config.max_call_depth {
                    return Err(self.error(ErrorCode::ExceededMaxCallDepth));
                }
                self.calls.push(CallRecord {
                    name: Arc::from(name.as_str()),
                    line: self.line,
                    file: Arc::clone(&self.file),
                });
                self.enter(FrameKind::Function, body);
            }
            Op::CallBuiltin(id) => {
                let builtin = self
                    .builtins
                    .get(id as usize)
                    .ok_or_else(|| self.error(ErrorCode::BuiltinRefInvalid))?;
                let (arity, cost) = (builtin.arity as usize, builtin.cost as u64);
                let args = self.pop_n(arity)?;
                // this instruction was already charged once
                self.used_instructions += cost.saturating_sub(1);
                self.state = State::AwaitingBuiltin;
                return Ok(ExecStatus::ExecBuiltin { id, args });
            }
            Op::Return => {
                let value = self.pop()?;
                loop {
                    let Some(frame) = self.frames.pop() else {
                        return Err(self.error(ErrorCode::MalformedProgram));
                    };
                    self.locals.truncate(frame.locals_base);
                    match frame.kind {
                        FrameKind::Function => break,
                        FrameKind::Global => {
                            return Err(self.error(ErrorCode::MalformedProgram));
                        }
                        _ => {}
                    }
                }
                self.return_to_caller();
                self.operands.push(value);
            }
        }
        Ok(ExecStatus::Continue)
    }

    // ==== Helpers ====

    /// Longest array the memory limit could hold.
    pub fn max_array_size(&self) -> usize {
        self.config.memory_limit / VALUE_SIZE
    }

    fn string(&self, id: u32) -> Result<Arc<Str>, RuntimeError> {
        self.strings
            .get(id as usize)
            .cloned()
            .ok_or_else(|| self.error(ErrorCode::StringIdInvalid))
    }

    fn local_index(&self, slot: u32) -> Result<usize, RuntimeError> {
        let base = self
            .frames
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::Function)
            .map_or(0, |f| f.locals_base);
        self.locals
            .len()
            .checked_sub(1 + slot as usize)
            .filter(|idx| *idx >= base)
            .ok_or_else(|| self.error(ErrorCode::LocalIndexOob))
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.operands
            .pop()
            .ok_or_else(|| self.error(ErrorCode::MissingOperand))
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            _ => Err(self.error(ErrorCode::OperandNotInteger)),
        }
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        if n > self.operands.len() {
            return Err(self.error(ErrorCode::MissingOperand));
        }
        let at = self.operands.len() - n;
        Ok(self.operands.split_off(at))
    }

    fn arith(
        &mut self,
        int: fn(i64, i64) -> i64,
        float: fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (a, b) {
            (Value::Int(a), Value::Int(b)) => Value::Int(int(a, b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(float(a, b)),
            _ => return Err(self.error(ErrorCode::OperandsNotNumbers)),
        };
        self.operands.push(result);
        Ok(())
    }

    fn compare(&mut self, test: fn(std::cmp::Ordering) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (a, b) {
            (Value::Int(a), Value::Int(b)) => test(a.cmp(&b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(&b).is_some_and(test),
            _ => return Err(self.error(ErrorCode::OperandsNotNumbers)),
        };
        self.operands.push(Value::from_bool(result));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{BuiltinSignature, BuiltinTable};
    use crate::compiler::{SourceFile, compile};
    use crate::lang::feature::FeatureSet;

    fn builtins() -> BuiltinTable {
        BuiltinTable {
            functions: vec![BuiltinSignature {
                name: "sense".into(),
                arity: 1,
                cost: 5,
            }],
        }
    }

    fn load_with(source: &str, config: VmConfig) -> Vm {
        let binary = compile(
            &[SourceFile::new("test.bt", source)],
            FeatureSet::all(),
            &builtins(),
        )
        .expect("compile");
        let mut vm = Vm::new(&binary, config).expect("load");
        vm.start_tick();
        vm
    }

    fn load(source: &str) -> Vm {
        load_with(source, VmConfig::default())
    }

    fn run(source: &str) -> Vm {
        let mut vm = load(source);
        let status = vm.step_batch();
        assert_eq!(status, ExecStatus::Complete);
        vm
    }

    fn assert_error(source: &str, code: ErrorCode, line: u32) -> RuntimeError {
        let mut vm = load(source);
        match vm.step_batch() {
            ExecStatus::Error(err) => {
                assert_eq!(err.code, code, "{err}");
                assert_eq!(err.location.line, line, "{err}");
                err
            }
            other => panic!("expected {code:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic() {
        let vm = run("var x = 1 + 2 * 3 - 8 / 3 % 2\nvar y = -x");
        assert_eq!(vm.global("x"), Some(Value::Int(7)));
        assert_eq!(vm.global("y"), Some(Value::Int(-7)));
    }

    #[test]
    fn test_wrapping() {
        let vm = run("var x = 9223372036854775807 + 1");
        assert_eq!(vm.global("x"), Some(Value::Int(i64::MIN)));
    }

    #[test]
    fn test_logic_returns_operands() {
        let vm = run("var a = 0 or 5\nvar b = 3 and \"s\"\nvar c = not null\nvar d = 2.0 < 2.5");
        assert_eq!(vm.global("a"), Some(Value::Int(5)));
        assert_eq!(vm.global("b").and_then(|v| v.as_str().map(str::to_owned)), Some("s".into()));
        assert_eq!(vm.global("c"), Some(Value::Int(1)));
        assert_eq!(vm.global("d"), Some(Value::Int(1)));
    }

    #[test]
    fn test_instruction_limit_resumes() {
        let mut vm = load("var i = 0\nwhile i < 500 {\n    i = i + 1\n}");
        assert_eq!(vm.step_batch(), ExecStatus::ExceededInstrLimit);
        assert_eq!(vm.used_instructions(), 1000);
        let partial = match vm.global("i") {
            Some(Value::Int(n)) => n,
            other => panic!("{other:?}"),
        };
        assert!(partial > 0 && partial < 500);

        // budget stays exhausted until the next tick
        assert_eq!(vm.step(), ExecStatus::ExceededInstrLimit);

        let mut ticks = 1;
        loop {
            vm.start_tick();
            ticks += 1;
            match vm.step_batch() {
                ExecStatus::ExceededInstrLimit => continue,
                ExecStatus::Complete => break,
                other => panic!("{other:?}"),
            }
        }
        assert!(ticks > 2);
        assert_eq!(vm.global("i"), Some(Value::Int(500)));
    }

    #[test]
    fn test_tick_yields() {
        let mut vm = load("var n = 0\ntick {\n    n = n + 1\n}");
        assert_eq!(vm.step_batch(), ExecStatus::AwaitNextTick);
        assert_eq!(vm.global("n"), Some(Value::Int(1)));
        vm.start_tick();
        assert_eq!(vm.step_batch(), ExecStatus::AwaitNextTick);
        assert_eq!(vm.global("n"), Some(Value::Int(2)));
    }

    #[test]
    fn test_continue_in_tick_yields() {
        let mut vm = load("var n = 0\ntick {\n    n = n + 1\n    if n < 5 {\n        continue\n    }\n}");
        assert_eq!(vm.step_batch(), ExecStatus::AwaitNextTick);
        assert_eq!(vm.global("n"), Some(Value::Int(1)));
        vm.start_tick();
        assert_eq!(vm.step_batch(), ExecStatus::AwaitNextTick);
        assert_eq!(vm.global("n"), Some(Value::Int(2)));
    }

    #[test]
    fn test_local_shadows_global_only_in_function() {
        let vm = run("\
var x = 5
var seen = 0
fun f() {
    var x = 1
    seen = x
}
f()");
        assert_eq!(vm.global("x"), Some(Value::Int(5)));
        assert_eq!(vm.global("seen"), Some(Value::Int(1)));
    }

    #[test]
    fn test_nested_break_and_continue() {
        let source = "\
var r = 0
var skipped = 0
loop {
    loop {
        r = r + 1
        if r < 3 {
            skipped = skipped + 1
            continue
        }
        break
    }
    r = r * 10
    break
}";
        let vm = run(source);
        assert_eq!(vm.global("r"), Some(Value::Int(30)));
        assert_eq!(vm.global("skipped"), Some(Value::Int(2)));
    }

    #[test]
    fn test_return_unwinds_frames() {
        let source = "\
fun first_over(n, limit) {
    loop {
        if n > limit {
            return n
        }
        n = n + 1
    }
}
fun nothing() { }
var x = first_over(0, 3)
var y = nothing()";
        let vm = run(source);
        assert_eq!(vm.global("x"), Some(Value::Int(4)));
        assert_eq!(vm.global("y"), Some(Value::Null));
    }

    #[test]
    fn test_loop_iterations_release_locals() {
        let mut vm = load("var i = 0\nwhile i < 20 {\n    var a = i\n    var b = a\n    i = b + 1\n}");
        assert_eq!(vm.step_batch(), ExecStatus::Complete);
        assert_eq!(vm.global("i"), Some(Value::Int(20)));
        assert_eq!(vm.used_memory(), VALUE_SIZE);
    }

    #[test]
    fn test_compound_values() {
        let source = "\
var t = (1, (2, 3))
var o = { x = 1, y = t.1.0 }
o.x = o.y + 5
var a = [10, 20, 30]
a[1] = a[0] + a[2]";
        let vm = run(source);
        match vm.global("o") {
            Some(Value::Object(o)) => assert_eq!(o.get("x"), Some(Value::Int(7))),
            other => panic!("{other:?}"),
        }
        match vm.global("a") {
            Some(Value::Array(a)) => assert_eq!(a.get(1), Some(Value::Int(40))),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_runtime_errors() {
        assert_error("var x = 1\nvar y = x / 0", ErrorCode::IntDivisionByZero, 2);
        assert_error("var x = 1 % 0", ErrorCode::IntDivisionByZero, 1);
        assert_error("var t = (1, 2, (3, 4, 5))", ErrorCode::TupleTooBig, 1);
        assert_error("var t = (1, 2)\nvar x = t.2", ErrorCode::TupleIndexOob, 2);
        assert_error("var x = 1 + 1.0", ErrorCode::OperandsNotNumbers, 1);
        assert_error("var x = 1\nvar y = x.0", ErrorCode::OperandNotTuple, 2);
        assert_error("var o = { a = 1 }\nvar x = o.b", ErrorCode::InvalidObjectMember, 2);
        assert_error("var a = [1]\nvar x = a[1]", ErrorCode::ArrayIndexOob, 2);
        assert_error("var a = [1]\nvar x = a[-1]", ErrorCode::ArrayIndexOob, 2);
        assert_error("var a = [1]\nvar x = a[0.0]", ErrorCode::OperandNotInteger, 2);
        assert_error("fun f() { return f() }\nf()", ErrorCode::ExceededMaxCallDepth, 1);
    }

    #[test]
    fn test_backtrace() {
        let source = "\
fun inner() { return 1 / 0 }
fun outer() {
    return inner()
}
outer()";
        let err = assert_error(source, ErrorCode::IntDivisionByZero, 1);
        let trace: Vec<_> = err
            .backtrace
            .iter()
            .map(|e| (e.name.to_string(), e.line))
            .collect();
        assert_eq!(trace, vec![("inner".to_string(), 3), ("outer".to_string(), 5)]);
    }

    #[test]
    fn test_builtin_protocol() {
        let mut vm = load("var x = sense(41) + 1");
        let before = vm.used_instructions();
        match vm.step_batch() {
            ExecStatus::ExecBuiltin { id, args } => {
                assert_eq!(id, 0);
                assert_eq!(args, vec![Value::Int(41)]);
            }
            other => panic!("{other:?}"),
        }
        assert!(vm.used_instructions() >= before + 5);
        vm.push_result(Value::Int(41)).expect("push");
        assert_eq!(vm.step_batch(), ExecStatus::Complete);
        assert_eq!(vm.global("x"), Some(Value::Int(42)));
    }

    #[test]
    fn test_builtin_protocol_misuse() {
        let mut vm = load("var x = 1");
        let err = vm.push_result(Value::Null).expect_err("not awaiting");
        assert_eq!(err.code, ErrorCode::NotAwaitingBuiltin);
        assert!(vm.fault().is_some());

        let mut vm = load("sense(1)");
        assert!(matches!(vm.step_batch(), ExecStatus::ExecBuiltin { .. }));
        match vm.step() {
            ExecStatus::Error(err) => assert_eq!(err.code, ErrorCode::AwaitingBuiltin),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_memory_limit() {
        let config = VmConfig {
            memory_limit: 256,
            ..VmConfig::default()
        };
        let zeros = vec!["0"; 256 / VALUE_SIZE].join(", ");
        let mut vm = load_with(&format!("var a = [{zeros}]"), config);
        match vm.step_batch() {
            ExecStatus::Error(err) => assert_eq!(err.code, ErrorCode::ExceededMemoryLimit),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_faults_are_sticky() {
        let mut vm = load("var x = 1 / 0");
        let first = vm.step_batch();
        assert!(matches!(first, ExecStatus::Error(_)));
        vm.start_tick();
        assert_eq!(vm.step_batch(), first);
    }

    #[test]
    fn test_malformed_binary() {
        let err = match Vm::new(&[1, 2, 3], VmConfig::default()) {
            Err(err) => err,
            Ok(_) => panic!("garbage loaded"),
        };
        assert_eq!(err.code, ErrorCode::MalformedProgram);
        assert!(err.is_internal());
    }
}
