use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bytecode::ir::{BuiltinTable, Function, Instr, Program};
use crate::error::{CompileError, ErrorCode};
use crate::frontend::token::Source;
use crate::lang::ast::{BinaryOp, Expr, ExprKind, FunctionDecl, Stmt, StmtKind, UnaryOp};
use crate::lang::feature::{Feature, FeatureSet};

/// Resolves names, checks features and lowers the AST into instruction
/// lists.
pub fn emit(
    ast: &[Stmt],
    features: FeatureSet,
    builtins: &BuiltinTable,
) -> Result<Program, CompileError> {
    Emitter::new(features, builtins).emit_program(ast)
}

/// Emits `SourceLine`/`SourceFile` only when the location changes.
struct SourceTracker {
    line: Option<u32>,
    file: Option<Arc<str>>,
}

impl SourceTracker {
    fn new() -> Self {
        SourceTracker {
            line: None,
            file: None,
        }
    }

    fn reset(&mut self) {
        self.line = None;
        self.file = None;
    }

    /// Forces the next location to be emitted again. Used around nested
    /// bodies, which do not run in emission order.
    fn invalidate_line(&mut self) {
        self.line = None;
    }

    fn mark(&mut self, source: &Source, instrs: &mut Vec<Instr>) {
        if self.file.as_deref() != Some(&*source.file) {
            self.file = Some(Arc::clone(&source.file));
            instrs.push(Instr::SourceFile(source.file.to_string()));
        }
        if self.line != Some(source.line) {
            self.line = Some(source.line);
            instrs.push(Instr::SourceLine(source.line));
        }
    }
}

#[derive(Clone)]
struct Scope {
    in_global: bool,
    in_function: bool,
    in_loop: bool,
    /// Names in declaration order; the last one sits on top of the local
    /// stack.
    locals: Vec<String>,
}

impl Scope {
    fn global() -> Self {
        Scope {
            in_global: true,
            in_function: false,
            in_loop: false,
            locals: Vec::new(),
        }
    }

    fn function(args: &[String]) -> Self {
        Scope {
            in_global: false,
            in_function: true,
            in_loop: false,
            locals: args.iter().rev().cloned().collect(),
        }
    }

    fn child(&self, in_loop: bool) -> Self {
        Scope {
            in_global: false,
            in_function: self.in_function,
            in_loop,
            locals: self.locals.clone(),
        }
    }

    /// Slot relative to the top of the local stack.
    fn local_slot(&self, name: &str) -> Option<u32> {
        let idx = self.locals.iter().rposition(|n| n == name)?;
        Some((self.locals.len() - 1 - idx) as u32)
    }
}

enum Callee {
    User(u32),
    Builtin(u32),
}

struct Emitter<'a> {
    features: FeatureSet,
    builtins: &'a BuiltinTable,
    functions: HashMap<String, (u32, u32)>,
    globals: HashMap<String, u32>,
    global_names: Vec<String>,
    tracker: SourceTracker,
}

impl<'a> Emitter<'a> {
    fn new(features: FeatureSet, builtins: &'a BuiltinTable) -> Self {
        Emitter {
            features,
            builtins,
            functions: HashMap::new(),
            globals: HashMap::new(),
            global_names: Vec::new(),
            tracker: SourceTracker::new(),
        }
    }

    fn require(&self, feature: Feature, source: &Source) -> Result<(), CompileError> {
        if self.features.contains(feature) {
            Ok(())
        } else {
            Err(CompileError::new(ErrorCode::FeatureUnsupported, source.clone()))
        }
    }

    // ==== Symbols ====

    fn collect_symbols<'s>(
        &mut self,
        ast: &'s [Stmt],
    ) -> Result<Vec<(&'s FunctionDecl, &'s Source)>, CompileError> {
        let mut decls = Vec::new();
        for stmt in ast {
            match &stmt.kind {
                StmtKind::Function(decl) => {
                    self.require(Feature::CustomFunctions, &stmt.source)?;
                    if self.functions.contains_key(&decl.name) {
                        return Err(CompileError::new(
                            ErrorCode::DuplicateFunction,
                            stmt.source.clone(),
                        ));
                    }
                    let id = decls.len() as u32;
                    self.functions
                        .insert(decl.name.clone(), (id, decl.args.len() as u32));
                    decls.push((decl, &stmt.source));
                }
                StmtKind::Var { name, .. } => {
                    if !self.globals.contains_key(name) {
                        self.globals
                            .insert(name.clone(), self.global_names.len() as u32);
                        self.global_names.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        Ok(decls)
    }

    fn resolve_call(&self, name: &str, argc: usize, source: &Source) -> Result<Callee, CompileError> {
        let (callee, arity) = if let Some(&(id, arity)) = self.functions.get(name) {
            (Callee::User(id), arity)
        } else if let Some((id, sig)) = self.builtins.find(name) {
            (Callee::Builtin(id), sig.arity)
        } else {
            return Err(CompileError::new(ErrorCode::UnknownFunction, source.clone()));
        };
        let argc = argc as u32;
        if argc < arity {
            return Err(CompileError::new(ErrorCode::TooFewCallArgs, source.clone()));
        }
        if argc > arity {
            return Err(CompileError::new(ErrorCode::TooManyCallArgs, source.clone()));
        }
        Ok(callee)
    }

    // ==== Program ====

    fn emit_program(mut self, ast: &[Stmt]) -> Result<Program, CompileError> {
        let decls = self.collect_symbols(ast)?;

        let mut functions = Vec::with_capacity(decls.len());
        for (decl, source) in decls {
            functions.push(self.emit_function(decl, source)?);
        }

        self.tracker.reset();
        let mut scope = Scope::global();
        let mut global_body = Vec::new();
        for stmt in ast {
            if !matches!(stmt.kind, StmtKind::Function(_)) {
                self.emit_statement(stmt, &mut scope, &mut global_body)?;
            }
        }

        debug!(
            functions = functions.len(),
            globals = self.global_names.len(),
            instructions = global_body.len(),
            "emitted program"
        );

        Ok(Program {
            functions,
            globals: self.global_names,
            global_body,
            builtins: self.builtins.clone(),
        })
    }

    fn emit_function(&mut self, decl: &FunctionDecl, source: &Source) -> Result<Function, CompileError> {
        self.tracker.reset();
        let mut body = Vec::new();
        // the caller pushed the arguments in order, so the last one is
        // popped first
        for _ in &decl.args {
            body.push(Instr::PushLocal);
        }
        let mut scope = Scope::function(&decl.args);
        for stmt in &decl.body {
            self.emit_statement(stmt, &mut scope, &mut body)?;
        }
        Ok(Function {
            name: decl.name.clone(),
            arity: decl.args.len() as u32,
            source: source.clone(),
            body,
        })
    }

    fn emit_body(&mut self, stmts: &[Stmt], mut scope: Scope) -> Result<Vec<Instr>, CompileError> {
        self.tracker.invalidate_line();
        let mut instrs = Vec::new();
        for stmt in stmts {
            self.emit_statement(stmt, &mut scope, &mut instrs)?;
        }
        self.tracker.invalidate_line();
        Ok(instrs)
    }

    // ==== Statements ====

    fn emit_statement(
        &mut self,
        stmt: &Stmt,
        scope: &mut Scope,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        self.tracker.mark(&stmt.source, instrs);
        match &stmt.kind {
            StmtKind::Assign { target, value } => self.emit_assignment(stmt, target, value, scope, instrs)?,
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.emit_expression(cond, scope, instrs)?;
                let then_body = self.emit_body(then_body, scope.child(scope.in_loop))?;
                let else_body = self.emit_body(else_body, scope.child(scope.in_loop))?;
                instrs.push(Instr::If {
                    then_body,
                    else_body,
                });
            }
            StmtKind::Loop(body) => {
                let body = self.emit_body(body, scope.child(true))?;
                instrs.push(Instr::Loop(body));
            }
            StmtKind::Tick(body) => {
                let body = self.emit_body(body, scope.child(true))?;
                instrs.push(Instr::Tick(body));
            }
            StmtKind::While { cond, body } => {
                // loop { <cond> not if { break } <body> }
                let inner_scope = scope.child(true);
                self.tracker.invalidate_line();
                let mut lowered = Vec::new();
                self.emit_expression(cond, &inner_scope, &mut lowered)?;
                lowered.push(Instr::Not);
                lowered.push(Instr::If {
                    then_body: vec![Instr::Break],
                    else_body: Vec::new(),
                });
                lowered.extend(self.emit_body(body, inner_scope)?);
                instrs.push(Instr::Loop(lowered));
            }
            StmtKind::Continue | StmtKind::Break => {
                if !scope.in_loop {
                    return Err(CompileError::new(
                        ErrorCode::LoopControlsOutsideLoop,
                        stmt.source.clone(),
                    ));
                }
                instrs.push(if matches!(stmt.kind, StmtKind::Break) {
                    Instr::Break
                } else {
                    Instr::Continue
                });
            }
            StmtKind::Return(value) => {
                if !scope.in_function {
                    return Err(CompileError::new(
                        ErrorCode::ReturnOutsideFunction,
                        stmt.source.clone(),
                    ));
                }
                self.emit_expression(value, scope, instrs)?;
                instrs.push(Instr::Return);
            }
            StmtKind::Var { name, value } => {
                self.emit_expression(value, scope, instrs)?;
                if scope.in_global {
                    let slot = self.globals.get(name).copied().ok_or_else(|| {
                        CompileError::new(ErrorCode::UnknownVariable, stmt.source.clone())
                    })?;
                    instrs.push(Instr::StoreGlobal(slot));
                } else {
                    instrs.push(Instr::PushLocal);
                    scope.locals.push(name.clone());
                }
            }
            StmtKind::Function(_) => {
                return Err(CompileError::new(
                    ErrorCode::FunctionInsideFunction,
                    stmt.source.clone(),
                ));
            }
            StmtKind::Expr(expr) => {
                self.emit_expression(expr, scope, instrs)?;
                instrs.push(Instr::Discard);
            }
        }
        Ok(())
    }

    fn emit_assignment(
        &mut self,
        stmt: &Stmt,
        target: &Expr,
        value: &Expr,
        scope: &Scope,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                self.emit_expression(value, scope, instrs)?;
                if let Some(slot) = scope.local_slot(name) {
                    instrs.push(Instr::StoreLocal(slot));
                } else if let Some(&slot) = self.globals.get(name) {
                    instrs.push(Instr::StoreGlobal(slot));
                } else {
                    return Err(CompileError::new(
                        ErrorCode::UnknownVariable,
                        target.source.clone(),
                    ));
                }
            }
            ExprKind::ObjectMember { value: object, name } => {
                self.require(Feature::Objects, &target.source)?;
                self.emit_expression(object, scope, instrs)?;
                self.emit_expression(value, scope, instrs)?;
                instrs.push(Instr::StoreObjectMember(name.clone()));
            }
            ExprKind::Index { value: array, index } => {
                self.require(Feature::DynamicMemory, &target.source)?;
                self.emit_expression(array, scope, instrs)?;
                self.emit_expression(index, scope, instrs)?;
                self.emit_expression(value, scope, instrs)?;
                instrs.push(Instr::StoreArrayElement);
            }
            _ => {
                return Err(CompileError::new(
                    ErrorCode::AssignmentToConst,
                    stmt.source.clone(),
                ));
            }
        }
        Ok(())
    }

    // ==== Expressions ====

    fn emit_all(&mut self, exprs: &[Expr], scope: &Scope, instrs: &mut Vec<Instr>) -> Result<(), CompileError> {
        for expr in exprs {
            self.emit_expression(expr, scope, instrs)?;
        }
        Ok(())
    }

    fn emit_expression(
        &mut self,
        expr: &Expr,
        scope: &Scope,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        self.tracker.mark(&expr.source, instrs);
        let instr = match &expr.kind {
            ExprKind::Identifier(name) => {
                if let Some(slot) = scope.local_slot(name) {
                    Instr::LoadLocal(slot)
                } else if let Some(&slot) = self.globals.get(name) {
                    Instr::LoadGlobal(slot)
                } else {
                    return Err(CompileError::new(
                        ErrorCode::UnknownVariable,
                        expr.source.clone(),
                    ));
                }
            }
            ExprKind::Null => Instr::LoadNull,
            ExprKind::Int(n) => Instr::LoadInt(*n),
            ExprKind::Float(n) => {
                self.require(Feature::Fpu, &expr.source)?;
                Instr::LoadFloat(*n)
            }
            ExprKind::String(s) => Instr::LoadString(s.clone()),
            ExprKind::Tuple(items) => {
                self.emit_all(items, scope, instrs)?;
                Instr::LoadTuple(items.len() as u32)
            }
            ExprKind::Object(members) => {
                self.require(Feature::Objects, &expr.source)?;
                for (_, value) in members {
                    self.emit_expression(value, scope, instrs)?;
                }
                Instr::LoadObject(members.iter().map(|(n, _)| n.clone()).collect())
            }
            ExprKind::Array(items) => {
                self.require(Feature::DynamicMemory, &expr.source)?;
                self.emit_all(items, scope, instrs)?;
                Instr::LoadArray(items.len() as u32)
            }
            ExprKind::Call { name, args } => {
                let callee = self.resolve_call(name, args.len(), &expr.source)?;
                self.emit_all(args, scope, instrs)?;
                match callee {
                    Callee::User(id) => Instr::Call(id),
                    Callee::Builtin(id) => Instr::CallBuiltin(id),
                }
            }
            ExprKind::TupleMember { value, index } => {
                self.emit_expression(value, scope, instrs)?;
                Instr::LoadTupleMember(*index)
            }
            ExprKind::ObjectMember { value, name } => {
                self.require(Feature::Objects, &expr.source)?;
                self.emit_expression(value, scope, instrs)?;
                Instr::LoadObjectMember(name.clone())
            }
            ExprKind::Index { value, index } => {
                self.require(Feature::DynamicMemory, &expr.source)?;
                self.emit_expression(value, scope, instrs)?;
                self.emit_expression(index, scope, instrs)?;
                Instr::LoadArrayElement
            }
            ExprKind::Unary { op, value } => {
                self.emit_expression(value, scope, instrs)?;
                match op {
                    UnaryOp::Negate => Instr::Negate,
                    UnaryOp::Not => Instr::Not,
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.emit_expression(left, scope, instrs)?;
                self.emit_expression(right, scope, instrs)?;
                match op {
                    BinaryOp::Add => Instr::Add,
                    BinaryOp::Sub => Instr::Sub,
                    BinaryOp::Mul => Instr::Mul,
                    BinaryOp::Div => Instr::Div,
                    BinaryOp::Rem => Instr::Rem,
                    BinaryOp::Lt => Instr::Lt,
                    BinaryOp::Le => Instr::Le,
                    BinaryOp::Gt => Instr::Gt,
                    BinaryOp::Ge => Instr::Ge,
                    BinaryOp::Eq => Instr::Eq,
                    BinaryOp::Ne => Instr::Ne,
                    BinaryOp::And => Instr::And,
                    BinaryOp::Or => Instr::Or,
                }
            }
        };
        instrs.push(instr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::BuiltinSignature;
    use crate::frontend::lexer::tokenize;
    use crate::frontend::parser::Parser;

    fn builtins() -> BuiltinTable {
        BuiltinTable {
            functions: vec![BuiltinSignature {
                name: "move".into(),
                arity: 2,
                cost: 10,
            }],
        }
    }

    fn compile_with(src: &str, features: FeatureSet) -> Result<Program, CompileError> {
        let tokens = tokenize("test.bt", src).expect("lexing should succeed");
        let ast = Parser::new(tokens).parse().expect("parsing should succeed");
        emit(&ast, features, &builtins())
    }

    fn compile(src: &str) -> Program {
        compile_with(src, FeatureSet::all()).expect("emission should succeed")
    }

    fn assert_error(src: &str, features: FeatureSet, code: ErrorCode) {
        match compile_with(src, features) {
            Ok(p) => panic!("expected {:?}, got {:?}", code, p),
            Err(e) => assert_eq!(e.code, code, "for source {:?}", src),
        }
    }

    /// Drops source tracking instructions, recursively.
    fn strip(instrs: &[Instr]) -> Vec<Instr> {
        instrs
            .iter()
            .filter(|i| !matches!(i, Instr::SourceLine(_) | Instr::SourceFile(_)))
            .map(|i| match i {
                Instr::If {
                    then_body,
                    else_body,
                } => Instr::If {
                    then_body: strip(then_body),
                    else_body: strip(else_body),
                },
                Instr::Loop(b) => Instr::Loop(strip(b)),
                Instr::Tick(b) => Instr::Tick(strip(b)),
                other => other.clone(),
            })
            .collect()
    }

    #[test]
    fn test_arithmetic() {
        let p = compile("var x = 1 + 2");
        assert_eq!(
            strip(&p.global_body),
            vec![
                Instr::LoadInt(1),
                Instr::LoadInt(2),
                Instr::Add,
                Instr::StoreGlobal(0)
            ]
        );
    }

    #[test]
    fn test_source_tracking() {
        let p = compile("var x = 1\nx = 2");
        assert_eq!(
            p.global_body,
            vec![
                Instr::SourceFile("test.bt".into()),
                Instr::SourceLine(1),
                Instr::LoadInt(1),
                Instr::StoreGlobal(0),
                Instr::SourceLine(2),
                Instr::LoadInt(2),
                Instr::StoreGlobal(0),
            ]
        );
    }

    #[test]
    fn test_float_requires_fpu() {
        assert_error("var x = 1.0", FeatureSet::empty(), ErrorCode::FeatureUnsupported);
        let p = compile_with("var x = 1.0", FeatureSet::empty().with(Feature::Fpu)).unwrap();
        assert!(strip(&p.global_body).contains(&Instr::LoadFloat(1.0)));
    }

    #[test]
    fn test_objects_and_arrays_require_features() {
        let no_objects = FeatureSet::all().iter().filter(|f| *f != Feature::Objects).collect();
        assert_error("var o = { a = 1 }", no_objects, ErrorCode::FeatureUnsupported);
        let no_memory = FeatureSet::all()
            .iter()
            .filter(|f| *f != Feature::DynamicMemory)
            .collect();
        assert_error("var a = [1, 2]", no_memory, ErrorCode::FeatureUnsupported);
        assert_error("var a = null a[0] = 1", no_memory, ErrorCode::FeatureUnsupported);
    }

    #[test]
    fn test_functions_require_feature() {
        assert_error("fun f() { }", FeatureSet::empty(), ErrorCode::FeatureUnsupported);
    }

    #[test]
    fn test_local_slots() {
        let p = compile("fun f(a, b) { var c = a return b }");
        let body = strip(&p.functions[0].body);
        // locals after binding: [b, a]; after c: [b, a, c]
        assert_eq!(
            body,
            vec![
                Instr::PushLocal,
                Instr::PushLocal,
                Instr::LoadLocal(0),
                Instr::PushLocal,
                Instr::LoadLocal(2),
                Instr::Return,
            ]
        );
    }

    #[test]
    fn test_local_shadows_global() {
        let p = compile("var x = 5\nfun f() { var x = 1 return x }\nx = f()");
        assert_eq!(
            strip(&p.functions[0].body),
            vec![
                Instr::LoadInt(1),
                Instr::PushLocal,
                Instr::LoadLocal(0),
                Instr::Return
            ]
        );
        assert_eq!(
            strip(&p.global_body)[2..],
            [Instr::Call(0), Instr::StoreGlobal(0)]
        );
    }

    #[test]
    fn test_var_in_global_loop_is_local() {
        let p = compile("loop { var i = 0 i = i + 1 break }");
        let Instr::Loop(body) = &strip(&p.global_body)[0] else {
            panic!("expected loop");
        };
        assert_eq!(body[1], Instr::PushLocal);
        assert_eq!(body[5], Instr::StoreLocal(0));
        assert!(p.globals.is_empty());
    }

    #[test]
    fn test_while_lowering() {
        let p = compile("var i = 0 while i < 3 { i = i + 1 }");
        let body = strip(&p.global_body);
        assert_eq!(
            body[2],
            Instr::Loop(vec![
                Instr::LoadGlobal(0),
                Instr::LoadInt(3),
                Instr::Lt,
                Instr::Not,
                Instr::If {
                    then_body: vec![Instr::Break],
                    else_body: vec![],
                },
                Instr::LoadGlobal(0),
                Instr::LoadInt(1),
                Instr::Add,
                Instr::StoreGlobal(0),
            ])
        );
    }

    #[test]
    fn test_call_resolution() {
        let p = compile("move(1, 2)");
        assert_eq!(
            strip(&p.global_body),
            vec![
                Instr::LoadInt(1),
                Instr::LoadInt(2),
                Instr::CallBuiltin(0),
                Instr::Discard
            ]
        );
        // user functions take precedence
        let p = compile("fun move(a) { return a }\nmove(1)");
        assert!(strip(&p.global_body).contains(&Instr::Call(0)));
    }

    #[test]
    fn test_call_errors() {
        let all = FeatureSet::all();
        assert_error("teleport(1)", all, ErrorCode::UnknownFunction);
        assert_error("move(1)", all, ErrorCode::TooFewCallArgs);
        assert_error("move(1, 2, 3)", all, ErrorCode::TooManyCallArgs);
    }

    #[test]
    fn test_static_errors() {
        let all = FeatureSet::all();
        assert_error("y = 1", all, ErrorCode::UnknownVariable);
        assert_error("var x = y", all, ErrorCode::UnknownVariable);
        assert_error("return 1", all, ErrorCode::ReturnOutsideFunction);
        assert_error("break", all, ErrorCode::LoopControlsOutsideLoop);
        assert_error("fun f() { continue }", all, ErrorCode::LoopControlsOutsideLoop);
        assert_error("fun f() { fun g() { } }", all, ErrorCode::FunctionInsideFunction);
        assert_error("loop { fun g() { } }", all, ErrorCode::FunctionInsideFunction);
        assert_error("1 = 2", all, ErrorCode::AssignmentToConst);
        assert_error("fun f() { }\nfun f() { }", all, ErrorCode::DuplicateFunction);
    }

    #[test]
    fn test_break_inside_tick_is_allowed() {
        let p = compile("tick { break }");
        assert_eq!(strip(&p.global_body), vec![Instr::Tick(vec![Instr::Break])]);
    }

    #[test]
    fn test_if_scopes_are_dropped() {
        let p = compile("fun f() { if 1 { var a = 1 } var b = 2 return b }");
        let body = strip(&p.functions[0].body);
        assert_eq!(body[2..], [Instr::LoadInt(2), Instr::PushLocal, Instr::LoadLocal(0), Instr::Return]);
    }

    #[test]
    fn test_member_stores() {
        let p = compile("var o = { a = 1, b = 2 }\no.b = 3\nvar arr = [1]\narr[0] = 4");
        let body = strip(&p.global_body);
        assert!(body.contains(&Instr::LoadObject(vec!["a".into(), "b".into()])));
        assert!(body.contains(&Instr::StoreObjectMember("b".into())));
        assert!(body.contains(&Instr::LoadArray(1)));
        assert!(body.contains(&Instr::StoreArrayElement));
    }
}
