use std::collections::HashMap;
use std::sync::Arc;

use crate::bytecode::ir::{BuiltinSignature, BuiltinTable};
use crate::error::ErrorCode;
use crate::lang::value::Value;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm::Vm;

/// Host implementation of a builtin. Receives the arguments in call order
/// and the host context `C`.
pub type BuiltinImpl<C> =
    Arc<dyn Fn(&mut Vm, Vec<Value>, &mut C) -> Result<Value, RuntimeError> + Send + Sync>;

pub struct BuiltinFunction<C> {
    pub name: String,
    pub arity: u32,
    /// Instructions charged per call.
    pub cost: u32,
    pub imp: BuiltinImpl<C>,
}

impl<C> Clone for BuiltinFunction<C> {
    fn clone(&self) -> Self {
        BuiltinFunction {
            name: self.name.clone(),
            arity: self.arity,
            cost: self.cost,
            imp: Arc::clone(&self.imp),
        }
    }
}

impl<C> BuiltinFunction<C> {
    pub fn signature(&self) -> BuiltinSignature {
        BuiltinSignature {
            name: self.name.clone(),
            arity: self.arity,
            cost: self.cost,
        }
    }
}

/// A named group of builtins.
pub struct Module<C> {
    pub name: String,
    pub functions: Vec<BuiltinFunction<C>>,
}

impl<C> Module<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_function<F>(mut self, name: &str, arity: u32, cost: u32, imp: F) -> Self
    where
        F: Fn(&mut Vm, Vec<Value>, &mut C) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.functions.push(BuiltinFunction {
            name: name.to_string(),
            arity,
            cost,
            imp: Arc::new(imp),
        });
        self
    }
}

/// Builtins available to a program, in id order.
///
/// Ids are assigned on first registration of a name. Registering a name
/// again replaces the implementation but keeps the id.
pub struct Registry<C> {
    functions: Vec<BuiltinFunction<C>>,
    ids: HashMap<String, u32>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Registry {
            functions: Vec::new(),
            ids: HashMap::new(),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: Module<C>) -> Self {
        self.add_module(module);
        self
    }

    pub fn add_module(&mut self, module: Module<C>) {
        for function in module.functions {
            match self.ids.get(&function.name) {
                Some(id) => self.functions[*id as usize] = function,
                None => {
                    self.ids
                        .insert(function.name.clone(), self.functions.len() as u32);
                    self.functions.push(function);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&BuiltinFunction<C>> {
        self.ids.get(name).map(|id| &self.functions[*id as usize])
    }

    /// Table handed to the compiler.
    pub fn signatures(&self) -> BuiltinTable {
        BuiltinTable {
            functions: self.functions.iter().map(BuiltinFunction::signature).collect(),
        }
    }

    /// Runs builtin `id`. The program must have been compiled against this
    /// registry; a name mismatch is reported as an invalid reference.
    pub fn dispatch(
        &self,
        id: u32,
        vm: &mut Vm,
        args: Vec<Value>,
        ctx: &mut C,
    ) -> Result<Value, RuntimeError> {
        let function = self
            .functions
            .get(id as usize)
            .filter(|f| vm.builtin_name(id) == Some(f.name.as_str()))
            .ok_or_else(|| vm.error(ErrorCode::BuiltinRefInvalid))?;
        (function.imp)(vm, args, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{SourceFile, compile};
    use crate::lang::feature::FeatureSet;
    use crate::runtime::vm::{ExecStatus, VmConfig};

    fn constant<C>(value: i64) -> impl Fn(&mut Vm, Vec<Value>, &mut C) -> Result<Value, RuntimeError> {
        move |_, _, _| Ok(Value::Int(value))
    }

    #[test]
    fn test_ids_follow_registration() {
        let registry = Registry::<()>::new()
            .with_module(
                Module::new("a")
                    .with_function("one", 0, 1, constant(1))
                    .with_function("two", 0, 1, constant(2)),
            )
            .with_module(Module::new("b").with_function("three", 1, 4, constant(3)));
        let table = registry.signatures();
        assert_eq!(table.find("two").map(|(id, _)| id), Some(1));
        assert_eq!(table.find("three").map(|(id, s)| (id, s.arity, s.cost)), Some((2, 1, 4)));
    }

    #[test]
    fn test_later_registration_wins() {
        let registry = Registry::<()>::new()
            .with_module(Module::new("a").with_function("f", 0, 1, constant(1)))
            .with_module(Module::new("b").with_function("f", 2, 3, constant(2)));
        assert_eq!(registry.len(), 1);
        let f = registry.get("f").expect("registered");
        assert_eq!((f.arity, f.cost), (2, 3));
    }

    #[test]
    fn test_dispatch() {
        let registry = Registry::new().with_module(
            Module::new("a")
                .with_function("unused", 0, 1, constant(0))
                .with_function("count", 0, 1, |_, _, calls: &mut u32| {
                    *calls += 1;
                    Ok(Value::Int(i64::from(*calls)))
                }),
        );
        let binary = compile(
            &[SourceFile::new("t.bt", "var x = count() + count()")],
            FeatureSet::empty(),
            &registry.signatures(),
        )
        .expect("compile");
        let mut vm = Vm::new(&binary, VmConfig::default()).expect("load");
        let mut calls = 0u32;
        loop {
            match vm.step_batch() {
                ExecStatus::ExecBuiltin { id, args } => {
                    let value = registry
                        .dispatch(id, &mut vm, args, &mut calls)
                        .expect("dispatch");
                    vm.push_result(value).expect("push");
                }
                ExecStatus::Complete => break,
                other => panic!("{other:?}"),
            }
        }
        assert_eq!(calls, 2);
        assert_eq!(vm.global("x"), Some(Value::Int(3)));
    }

    #[test]
    fn test_dispatch_rejects_foreign_program() {
        let compiled_for = Registry::<()>::new()
            .with_module(Module::new("a").with_function("other", 0, 1, constant(0)));
        let running_with = Registry::<()>::new()
            .with_module(Module::new("a").with_function("mine", 0, 1, constant(0)));
        let binary = compile(
            &[SourceFile::new("t.bt", "other()")],
            FeatureSet::empty(),
            &compiled_for.signatures(),
        )
        .expect("compile");
        let mut vm = Vm::new(&binary, VmConfig::default()).expect("load");
        let ExecStatus::ExecBuiltin { id, args } = vm.step_batch() else {
            panic!("expected builtin call");
        };
        let err = running_with
            .dispatch(id, &mut vm, args, &mut ())
            .expect_err("mismatch");
        assert_eq!(err.code, ErrorCode::BuiltinRefInvalid);
    }
}
