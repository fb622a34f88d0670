//! Builtin modules that do not depend on the host: `standard`,
//! `floating_point` and `memory`.

use std::sync::Arc;

use crate::error::ErrorCode;
use crate::lang::value::{Array, Value};
use crate::runtime::builtins::Module;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm::Vm;

/// Nesting shown by `print` and `string` before eliding with `...`.
pub const DISPLAY_DEPTH: usize = 3;

type BuiltinResult = Result<Value, RuntimeError>;

pub fn standard<C: 'static>() -> Module<C> {
    Module::new("standard")
        .with_function("print", 1, 10, print)
        .with_function("error", 1, 1, error)
        .with_function("string", 1, 5, string)
        .with_function("concat", 2, 5, concat)
        .with_function("length", 1, 1, length)
        .with_function("abs", 1, 1, abs)
        .with_function("min", 2, 1, min)
        .with_function("max", 2, 1, max)
        .with_function("clamp", 3, 2, clamp)
}

pub fn floating_point<C: 'static>() -> Module<C> {
    Module::new("floating_point")
        .with_function("float", 1, 1, float)
        .with_function("int", 1, 1, int)
        .with_function("sqrt", 1, 4, |vm, args, _| unary_float(vm, args, f64::sqrt))
        .with_function("sin", 1, 4, |vm, args, _| unary_float(vm, args, f64::sin))
        .with_function("cos", 1, 4, |vm, args, _| unary_float(vm, args, f64::cos))
        .with_function("tan", 1, 4, |vm, args, _| unary_float(vm, args, f64::tan))
        .with_function("floor", 1, 1, |vm, args, _| unary_float(vm, args, f64::floor))
        .with_function("ceil", 1, 1, |vm, args, _| unary_float(vm, args, f64::ceil))
        .with_function("round", 1, 1, |vm, args, _| unary_float(vm, args, f64::round))
        .with_function("atan2", 2, 4, |vm, args, _| binary_float(vm, args, f64::atan2))
        .with_function("pow", 2, 4, |vm, args, _| binary_float(vm, args, f64::powf))
}

pub fn memory<C: 'static>() -> Module<C> {
    Module::new("memory")
        .with_function("push", 2, 2, push)
        .with_function("pop", 1, 1, pop)
        .with_function("size", 1, 1, size)
        .with_function("array", 2, 5, array)
        .with_function("ram_size", 0, 1, |vm, _, _| {
            Ok(Value::Int(vm.config().memory_limit as i64))
        })
}

fn unpack<const N: usize>(vm: &Vm, args: Vec<Value>) -> Result<[Value; N], RuntimeError> {
    args.try_into()
        .map_err(|_| vm.error(ErrorCode::MissingOperand))
}

fn number_error(vm: &Vm, value: &Value) -> RuntimeError {
    vm.error(ErrorCode::OperandsNotNumbers)
        .with_detail(format!("got {}", value.type_name()))
}

// ==== standard ====

fn print<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value] = unpack(vm, args)?;
    vm.log_line(value.display(DISPLAY_DEPTH));
    Ok(Value::Null)
}

fn error<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [message] = unpack(vm, args)?;
    Err(vm
        .error(ErrorCode::ByProgram)
        .with_detail(message.display(DISPLAY_DEPTH)))
}

fn string<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value] = unpack(vm, args)?;
    if let Value::String(_) = value {
        return Ok(value);
    }
    Ok(vm.heap().string(value.display(DISPLAY_DEPTH)))
}

fn concat<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [a, b] = unpack(vm, args)?;
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => Ok(vm.heap().string(format!("{a}{b}"))),
        _ => Err(vm.error(ErrorCode::OperandNotString)),
    }
}

fn length<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value] = unpack(vm, args)?;
    let len = match &value {
        Value::String(s) => s.as_str().chars().count(),
        Value::Tuple(t) => t.items().len(),
        Value::Array(a) => a.len(),
        other => {
            return Err(vm
                .error(ErrorCode::OperandNotArray)
                .with_detail(format!("cannot take the length of {}", other.type_name())));
        }
    };
    Ok(Value::Int(len as i64))
}

fn abs<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value] = unpack(vm, args)?;
    match value {
        Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(number_error(vm, &other)),
    }
}

fn pick(vm: &mut Vm, args: Vec<Value>, take_first: fn(f64, f64) -> bool) -> BuiltinResult {
    let [a, b] = unpack(vm, args)?;
    let first = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => take_first(*x as f64, *y as f64),
        (Value::Float(x), Value::Float(y)) => take_first(*x, *y),
        _ => return Err(vm.error(ErrorCode::OperandsNotNumbers)),
    };
    Ok(if first { a } else { b })
}

fn min<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    pick(vm, args, |a, b| a <= b)
}

fn max<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    pick(vm, args, |a, b| a >= b)
}

fn clamp<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value, low, high] = unpack(vm, args)?;
    match (value, low, high) {
        (Value::Int(v), Value::Int(lo), Value::Int(hi)) => Ok(Value::Int(v.min(hi).max(lo))),
        (Value::Float(v), Value::Float(lo), Value::Float(hi)) => {
            Ok(Value::Float(v.min(hi).max(lo)))
        }
        _ => Err(vm.error(ErrorCode::OperandsNotNumbers)),
    }
}

// ==== floating_point ====

fn to_float(vm: &Vm, value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(number_error(vm, other)),
    }
}

fn float<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value] = unpack(vm, args)?;
    Ok(Value::Float(to_float(vm, &value)?))
}

/// Truncates toward zero, saturating at the integer range. NaN becomes 0.
fn int<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [value] = unpack(vm, args)?;
    match value {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Float(n) => Ok(Value::Int(n as i64)),
        other => Err(number_error(vm, &other)),
    }
}

fn unary_float(vm: &mut Vm, args: Vec<Value>, f: fn(f64) -> f64) -> BuiltinResult {
    let [x] = unpack(vm, args)?;
    Ok(Value::Float(f(to_float(vm, &x)?)))
}

fn binary_float(vm: &mut Vm, args: Vec<Value>, f: fn(f64, f64) -> f64) -> BuiltinResult {
    let [a, b] = unpack(vm, args)?;
    Ok(Value::Float(f(to_float(vm, &a)?, to_float(vm, &b)?)))
}

// ==== memory ====

fn expect_array(vm: &Vm, value: Value) -> Result<Arc<Array>, RuntimeError> {
    match value {
        Value::Array(a) => Ok(a),
        other => Err(vm
            .error(ErrorCode::OperandNotArray)
            .with_detail(format!("got {}", other.type_name()))),
    }
}

fn push<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [array, value] = unpack(vm, args)?;
    let array = expect_array(vm, array)?;
    if array.len() >= vm.max_array_size() {
        return Err(vm.error(ErrorCode::ArrayTooBig));
    }
    array.push(value);
    Ok(Value::Null)
}

fn pop<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [array] = unpack(vm, args)?;
    Ok(expect_array(vm, array)?.pop().unwrap_or(Value::Null))
}

fn size<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [array] = unpack(vm, args)?;
    Ok(Value::Int(expect_array(vm, array)?.len() as i64))
}

fn array<C>(vm: &mut Vm, args: Vec<Value>, _: &mut C) -> BuiltinResult {
    let [count, value] = unpack(vm, args)?;
    let Value::Int(count) = count else {
        return Err(vm.error(ErrorCode::OperandNotInteger));
    };
    let count = usize::try_from(count)
        .ok()
        .filter(|n| *n <= vm.max_array_size())
        .ok_or_else(|| vm.error(ErrorCode::ArrayTooBig))?;
    Ok(vm.heap().array(vec![value; count]))
}
