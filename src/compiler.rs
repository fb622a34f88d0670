use tracing::debug;

use crate::bytecode::compile::emit;
use crate::bytecode::encode::encode;
use crate::bytecode::ir::BuiltinTable;
use crate::error::CompileError;
use crate::frontend::lexer::tokenize;
use crate::frontend::parser::Parser;
use crate::lang::feature::FeatureSet;

/// One named source text of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        SourceFile {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Compiles the files, in order, into one program binary.
///
/// Files share a single token stream, so a declaration in an earlier file
/// is visible to later ones and the global bodies run in file order.
pub fn compile(
    sources: &[SourceFile],
    features: FeatureSet,
    builtins: &BuiltinTable,
) -> Result<Vec<u8>, CompileError> {
    let mut tokens = Vec::new();
    for source in sources {
        tokens.extend(tokenize(&source.name, &source.text)?);
    }
    let ast = Parser::new(tokens).parse()?;
    let program = emit(&ast, features, builtins)?;
    let binary = encode(&program);
    debug!(
        files = sources.len(),
        bytes = binary.len(),
        "compiled program"
    );
    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::BuiltinSignature;
    use crate::error::ErrorCode;
    use crate::lang::feature::Feature;
    use crate::lang::value::Value;
    use crate::runtime::vm::{ExecStatus, Vm, VmConfig};

    fn builtins() -> BuiltinTable {
        BuiltinTable {
            functions: vec![BuiltinSignature {
                name: "say".into(),
                arity: 1,
                cost: 1,
            }],
        }
    }

    fn run(source: &str, features: FeatureSet) -> Vm {
        let binary = compile(&[SourceFile::new("test.bt", source)], features, &builtins())
            .expect("compile");
        let mut vm = Vm::new(&binary, VmConfig::default()).expect("load");
        vm.start_tick();
        assert_eq!(vm.step_batch(), ExecStatus::Complete);
        vm
    }

    fn assert_error(source: &str, features: FeatureSet, code: ErrorCode) {
        let err = compile(&[SourceFile::new("test.bt", source)], features, &builtins())
            .expect_err("should fail");
        assert_eq!(err.code, code, "{err}");
    }

    #[test]
    fn test_globals() {
        let vm = run("var x = 1\nx = x + 5\n", FeatureSet::empty());
        assert_eq!(vm.global("x"), Some(Value::Int(6)));
    }

    #[test]
    fn test_local_shadowing() {
        let source = "\
var r = 0
loop {
    var a = 1
    if a {
        var a = 2
        r = a * 10
    }
    r = r + a
    break
}
";
        let vm = run(source, FeatureSet::empty());
        assert_eq!(vm.global("r"), Some(Value::Int(21)));
    }

    #[test]
    fn test_functions() {
        let source = "\
fun sub(a, b) { return a - b }
var x = sub(10, 3)
";
        let vm = run(source, FeatureSet::empty().with(Feature::CustomFunctions));
        assert_eq!(vm.global("x"), Some(Value::Int(7)));
    }

    #[test]
    fn test_float_needs_fpu() {
        let vm = run("var f = 1.5 * 2.0\n", FeatureSet::empty().with(Feature::Fpu));
        assert_eq!(vm.global("f"), Some(Value::Float(3.0)));
        assert_error("var f = 1.5\n", FeatureSet::empty(), ErrorCode::FeatureUnsupported);
    }

    #[test]
    fn test_call_errors() {
        assert_error("nope(1)\n", FeatureSet::empty(), ErrorCode::UnknownFunction);
        assert_error("say()\n", FeatureSet::empty(), ErrorCode::TooFewCallArgs);
        assert_error("say(1, 2)\n", FeatureSet::empty(), ErrorCode::TooManyCallArgs);
    }

    #[test]
    fn test_files_share_declarations() {
        let sources = [
            SourceFile::new("lib.bt", "fun twice(n) { return n * 2 }\n"),
            SourceFile::new("main.bt", "var y = twice(4)\n"),
        ];
        let binary = compile(&sources, FeatureSet::empty().with(Feature::CustomFunctions), &builtins())
            .expect("compile");
        let mut vm = Vm::new(&binary, VmConfig::default()).expect("load");
        assert_eq!(vm.step_batch(), ExecStatus::Complete);
        assert_eq!(vm.global("y"), Some(Value::Int(8)));
    }

    #[test]
    fn test_lexer_error_names_file() {
        let err = compile(
            &[SourceFile::new("bad.bt", "var s = \"open\n")],
            FeatureSet::empty(),
            &builtins(),
        )
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::UnclosedStringLiteral);
        assert_eq!(&*err.location.file, "bad.bt");
    }
}
