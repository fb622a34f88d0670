//! Stable error identifiers shared by the compiler and the VM.
//!
//! Every diagnostic the toolchain can produce maps to exactly one
//! [`ErrorCode`]. The short id (`TK001`, `PA003`, `SC002`, `RT004`, ...)
//! never changes once published, so clients may match on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frontend::token::Source;

/// Which stage of the pipeline an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    Lexical,
    Syntax,
    Static,
    Runtime,
    /// Should be unreachable for binaries produced by this compiler.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // lexer
    InvalidToken,
    UnclosedStringLiteral,
    MultipleDotsInNumeric,
    InvalidNumericLiteral,

    // parser
    CallingExpression,
    InvalidMemberSyntax,
    MissingExpectedComma,
    EmptyParentheses,
    MissingExpectedMemberName,
    MissingExpectedMemberEquals,
    MissingExpectedUnaryOrValue,
    MissingExpectedOpeningBrace,
    MissingExpectedClosingBrace,
    MissingExpectedVariableName,
    MissingExpectedVarEquals,
    MissingExpectedFunctionName,
    MissingExpectedFuncArgsOpen,
    MissingExpectedArgumentName,
    MissingExpectedClosingBracket,
    NestingTooDeep,

    // static checks
    FeatureUnsupported,
    UnknownVariable,
    UnknownFunction,
    TooFewCallArgs,
    TooManyCallArgs,
    ReturnOutsideFunction,
    LoopControlsOutsideLoop,
    FunctionInsideFunction,
    AssignmentToConst,
    DuplicateFunction,

    // runtime
    ExceededInstrLimit,
    IntDivisionByZero,
    ByProgram,
    TupleIndexOob,
    InvalidObjectMember,
    ArrayIndexOob,
    OperandsNotNumbers,
    OperandNotInteger,
    OperandNotTuple,
    OperandNotObject,
    OperandNotArray,
    OperandNotString,
    ExceededMaxCallDepth,
    TupleTooBig,
    ArrayTooBig,
    ExceededMemoryLimit,

    // internal
    MissingOperand,
    MalformedProgram,
    LocalIndexOob,
    GlobalRefInvalid,
    FunctionRefInvalid,
    BuiltinRefInvalid,
    StringIdInvalid,
    ShapeIdInvalid,
    NotAwaitingBuiltin,
    AwaitingBuiltin,
}

impl ErrorCode {
    pub fn id(self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidToken => "TK001",
            UnclosedStringLiteral => "TK002",
            MultipleDotsInNumeric => "TK003",
            InvalidNumericLiteral => "TK004",

            CallingExpression => "PA001",
            InvalidMemberSyntax => "PA002",
            MissingExpectedComma => "PA003",
            EmptyParentheses => "PA004",
            MissingExpectedMemberName => "PA005",
            MissingExpectedMemberEquals => "PA006",
            MissingExpectedUnaryOrValue => "PA007",
            MissingExpectedOpeningBrace => "PA008",
            MissingExpectedClosingBrace => "PA009",
            MissingExpectedVariableName => "PA010",
            MissingExpectedVarEquals => "PA011",
            MissingExpectedFunctionName => "PA012",
            MissingExpectedFuncArgsOpen => "PA013",
            MissingExpectedArgumentName => "PA014",
            MissingExpectedClosingBracket => "PA015",
            NestingTooDeep => "PA016",

            FeatureUnsupported => "SC001",
            UnknownVariable => "SC002",
            UnknownFunction => "SC003",
            TooFewCallArgs => "SC004",
            TooManyCallArgs => "SC005",
            ReturnOutsideFunction => "SC006",
            LoopControlsOutsideLoop => "SC007",
            FunctionInsideFunction => "SC008",
            AssignmentToConst => "SC009",
            DuplicateFunction => "SC010",

            ExceededInstrLimit => "RT001",
            IntDivisionByZero => "RT002",
            ByProgram => "RT003",
            TupleIndexOob => "RT004",
            InvalidObjectMember => "RT005",
            ArrayIndexOob => "RT006",
            OperandsNotNumbers => "RT007",
            OperandNotInteger => "RT008",
            OperandNotTuple => "RT009",
            OperandNotObject => "RT010",
            OperandNotArray => "RT011",
            OperandNotString => "RT012",
            ExceededMaxCallDepth => "RT013",
            TupleTooBig => "RT014",
            ArrayTooBig => "RT015",
            ExceededMemoryLimit => "RT016",

            MissingOperand => "RT-INTERNAL001",
            MalformedProgram => "RT-INTERNAL002",
            LocalIndexOob => "RT-INTERNAL003",
            GlobalRefInvalid => "RT-INTERNAL004",
            FunctionRefInvalid => "RT-INTERNAL005",
            BuiltinRefInvalid => "RT-INTERNAL006",
            StringIdInvalid => "RT-INTERNAL007",
            ShapeIdInvalid => "RT-INTERNAL008",
            NotAwaitingBuiltin => "RT-INTERNAL009",
            AwaitingBuiltin => "RT-INTERNAL010",
        }
    }

    pub fn message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidToken => "Invalid token",
            UnclosedStringLiteral => "Unclosed string literal",
            MultipleDotsInNumeric => "Numeric literal contains more than one dot",
            InvalidNumericLiteral => "Numeric literal is out of range",

            CallingExpression => "Only functions may be called, not arbitrary expressions",
            InvalidMemberSyntax => "Expected a member name or tuple index after '.'",
            MissingExpectedComma => "Expected ','",
            EmptyParentheses => "Parentheses must contain at least one expression",
            MissingExpectedMemberName => "Expected an object member name",
            MissingExpectedMemberEquals => "Expected '=' after the object member name",
            MissingExpectedUnaryOrValue => "Expected a value or unary operator",
            MissingExpectedOpeningBrace => "Expected '{'",
            MissingExpectedClosingBrace => "Expected '}'",
            MissingExpectedVariableName => "Expected a variable name after 'var'",
            MissingExpectedVarEquals => "Expected '=' after the variable name",
            MissingExpectedFunctionName => "Expected a function name after 'fun'",
            MissingExpectedFuncArgsOpen => "Expected '(' after the function name",
            MissingExpectedArgumentName => "Expected an argument name",
            MissingExpectedClosingBracket => "Expected ']'",
            NestingTooDeep => "Expressions or blocks are nested too deeply",

            FeatureUnsupported => "This feature is not supported by the processor",
            UnknownVariable => "Unknown variable",
            UnknownFunction => "Unknown function",
            TooFewCallArgs => "Too few arguments for function call",
            TooManyCallArgs => "Too many arguments for function call",
            ReturnOutsideFunction => "'return' may only be used inside a function",
            LoopControlsOutsideLoop => "'break' and 'continue' may only be used inside a loop",
            FunctionInsideFunction => "Functions may only be declared at the top level",
            AssignmentToConst => "The left side of an assignment must be a variable or member",
            DuplicateFunction => "A function with this name is already declared",

            ExceededInstrLimit => "Exceeded the instruction limit for this tick",
            IntDivisionByZero => "Integer division by zero",
            ByProgram => "Error raised by the program",
            TupleIndexOob => "Tuple member index out of bounds",
            InvalidObjectMember => "Object does not have this member",
            ArrayIndexOob => "Array index out of bounds",
            OperandsNotNumbers => "Operands must both be integers or both be floats",
            OperandNotInteger => "Operand must be an integer",
            OperandNotTuple => "Operand must be a tuple",
            OperandNotObject => "Operand must be an object",
            OperandNotArray => "Operand must be an array",
            OperandNotString => "Operand must be a string",
            ExceededMaxCallDepth => "Exceeded the maximum call depth",
            TupleTooBig => "Tuple exceeds the maximum tuple size",
            ArrayTooBig => "Array exceeds the maximum array size",
            ExceededMemoryLimit => "Exceeded the memory limit",

            MissingOperand => "Operand stack is empty",
            MalformedProgram => "Program binary is malformed",
            LocalIndexOob => "Local variable slot out of bounds",
            GlobalRefInvalid => "Invalid global variable reference",
            FunctionRefInvalid => "Invalid function reference",
            BuiltinRefInvalid => "Invalid builtin function reference",
            StringIdInvalid => "Invalid string table reference",
            ShapeIdInvalid => "Invalid shape table reference",
            NotAwaitingBuiltin => "Result pushed while no builtin call is pending",
            AwaitingBuiltin => "Execution resumed while a builtin call is pending",
        }
    }

    pub fn class(self) -> ErrorClass {
        let id = self.id();
        if id.starts_with("TK") {
            ErrorClass::Lexical
        } else if id.starts_with("PA") {
            ErrorClass::Syntax
        } else if id.starts_with("SC") {
            ErrorClass::Static
        } else if id.starts_with("RT-INTERNAL") {
            ErrorClass::Internal
        } else {
            ErrorClass::Runtime
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.message(), self.id())
    }
}

/// A lexical, syntax or static-check failure. Compilation never recovers
/// from one of these.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{}] {} (line {}, file '{}')", .code.id(), .code.message(), .location.line, .location.file)]
pub struct CompileError {
    pub code: ErrorCode,
    pub location: Source,
}

impl CompileError {
    pub fn new(code: ErrorCode, location: Source) -> Self {
        CompileError { code, location }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        use ErrorCode::*;
        let all = [
            InvalidToken, UnclosedStringLiteral, MultipleDotsInNumeric, InvalidNumericLiteral,
            CallingExpression, InvalidMemberSyntax, MissingExpectedComma, EmptyParentheses,
            MissingExpectedMemberName, MissingExpectedMemberEquals, MissingExpectedUnaryOrValue,
            MissingExpectedOpeningBrace, MissingExpectedClosingBrace, MissingExpectedVariableName,
            MissingExpectedVarEquals, MissingExpectedFunctionName, MissingExpectedFuncArgsOpen,
            MissingExpectedArgumentName, MissingExpectedClosingBracket, NestingTooDeep,
            FeatureUnsupported,
            UnknownVariable, UnknownFunction, TooFewCallArgs, TooManyCallArgs,
            ReturnOutsideFunction, LoopControlsOutsideLoop, FunctionInsideFunction,
            AssignmentToConst, DuplicateFunction, ExceededInstrLimit, IntDivisionByZero,
            ByProgram, TupleIndexOob, InvalidObjectMember, ArrayIndexOob, OperandsNotNumbers,
            OperandNotInteger, OperandNotTuple, OperandNotObject, OperandNotArray,
            OperandNotString, ExceededMaxCallDepth, TupleTooBig, ArrayTooBig,
            ExceededMemoryLimit, MissingOperand, MalformedProgram, LocalIndexOob,
            GlobalRefInvalid, FunctionRefInvalid, BuiltinRefInvalid, StringIdInvalid,
            ShapeIdInvalid, NotAwaitingBuiltin, AwaitingBuiltin,
        ];
        let mut ids: Vec<_> = all.iter().map(|c| c.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn test_published_ids() {
        assert_eq!(ErrorCode::InvalidToken.id(), "TK001");
        assert_eq!(ErrorCode::MissingExpectedComma.id(), "PA003");
        assert_eq!(ErrorCode::UnknownVariable.id(), "SC002");
        assert_eq!(ErrorCode::TupleIndexOob.id(), "RT004");
    }

    #[test]
    fn test_classes() {
        assert_eq!(ErrorCode::UnclosedStringLiteral.class(), ErrorClass::Lexical);
        assert_eq!(ErrorCode::EmptyParentheses.class(), ErrorClass::Syntax);
        assert_eq!(ErrorCode::FeatureUnsupported.class(), ErrorClass::Static);
        assert_eq!(ErrorCode::TupleTooBig.class(), ErrorClass::Runtime);
        assert_eq!(ErrorCode::ShapeIdInvalid.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::new(ErrorCode::UnknownVariable, Source::new(3, "main.bt"));
        assert_eq!(
            err.to_string(),
            "[SC002] Unknown variable (line 3, file 'main.bt')"
        );
    }
}
