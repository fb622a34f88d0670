//! Bigton: a small scripting language for programmable robots.
//!
//! Source files are compiled (lexer, parser, emitter, encoder) into a
//! compact binary, which a [`runtime::Vm`] executes a bounded number of
//! instructions per simulation tick.

pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod frontend;
pub mod lang;
pub mod profile;
pub mod queue;
pub mod runtime;

pub use compiler::{SourceFile, compile};
pub use error::{CompileError, ErrorCode};
pub use lang::feature::{Feature, FeatureSet};
