pub mod compile;
pub mod decode;
pub mod disasm;
pub mod encode;
pub mod ir;
pub mod op;

pub use decode::LoadedProgram;
pub use ir::{BuiltinTable, Program};
pub use op::Op;
