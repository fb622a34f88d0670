//! # Bigton language model
//!
//! The syntax tree produced by the parser, the optional language features
//! a processor tier may enable, and the runtime value model.

pub mod ast;
pub mod feature;
pub mod value;
