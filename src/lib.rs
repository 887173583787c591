//! A SysY-subset-of-C compiler middle end: SSA IR construction from an
//! already-analyzed AST, the analysis framework (CFG, dominators, natural
//! loops), and a fixed-point pipeline of optimization passes (`spec.md`
//! §1). Lexing, parsing, semantic analysis, and machine code generation
//! are out of scope; [`ast::builder`] and [`driver`] exist so the pipeline
//! can be exercised end to end without a front end.

pub mod analysis;
pub mod ast;
pub mod common;
pub mod driver;
pub mod ir;
pub mod lowering;
pub mod passes;
