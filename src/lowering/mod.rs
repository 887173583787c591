//! AST-to-SSA lowering (`spec.md` §4.3): walks an already-analyzed
//! [`crate::ast::Program`] and emits a [`crate::ir::Module`] with every
//! local given a home-slot `alloca`, left for `passes::mem2reg` to promote.

pub mod const_eval;
pub mod lower;

pub use lower::{lower_program, RUNTIME_FUNCS};
