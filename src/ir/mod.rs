//! The SSA IR core (`spec.md` §3-§4.2): the data model, its arena storage,
//! the editing primitives, and the textual printer.

pub mod arena;
pub mod block;
pub mod builder;
pub mod function;
pub mod instruction;
pub mod module;
pub mod operand;
pub mod printer;
pub mod types;
pub mod value;

pub use block::{BlockData, BlockId};
pub use builder::Builder;
pub use function::{FuncData, FuncId, Param};
pub use instruction::{BinOp, CastOp, FPred, IPred, InstData, InstId, Opcode};
pub use module::{GlobalData, GlobalId, Module};
pub use operand::{Def, OperandKind, OperandSlot, UseRef};
pub use types::{ArrayLen, BasicKind, Type, TypeKind};
pub use value::{Const, ConstTy, ValueData, ValueId, ValueKind};
