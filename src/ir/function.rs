//! Functions (`spec.md` §3.5): a name, a signature, an arena of blocks and
//! instructions local to this function, and the entry block.

use crate::ir::arena::{Arena, Id};
use crate::ir::block::{BlockData, BlockId};
use crate::ir::instruction::InstData;
use crate::ir::types::Type;
use crate::ir::value::ValueData;

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub value: crate::ir::value::ValueId,
}

#[derive(Debug)]
pub struct FuncData {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    pub is_declaration: bool,
    /// Whether calls may pass more arguments than `params` lists, like
    /// `putf`'s C-style format-string varargs (`spec.md` §6.1). Never set
    /// for a SysY-defined function; only the runtime externs use it.
    pub is_variadic: bool,
    pub entry: Option<BlockId>,
    /// Intrusive position among the function's blocks, head and tail.
    pub first_block: Option<BlockId>,
    pub last_block: Option<BlockId>,

    pub blocks: Arena<BlockData>,
    pub insts: Arena<InstData>,
    pub values: Arena<ValueData>,

    /// Head of the use list of this function used as a call callee
    /// (`spec.md` §3.4, "first operand is the callee"); referencing
    /// instructions may live in any function in the module.
    pub callee_use: Option<crate::ir::operand::UseRef>,
}

pub type FuncId = Id<FuncData>;

impl FuncData {
    pub fn new(name: String, ret_ty: Type) -> Self {
        Self {
            name,
            params: Vec::new(),
            ret_ty,
            is_declaration: false,
            is_variadic: false,
            entry: None,
            first_block: None,
            last_block: None,
            blocks: Arena::new(),
            insts: Arena::new(),
            values: Arena::new(),
            callee_use: None,
        }
    }

    /// Blocks in creation/link order (`spec.md` §6.2 print order before any
    /// pass reorders them).
    pub fn block_order(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut cur = self.first_block;
        while let Some(id) = cur {
            order.push(id);
            cur = self.blocks.get(id).next;
        }
        order
    }

    /// Instructions of `block` in program order.
    pub fn inst_order(&self, block: BlockId) -> Vec<crate::ir::instruction::InstId> {
        let mut order = Vec::new();
        let mut cur = self.blocks.get(block).first_inst;
        while let Some(id) = cur {
            order.push(id);
            cur = self.insts.get(id).next;
        }
        order
    }

    pub fn signature(&self) -> (Vec<Type>, Type) {
        (self.params.iter().map(|p| p.ty.clone()).collect(), self.ret_ty.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_function_has_no_blocks() {
        let f = FuncData::new("f".into(), Type::i32());
        assert!(f.block_order().is_empty());
    }
}
