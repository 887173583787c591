//! The top-level compilation unit (`spec.md` §3.5): globals and functions.

use crate::ir::arena::{Arena, Id};
use crate::ir::function::{FuncData, FuncId};
use crate::ir::operand::UseRef;
use crate::ir::types::Type;
use crate::ir::value::Const;

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: String,
    pub ty: Type,
    /// The initializer, flattened to one scalar per element in row-major
    /// order for array globals, matching how `spec.md` §4.3 says lowering
    /// emits global array initializers. Empty means zero-initialized.
    pub init: Vec<Const>,
    /// Head of this global's doubly-linked use list, shared across every
    /// function that takes its address.
    pub first_use: Option<UseRef>,
}

pub type GlobalId = Id<GlobalData>;

#[derive(Debug, Default)]
pub struct Module {
    pub globals: Arena<GlobalData>,
    pub funcs: Arena<FuncData>,
    func_order: Vec<FuncId>,
    global_order: Vec<GlobalId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn funcs_in_order(&self) -> &[FuncId] {
        &self.func_order
    }

    pub fn globals_in_order(&self) -> &[GlobalId] {
        &self.global_order
    }

    pub fn add_func(&mut self, data: FuncData) -> FuncId {
        let id = self.funcs.alloc(data);
        self.func_order.push(id);
        id
    }

    pub fn add_global(&mut self, data: GlobalData) -> GlobalId {
        let id = self.globals.alloc(data);
        self.global_order.push(id);
        id
    }

    pub fn find_func(&self, name: &str) -> Option<FuncId> {
        self.func_order.iter().copied().find(|&id| self.funcs.get(id).name == name)
    }
}
