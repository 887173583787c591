//! Scalar Replacement of Aggregates (`spec.md` §4.8): splits a fixed-size
//! array `alloca` into one scalar `alloca` per element when every
//! `GetElementPtr` into it uses a constant index, so `Mem2Reg` can promote
//! the pieces on a later iteration. An access with a non-constant index
//! (a runtime-computed array subscript) blocks the whole alloca from being
//! split, since which element it touches isn't known until runtime.

use std::collections::HashMap;

use crate::ir::builder::Builder;
use crate::ir::instruction::Opcode;
use crate::ir::operand::{Def, OperandKind};
use crate::ir::types::{ArrayLen, TypeKind};
use crate::ir::{FuncId, InstId, Module};

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let candidates = splittable_arrays(module, func);
    if candidates.is_empty() {
        return false;
    }
    for (alloca, len, elem_ty) in candidates {
        split_one(module, func, alloca, len, elem_ty);
    }
    true
}

fn splittable_arrays(
    module: &Module,
    func: FuncId,
) -> Vec<(InstId, u32, crate::ir::types::Type)> {
    let f = module.funcs.get(func);
    let mut out = Vec::new();
    for (id, inst) in f.insts.iter() {
        if inst.opcode != Opcode::Alloca {
            continue;
        }
        let TypeKind::Array { elem, len: ArrayLen::Fixed(len) } = &inst.ty.pointee().kind else {
            continue;
        };
        if all_geps_have_constant_index(f, id) {
            out.push((id, *len, (**elem).clone()));
        }
    }
    out
}

fn all_geps_have_constant_index(f: &crate::ir::FuncData, alloca: InstId) -> bool {
    let mut cur = f.insts.get(alloca).first_use;
    while let Some(u) = cur {
        let user = f.insts.get(u.user);
        if user.opcode != Opcode::GetElementPtr || u.index != 0 {
            return false;
        }
        if user.operands.len() != 2 || user.operands[1].kind.as_const().and_then(|c| c.as_i32()).is_none() {
            return false;
        }
        cur = user.operands[u.index as usize].next;
    }
    true
}

fn split_one(
    module: &mut Module,
    func: FuncId,
    alloca: InstId,
    len: u32,
    elem_ty: crate::ir::types::Type,
) {
    let block = module.funcs.get(func).insts.get(alloca).block;
    let mut slots = HashMap::new();
    let mut b = Builder::new(module, func);
    for i in 0..len {
        let slot = b.append(block, Opcode::Alloca, crate::ir::types::Type::pointer_to(elem_ty.clone()), vec![]);
        slots.insert(i, slot);
    }

    let geps: Vec<InstId> = {
        let mut v = Vec::new();
        let mut cur = module.funcs.get(func).insts.get(alloca).first_use;
        while let Some(u) = cur {
            v.push(u.user);
            cur = module.funcs.get(func).insts.get(u.user).operands[u.index as usize].next;
        }
        v
    };
    for gep in geps {
        let index = module.funcs.get(func).insts.get(gep).operands[1].kind.as_const().unwrap().as_i32().unwrap() as u32;
        let replacement = slots[&index];
        let mut b = Builder::new(module, func);
        b.replace_all_uses_with(Def::Inst(func, gep), OperandKind::Inst(replacement));
        b.erase_inst(gep);
    }

    let mut b = Builder::new(module, func);
    b.erase_inst(alloca);
}
