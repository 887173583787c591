//! Promotes `alloca`s to SSA registers (`spec.md` §4.7), the classic
//! Cytron et al. construction: place a `phi` at every block in the
//! iterated dominance frontier of the alloca's storing blocks, then rename
//! loads/stores to the reaching definition via a preorder dominator-tree
//! walk. Only allocas whose every use is a plain `load`/`store` of the
//! whole object qualify; anything whose address escapes (passed to a call,
//! fed into a `GetElementPtr`) is left for `SROA` or for good.

use std::collections::{HashMap, HashSet};

use crate::analysis::dominators::{self, DomTree};
use crate::ir::builder::Builder;
use crate::ir::instruction::Opcode;
use crate::ir::operand::{Def, OperandKind};
use crate::ir::value::{Const, ConstTy};
use crate::ir::{BlockId, FuncId, InstId, Module, Type};

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let entry = match module.funcs.get(func).entry {
        Some(e) => e,
        None => return false,
    };
    let candidates = promotable_allocas(module, func);
    if candidates.is_empty() {
        return false;
    }
    let dom = dominators::compute(module.funcs.get(func), entry);

    for alloca in candidates {
        promote_one(module, func, entry, &dom, alloca);
    }
    true
}

fn scalar_const_ty(ty: &Type) -> ConstTy {
    if ty.is_f32() {
        ConstTy::F32
    } else {
        ConstTy::I32
    }
}

/// An alloca qualifies when it is scalar (not array) and every use is a
/// direct `load` or the address operand of a `store` — never an operand to
/// anything else, which would mean its address escapes.
fn promotable_allocas(module: &Module, func: FuncId) -> Vec<InstId> {
    let f = module.funcs.get(func);
    let mut out = Vec::new();
    for (id, inst) in f.insts.iter() {
        if inst.opcode != Opcode::Alloca || inst.ty.pointee().is_array() {
            continue;
        }
        if all_uses_are_plain_load_store(f, id) {
            out.push(id);
        }
    }
    out
}

fn all_uses_are_plain_load_store(f: &crate::ir::FuncData, alloca: InstId) -> bool {
    let mut cur = f.insts.get(alloca).first_use;
    while let Some(u) = cur {
        let user = f.insts.get(u.user);
        let ok = match user.opcode {
            Opcode::Load => u.index == 0,
            Opcode::Store => u.index == 1,
            _ => false,
        };
        if !ok {
            return false;
        }
        cur = user.operands[u.index as usize].next;
    }
    true
}

fn promote_one(module: &mut Module, func: FuncId, entry: BlockId, dom: &DomTree, alloca: InstId) {
    let elem_ty = module.funcs.get(func).insts.get(alloca).ty.pointee().clone();

    let store_blocks = collect_store_blocks(module.funcs.get(func), alloca);
    let phi_blocks = iterated_dominance_frontier(dom, &store_blocks);

    let mut phis: HashMap<BlockId, InstId> = HashMap::new();
    for &block in &phi_blocks {
        let n_preds = module.funcs.get(func).blocks.get(block).preds.len();
        let mut b = Builder::new(module, func);
        let undef = OperandKind::Const(Const::Undef(scalar_const_ty(&elem_ty)));
        let phi = b.insert_phi(block, elem_ty.clone(), vec![undef; n_preds.max(1)]);
        phis.insert(block, phi);
    }

    let initial = Const::Undef(scalar_const_ty(&elem_ty));
    let mut to_erase = Vec::new();
    rename(module, func, entry, alloca, &phis, OperandKind::Const(initial), dom, &mut to_erase);

    let mut b = Builder::new(module, func);
    for inst in to_erase {
        b.erase_inst(inst);
    }
    b.erase_inst(alloca);
}

fn collect_store_blocks(f: &crate::ir::FuncData, alloca: InstId) -> HashSet<BlockId> {
    let mut blocks = HashSet::new();
    let mut cur = f.insts.get(alloca).first_use;
    while let Some(u) = cur {
        let user = f.insts.get(u.user);
        if user.opcode == Opcode::Store && u.index == 1 {
            blocks.insert(user.block);
        }
        cur = user.operands[u.index as usize].next;
    }
    blocks
}

fn iterated_dominance_frontier(dom: &DomTree, seeds: &HashSet<BlockId>) -> HashSet<BlockId> {
    let mut result = HashSet::new();
    let mut worklist: Vec<BlockId> = seeds.iter().copied().collect();
    while let Some(block) = worklist.pop() {
        for &df in dom.dominance_frontier(block) {
            if result.insert(df) {
                worklist.push(df);
            }
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn rename(
    module: &mut Module,
    func: FuncId,
    block: BlockId,
    alloca: InstId,
    phis: &HashMap<BlockId, InstId>,
    mut current: OperandKind,
    dom: &DomTree,
    to_erase: &mut Vec<InstId>,
) {
    if let Some(&phi) = phis.get(&block) {
        current = OperandKind::Inst(phi);
    }

    let insts = module.funcs.get(func).inst_order(block);
    for inst_id in insts {
        let inst = module.funcs.get(func).insts.get(inst_id);
        match inst.opcode {
            Opcode::Load if inst.operands[0].kind.as_inst() == Some(alloca) => {
                let mut b = Builder::new(module, func);
                b.replace_all_uses_with(Def::Inst(func, inst_id), current);
                to_erase.push(inst_id);
            }
            Opcode::Store if inst.operands[1].kind.as_inst() == Some(alloca) => {
                current = inst.operands[0].kind;
                to_erase.push(inst_id);
            }
            _ => {}
        }
    }

    let succs = module.funcs.get(func).blocks.get(block).succs.clone();
    for succ in succs {
        if let Some(&phi) = phis.get(&succ) {
            let preds = module.funcs.get(func).blocks.get(succ).preds.clone();
            if let Some(pos) = preds.iter().position(|&p| p == block) {
                let mut b = Builder::new(module, func);
                b.set_operand(phi, pos as u32, current);
            }
        }
    }

    let children = dom.children(block).to_vec();
    for child in children {
        rename(module, func, child, alloca, phis, current, dom, to_erase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::instruction::BinOp;
    use crate::ir::module::Module;

    #[test]
    fn promotes_a_single_block_scalar() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let entry = Builder::new(&mut m, f).create_block("entry");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let slot = b.append(entry, Opcode::Alloca, Type::pointer_to(Type::i32()), vec![]);
        b.append(entry, Opcode::Store, Type::void(), vec![OperandKind::Const(Const::I32(7)), OperandKind::Inst(slot)]);
        let load = b.append(entry, Opcode::Load, Type::i32(), vec![OperandKind::Inst(slot)]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(load)]);

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind.as_const(), Some(Const::I32(7)));
    }

    #[test]
    fn inserts_phi_at_join_block() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        m.funcs.get_mut(f).entry = Some(entry);

        let mut b = Builder::new(&mut m, f);
        let slot = b.append(entry, Opcode::Alloca, Type::pointer_to(Type::i32()), vec![]);
        let br = b.append(entry, Opcode::CondBr, Type::void(), vec![OperandKind::Const(Const::I32(1))]);
        b.set_targets(br, vec![left, right]);
        b.add_edge(entry, left);
        b.add_edge(entry, right);

        b.append(left, Opcode::Store, Type::void(), vec![OperandKind::Const(Const::I32(1)), OperandKind::Inst(slot)]);
        let br_l = b.append(left, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br_l, vec![join]);
        b.add_edge(left, join);

        b.append(right, Opcode::Store, Type::void(), vec![OperandKind::Const(Const::I32(2)), OperandKind::Inst(slot)]);
        let br_r = b.append(right, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br_r, vec![join]);
        b.add_edge(right, join);

        let load = b.append(join, Opcode::Load, Type::i32(), vec![OperandKind::Inst(slot)]);
        b.append(join, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(load)]);
        let _ = BinOp::Add;

        run(&mut m, f);
        let func = m.funcs.get(f);
        let first = func.blocks.get(join).first_inst.unwrap();
        assert_eq!(func.insts.get(first).opcode, Opcode::Phi);
    }
}
