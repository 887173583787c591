//! Aggressive Dead Code Elimination (`spec.md` §4.12): mark-sweep liveness,
//! run as a whole-function fixed point in the same style the other passes
//! in this pipeline use (`sccp`, `cse`) rather than a textbook sparse
//! worklist.
//!
//! Critical instructions (`Store`, `Call`, `Ret`, `Br`/`CondBr`) seed the
//! live set. Liveness then propagates backward: a live instruction marks
//! the definitions of its operands live (data-flow), and marks the
//! terminators of every predecessor of its own block live (control-flow —
//! reaching this block at all requires those branches). `Phi` is the one
//! exception: it only propagates liveness along incoming edges whose
//! predecessor terminator is *already* live, so a dead predecessor can't
//! be kept alive merely because some unrelated `Phi` mentions it.

use std::collections::HashSet;

use crate::ir::builder::Builder;
use crate::ir::instruction::Opcode;
use crate::ir::operand::OperandKind;
use crate::ir::{FuncId, InstId, Module};

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let inst_count = module.funcs.get(func).insts.iter().count();
    if inst_count == 0 {
        return false;
    }

    let mut live: HashSet<InstId> = HashSet::new();
    let mut live_terms: HashSet<crate::ir::BlockId> = HashSet::new();
    {
        let f = module.funcs.get(func);
        for (id, inst) in f.insts.iter() {
            if inst.opcode.has_side_effects() {
                live.insert(id);
                if inst.opcode.is_terminator() {
                    live_terms.insert(inst.block);
                }
            }
        }
    }

    let bound = 2 * inst_count;
    let mut reached_fixed_point = false;
    for _ in 0..bound {
        let f = module.funcs.get(func);
        let mut changed = false;
        for (id, inst) in f.insts.iter() {
            if !live.contains(&id) {
                continue;
            }
            if inst.opcode == Opcode::Phi {
                let preds = &f.blocks.get(inst.block).preds;
                for (i, slot) in inst.operands.iter().enumerate() {
                    if i >= preds.len() || !live_terms.contains(&preds[i]) {
                        continue;
                    }
                    if let OperandKind::Inst(def) = slot.kind {
                        changed |= live.insert(def);
                    }
                }
            } else {
                for slot in &inst.operands {
                    if let OperandKind::Inst(def) = slot.kind {
                        changed |= live.insert(def);
                    }
                }
            }
            for pred in &f.blocks.get(inst.block).preds {
                if let Some(term) = f.blocks.get(*pred).last_inst {
                    changed |= live.insert(term);
                }
                changed |= live_terms.insert(*pred);
            }
        }
        if !changed {
            reached_fixed_point = true;
            break;
        }
    }
    if !reached_fixed_point {
        log::warn!("adce: liveness propagation did not reach a fixed point within {bound} iterations");
    }

    let to_erase: Vec<InstId> = module
        .funcs
        .get(func)
        .insts
        .iter()
        .filter(|(id, _)| !live.contains(id))
        .map(|(id, _)| id)
        .collect();
    if to_erase.is_empty() {
        return false;
    }
    let mut b = Builder::new(module, func);
    for inst in to_erase {
        b.erase_inst(inst);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::instruction::BinOp;
    use crate::ir::types::Type;
    use crate::ir::value::Const;

    #[test]
    fn erases_a_dead_computation_but_keeps_the_live_chain() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let dead = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(1)),
            OperandKind::Const(Const::I32(2)),
        ]);
        let live = b.append(entry, Opcode::Binary(BinOp::Mul), Type::i32(), vec![
            OperandKind::Const(Const::I32(3)),
            OperandKind::Const(Const::I32(4)),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(live)]);
        let _ = dead;

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        assert!(func.insts.iter().all(|(id, _)| id != dead));
        assert!(func.insts.iter().any(|(id, _)| id == live));
    }

    #[test]
    fn keeps_a_phi_edge_only_from_a_live_predecessor() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        m.funcs.get_mut(f).entry = Some(entry);

        let mut b = Builder::new(&mut m, f);
        let cond = b.append(entry, Opcode::CondBr, Type::void(), vec![OperandKind::Const(Const::I32(1))]);
        b.set_targets(cond, vec![left, right]);
        b.add_edge(entry, left);
        b.add_edge(entry, right);

        let l_val = b.append(left, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(1)),
            OperandKind::Const(Const::I32(1)),
        ]);
        let br_l = b.append(left, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br_l, vec![join]);
        b.add_edge(left, join);

        let r_val = b.append(right, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(2)),
            OperandKind::Const(Const::I32(2)),
        ]);
        let br_r = b.append(right, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br_r, vec![join]);
        b.add_edge(right, join);

        let phi = b.append(join, Opcode::Phi, Type::i32(), vec![
            OperandKind::Inst(l_val),
            OperandKind::Inst(r_val),
        ]);
        b.append(join, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(phi)]);

        let changed = run(&mut m, f);
        assert!(!changed);
        let func = m.funcs.get(f);
        assert!(func.insts.iter().any(|(id, _)| id == l_val));
        assert!(func.insts.iter().any(|(id, _)| id == r_val));
    }
}
