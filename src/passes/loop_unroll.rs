//! Loop unrolling (`spec.md` §4.16): clones a loop body F-1 extra times
//! when the trip count is known at compile time and divides evenly by F,
//! so no remainder/epilogue loop is ever needed — choosing simplicity over
//! generality, per the decision recorded for this open question in
//! `DESIGN.md`.
//!
//! Restricted to a single-block loop body (header plus one latch block)
//! with a pre-header, one latch and one exit — the shape a lowered
//! `while (i < bound) { ...; i = i + step; }` has before any other pass
//! splits its body across blocks. The trip count is read off the header's
//! `icmp` comparing the basic induction variable against a loop-invariant
//! constant bound. Bodies over 256 instructions are left alone. Every
//! header `phi` fed from the latch (not just the counting induction
//! variable the trip count was derived from) has its value threaded
//! through the cloned copies, so accumulators computed in the loop body
//! come out correct after unrolling too.

use std::collections::HashMap;

use crate::analysis::{dominators, loops};
use crate::ir::builder::Builder;
use crate::ir::instruction::{BinOp, IPred, Opcode};
use crate::ir::operand::OperandKind;
use crate::ir::value::Const;
use crate::ir::{BlockId, FuncId, InstId, Module};

const MAX_BODY_INSTS: usize = 256;

pub fn run(module: &mut Module, func: FuncId, max_unroll_count: u32) -> bool {
    let factor = max_unroll_count as i32;
    if factor < 2 {
        return false;
    }
    let entry = match module.funcs.get(func).entry {
        Some(e) => e,
        None => return false,
    };
    let dom = dominators::compute(module.funcs.get(func), entry);
    let forest = loops::analyze(module.funcs.get(func), entry, &dom);
    if forest.is_empty() {
        return false;
    }

    for loop_id in forest.ids() {
        let l = forest.get(loop_id);
        if l.latches.len() != 1 || l.blocks.len() != 2 {
            continue;
        }
        let header = l.header;
        let latch = l.latches[0];
        let body_size = module.funcs.get(func).inst_order(latch).len();
        if body_size > MAX_BODY_INSTS {
            continue;
        }
        if forest.exit_blocks(loop_id, module.funcs.get(func)).len() != 1 {
            continue;
        }
        let outside_preds: Vec<BlockId> = module
            .funcs
            .get(func)
            .blocks
            .get(header)
            .preds
            .iter()
            .copied()
            .filter(|p| !l.contains(*p))
            .collect();
        let [preheader] = outside_preds[..] else { continue };

        let Some(plan) = plan_unroll(module, func, header, preheader, latch) else { continue };
        if plan.trip_count % factor != 0 {
            log::debug!(
                "loop_unroll: trip count {} not divisible by factor {}, skipping",
                plan.trip_count,
                factor
            );
            continue;
        }

        unroll_one(module, func, header, latch, factor);
        return true;
    }
    false
}

struct UnrollPlan {
    trip_count: i32,
}

fn plan_unroll(module: &Module, func: FuncId, header: BlockId, preheader: BlockId, latch: BlockId) -> Option<UnrollPlan> {
    let f = module.funcs.get(func);
    let preds = f.blocks.get(header).preds.clone();
    if preds.len() != 2 {
        return None;
    }
    let pre_pos = preds.iter().position(|&p| p == preheader)?;
    let latch_pos = preds.iter().position(|&p| p == latch)?;

    for inst_id in f.inst_order(header) {
        let inst = f.insts.get(inst_id);
        if inst.opcode != Opcode::Phi {
            continue;
        }
        let init = inst.operands[pre_pos].kind.as_const().and_then(|c| c.as_i32())?;
        let OperandKind::Inst(update_inst) = inst.operands[latch_pos].kind else { continue };
        let update = f.insts.get(update_inst);
        if update.opcode != Opcode::Binary(BinOp::Add) {
            continue;
        }
        if update.operands[0].kind.as_inst() != Some(inst_id) {
            continue;
        }
        let Some(step) = update.operands[1].kind.as_const().and_then(|c| c.as_i32()) else { continue };

        let Some(last) = f.blocks.get(header).last_inst else { continue };
        let condbr = f.insts.get(last);
        if condbr.opcode != Opcode::CondBr {
            continue;
        }
        let OperandKind::Inst(cmp_inst) = condbr.operands[0].kind else { continue };
        let cmp = f.insts.get(cmp_inst);
        if cmp.opcode != Opcode::ICmp(IPred::Slt) || cmp.operands[0].kind.as_inst() != Some(inst_id) {
            continue;
        }
        let Some(bound) = cmp.operands[1].kind.as_const().and_then(|c| c.as_i32()) else { continue };
        if step <= 0 || bound <= init || (bound - init) % step != 0 {
            continue;
        }
        let trip_count = (bound - init) / step;
        return Some(UnrollPlan { trip_count });
    }
    None
}

/// Clones the latch block `factor - 1` extra times and chains them
/// `latch -> clone1 -> clone2 -> ... -> header`. Every header `phi` whose
/// latch-incoming value is computed inside `latch` (not just the counting
/// induction variable `plan` was built from, but any other loop-carried
/// value such as an accumulator) is threaded the same way: each clone's
/// references to that `phi` are rewired to the *previous* clone's computed
/// value, so the cloned body sees the progressively advanced value instead
/// of re-reading the not-yet-updated `phi`. Once all clones exist, each
/// carried `phi`'s latch-incoming operand is repointed at the last clone's
/// copy of its update, so the back-edge into `header` carries the value
/// after all `factor` sub-iterations rather than just one.
fn unroll_one(module: &mut Module, func: FuncId, header: BlockId, latch: BlockId, factor: i32) {
    let carried = carried_phis(module, func, header, latch);

    // current[phi] is the most recently computed value standing in for that
    // phi; before any clone exists this is simply the original latch's update.
    let mut current: HashMap<InstId, InstId> = carried.iter().cloned().collect();
    let mut prev_block = latch;

    for clone_idx in 1..factor {
        let mut local_map: HashMap<InstId, InstId> =
            carried.iter().map(|&(phi, _)| (phi, current[&phi])).collect();

        let mut b = Builder::new(module, func);
        let new_block = b.insert_block_after(prev_block, format!("unroll{}.{}", clone_idx, latch.index()));

        let insts = module.funcs.get(func).inst_order(latch);
        for old_inst in insts {
            let data = module.funcs.get(func).insts.get(old_inst).clone();
            if data.opcode == Opcode::Phi || data.opcode.is_terminator() {
                continue;
            }
            let remapped_operands: Vec<OperandKind> =
                data.operands.iter().map(|slot| remap_operand(slot.kind, &local_map)).collect();
            let mut b = Builder::new(module, func);
            let new_inst = b.append(new_block, data.opcode, data.ty.clone(), remapped_operands);
            local_map.insert(old_inst, new_inst);
        }

        let mut b = Builder::new(module, func);
        let br = b.append(new_block, Opcode::Br, crate::ir::types::Type::void(), vec![]);
        b.set_targets(br, vec![header]);
        b.add_edge(new_block, header);
        b.redirect_branch(prev_block, header, new_block);

        for &(phi, update) in &carried {
            if let Some(&new_update) = local_map.get(&update) {
                current.insert(phi, new_update);
            }
        }
        prev_block = new_block;
    }

    let preds = module.funcs.get(func).blocks.get(header).preds.clone();
    let Some(latch_pos) = preds.iter().position(|&p| p == prev_block) else { return };
    let mut b = Builder::new(module, func);
    for &(phi, _) in &carried {
        b.set_operand(phi, latch_pos as u32, OperandKind::Inst(current[&phi]));
    }
}

/// Header `phi`s whose latch-incoming value is an instruction physically
/// located in `latch` — the set of loop-carried values that need their
/// value threaded across unrolled clones, not just the canonical counting
/// induction variable.
fn carried_phis(module: &Module, func: FuncId, header: BlockId, latch: BlockId) -> Vec<(InstId, InstId)> {
    let f = module.funcs.get(func);
    let preds = f.blocks.get(header).preds.clone();
    let Some(latch_pos) = preds.iter().position(|&p| p == latch) else { return Vec::new() };
    let mut out = Vec::new();
    for inst_id in f.inst_order(header) {
        let inst = f.insts.get(inst_id);
        if inst.opcode != Opcode::Phi {
            continue;
        }
        if let OperandKind::Inst(update) = inst.operands[latch_pos].kind {
            if f.insts.get(update).block == latch {
                out.push((inst_id, update));
            }
        }
    }
    out
}

fn remap_operand(kind: OperandKind, value_map: &HashMap<InstId, InstId>) -> OperandKind {
    match kind {
        OperandKind::Inst(i) => value_map.get(&i).copied().map(OperandKind::Inst).unwrap_or(kind),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::types::Type;

    #[test]
    fn unrolls_a_loop_with_exact_trip_count() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::void()));
        let mut b = Builder::new(&mut m, f);
        let preheader = b.create_block("preheader");
        let header = b.create_block("header");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        m.funcs.get_mut(f).entry = Some(preheader);

        let mut b = Builder::new(&mut m, f);
        let br0 = b.append(preheader, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br0, vec![header]);
        b.add_edge(preheader, header);

        let phi = b.append(header, Opcode::Phi, Type::i32(), vec![
            OperandKind::Const(Const::I32(0)),
            OperandKind::Const(Const::Undef(crate::ir::value::ConstTy::I32)),
        ]);
        let cmp = b.append(header, Opcode::ICmp(IPred::Slt), Type::i32(), vec![
            OperandKind::Inst(phi),
            OperandKind::Const(Const::I32(8)),
        ]);
        let condbr = b.append(header, Opcode::CondBr, Type::void(), vec![OperandKind::Inst(cmp)]);
        b.set_targets(condbr, vec![body, exit]);
        b.add_edge(header, body);
        b.add_edge(header, exit);

        let update = b.append(body, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Inst(phi),
            OperandKind::Const(Const::I32(1)),
        ]);
        let br1 = b.append(body, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br1, vec![header]);
        b.add_edge(body, header);
        b.append(exit, Opcode::Ret, Type::void(), vec![]);

        let preds = m.funcs.get(f).blocks.get(header).preds.clone();
        let latch_pos = preds.iter().position(|&p| p == body).unwrap();
        let mut b = Builder::new(&mut m, f);
        b.set_operand(phi, latch_pos as u32, OperandKind::Inst(update));

        let changed = run(&mut m, f, 4);
        assert!(changed);
        let func = m.funcs.get(f);
        let cloned_blocks = func.block_order().iter().filter(|b| func.blocks.get(**b).name.starts_with("unroll")).count();
        assert_eq!(cloned_blocks, 3);

        // The header phi's back-edge value now comes from the last clone's
        // own copy of the induction-variable update, not the original
        // latch's — each sub-iteration still adds the unwidened step of 1.
        let preds = func.blocks.get(header).preds.clone();
        let last_clone = *preds.iter().find(|&&p| p != preheader).unwrap();
        let last_update = func
            .inst_order(last_clone)
            .into_iter()
            .find(|&i| func.insts.get(i).opcode == Opcode::Binary(BinOp::Add))
            .unwrap();
        assert_eq!(func.insts.get(phi).operands[preds.iter().position(|&p| p == last_clone).unwrap()].kind.as_inst(), Some(last_update));
        assert_eq!(func.insts.get(last_update).operands[1].kind.as_const(), Some(Const::I32(1)));
    }
}
