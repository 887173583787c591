//! Loop-Invariant Code Motion (`spec.md` §4.14): hoists instructions whose
//! operands are all defined outside the loop (or are other
//! already-hoisted invariants) into a synthesized pre-header block that
//! runs exactly once before the loop, rather than once per iteration.
//!
//! Pre-header synthesis only handles the single-outside-predecessor case
//! a lowered SysY `while`/`for` loop always has: one block outside the
//! loop branches into the header. A loop reached by more than one outside
//! edge would need its header's `phi`s re-merged through the new
//! pre-header, which this pass does not attempt — it skips such loops
//! rather than risk corrupting their `phi`s.
//!
//! A candidate is hoisted only if it is safe to run unconditionally
//! (`Load`, `Div`, `Rem`, and `FDiv` never are — a load may see a stale
//! value if an aliasing store only executes on some iterations, and
//! division/remainder can trap on an input the loop might never have
//! reached) and its block dominates every loop exit, so moving it to the
//! pre-header can't make a conditionally-executed computation run on a
//! path that used to skip it.

use crate::analysis::dominators::DomTree;
use crate::analysis::{dominators, loops};
use crate::ir::builder::Builder;
use crate::ir::instruction::{BinOp, Opcode};
use crate::ir::operand::OperandKind;
use crate::ir::{BlockId, FuncId, InstId, Module};

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let entry = match module.funcs.get(func).entry {
        Some(e) => e,
        None => return false,
    };
    let dom = dominators::compute(module.funcs.get(func), entry);
    let forest = loops::analyze(module.funcs.get(func), entry, &dom);
    if forest.is_empty() {
        return false;
    }

    let mut changed = false;
    for loop_id in forest.ids() {
        let l = forest.get(loop_id);
        let header = l.header;
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
        if outside_preds.len() != 1 {
            log::debug!("licm: skipping multi-entry loop at header {:?}", header);
            continue;
        }
        let preheader_pred = outside_preds[0];
        let exits = forest.exit_blocks(loop_id, module.funcs.get(func));

        let preheader = synthesize_preheader(module, func, preheader_pred, header);
        changed |= hoist_invariants(module, func, &l.blocks.clone(), preheader, &exits, &dom);
    }
    changed
}

/// Splices a fresh block between `pred` and `header` using
/// [`Builder::splice_block_into_edge`] rather than `redirect_branch`, so
/// `header`'s predecessor list keeps `preheader` at the exact index `pred`
/// used to occupy — required because `header` generally already has a
/// `phi` (its loop-carried values, promoted by `mem2reg` before this pass
/// ever runs) whose operand order is tied to that position.
fn synthesize_preheader(module: &mut Module, func: FuncId, pred: BlockId, header: BlockId) -> BlockId {
    let mut b = Builder::new(module, func);
    let preheader = b.insert_block_after(pred, format!("preheader.{}", header.index()));
    b.splice_block_into_edge(pred, header, preheader);
    module.funcs.get_mut(func).blocks.get_mut(preheader).preds.push(pred);
    module.funcs.get_mut(func).blocks.get_mut(preheader).succs.push(header);
    let mut b = Builder::new(module, func);
    let br = b.append(preheader, Opcode::Br, crate::ir::types::Type::void(), vec![]);
    b.set_targets(br, vec![header]);
    preheader
}

/// An opcode LICM may never hoist regardless of its operands: `Load` can
/// observe a store that only happens on some loop iterations, and
/// division/remainder can trap on an input the original program might
/// never have reached (`spec.md` §4.14 — "not Load/Store/Call, not
/// division/remainder which may trap").
fn is_unsafe_to_hoist(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Load
            | Opcode::Binary(BinOp::Div)
            | Opcode::Binary(BinOp::Rem)
            | Opcode::Binary(BinOp::FDiv)
    )
}

fn hoist_invariants(
    module: &mut Module,
    func: FuncId,
    loop_blocks: &std::collections::HashSet<BlockId>,
    preheader: BlockId,
    exits: &[BlockId],
    dom: &DomTree,
) -> bool {
    let mut hoisted: std::collections::HashSet<InstId> = std::collections::HashSet::new();
    let mut changed = false;
    loop {
        let mut moved_this_round = false;
        for &block in loop_blocks {
            if block == preheader {
                continue;
            }
            if !exits.iter().all(|&exit| dom.dominates(block, exit)) {
                continue;
            }
            let insts = module.funcs.get(func).inst_order(block);
            for inst_id in insts {
                if hoisted.contains(&inst_id) {
                    continue;
                }
                let data = module.funcs.get(func).insts.get(inst_id);
                if data.opcode.has_side_effects() || data.opcode.is_terminator() || data.opcode == Opcode::Phi {
                    continue;
                }
                if is_unsafe_to_hoist(data.opcode) {
                    continue;
                }
                let all_invariant = data.operands.iter().all(|slot| is_invariant(slot.kind, loop_blocks, module, func, &hoisted));
                if all_invariant {
                    let mut b = Builder::new(module, func);
                    b.move_to_end(inst_id, preheader);
                    hoisted.insert(inst_id);
                    moved_this_round = true;
                    changed = true;
                }
            }
        }
        if !moved_this_round {
            break;
        }
    }
    changed
}

fn is_invariant(
    kind: OperandKind,
    loop_blocks: &std::collections::HashSet<BlockId>,
    module: &Module,
    func: FuncId,
    hoisted: &std::collections::HashSet<InstId>,
) -> bool {
    match kind {
        OperandKind::Const(_) | OperandKind::Global(_) | OperandKind::Function(_) | OperandKind::Param(_) => true,
        OperandKind::Inst(i) => hoisted.contains(&i) || !loop_blocks.contains(&module.funcs.get(func).insts.get(i).block),
        OperandKind::Removed => true,
    }
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
    fn hoists_an_invariant_computation_out_of_the_loop() {
        // Rotated ("do-while") shape, where the exiting branch lives in
        // `body` rather than `header`: `body` is then the loop's only
        // exiting block, so it trivially dominates the sole exit, and the
        // exit-domination guard does not block hoisting the invariant.
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::void()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let header = b.create_block("header");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        m.funcs.get_mut(f).entry = Some(entry);

        let mut b = Builder::new(&mut m, f);
        let br0 = b.append(entry, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br0, vec![header]);
        b.add_edge(entry, header);

        let br_h = b.append(header, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br_h, vec![body]);
        b.add_edge(header, body);

        let invariant = b.append(body, Opcode::Binary(BinOp::Mul), Type::i32(), vec![
            OperandKind::Const(Const::I32(2)),
            OperandKind::Const(Const::I32(3)),
        ]);
        let cond = b.append(body, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(1)),
            OperandKind::Const(Const::I32(1)),
        ]);
        let condbr = b.append(body, Opcode::CondBr, Type::void(), vec![OperandKind::Inst(cond)]);
        b.set_targets(condbr, vec![header, exit]);
        b.add_edge(body, header);
        b.add_edge(body, exit);
        let _ = invariant;

        b.append(exit, Opcode::Ret, Type::void(), vec![]);

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        let preheader_block = func
            .blocks
            .iter()
            .find(|(_, bd)| bd.name.starts_with("preheader"))
            .map(|(id, _)| id)
            .unwrap();
        let hoisted_here = func.inst_order(preheader_block).into_iter().any(|i| func.insts.get(i).opcode == Opcode::Binary(BinOp::Mul));
        assert!(hoisted_here);
    }

    #[test]
    fn preheader_synthesis_keeps_header_phi_operands_aligned() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let header = b.create_block("header");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        m.funcs.get_mut(f).entry = Some(entry);

        let mut b = Builder::new(&mut m, f);
        let br0 = b.append(entry, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br0, vec![header]);
        b.add_edge(entry, header);

        // Header's phi has its "from entry" operand first, matching
        // header.preds == [entry, body] at this point.
        let phi = b.append(header, Opcode::Phi, Type::i32(), vec![
            OperandKind::Const(Const::I32(0)),
            OperandKind::Const(Const::Undef(crate::ir::value::ConstTy::I32)),
        ]);
        let condbr = b.append(header, Opcode::CondBr, Type::void(), vec![OperandKind::Inst(phi)]);
        b.set_targets(condbr, vec![body, exit]);
        b.add_edge(header, body);
        b.add_edge(header, exit);

        let next = b.append(body, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Inst(phi),
            OperandKind::Const(Const::I32(1)),
        ]);
        let br1 = b.append(body, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br1, vec![header]);
        b.add_edge(body, header);

        let preds = m.funcs.get(f).blocks.get(header).preds.clone();
        let body_pos = preds.iter().position(|&p| p == body).unwrap();
        let mut b = Builder::new(&mut m, f);
        b.set_operand(phi, body_pos as u32, OperandKind::Inst(next));

        b.append(exit, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(phi)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let preheader_block = func
            .blocks
            .iter()
            .find(|(_, bd)| bd.name.starts_with("preheader"))
            .map(|(id, _)| id)
            .unwrap();
        let new_preds = func.blocks.get(header).preds.clone();
        let preheader_pos = new_preds.iter().position(|&p| p == preheader_block).unwrap();
        let body_pos_after = new_preds.iter().position(|&p| p == body).unwrap();
        // The preheader took over entry's old slot; the operand at that
        // slot must still be the "from entry" constant zero, and the
        // operand at body's (unchanged) slot must still be the update.
        assert_eq!(func.insts.get(phi).operands[preheader_pos].kind.as_const(), Some(Const::I32(0)));
        assert_eq!(func.insts.get(phi).operands[body_pos_after].kind.as_inst(), Some(next));
    }
}
