//! Induction variable simplification (`spec.md` §4.15): strength-reduces
//! a derived induction variable — one computed as `biv * scale` inside the
//! loop body — into its own basic induction variable, so the multiply
//! disappears from the loop and is replaced by one more `add` per
//! iteration, paid for once in the pre-header instead.
//!
//! Limited to loops LICM has already given a single pre-header and that
//! have exactly one latch, the shape every lowered `while`/`for` loop has
//! before unrolling. A basic induction variable is a header `phi` with
//! exactly two incoming values: one from the pre-header (`init`) and one
//! from the latch that is `phi +/- step` with `step` loop-invariant.

use crate::analysis::{dominators, loops};
use crate::ir::builder::Builder;
use crate::ir::instruction::{BinOp, Opcode};
use crate::ir::operand::{Def, OperandKind};
use crate::ir::value::Const;
use crate::ir::{BlockId, FuncId, InstId, Module};

struct Biv {
    phi: InstId,
    header: BlockId,
    preheader: BlockId,
    latch: BlockId,
    init: OperandKind,
    step: i32,
    negative: bool,
}

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
        if l.latches.len() != 1 {
            continue;
        }
        let header = l.header;
        let latch = l.latches[0];
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

        let bivs = find_bivs(module, func, header, preheader, latch);
        for biv in bivs {
            changed |= strength_reduce(module, func, &l.blocks.clone(), &biv);
        }
    }
    changed
}

fn find_bivs(module: &Module, func: FuncId, header: BlockId, preheader: BlockId, latch: BlockId) -> Vec<Biv> {
    let f = module.funcs.get(func);
    let mut out = Vec::new();
    let preds = f.blocks.get(header).preds.clone();
    for inst_id in f.inst_order(header) {
        let inst = f.insts.get(inst_id);
        if inst.opcode != Opcode::Phi {
            continue;
        }
        if preds.len() != 2 || inst.operands.len() != 2 {
            continue;
        }
        let Some(pre_pos) = preds.iter().position(|&p| p == preheader) else { continue };
        let Some(latch_pos) = preds.iter().position(|&p| p == latch) else { continue };
        let init = inst.operands[pre_pos].kind;
        let latch_val = inst.operands[latch_pos].kind;
        let OperandKind::Inst(update_inst) = latch_val else { continue };
        let update = f.insts.get(update_inst);
        let (Opcode::Binary(BinOp::Add) | Opcode::Binary(BinOp::Sub)) = update.opcode else { continue };
        let negative = update.opcode == Opcode::Binary(BinOp::Sub);
        let a = update.operands[0].kind;
        let b = update.operands[1].kind;
        let (phi_operand, step_operand) = if a.as_inst() == Some(inst_id) {
            (a, b)
        } else if !negative && b.as_inst() == Some(inst_id) {
            (b, a)
        } else {
            continue;
        };
        let _ = phi_operand;
        let Some(Const::I32(step)) = step_operand.as_const() else { continue };
        out.push(Biv { phi: inst_id, header, preheader, latch, init, step, negative });
    }
    out
}

fn strength_reduce(
    module: &mut Module,
    func: FuncId,
    loop_blocks: &std::collections::HashSet<BlockId>,
    biv: &Biv,
) -> bool {
    let derived = find_derived_multiplies(module, func, loop_blocks, biv.phi);
    if derived.is_empty() {
        return false;
    }
    for (mul_inst, scale) in derived {
        let effective_step = if biv.negative { -biv.step * scale } else { biv.step * scale };

        let init_scaled = match biv.init.as_const() {
            Some(Const::I32(i)) => OperandKind::Const(Const::I32(i * scale)),
            _ => {
                let mut b = Builder::new(module, func);
                let inst = b.append(
                    biv.preheader,
                    Opcode::Binary(BinOp::Mul),
                    crate::ir::types::Type::i32(),
                    vec![biv.init, OperandKind::Const(Const::I32(scale))],
                );
                OperandKind::Inst(inst)
            }
        };

        let mut b = Builder::new(module, func);
        let new_phi = b.insert_phi(biv.header, crate::ir::types::Type::i32(), vec![
            init_scaled,
            OperandKind::Const(Const::Undef(crate::ir::value::ConstTy::I32)),
        ]);
        let preds = module.funcs.get(func).blocks.get(biv.header).preds.clone();
        let pre_pos = preds.iter().position(|&p| p == biv.preheader).unwrap();
        let latch_pos = preds.iter().position(|&p| p == biv.latch).unwrap();
        let mut b = Builder::new(module, func);
        b.set_operand(new_phi, pre_pos as u32, init_scaled);

        let update_op = if effective_step < 0 { BinOp::Sub } else { BinOp::Add };
        let step_mag = effective_step.abs();
        let update = b.append(biv.latch, Opcode::Binary(update_op), crate::ir::types::Type::i32(), vec![
            OperandKind::Inst(new_phi),
            OperandKind::Const(Const::I32(step_mag)),
        ]);
        b.set_operand(new_phi, latch_pos as u32, OperandKind::Inst(update));

        b.replace_all_uses_with(Def::Inst(func, mul_inst), OperandKind::Inst(new_phi));
        b.erase_inst(mul_inst);
    }
    true
}

fn find_derived_multiplies(
    module: &Module,
    func: FuncId,
    loop_blocks: &std::collections::HashSet<BlockId>,
    biv: InstId,
) -> Vec<(InstId, i32)> {
    let f = module.funcs.get(func);
    let mut out = Vec::new();
    for &block in loop_blocks {
        for inst_id in f.inst_order(block) {
            let inst = f.insts.get(inst_id);
            if inst.opcode != Opcode::Binary(BinOp::Mul) {
                continue;
            }
            let a = inst.operands[0].kind;
            let b = inst.operands[1].kind;
            let scale = if a.as_inst() == Some(biv) {
                b.as_const().and_then(|c| c.as_i32())
            } else if b.as_inst() == Some(biv) {
                a.as_const().and_then(|c| c.as_i32())
            } else {
                None
            };
            if let Some(scale) = scale {
                out.push((inst_id, scale));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::instruction::IPred;
    use crate::ir::types::Type;

    #[test]
    fn strength_reduces_a_multiply_by_a_basic_induction_variable() {
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

        let mul = b.append(body, Opcode::Binary(BinOp::Mul), Type::i32(), vec![
            OperandKind::Inst(phi),
            OperandKind::Const(Const::I32(4)),
        ]);
        let update = b.append(body, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Inst(phi),
            OperandKind::Const(Const::I32(1)),
        ]);
        let br1 = b.append(body, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br1, vec![header]);
        b.add_edge(body, header);
        let _ = mul;

        b.append(exit, Opcode::Ret, Type::void(), vec![]);

        {
            let preds = m.funcs.get(f).blocks.get(header).preds.clone();
            let latch_pos = preds.iter().position(|&p| p == body).unwrap();
            let mut b = Builder::new(&mut m, f);
            b.set_operand(phi, latch_pos as u32, OperandKind::Inst(update));
        }

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        let mul_still_present = func.insts.iter().any(|(_, i)| i.opcode == Opcode::Binary(BinOp::Mul));
        assert!(!mul_still_present);
    }
}
