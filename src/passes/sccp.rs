//! Sparse Conditional Constant Propagation (`spec.md` §4.10): finds
//! instructions and branches whose value is a compile-time constant on
//! every *reachable* path, jointly solving "is this block reachable" and
//! "is this value constant" the way the original Wegman-Zadeck algorithm
//! does (a constant branch condition can make code unreachable, and
//! unreachable code can't poison an otherwise-constant value via an
//! unreachable phi edge).
//!
//! This implementation iterates to a fixed point over the whole function
//! rather than maintaining separate CFG/SSA worklists — a simpler
//! "SCCP-lite" that reaches the same fixed point, just not via the
//! textbook's minimal amount of re-evaluation.

use std::collections::{HashMap, HashSet};

use crate::analysis::cfg::reverse_postorder;
use crate::ir::builder::Builder;
use crate::ir::instruction::Opcode;
use crate::ir::operand::{Def, OperandKind};
use crate::ir::value::Const;
use crate::ir::{BlockId, FuncId, InstId, Module};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lattice {
    Top,
    Known(Const),
    Bottom,
}

impl Lattice {
    fn meet(self, other: Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Top, x) | (x, Lattice::Top) => x,
            (Lattice::Known(a), Lattice::Known(b)) if consts_eq(a, b) => Lattice::Known(a),
            _ => Lattice::Bottom,
        }
    }
}

fn consts_eq(a: Const, b: Const) -> bool {
    match (a, b) {
        (Const::I32(x), Const::I32(y)) => x == y,
        (Const::F32(x), Const::F32(y)) => x == y,
        _ => false,
    }
}

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let entry = match module.funcs.get(func).entry {
        Some(e) => e,
        None => return false,
    };

    let mut executable: HashSet<BlockId> = HashSet::new();
    executable.insert(entry);
    let mut values: HashMap<InstId, Lattice> = HashMap::new();

    loop {
        let mut changed = false;
        let order = reverse_postorder(module.funcs.get(func), entry);
        for block in order {
            if !executable.contains(&block) {
                continue;
            }
            for inst_id in module.funcs.get(func).inst_order(block) {
                let before = values.get(&inst_id).copied().unwrap_or(Lattice::Top);
                let after = evaluate(module, func, inst_id, &values, &executable);
                if after != before {
                    values.insert(inst_id, after);
                    changed = true;
                }
                if let Some(targets) = branch_targets(module, func, inst_id, &values) {
                    for t in targets {
                        if executable.insert(t) {
                            changed = true;
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut rewritten = false;
    for (inst, lattice) in values {
        if let Lattice::Known(c) = lattice {
            let still_there = module.funcs.get(func).insts.get(inst).opcode != Opcode::Ret;
            let _ = still_there;
            let mut b = Builder::new(module, func);
            b.replace_all_uses_with(Def::Inst(func, inst), OperandKind::Const(c));
            rewritten = true;
        }
    }
    rewritten
}

fn evaluate(
    module: &Module,
    func: FuncId,
    inst_id: InstId,
    values: &HashMap<InstId, Lattice>,
    executable: &HashSet<BlockId>,
) -> Lattice {
    let f = module.funcs.get(func);
    let inst = f.insts.get(inst_id);
    let operand_lattice = |kind: OperandKind| -> Lattice {
        match kind {
            OperandKind::Const(c) => Lattice::Known(c),
            OperandKind::Inst(i) => values.get(&i).copied().unwrap_or(Lattice::Top),
            OperandKind::Param(_) => Lattice::Bottom,
            _ => Lattice::Bottom,
        }
    };
    match inst.opcode {
        Opcode::Binary(op) => {
            let a = operand_lattice(inst.operands[0].kind);
            let b = operand_lattice(inst.operands[1].kind);
            match (a, b) {
                (Lattice::Known(ca), Lattice::Known(cb)) => {
                    fold_binop(op, ca, cb).map(Lattice::Known).unwrap_or(Lattice::Bottom)
                }
                (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                _ => Lattice::Top,
            }
        }
        Opcode::ICmp(pred) => {
            let a = operand_lattice(inst.operands[0].kind);
            let b = operand_lattice(inst.operands[1].kind);
            match (a, b) {
                (Lattice::Known(Const::I32(x)), Lattice::Known(Const::I32(y))) => {
                    Lattice::Known(Const::I32(pred.eval(x, y) as i32))
                }
                (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                _ => Lattice::Top,
            }
        }
        Opcode::Phi => {
            let preds = &f.blocks.get(inst.block).preds;
            let mut acc = Lattice::Top;
            for (slot, &pred) in inst.operands.iter().zip(preds.iter()) {
                if !executable.contains(&pred) {
                    continue;
                }
                acc = acc.meet(operand_lattice(slot.kind));
            }
            acc
        }
        _ => Lattice::Bottom,
    }
}

fn branch_targets(
    module: &Module,
    func: FuncId,
    inst_id: InstId,
    values: &HashMap<InstId, Lattice>,
) -> Option<Vec<BlockId>> {
    let f = module.funcs.get(func);
    let inst = f.insts.get(inst_id);
    match inst.opcode {
        Opcode::Br => Some(vec![inst.targets[0]]),
        Opcode::CondBr => {
            let cond = match inst.operands[0].kind {
                OperandKind::Const(c) => Some(c),
                OperandKind::Inst(i) => match values.get(&i) {
                    Some(Lattice::Known(c)) => Some(*c),
                    _ => None,
                },
                _ => None,
            };
            match cond.and_then(|c| c.is_truthy()) {
                Some(true) => Some(vec![inst.targets[0]]),
                Some(false) => Some(vec![inst.targets[1]]),
                None => Some(inst.targets.clone()),
            }
        }
        _ => None,
    }
}

fn fold_binop(op: crate::ir::instruction::BinOp, a: Const, b: Const) -> Option<Const> {
    use crate::ir::instruction::BinOp::*;
    match (a, b) {
        (Const::I32(x), Const::I32(y)) => Some(Const::I32(match op {
            Add => x.wrapping_add(y),
            Sub => x.wrapping_sub(y),
            Mul => x.wrapping_mul(y),
            // `spec.md` §9 open question, matching `lowering::const_eval`:
            // division/modulo by a constant zero folds to zero.
            Div => if y == 0 { 0 } else { x.wrapping_div(y) },
            Rem => if y == 0 { 0 } else { x.wrapping_rem(y) },
            And => x & y,
            Or => x | y,
            Xor => x ^ y,
            Shl => x.wrapping_shl(y as u32),
            Shr => x.wrapping_shr(y as u32),
            _ => return None,
        })),
        (Const::F32(x), Const::F32(y)) => Some(Const::F32(match op {
            FAdd => x + y,
            FSub => x - y,
            FMul => x * y,
            FDiv => x / y,
            _ => return None,
        })),
        _ => None,
    }
}
