//! Peephole instruction combining (`spec.md` §4.9): local algebraic
//! simplifications and constant folding that don't need any dataflow
//! analysis — each rewrite only looks at one instruction's own operands
//! (plus, for `(x - y) + y`, the single defining instruction behind one of
//! them).
//!
//! Driven by a worklist rather than one linear sweep: simplifying an
//! instruction can expose a further simplification in whatever used its
//! old result (or, for a strength reduction, in the freshly synthesized
//! replacement itself), so both get pushed back on instead of waiting for
//! the next whole-function pass.

use std::collections::{HashSet, VecDeque};

use crate::ir::builder::Builder;
use crate::ir::instruction::{BinOp, IPred, Opcode};
use crate::ir::operand::{Def, OperandKind};
use crate::ir::types::Type;
use crate::ir::value::Const;
use crate::ir::{FuncId, InstId, Module};

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let mut worklist: VecDeque<InstId> = module.funcs.get(func).insts.ids().collect();
    let mut queued: HashSet<InstId> = worklist.iter().copied().collect();
    let mut erased: HashSet<InstId> = HashSet::new();
    let mut changed = false;

    while let Some(inst) = worklist.pop_front() {
        queued.remove(&inst);
        if erased.contains(&inst) {
            continue;
        }

        if canonicalize(module, func, inst) {
            changed = true;
            enqueue(&mut worklist, &mut queued, inst);
            continue;
        }

        let Some(replacement) = simplify(module, func, inst) else { continue };
        let users = users_of(module, func, inst);
        let mut b = Builder::new(module, func);
        b.replace_all_uses_with(Def::Inst(func, inst), replacement);
        b.erase_inst(inst);
        erased.insert(inst);
        changed = true;

        for u in users {
            enqueue(&mut worklist, &mut queued, u);
        }
        if let OperandKind::Inst(new_inst) = replacement {
            enqueue(&mut worklist, &mut queued, new_inst);
        }
    }
    changed
}

fn enqueue(worklist: &mut VecDeque<InstId>, queued: &mut HashSet<InstId>, inst: InstId) {
    if queued.insert(inst) {
        worklist.push_back(inst);
    }
}

/// Every instruction currently reading `inst`'s result, found by walking
/// its use list rather than scanning the function.
fn users_of(module: &Module, func: FuncId, inst: InstId) -> Vec<InstId> {
    let f = module.funcs.get(func);
    let mut out = Vec::new();
    let mut cur = f.insts.get(inst).first_use;
    while let Some(u) = cur {
        out.push(u.user);
        cur = f.insts.get(u.user).operands[u.index as usize].next;
    }
    out
}

fn is_commutative(op: BinOp) -> bool {
    matches!(op, BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::FAdd | BinOp::FMul)
}

/// Moves a lone constant operand of a commutative binary op to the right,
/// so every identity below only has to check one side. A no-op (and
/// reported as such) once already canonical, or when both or neither
/// operand is constant.
fn canonicalize(module: &mut Module, func: FuncId, inst: InstId) -> bool {
    let data = module.funcs.get(func).insts.get(inst);
    let Opcode::Binary(op) = data.opcode else { return false };
    if !is_commutative(op) {
        return false;
    }
    let l = data.operands[0].kind;
    let r = data.operands[1].kind;
    if l.as_const().is_some() && r.as_const().is_none() {
        let mut b = Builder::new(module, func);
        b.set_operand(inst, 0, r);
        b.set_operand(inst, 1, l);
        true
    } else {
        false
    }
}

fn simplify(module: &mut Module, func: FuncId, inst: InstId) -> Option<OperandKind> {
    let opcode = module.funcs.get(func).insts.get(inst).opcode;
    match opcode {
        Opcode::Binary(op) => {
            let data = module.funcs.get(func).insts.get(inst);
            let l = data.operands[0].kind;
            let r = data.operands[1].kind;
            simplify_binary(module, func, inst, op, l, r)
        }
        Opcode::ICmp(pred) => {
            let data = module.funcs.get(func).insts.get(inst);
            simplify_icmp(pred, data.operands[0].kind, data.operands[1].kind)
        }
        Opcode::Phi => simplify_phi(module, func, inst),
        _ => None,
    }
}

fn simplify_binary(module: &mut Module, func: FuncId, inst: InstId, op: BinOp, l: OperandKind, r: OperandKind) -> Option<OperandKind> {
    if let (Some(lc), Some(rc)) = (l.as_const(), r.as_const()) {
        return fold_const_binop(op, lc, rc).map(OperandKind::Const);
    }

    match op {
        BinOp::Add if is_zero(r) => return Some(l),
        BinOp::Add => {
            if let Some(x) = cancel_sub_then_add(module, func, l, r).or_else(|| cancel_sub_then_add(module, func, r, l)) {
                return Some(x);
            }
        }
        BinOp::Sub if is_zero(r) => return Some(l),
        BinOp::Sub if same_operand(l, r) => return Some(OperandKind::Const(Const::I32(0))),
        BinOp::Mul if is_one(r) => return Some(l),
        BinOp::Mul if is_zero(r) => return Some(OperandKind::Const(Const::I32(0))),
        BinOp::Mul if is_neg_one_i32(r) => {
            let sub = Builder::new(module, func).insert_before(
                inst,
                Opcode::Binary(BinOp::Sub),
                Type::i32(),
                vec![OperandKind::Const(Const::I32(0)), l],
            );
            return Some(OperandKind::Inst(sub));
        }
        BinOp::Mul => {
            if let Some(shift) = power_of_two_shift(r) {
                let shl = Builder::new(module, func).insert_before(
                    inst,
                    Opcode::Binary(BinOp::Shl),
                    Type::i32(),
                    vec![l, OperandKind::Const(Const::I32(shift))],
                );
                return Some(OperandKind::Inst(shl));
            }
        }
        BinOp::Div if is_one(r) => return Some(l),
        BinOp::Div if is_zero(l) => return Some(OperandKind::Const(Const::I32(0))),
        BinOp::Rem if is_one(r) => return Some(OperandKind::Const(Const::I32(0))),
        BinOp::Rem if same_operand(l, r) => return Some(OperandKind::Const(Const::I32(0))),
        BinOp::FAdd if is_zero(r) => return Some(l),
        BinOp::FMul if is_one(r) => return Some(l),
        BinOp::FMul if is_neg_one_f32(r) => {
            let sub = Builder::new(module, func).insert_before(
                inst,
                Opcode::Binary(BinOp::FSub),
                Type::f32(),
                vec![OperandKind::Const(Const::F32(0.0)), l],
            );
            return Some(OperandKind::Inst(sub));
        }
        BinOp::FMul if is_two_f32(r) => {
            let add = Builder::new(module, func).insert_before(inst, Opcode::Binary(BinOp::FAdd), Type::f32(), vec![l, l]);
            return Some(OperandKind::Inst(add));
        }
        BinOp::FDiv if is_one(r) => return Some(l),
        _ => {}
    }
    None
}

/// Recognizes `(x - y) + y`, checking whether `maybe_sub` is a `Sub` whose
/// subtrahend is exactly `other`; if so returns `x`.
fn cancel_sub_then_add(module: &Module, func: FuncId, maybe_sub: OperandKind, other: OperandKind) -> Option<OperandKind> {
    let OperandKind::Inst(id) = maybe_sub else { return None };
    let data = module.funcs.get(func).insts.get(id);
    if data.opcode != Opcode::Binary(BinOp::Sub) {
        return None;
    }
    if data.operands[1].kind == other {
        Some(data.operands[0].kind)
    } else {
        None
    }
}

fn simplify_icmp(pred: IPred, l: OperandKind, r: OperandKind) -> Option<OperandKind> {
    if let (Some(Const::I32(a)), Some(Const::I32(b))) = (l.as_const(), r.as_const()) {
        return Some(OperandKind::Const(Const::I32(pred.eval(a, b) as i32)));
    }
    if pred == IPred::Eq && same_operand(l, r) {
        return Some(OperandKind::Const(Const::I32(1)));
    }
    if pred == IPred::Ne && same_operand(l, r) {
        return Some(OperandKind::Const(Const::I32(0)));
    }
    None
}

/// A `Phi` simplifies away when its block has only one predecessor (its
/// single incoming value is the whole answer) or when every incoming
/// value — ignoring any that loop back to the `Phi` itself — agrees.
fn simplify_phi(module: &Module, func: FuncId, inst: InstId) -> Option<OperandKind> {
    let f = module.funcs.get(func);
    let data = f.insts.get(inst);
    let preds = &f.blocks.get(data.block).preds;
    if preds.len() == 1 {
        return data.operands.first().map(|s| s.kind);
    }
    let mut distinct: Option<OperandKind> = None;
    for slot in &data.operands {
        if slot.kind == OperandKind::Inst(inst) {
            continue;
        }
        match distinct {
            None => distinct = Some(slot.kind),
            Some(d) if d == slot.kind => {}
            Some(_) => return None,
        }
    }
    distinct
}

fn same_operand(a: OperandKind, b: OperandKind) -> bool {
    match (a, b) {
        (OperandKind::Inst(x), OperandKind::Inst(y)) => x == y,
        (OperandKind::Param(x), OperandKind::Param(y)) => x == y,
        _ => false,
    }
}

fn is_zero(o: OperandKind) -> bool {
    match o.as_const() {
        Some(Const::I32(0)) => true,
        Some(Const::F32(f)) => f == 0.0,
        _ => false,
    }
}

fn is_one(o: OperandKind) -> bool {
    matches!(o.as_const(), Some(Const::I32(1))) || matches!(o.as_const(), Some(Const::F32(f)) if f == 1.0)
}

fn is_neg_one_i32(o: OperandKind) -> bool {
    matches!(o.as_const(), Some(Const::I32(-1)))
}

fn is_neg_one_f32(o: OperandKind) -> bool {
    matches!(o.as_const(), Some(Const::F32(f)) if f == -1.0)
}

fn is_two_f32(o: OperandKind) -> bool {
    matches!(o.as_const(), Some(Const::F32(f)) if f == 2.0)
}

/// `Some(k)` when `o` is a positive power-of-two constant `2^k`, the
/// shift amount that turns a multiply by it into a `Shl`.
fn power_of_two_shift(o: OperandKind) -> Option<i32> {
    let Some(Const::I32(v)) = o.as_const() else { return None };
    if v > 0 && (v & (v - 1)) == 0 {
        Some(v.trailing_zeros() as i32)
    } else {
        None
    }
}

fn fold_const_binop(op: BinOp, l: Const, r: Const) -> Option<Const> {
    match (l, r) {
        (Const::I32(a), Const::I32(b)) => Some(Const::I32(match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            // `spec.md` §9 open question, matching `lowering::const_eval`'s
            // resolution: constant division/modulo by zero folds to zero
            // rather than blocking the rewrite.
            BinOp::Div => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_div(b)
                }
            }
            BinOp::Rem => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_rem(b)
                }
            }
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => a.wrapping_shr(b as u32),
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv => return None,
        })),
        (Const::F32(a), Const::F32(b)) => Some(Const::F32(match op {
            BinOp::FAdd => a + b,
            BinOp::FSub => a - b,
            BinOp::FMul => a * b,
            BinOp::FDiv => a / b,
            _ => return None,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::types::Type;

    #[test]
    fn folds_constant_addition() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let add = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(2)),
            OperandKind::Const(Const::I32(3)),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind.as_const(), Some(Const::I32(5)));
    }

    #[test]
    fn simplifies_add_zero() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let p = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(crate::ir::function::Param {
            name: "x".into(),
            ty: Type::i32(),
            value: p,
        });
        let mut b = Builder::new(&mut m, f);
        let add = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Param(p),
            OperandKind::Const(Const::I32(0)),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind.as_const(), None);
        assert!(matches!(func.insts.get(last).operands[0].kind, OperandKind::Param(_)));
    }

    #[test]
    fn canonicalizes_before_simplifying_a_constant_plus_value() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let p = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(crate::ir::function::Param {
            name: "x".into(),
            ty: Type::i32(),
            value: p,
        });
        let mut b = Builder::new(&mut m, f);
        // `0 + x`, constant on the left — only correct if canonicalization
        // runs before the `is_zero(r)` check fires.
        let add = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(0)),
            OperandKind::Param(p),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert!(matches!(func.insts.get(last).operands[0].kind, OperandKind::Param(_)));
    }

    #[test]
    fn strength_reduces_a_multiply_by_a_power_of_two_into_a_shift() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let p = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(crate::ir::function::Param {
            name: "x".into(),
            ty: Type::i32(),
            value: p,
        });
        let mut b = Builder::new(&mut m, f);
        let mul = b.append(entry, Opcode::Binary(BinOp::Mul), Type::i32(), vec![
            OperandKind::Param(p),
            OperandKind::Const(Const::I32(8)),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(mul)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        let OperandKind::Inst(result) = func.insts.get(last).operands[0].kind else { panic!("expected an inst") };
        let result_data = func.insts.get(result);
        assert_eq!(result_data.opcode, Opcode::Binary(BinOp::Shl));
        assert_eq!(result_data.operands[1].kind.as_const(), Some(Const::I32(3)));
    }

    #[test]
    fn cancels_a_subtraction_immediately_re_added() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let x = b.alloc_param_value(0);
        let y = b.alloc_param_value(1);
        m.funcs.get_mut(f).params.push(crate::ir::function::Param { name: "x".into(), ty: Type::i32(), value: x });
        m.funcs.get_mut(f).params.push(crate::ir::function::Param { name: "y".into(), ty: Type::i32(), value: y });
        let mut b = Builder::new(&mut m, f);
        let sub = b.append(entry, Opcode::Binary(BinOp::Sub), Type::i32(), vec![
            OperandKind::Param(x),
            OperandKind::Param(y),
        ]);
        let add = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Inst(sub),
            OperandKind::Param(y),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind, OperandKind::Param(x));
    }

    #[test]
    fn simplifies_a_phi_fed_by_a_single_predecessor() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let join = b.create_block("join");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let br = b.append(entry, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br, vec![join]);
        b.add_edge(entry, join);

        let phi = b.append(join, Opcode::Phi, Type::i32(), vec![OperandKind::Const(Const::I32(7))]);
        b.append(join, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(phi)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let last = func.blocks.get(join).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind.as_const(), Some(Const::I32(7)));
    }
}
