//! Tail-call elimination (`spec.md` §4.17): turns direct self-recursion in
//! tail position into a loop back to the entry block, so a recursive
//! SysY function doesn't need a call frame per invocation.
//!
//! A tail call is a block ending in `Ret V` (or `Ret` with no value) whose
//! immediately preceding instruction is a `Call` to the function currently
//! being compiled, where `V` is exactly that call's result (or the return
//! is void and the call is too). Every such tail block found in one pass
//! is rewritten together so the parameters only need one fresh `Phi` each
//! at the loop header, with one incoming value per original entry
//! predecessor (unchanged) plus one per eliminated tail call (the call's
//! argument).
//!
//! The original entry block can't host those `phi`s directly: a normal
//! (non-recursive) call reaches it straight from the caller, a path with
//! no predecessor block of its own to give a `phi` an operand slot. So the
//! old entry is demoted to a loop header and a fresh, empty pre-entry
//! block takes over as the function's actual entry, falling straight
//! through to the header — that gives the "from the caller" path a real
//! predecessor edge, and its `phi` operand is just the original parameter
//! value, same as every tail edge's operand is the recursive call's
//! argument.

use crate::ir::builder::Builder;
use crate::ir::instruction::Opcode;
use crate::ir::operand::{Def, OperandKind};
use crate::ir::{BlockId, FuncId, InstId, Module};

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let old_entry = match module.funcs.get(func).entry {
        Some(e) => e,
        None => return false,
    };
    let tail_calls = find_tail_calls(module, func);
    if tail_calls.is_empty() {
        return false;
    }

    let params = module.funcs.get(func).params.clone();

    let mut b = Builder::new(module, func);
    let pre_entry = b.create_block("tailrec.preentry");
    let br = b.append(pre_entry, Opcode::Br, crate::ir::types::Type::void(), vec![]);
    b.set_targets(br, vec![old_entry]);
    b.add_edge(pre_entry, old_entry);
    b.module.funcs.get_mut(func).entry = Some(pre_entry);
    let header = old_entry;

    let header_preds = module.funcs.get(func).blocks.get(header).preds.clone();
    let mut b = Builder::new(module, func);
    let mut param_phis = Vec::with_capacity(params.len());
    for p in &params {
        let incoming: Vec<OperandKind> = header_preds.iter().map(|_| OperandKind::Param(p.value)).collect();
        let phi = b.insert_phi(header, p.ty.clone(), incoming);
        param_phis.push(phi);
    }
    for (p, &phi) in params.iter().zip(&param_phis) {
        b.replace_all_uses_with(Def::Param(func, p.value), OperandKind::Inst(phi));
    }

    for (tail_block, call_inst, ret_inst) in &tail_calls {
        let args: Vec<OperandKind> =
            module.funcs.get(func).insts.get(*call_inst).operands[1..].iter().map(|s| s.kind).collect();
        let mut b = Builder::new(module, func);
        for (&phi, arg) in param_phis.iter().zip(args) {
            b.push_operand(phi, arg);
        }
        b.erase_inst(*ret_inst);
        b.erase_inst(*call_inst);
        let br = b.append(*tail_block, Opcode::Br, crate::ir::types::Type::void(), vec![]);
        b.set_targets(br, vec![header]);
        b.add_edge(*tail_block, header);
    }

    true
}

/// Finds every block ending in `Ret V` (or void `Ret`) whose preceding
/// instruction is a direct self-call producing exactly `V`.
fn find_tail_calls(module: &Module, func: FuncId) -> Vec<(BlockId, InstId, InstId)> {
    let f = module.funcs.get(func);
    let mut out = Vec::new();
    for block in f.block_order() {
        let Some(ret_inst) = f.blocks.get(block).last_inst else { continue };
        let ret = f.insts.get(ret_inst);
        if ret.opcode != Opcode::Ret {
            continue;
        }
        let Some(call_inst) = f.insts.get(ret_inst).prev else { continue };
        let call = f.insts.get(call_inst);
        if call.opcode != Opcode::Call {
            continue;
        }
        let OperandKind::Function(callee) = call.operands[0].kind else { continue };
        if callee != func {
            continue;
        }
        match ret.operands.first() {
            None => out.push((block, call_inst, ret_inst)),
            Some(slot) if slot.kind.as_inst() == Some(call_inst) => out.push((block, call_inst, ret_inst)),
            Some(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::{FuncData, Param};
    use crate::ir::types::Type;
    use crate::ir::value::Const;

    #[test]
    fn turns_direct_tail_recursion_into_a_loop() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("fact".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let n = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(Param { name: "n".into(), ty: Type::i32(), value: n });
        let mut b = Builder::new(&mut m, f);

        let arg = b.append(
            entry,
            Opcode::Binary(crate::ir::instruction::BinOp::Sub),
            Type::i32(),
            vec![OperandKind::Param(n), OperandKind::Const(Const::I32(1))],
        );
        let call = b.append(entry, Opcode::Call, Type::i32(), vec![
            OperandKind::Function(f),
            OperandKind::Inst(arg),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(call)]);

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).opcode, Opcode::Br);
        assert_eq!(func.insts.get(last).targets, vec![entry]);
        assert!(func.blocks.get(entry).preds.contains(&entry));
        let first = func.blocks.get(entry).first_inst.unwrap();
        assert_eq!(func.insts.get(first).opcode, Opcode::Phi);
        assert_ne!(func.entry, Some(entry));
    }

    #[test]
    fn the_first_non_tail_invocation_still_sees_the_original_argument() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("fact".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let header = b.create_block("entry");
        m.funcs.get_mut(f).entry = Some(header);
        let mut b = Builder::new(&mut m, f);
        let n = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(Param { name: "n".into(), ty: Type::i32(), value: n });
        let mut b = Builder::new(&mut m, f);

        let arg = b.append(
            header,
            Opcode::Binary(crate::ir::instruction::BinOp::Sub),
            Type::i32(),
            vec![OperandKind::Param(n), OperandKind::Const(Const::I32(1))],
        );
        let call = b.append(header, Opcode::Call, Type::i32(), vec![
            OperandKind::Function(f),
            OperandKind::Inst(arg),
        ]);
        b.append(header, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(call)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        let pre_entry = func.entry.unwrap();
        assert_ne!(pre_entry, header);

        let header_preds = func.blocks.get(header).preds.clone();
        let pre_entry_pos = header_preds.iter().position(|&p| p == pre_entry).unwrap();
        let phi = func.blocks.get(header).first_inst.unwrap();
        assert_eq!(func.insts.get(phi).opcode, Opcode::Phi);
        // The path from the caller (through the new pre-entry block) must
        // still carry the original parameter, not the tail call's argument.
        assert_eq!(func.insts.get(phi).operands[pre_entry_pos].kind, OperandKind::Param(n));
    }
}
