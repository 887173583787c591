//! Function inlining (`spec.md` §4.18): whole-module, size-bounded,
//! non-recursive. A call site is a candidate when its callee is defined
//! (not an external declaration), is not part of any call cycle reachable
//! from itself (directly or transitively self-recursive functions are
//! never inlined, so this pass never needs to bound recursion depth), and
//! has at most [`MAX_CALLEE_INSTS`] instructions. One call site is inlined
//! per round; the call graph and cycle set are recomputed each round since
//! inlining can both shrink a caller's eligibility (it grows) and expose
//! new candidates (a callee's own calls get copied in too).
//!
//! Cloning a callee into a caller is two passes over its instructions:
//! first allocate an empty-operand copy of every instruction into freshly
//! created blocks (so every value the callee can reference has a new
//! identity to remap to before any operand is filled in, handling forward
//! references across loop back-edges), then fill in operands and
//! terminators against the now-complete value map. Edges between cloned
//! blocks are wired in a dedicated third pass, walking each callee block's
//! *original* `preds` order — never the traversal order instructions were
//! cloned in — since a cloned `Phi`'s operand list is carried over
//! unchanged except for value remapping and must stay aligned with its
//! block's `preds`.

use std::collections::{HashMap, HashSet};

use crate::ir::builder::Builder;
use crate::ir::function::Param;
use crate::ir::instruction::{InstData, Opcode};
use crate::ir::operand::{Def, OperandKind};
use crate::ir::types::Type;
use crate::ir::value::{Const, ConstTy, ValueId};
use crate::ir::{BlockId, FuncId, InstId, Module};

use super::PassConfig;

const MAX_CALLEE_INSTS: usize = 80;

pub fn run(module: &mut Module, _config: &PassConfig) -> bool {
    let mut changed = false;
    let total_insts: usize =
        module.funcs_in_order().iter().map(|&f| module.funcs.get(f).insts.iter().count()).sum();
    let bound = (2 * total_insts.max(1)).min(4096);

    let mut did_inline_this_round = true;
    let mut rounds = 0;
    while did_inline_this_round && rounds < bound {
        rounds += 1;
        did_inline_this_round = false;

        let graph = call_graph(module);
        let func_ids: Vec<FuncId> = module.funcs_in_order().to_vec();
        let recursive: HashSet<FuncId> = func_ids.iter().copied().filter(|&f| is_recursive(&graph, f)).collect();

        if let Some((caller, call_inst, callee)) = find_inlinable_call(module, &func_ids, &recursive) {
            inline_call(module, caller, call_inst, callee);
            changed = true;
            did_inline_this_round = true;
        }
    }
    if rounds >= bound {
        log::warn!("inliner: did not reach a fixed point within {bound} rounds");
    }
    changed
}

fn call_graph(module: &Module) -> HashMap<FuncId, Vec<FuncId>> {
    let mut g = HashMap::new();
    for &f in module.funcs_in_order() {
        let fd = module.funcs.get(f);
        let mut callees = Vec::new();
        for (_, inst) in fd.insts.iter() {
            if inst.opcode == Opcode::Call {
                if let OperandKind::Function(callee) = inst.operands[0].kind {
                    callees.push(callee);
                }
            }
        }
        g.insert(f, callees);
    }
    g
}

/// Whether `start` can reach itself by following at least one call edge —
/// direct self-recursion is the `len() == 1` walk, mutual recursion the
/// longer ones.
fn is_recursive(g: &HashMap<FuncId, Vec<FuncId>>, start: FuncId) -> bool {
    let mut visited = HashSet::new();
    let mut stack: Vec<FuncId> = g.get(&start).cloned().unwrap_or_default();
    while let Some(n) = stack.pop() {
        if n == start {
            return true;
        }
        if visited.insert(n) {
            if let Some(next) = g.get(&n) {
                stack.extend(next.iter().copied());
            }
        }
    }
    false
}

fn find_inlinable_call(
    module: &Module,
    func_ids: &[FuncId],
    recursive: &HashSet<FuncId>,
) -> Option<(FuncId, InstId, FuncId)> {
    for &caller in func_ids {
        let f = module.funcs.get(caller);
        if f.is_declaration {
            continue;
        }
        for block in f.block_order() {
            for inst_id in f.inst_order(block) {
                let inst = f.insts.get(inst_id);
                if inst.opcode != Opcode::Call {
                    continue;
                }
                let OperandKind::Function(callee) = inst.operands[0].kind else { continue };
                if recursive.contains(&callee) {
                    continue;
                }
                let cf = module.funcs.get(callee);
                if cf.is_declaration {
                    continue;
                }
                if cf.insts.iter().count() > MAX_CALLEE_INSTS {
                    continue;
                }
                return Some((caller, inst_id, callee));
            }
        }
    }
    None
}

/// An immutable, owned snapshot of a callee's body, taken before any
/// mutation of the caller begins — `module.funcs` is a single arena, so a
/// live borrow of the callee's `FuncData` cannot coexist with a `Builder`
/// mutating the caller's `FuncData` in the same arena.
struct CalleeSnapshot {
    block_order: Vec<BlockId>,
    preds: HashMap<BlockId, Vec<BlockId>>,
    insts_by_block: HashMap<BlockId, Vec<InstId>>,
    inst_data: HashMap<InstId, InstData>,
    params: Vec<Param>,
    entry: BlockId,
    ret_ty: Type,
}

fn snapshot_callee(module: &Module, callee: FuncId) -> CalleeSnapshot {
    let f = module.funcs.get(callee);
    let block_order = f.block_order();
    let mut preds = HashMap::new();
    let mut insts_by_block = HashMap::new();
    let mut inst_data = HashMap::new();
    for &b in &block_order {
        preds.insert(b, f.blocks.get(b).preds.clone());
        let order = f.inst_order(b);
        for &i in &order {
            inst_data.insert(i, f.insts.get(i).clone());
        }
        insts_by_block.insert(b, order);
    }
    CalleeSnapshot {
        block_order,
        preds,
        insts_by_block,
        inst_data,
        params: f.params.clone(),
        entry: f.entry.expect("inlinable callee must have an entry block"),
        ret_ty: f.ret_ty.clone(),
    }
}

fn remap_operand(kind: OperandKind, param_map: &HashMap<ValueId, OperandKind>, value_map: &HashMap<InstId, InstId>) -> OperandKind {
    match kind {
        OperandKind::Param(v) => param_map.get(&v).copied().unwrap_or(kind),
        OperandKind::Inst(i) => value_map.get(&i).map(|&ni| OperandKind::Inst(ni)).unwrap_or(kind),
        other => other,
    }
}

fn inline_call(module: &mut Module, caller: FuncId, call_inst: InstId, callee: FuncId) {
    let snap = snapshot_callee(module, callee);

    let call_block = module.funcs.get(caller).insts.get(call_inst).block;
    let call_ty = module.funcs.get(caller).insts.get(call_inst).ty.clone();
    let call_args: Vec<OperandKind> =
        module.funcs.get(caller).insts.get(call_inst).operands[1..].iter().map(|s| s.kind).collect();

    let mut param_map: HashMap<ValueId, OperandKind> = HashMap::new();
    for (p, &arg) in snap.params.iter().zip(&call_args) {
        param_map.insert(p.value, arg);
    }

    let mut b = Builder::new(module, caller);
    let post_call = b.split_block_after(call_block, call_inst, format!("post_call{}", call_inst.index()));

    // Pass 1: allocate a block per callee block, and an empty-operand
    // instruction per callee instruction, populating `value_map` fully
    // before any operand gets filled in.
    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    let mut prev = call_block;
    for &cb in &snap.block_order {
        let mut b = Builder::new(module, caller);
        let nb = b.insert_block_after(prev, format!("inline{}.{}", call_inst.index(), cb.index()));
        block_map.insert(cb, nb);
        prev = nb;
    }
    let entry_clone = block_map[&snap.entry];

    let mut value_map: HashMap<InstId, InstId> = HashMap::new();
    for &cb in &snap.block_order {
        let nb = block_map[&cb];
        for &inst_id in &snap.insts_by_block[&cb] {
            let cd = &snap.inst_data[&inst_id];
            let mut b = Builder::new(module, caller);
            let new_inst = b.append(nb, cd.opcode, cd.ty.clone(), vec![]);
            value_map.insert(inst_id, new_inst);
        }
    }

    // Pass 2: fill operands and terminators. `Ret` becomes `Br post_call`;
    // its value (if any) is recorded so the merge point can phi it in.
    let mut returns: Vec<(BlockId, Option<OperandKind>)> = Vec::new();
    for &cb in &snap.block_order {
        let nb = block_map[&cb];
        for &inst_id in &snap.insts_by_block[&cb] {
            let new_inst = value_map[&inst_id];
            let cd = &snap.inst_data[&inst_id];
            let mut b = Builder::new(module, caller);
            if cd.opcode == Opcode::Ret {
                let ret_val = cd.operands.first().map(|s| remap_operand(s.kind, &param_map, &value_map));
                b.set_targets(new_inst, vec![post_call]);
                b.add_edge(nb, post_call);
                returns.push((nb, ret_val));
            } else {
                for slot in &cd.operands {
                    let kind = remap_operand(slot.kind, &param_map, &value_map);
                    b.push_operand(new_inst, kind);
                }
                let new_targets: Vec<BlockId> = cd.targets.iter().map(|t| block_map[t]).collect();
                b.set_targets(new_inst, new_targets);
            }
        }
    }
    {
        let mut b = Builder::new(module, caller);
        for &cb in &snap.block_order {
            for &inst_id in &snap.insts_by_block[&cb] {
                if snap.inst_data[&inst_id].opcode == Opcode::Ret {
                    let new_ret = value_map[&inst_id];
                    b.set_opcode_to(new_ret, Opcode::Br);
                }
            }
        }
    }

    // Pass 3: wire edges between cloned blocks using the callee's original
    // `preds` order, so cloned `Phi` operand order stays aligned.
    {
        let mut b = Builder::new(module, caller);
        for &cb in &snap.block_order {
            let nb = block_map[&cb];
            for &pred in &snap.preds[&cb] {
                b.add_edge(block_map[&pred], nb);
            }
        }
        let br = b.append(call_block, Opcode::Br, Type::void(), vec![]);
        b.set_targets(br, vec![entry_clone]);
        b.add_edge(call_block, entry_clone);
    }

    if !call_ty.is_void() {
        let mut b = Builder::new(module, caller);
        let phi = b.insert_phi(post_call, snap.ret_ty.clone(), vec![]);
        for (_, val) in &returns {
            let kind = val.unwrap_or(OperandKind::Const(Const::Undef(scalar_const_ty(&snap.ret_ty))));
            b.push_operand(phi, kind);
        }
        b.replace_all_uses_with(Def::Inst(caller, call_inst), OperandKind::Inst(phi));
    }

    let mut b = Builder::new(module, caller);
    b.erase_inst(call_inst);
}

fn scalar_const_ty(ty: &Type) -> ConstTy {
    if ty.is_f32() { ConstTy::F32 } else { ConstTy::I32 }
}
