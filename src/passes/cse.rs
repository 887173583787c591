//! Common Subexpression Elimination (`spec.md` §4.11): walks the dominator
//! tree with a scoped hash table keyed on opcode+operands+type, so an
//! instruction is only reused if an earlier, dominating instruction already
//! computed the identical value. The table is popped back to its parent
//! scope's contents on the way out of each dominator-tree child, the same
//! "scope-based backtracking" shape GVN/CSE passes in production compilers
//! use instead of a single global hash table (which would let a sibling
//! branch's instruction wrongly stand in for one in a branch that doesn't
//! dominate it).

use std::collections::HashMap;

use crate::analysis::dominators::{self, DomTree};
use crate::ir::builder::Builder;
use crate::ir::instruction::{BinOp, IPred, InstData, Opcode};
use crate::ir::operand::{Def, OperandKind};
use crate::ir::types::Type;
use crate::ir::{BlockId, FuncId, InstId, Module};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    opcode: Opcode,
    operands: Vec<OperandKey>,
    ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum OperandKey {
    Const(String),
    Inst(InstId),
    Param(crate::ir::value::ValueId),
    Global(crate::ir::module::GlobalId),
    Function(FuncId),
}

/// Whether swapping `inst`'s two operands leaves its value unchanged, so
/// `a OP b` and `b OP a` must key identically (`spec.md` §4.11,
/// "canonicalize operands (sort by identity for commutative ops)").
fn is_commutative(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Binary(BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::FAdd | BinOp::FMul)
            | Opcode::ICmp(IPred::Eq | IPred::Ne)
    )
}

fn key_of(inst: &InstData) -> Option<Key> {
    if inst.opcode.has_side_effects() || inst.opcode.is_terminator() || inst.opcode == Opcode::Phi
    {
        return None;
    }
    let mut operands: Vec<OperandKey> = inst
        .operands
        .iter()
        .map(|slot| match slot.kind {
            OperandKind::Const(c) => OperandKey::Const(c.to_string()),
            OperandKind::Inst(i) => OperandKey::Inst(i),
            OperandKind::Param(p) => OperandKey::Param(p),
            OperandKind::Global(g) => OperandKey::Global(g),
            OperandKind::Function(f) => OperandKey::Function(f),
            OperandKind::Removed => return OperandKey::Const("<removed>".into()),
        })
        .collect();
    if is_commutative(inst.opcode) && operands.len() == 2 {
        operands.sort();
    }
    Some(Key { opcode: inst.opcode, operands, ty: inst.ty.clone() })
}

pub fn run(module: &mut Module, func: FuncId) -> bool {
    let entry = match module.funcs.get(func).entry {
        Some(e) => e,
        None => return false,
    };
    let dom = dominators::compute(module.funcs.get(func), entry);
    let mut table: HashMap<Key, InstId> = HashMap::new();
    let mut to_erase = Vec::new();
    walk(module, func, entry, &dom, &mut table, &mut to_erase);

    if to_erase.is_empty() {
        return false;
    }
    let mut b = Builder::new(module, func);
    for inst in to_erase {
        b.erase_inst(inst);
    }
    true
}

fn walk(
    module: &mut Module,
    func: FuncId,
    block: BlockId,
    dom: &DomTree,
    table: &mut HashMap<Key, InstId>,
    to_erase: &mut Vec<InstId>,
) {
    let mut inserted_here = Vec::new();
    let insts = module.funcs.get(func).inst_order(block);
    for inst_id in insts {
        let data = module.funcs.get(func).insts.get(inst_id);
        let Some(key) = key_of(data) else { continue };
        if let Some(&existing) = table.get(&key) {
            let mut b = Builder::new(module, func);
            b.replace_all_uses_with(Def::Inst(func, inst_id), OperandKind::Inst(existing));
            to_erase.push(inst_id);
        } else {
            table.insert(key.clone(), inst_id);
            inserted_here.push(key);
        }
    }

    let children = dom.children(block).to_vec();
    for child in children {
        walk(module, func, child, dom, table, to_erase);
    }

    for key in inserted_here {
        table.remove(&key);
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
    fn reuses_a_dominating_identical_computation() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let p = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(crate::ir::function::Param {
            name: "x".into(),
            ty: Type::i32(),
            value: p,
        });
        let mut b = Builder::new(&mut m, f);
        let add1 = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Param(p),
            OperandKind::Const(Const::I32(1)),
        ]);
        let add2 = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Param(p),
            OperandKind::Const(Const::I32(1)),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add2)]);

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind.as_inst(), Some(add1));
    }

    #[test]
    fn reuses_a_commutative_computation_with_swapped_operands() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let p = b.alloc_param_value(0);
        m.funcs.get_mut(f).params.push(crate::ir::function::Param {
            name: "x".into(),
            ty: Type::i32(),
            value: p,
        });
        let mut b = Builder::new(&mut m, f);
        let add1 = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Param(p),
            OperandKind::Const(Const::I32(1)),
        ]);
        let add2 = b.append(entry, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(1)),
            OperandKind::Param(p),
        ]);
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add2)]);

        let changed = run(&mut m, f);
        assert!(changed);
        let func = m.funcs.get(f);
        let last = func.blocks.get(entry).last_inst.unwrap();
        assert_eq!(func.insts.get(last).operands[0].kind.as_inst(), Some(add1));
    }

    #[test]
    fn sibling_branches_do_not_share_a_scope() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        m.funcs.get_mut(f).entry = Some(entry);
        let mut b = Builder::new(&mut m, f);
        let br = b.append(entry, Opcode::CondBr, Type::void(), vec![OperandKind::Const(Const::I32(1))]);
        b.set_targets(br, vec![left, right]);
        b.add_edge(entry, left);
        b.add_edge(entry, right);

        let l_add = b.append(left, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(2)),
            OperandKind::Const(Const::I32(3)),
        ]);
        b.append(left, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(l_add)]);
        let r_add = b.append(right, Opcode::Binary(BinOp::Add), Type::i32(), vec![
            OperandKind::Const(Const::I32(2)),
            OperandKind::Const(Const::I32(3)),
        ]);
        b.append(right, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(r_add)]);

        run(&mut m, f);
        let func = m.funcs.get(f);
        assert!(func.insts.get(r_add).opcode == Opcode::Binary(BinOp::Add));
    }
}
