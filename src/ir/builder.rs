//! IR editing primitives (`spec.md` §4.2): the only way passes and lowering
//! are meant to mutate a function. Centralizing edits here keeps the use-def
//! chain and the block/instruction link lists consistent — nothing outside
//! this module should poke `prev`/`next`/`first_use` directly.

use crate::ir::block::{BlockData, BlockId};
use crate::ir::function::{FuncData, FuncId};
use crate::ir::instruction::{InstData, InstId, Opcode};
use crate::ir::module::Module;
use crate::ir::operand::{Def, OperandKind, OperandSlot, UseRef};
use crate::ir::types::Type;
use crate::ir::value::ValueId;

pub struct Builder<'a> {
    pub module: &'a mut Module,
    pub func: FuncId,
}

impl<'a> Builder<'a> {
    pub fn new(module: &'a mut Module, func: FuncId) -> Self {
        Self { module, func }
    }

    fn f(&mut self) -> &mut FuncData {
        self.module.funcs.get_mut(self.func)
    }

    // ---- blocks ----------------------------------------------------

    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.f().blocks.alloc(BlockData::new(name.into()));
        let last = self.f().last_block;
        match last {
            Some(prev) => {
                self.f().blocks.get_mut(prev).next = Some(id);
                self.f().blocks.get_mut(id).prev = Some(prev);
            }
            None => self.f().first_block = Some(id),
        }
        self.f().last_block = Some(id);
        id
    }

    /// Inserts `new` immediately after `after` in block order. Used by
    /// LICM's pre-header synthesis and by loop unrolling's cloned-body
    /// placement.
    pub fn insert_block_after(&mut self, after: BlockId, name: impl Into<String>) -> BlockId {
        let id = self.f().blocks.alloc(BlockData::new(name.into()));
        let next = self.f().blocks.get(after).next;
        self.f().blocks.get_mut(after).next = Some(id);
        self.f().blocks.get_mut(id).prev = Some(after);
        self.f().blocks.get_mut(id).next = next;
        match next {
            Some(n) => self.f().blocks.get_mut(n).prev = Some(id),
            None => self.f().last_block = Some(id),
        }
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.f().blocks.get_mut(from).succs.push(to);
        self.f().blocks.get_mut(to).preds.push(from);
    }

    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        self.f().blocks.get_mut(from).succs.retain(|&b| b != to);
        self.f().blocks.get_mut(to).preds.retain(|&b| b != from);
    }

    /// Unlinks and discards an unreachable block. Callers (ADCE,
    /// SimplifyCFG) must have already removed its incoming edges and
    /// deleted its instructions so their uses are already gone.
    pub fn erase_block(&mut self, block: BlockId) {
        let (prev, next) = {
            let b = self.f().blocks.get(block);
            (b.prev, b.next)
        };
        match prev {
            Some(p) => self.f().blocks.get_mut(p).next = next,
            None => self.f().first_block = next,
        }
        match next {
            Some(n) => self.f().blocks.get_mut(n).prev = prev,
            None => self.f().last_block = prev,
        }
    }

    // ---- instructions --------------------------------------------------

    pub fn append(&mut self, block: BlockId, opcode: Opcode, ty: Type, operands: Vec<OperandKind>) -> InstId {
        let id = self.f().insts.alloc(InstData {
            opcode,
            ty,
            operands: Vec::new(),
            block,
            targets: Vec::new(),
            first_use: None,
            prev: None,
            next: None,
        });
        let last = self.f().blocks.get(block).last_inst;
        match last {
            Some(prev) => {
                self.f().insts.get_mut(prev).next = Some(id);
                self.f().insts.get_mut(id).prev = Some(prev);
            }
            None => self.f().blocks.get_mut(block).first_inst = Some(id),
        }
        self.f().blocks.get_mut(block).last_inst = Some(id);

        for kind in operands {
            self.push_operand(id, kind);
        }
        id
    }

    /// Inserts a new `Phi` at the top of `block`, just below any existing
    /// phis (`spec.md` §3.6's placement constraint) — unlike `append`,
    /// which always lands at the end of the instruction list.
    pub fn insert_phi(&mut self, block: BlockId, ty: Type, operands: Vec<OperandKind>) -> InstId {
        let id = self.f().insts.alloc(InstData {
            opcode: Opcode::Phi,
            ty,
            operands: Vec::new(),
            block,
            targets: Vec::new(),
            first_use: None,
            prev: None,
            next: None,
        });

        let mut after = None;
        let mut cur = self.f().blocks.get(block).first_inst;
        while let Some(c) = cur {
            if self.f().insts.get(c).opcode != Opcode::Phi {
                break;
            }
            after = Some(c);
            cur = self.f().insts.get(c).next;
        }

        match after {
            Some(prev) => {
                let next = self.f().insts.get(prev).next;
                self.f().insts.get_mut(prev).next = Some(id);
                self.f().insts.get_mut(id).prev = Some(prev);
                self.f().insts.get_mut(id).next = next;
                match next {
                    Some(n) => self.f().insts.get_mut(n).prev = Some(id),
                    None => self.f().blocks.get_mut(block).last_inst = Some(id),
                }
            }
            None => {
                let first = self.f().blocks.get(block).first_inst;
                self.f().insts.get_mut(id).next = first;
                match first {
                    Some(f) => self.f().insts.get_mut(f).prev = Some(id),
                    None => self.f().blocks.get_mut(block).last_inst = Some(id),
                }
                self.f().blocks.get_mut(block).first_inst = Some(id);
            }
        }

        for kind in operands {
            self.push_operand(id, kind);
        }
        id
    }

    pub fn set_targets(&mut self, inst: InstId, targets: Vec<BlockId>) {
        self.f().insts.get_mut(inst).targets = targets;
    }

    /// Appends a new operand to `inst`, linking it into its definition's use
    /// list.
    pub fn push_operand(&mut self, inst: InstId, kind: OperandKind) {
        let index = self.f().insts.get(inst).operands.len() as u32;
        self.f().insts.get_mut(inst).operands.push(OperandSlot::new(OperandKind::Removed));
        self.set_operand(inst, index, kind);
    }

    /// Replaces operand `index` of `inst`, unlinking the old use (if any)
    /// and linking the new one at the head of its definition's use list.
    /// This is the single place use-list edges change hands.
    pub fn set_operand(&mut self, inst: InstId, index: u32, kind: OperandKind) {
        self.unlink_operand(self.func, inst, index);
        self.f().insts.get_mut(inst).operands[index as usize] = OperandSlot { kind, prev: None, next: None };
        if let Some(def) = kind.def(self.func) {
            self.link_operand_head(self.func, inst, index, def);
        }
    }

    fn use_slot_mut(&mut self, r: UseRef) -> &mut OperandSlot {
        &mut self.module.funcs.get_mut(r.func).insts.get_mut(r.user).operands[r.index as usize]
    }

    fn def_head(&self, def: Def) -> Option<UseRef> {
        match def {
            Def::Param(func, v) => self.module.funcs.get(func).values.get(v).first_use,
            Def::Inst(func, i) => self.module.funcs.get(func).insts.get(i).first_use,
            Def::Global(g) => self.module.globals.get(g).first_use,
            Def::Function(fid) => self.module.funcs.get(fid).callee_use,
        }
    }

    fn set_def_head(&mut self, def: Def, head: Option<UseRef>) {
        match def {
            Def::Param(func, v) => self.module.funcs.get_mut(func).values.get_mut(v).first_use = head,
            Def::Inst(func, i) => self.module.funcs.get_mut(func).insts.get_mut(i).first_use = head,
            Def::Global(g) => self.module.globals.get_mut(g).first_use = head,
            Def::Function(fid) => self.module.funcs.get_mut(fid).callee_use = head,
        }
    }

    fn link_operand_head(&mut self, owner: FuncId, inst: InstId, index: u32, def: Def) {
        let use_ref = UseRef { func: owner, user: inst, index };
        let old_head = self.def_head(def);
        if let Some(old) = old_head {
            self.use_slot_mut(old).prev = Some(use_ref);
        }
        self.set_def_head(def, Some(use_ref));
        let slot = self.use_slot_mut(use_ref);
        slot.next = old_head;
        slot.prev = None;
    }

    fn unlink_operand(&mut self, owner: FuncId, inst: InstId, index: u32) {
        let (kind, prev, next) = {
            let slot = &self.module.funcs.get(owner).insts.get(inst).operands[index as usize];
            (slot.kind, slot.prev, slot.next)
        };
        let Some(def) = kind.def(owner) else { return };
        match prev {
            Some(p) => self.use_slot_mut(p).next = next,
            None => self.set_def_head(def, next),
        }
        if let Some(n) = next {
            self.use_slot_mut(n).prev = prev;
        }
    }

    /// Replaces every use of `old` with `new` across the whole module
    /// (`spec.md` §4.2's `replace_all_uses_with`, the workhorse of every
    /// pass here). Walks `old`'s use list rather than scanning every
    /// function, so cost is proportional to the number of uses.
    pub fn replace_all_uses_with(&mut self, old: Def, new: OperandKind) {
        loop {
            let Some(use_ref) = self.def_head(old) else { break };
            self.set_operand_in(use_ref.func, use_ref.user, use_ref.index, new);
        }
    }

    fn set_operand_in(&mut self, owner: FuncId, inst: InstId, index: u32, kind: OperandKind) {
        self.unlink_operand(owner, inst, index);
        self.module.funcs.get_mut(owner).insts.get_mut(inst).operands[index as usize] =
            OperandSlot { kind, prev: None, next: None };
        if let Some(def) = kind.def(owner) {
            self.link_operand_head(owner, inst, index, def);
        }
    }

    /// Removes `inst` from its block's instruction list and unlinks all of
    /// its operands. Callers must ensure it has no remaining uses (ADCE
    /// checks this; callers doing a known-safe rewrite, like InstCombine
    /// replacing one instruction with another, call
    /// `replace_all_uses_with` first).
    pub fn erase_inst(&mut self, inst: InstId) {
        let n_operands = self.f().insts.get(inst).operands.len() as u32;
        for i in 0..n_operands {
            self.unlink_operand(self.func, inst, i);
        }
        let (block, prev, next) = {
            let d = self.f().insts.get(inst);
            (d.block, d.prev, d.next)
        };
        match prev {
            Some(p) => self.f().insts.get_mut(p).next = next,
            None => self.f().blocks.get_mut(block).first_inst = next,
        }
        match next {
            Some(n) => self.f().insts.get_mut(n).prev = prev,
            None => self.f().blocks.get_mut(block).last_inst = prev,
        }
    }

    /// Moves `inst` to the end of `dest`, just before its terminator if it
    /// has one. Used by LICM to hoist loop-invariant instructions into a
    /// pre-header.
    pub fn move_to_end(&mut self, inst: InstId, dest: BlockId) {
        let (block, prev, next) = {
            let d = self.f().insts.get(inst);
            (d.block, d.prev, d.next)
        };
        match prev {
            Some(p) => self.f().insts.get_mut(p).next = next,
            None => self.f().blocks.get_mut(block).first_inst = next,
        }
        match next {
            Some(n) => self.f().insts.get_mut(n).prev = prev,
            None => self.f().blocks.get_mut(block).last_inst = prev,
        }

        let dest_last_inst = self.f().blocks.get(dest).last_inst;
        let insert_after = match dest_last_inst {
            Some(last) if self.f().insts.get(last).opcode.is_terminator() => self.f().insts.get(last).prev,
            other => other,
        };
        self.f().insts.get_mut(inst).block = dest;
        match insert_after {
            Some(p) => {
                let old_next = self.f().insts.get(p).next;
                self.f().insts.get_mut(p).next = Some(inst);
                self.f().insts.get_mut(inst).prev = Some(p);
                self.f().insts.get_mut(inst).next = old_next;
                match old_next {
                    Some(n) => self.f().insts.get_mut(n).prev = Some(inst),
                    None => self.f().blocks.get_mut(dest).last_inst = Some(inst),
                }
            }
            None => {
                let old_first = self.f().blocks.get(dest).first_inst;
                self.f().insts.get_mut(inst).prev = None;
                self.f().insts.get_mut(inst).next = old_first;
                match old_first {
                    Some(n) => self.f().insts.get_mut(n).prev = Some(inst),
                    None => self.f().blocks.get_mut(dest).last_inst = Some(inst),
                }
                self.f().blocks.get_mut(dest).first_inst = Some(inst);
            }
        }
    }

    /// Inserts a new instruction immediately before `existing`, in the same
    /// block. Used by InstCombine's strength-reduction rewrites, which
    /// synthesize a replacement (e.g. a `Shl` for a power-of-two `Mul`)
    /// that must be defined before `existing`'s uses once `existing` itself
    /// is erased.
    pub fn insert_before(&mut self, existing: InstId, opcode: Opcode, ty: Type, operands: Vec<OperandKind>) -> InstId {
        let block = self.f().insts.get(existing).block;
        let id = self.f().insts.alloc(InstData {
            opcode,
            ty,
            operands: Vec::new(),
            block,
            targets: Vec::new(),
            first_use: None,
            prev: None,
            next: None,
        });
        let prev = self.f().insts.get(existing).prev;
        self.f().insts.get_mut(id).prev = prev;
        self.f().insts.get_mut(id).next = Some(existing);
        self.f().insts.get_mut(existing).prev = Some(id);
        match prev {
            Some(p) => self.f().insts.get_mut(p).next = Some(id),
            None => self.f().blocks.get_mut(block).first_inst = Some(id),
        }
        for kind in operands {
            self.push_operand(id, kind);
        }
        id
    }

    /// Rewrites `inst`'s opcode in place, touching neither its operands nor
    /// its targets. Used by the inliner to turn a cloned `Ret` (already
    /// given an empty operand list and `post_call` as its sole target) into
    /// a `Br`.
    pub fn set_opcode_to(&mut self, inst: InstId, opcode: Opcode) {
        self.f().insts.get_mut(inst).opcode = opcode;
    }

    /// Rewrites a `CondBr` into an unconditional `Br` to `target`, dropping
    /// its condition operand. Used by SimplifyCFG once a condition has
    /// folded to a known constant.
    pub fn set_opcode_br(&mut self, inst: InstId, target: BlockId) {
        self.unlink_operand(self.func, inst, 0);
        self.f().insts.get_mut(inst).operands.clear();
        self.f().insts.get_mut(inst).opcode = Opcode::Br;
        self.f().insts.get_mut(inst).targets = vec![target];
    }

    /// Retargets `pred`'s terminator from `old` to `new`, fixing up the
    /// edge set to match. Used by SimplifyCFG when bypassing an
    /// empty block. Callers must have already checked `old` has no `phi`
    /// that reads from `pred`: this drops `pred` from `old.preds` and
    /// appends `new` to `new.preds`, which does not preserve position and
    /// would desync such a `phi`'s operand order.
    pub fn redirect_branch(&mut self, pred: BlockId, old: BlockId, new: BlockId) {
        let Some(term) = self.f().blocks.get(pred).last_inst else { return };
        let targets = &mut self.f().insts.get_mut(term).targets;
        for t in targets.iter_mut() {
            if *t == old {
                *t = new;
            }
        }
        self.remove_edge(pred, old);
        if !self.f().blocks.get(pred).succs.contains(&new) {
            self.add_edge(pred, new);
        }
    }

    /// Splices `new_block` into the single edge `pred -> old`, so `pred`
    /// branches to `new_block` instead: retargets `pred`'s terminator and
    /// substitutes `new_block` for `pred` *in place* in `old`'s predecessor
    /// list and `pred` for `new_block`'s eventual predecessor list — unlike
    /// [`Self::redirect_branch`], this never reorders `old.preds`, so any
    /// `phi` at `old` keeps reading the right operand for the right
    /// incoming edge. Caller is responsible for adding `new_block`'s own
    /// `pred -> new_block` edge and its outgoing `new_block -> old` edge.
    pub fn splice_block_into_edge(&mut self, pred: BlockId, old: BlockId, new_block: BlockId) {
        let Some(term) = self.f().blocks.get(pred).last_inst else { return };
        let targets = &mut self.f().insts.get_mut(term).targets;
        for t in targets.iter_mut() {
            if *t == old {
                *t = new_block;
            }
        }
        for s in self.f().blocks.get_mut(pred).succs.iter_mut() {
            if *s == old {
                *s = new_block;
            }
        }
        for p in self.f().blocks.get_mut(old).preds.iter_mut() {
            if *p == pred {
                *p = new_block;
            }
        }
    }

    /// Folds `block` into `pred` when `pred`'s only successor is `block`
    /// and `pred` ends in a plain `Br`: erases the terminator, splices
    /// `block`'s instructions onto the end of `pred`, and rewires `block`'s
    /// successors to point at `pred` instead. Callers must have already
    /// checked `block` has no `phi` (its predecessor-indexed operands
    /// would need remapping, which this does not do).
    pub fn merge_block_into_predecessor(&mut self, pred: BlockId, pred_term: InstId, block: BlockId) {
        self.erase_inst(pred_term);

        let insts = self.f().inst_order(block);
        for inst in insts {
            self.move_to_end(inst, pred);
        }

        self.remove_edge(pred, block);
        let succs = self.f().blocks.get(block).succs.clone();
        for succ in succs {
            self.remove_edge(block, succ);
            self.add_edge(pred, succ);
        }
        self.erase_block(block);
    }

    /// Splits `block` right after `inst`: a fresh successor block receives
    /// every instruction following `inst` (including `block`'s terminator
    /// and its out-edges), leaving `block` itself with no terminator — the
    /// caller is responsible for giving it one. Used by the inliner to
    /// carve out `pre_call`/`post_call` around a call site.
    pub fn split_block_after(&mut self, block: BlockId, inst: InstId, new_name: impl Into<String>) -> BlockId {
        let post = self.insert_block_after(block, new_name);
        let mut to_move = Vec::new();
        let mut cur = self.f().insts.get(inst).next;
        while let Some(c) = cur {
            to_move.push(c);
            cur = self.f().insts.get(c).next;
        }
        for i in to_move {
            self.move_to_end(i, post);
        }
        let succs = self.f().blocks.get(block).succs.clone();
        for s in succs {
            self.remove_edge(block, s);
            self.add_edge(post, s);
        }
        post
    }

    pub fn alloc_param_value(&mut self, index: u32) -> ValueId {
        let func = self.func;
        self.f().values.alloc(crate::ir::value::ValueData {
            kind: crate::ir::value::ValueKind::Param { func, index },
            ty: Type::i32(),
            first_use: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::FuncData;

    fn new_test_func() -> (Module, FuncId) {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::i32()));
        (m, f)
    }

    #[test]
    fn append_and_replace_all_uses() {
        let (mut m, f) = new_test_func();
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let c1 = crate::ir::value::Const::I32(1);
        let add = b.append(entry, Opcode::Binary(crate::ir::instruction::BinOp::Add), Type::i32(), vec![
            OperandKind::Const(c1),
            OperandKind::Const(c1),
        ]);
        let user = b.append(entry, Opcode::Ret, Type::void(), vec![OperandKind::Inst(add)]);
        assert_eq!(m.funcs.get(f).insts.get(user).operands[0].kind.as_inst(), Some(add));

        let mut b = Builder::new(&mut m, f);
        b.replace_all_uses_with(
            Def::Inst(f, add),
            OperandKind::Const(crate::ir::value::Const::I32(2)),
        );
        assert!(m.funcs.get(f).insts.get(user).operands[0].kind.as_const().is_some());
        assert!(m.funcs.get(f).insts.get(add).first_use.is_none());
    }

    #[test]
    fn erase_inst_unlinks_from_block() {
        let (mut m, f) = new_test_func();
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let a = b.append(entry, Opcode::Alloca, Type::pointer_to(Type::i32()), vec![]);
        let ret = b.append(entry, Opcode::Ret, Type::void(), vec![]);
        b.erase_inst(a);
        assert_eq!(m.funcs.get(f).blocks.get(entry).first_inst, Some(ret));
    }

    #[test]
    fn global_use_list_spans_functions() {
        let mut m = Module::new();
        let g = m.add_global(crate::ir::module::GlobalData {
            name: "x".into(),
            ty: Type::i32(),
            init: vec![],
            first_use: None,
        });
        let f1 = m.add_func(FuncData::new("f1".into(), Type::void()));
        let f2 = m.add_func(FuncData::new("f2".into(), Type::void()));
        let b1 = Builder::new(&mut m, f1).create_block("entry");
        let load1 = Builder::new(&mut m, f1).append(b1, Opcode::Load, Type::i32(), vec![OperandKind::Global(g)]);
        let b2 = Builder::new(&mut m, f2).create_block("entry");
        let load2 = Builder::new(&mut m, f2).append(b2, Opcode::Load, Type::i32(), vec![OperandKind::Global(g)]);

        let mut uses = vec![];
        let mut cur = m.globals.get(g).first_use;
        while let Some(u) = cur {
            uses.push((u.func, u.user));
            cur = m.funcs.get(u.func).insts.get(u.user).operands[u.index as usize].next;
        }
        assert!(uses.contains(&(f1, load1)));
        assert!(uses.contains(&(f2, load2)));
    }
}
