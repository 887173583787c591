//! Basic blocks (`spec.md` §3.5).
//!
//! Dominance and loop information are *not* stored here: they are computed
//! on demand by `analysis::dominators` and `analysis::loops` into their own
//! result structs, rather than cached as mutable fields on the block. That
//! keeps an IR edit from ever silently invalidating stale analysis state
//! sitting on a `BlockData` — a pass recomputes (or is handed) a fresh
//! `DomTree`/`LoopForest` instead of trusting a cache it didn't invalidate
//! itself.

use crate::ir::arena::Id;
use crate::ir::instruction::InstId;

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub name: String,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    pub first_inst: Option<InstId>,
    pub last_inst: Option<InstId>,
    /// Intrusive position among the function's blocks, in the order they
    /// were created; `spec.md` §6.2 prints blocks in this order unless a
    /// pass has since reordered them (SimplifyCFG does, by relinking this
    /// chain rather than moving blocks between containers).
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
}

pub type BlockId = Id<BlockData>;

impl BlockData {
    pub fn new(name: String) -> Self {
        Self { name, ..Default::default() }
    }
}
