//! Natural loop discovery and nesting (`spec.md` §4.6).
//!
//! A back edge is any CFG edge `u -> v` where `v` dominates `u`. The natural
//! loop of a back edge is `v` together with every block that can reach `u`
//! without passing through `v`, found by a reverse-reachability worklist
//! seeded at `u` (`spec.md` §4.6's stated algorithm). Loops sharing the same
//! header are merged into one (SysY's `for`/`while` never need this, but a
//! header can still gain multiple back edges after unrolling partially
//! peels a loop); nesting is then determined purely by block-set inclusion,
//! the widest loop being the outermost.

use std::collections::{HashSet, VecDeque};

use crate::analysis::dominators::DomTree;
use crate::ir::{BlockId, FuncData};

/// Index into a [`LoopForest`]'s loop list. Scoped to the forest that
/// produced it, not globally unique the way `ir::arena::Id` handles are.
pub type LoopId = usize;

#[derive(Debug, Clone)]
pub struct LoopData {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub latches: Vec<BlockId>,
    pub parent: Option<LoopId>,
    pub depth: u32,
}

impl LoopData {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

#[derive(Debug, Default)]
pub struct LoopForest {
    loops: Vec<LoopData>,
}

impl LoopForest {
    pub fn get(&self, id: LoopId) -> &LoopData {
        &self.loops[id]
    }

    pub fn get_mut(&mut self, id: LoopId) -> &mut LoopData {
        &mut self.loops[id]
    }

    pub fn ids(&self) -> impl Iterator<Item = LoopId> {
        0..self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// The innermost loop containing `block`, if any — the loop with the
    /// greatest depth among those whose block set contains it.
    pub fn innermost_containing(&self, block: BlockId) -> Option<LoopId> {
        self.ids()
            .filter(|&id| self.loops[id].contains(block))
            .max_by_key(|&id| self.loops[id].depth)
    }

    /// Blocks outside the loop that a block inside it branches to
    /// (`spec.md` §4.6, "exit blocks"), used by LICM to know where hoisted
    /// values must remain live and by loop unrolling to retarget the final
    /// iteration's exit branch.
    pub fn exit_blocks(&self, id: LoopId, func: &FuncData) -> Vec<BlockId> {
        let loop_data = &self.loops[id];
        let mut exits = Vec::new();
        for &block in &loop_data.blocks {
            for &succ in &func.blocks.get(block).succs {
                if !loop_data.contains(succ) && !exits.contains(&succ) {
                    exits.push(succ);
                }
            }
        }
        exits
    }
}

pub fn analyze(func: &FuncData, entry: BlockId, dom: &DomTree) -> LoopForest {
    let mut by_header: std::collections::HashMap<BlockId, LoopData> = std::collections::HashMap::new();

    for (id, block) in func.blocks.iter() {
        for &succ in &block.succs {
            if dom.dominates(succ, id) {
                let natural = natural_loop_blocks(func, id, succ);
                let entry_data = by_header.entry(succ).or_insert_with(|| LoopData {
                    header: succ,
                    blocks: HashSet::new(),
                    latches: Vec::new(),
                    parent: None,
                    depth: 0,
                });
                entry_data.blocks.extend(natural);
                entry_data.latches.push(id);
            }
        }
    }
    let _ = entry;

    let mut loops: Vec<LoopData> = by_header.into_values().collect();
    loops.sort_by_key(|l| l.blocks.len());

    for i in 0..loops.len() {
        let mut parent = None;
        for j in 0..loops.len() {
            if i == j {
                continue;
            }
            if loops[j].blocks.len() > loops[i].blocks.len() && loops[j].blocks.is_superset(&loops[i].blocks) {
                match parent {
                    None => parent = Some(j),
                    Some(p) if loops[j].blocks.len() < loops[p].blocks.len() => parent = Some(j),
                    _ => {}
                }
            }
        }
        loops[i].parent = parent;
    }
    for i in 0..loops.len() {
        let mut depth = 1;
        let mut cur = loops[i].parent;
        while let Some(p) = cur {
            depth += 1;
            cur = loops[p].parent;
        }
        loops[i].depth = depth;
    }

    LoopForest { loops }
}

fn natural_loop_blocks(func: &FuncData, latch: BlockId, header: BlockId) -> HashSet<BlockId> {
    let mut blocks = HashSet::new();
    blocks.insert(header);
    blocks.insert(latch);
    let mut worklist = VecDeque::new();
    if latch != header {
        worklist.push_back(latch);
    }
    while let Some(block) = worklist.pop_front() {
        for &pred in &func.blocks.get(block).preds {
            if blocks.insert(pred) {
                worklist.push_back(pred);
            }
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dominators;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::module::Module;
    use crate::ir::types::Type;

    #[test]
    fn finds_a_simple_loop() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::void()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let header = b.create_block("header");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        b.add_edge(entry, header);
        b.add_edge(header, body);
        b.add_edge(header, exit);
        b.add_edge(body, header);

        let func = m.funcs.get(f);
        let dom = dominators::compute(func, entry);
        let forest = analyze(func, entry, &dom);
        assert_eq!(forest.ids().count(), 1);
        let loop_id = forest.innermost_containing(body).unwrap();
        let l = forest.get(loop_id);
        assert_eq!(l.header, header);
        assert!(l.contains(body));
        assert!(!l.contains(exit));
        assert_eq!(forest.exit_blocks(loop_id, func), vec![exit]);
    }
}
