//! Control-flow graph queries (`spec.md` §4.4).
//!
//! Predecessor/successor edges are maintained directly on [`crate::ir::BlockData`]
//! by the builder as branches are created or rewritten, so there is no
//! separate "build the CFG" step; what lives here is everything computed
//! *from* that adjacency: reachability and a canonical reverse-postorder
//! that every other analysis and pass iterates blocks in, so their behavior
//! (and any iteration-count diagnostics) is deterministic (`spec.md` §5,
//! "pinned iteration order").

use std::collections::HashSet;

use crate::ir::{BlockId, FuncData};

/// Depth-first postorder over the reachable subgraph starting at `entry`,
/// reversed so the entry block comes first.
pub fn reverse_postorder(func: &FuncData, entry: BlockId) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        for &succ in func.blocks.get(block).succs.iter() {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

/// The set of blocks reachable from `entry` by following successor edges.
/// Used by ADCE and SimplifyCFG to find dead blocks (`spec.md` §4.12,
/// §4.13).
pub fn reachable_blocks(func: &FuncData, entry: BlockId) -> HashSet<BlockId> {
    reverse_postorder(func, entry).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::module::Module;
    use crate::ir::types::Type;

    #[test]
    fn rpo_visits_entry_first_and_skips_unreachable() {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::void()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let mid = b.create_block("mid");
        let dead = b.create_block("dead");
        let _ = dead;
        b.add_edge(entry, mid);

        let func = m.funcs.get(f);
        let order = reverse_postorder(func, entry);
        assert_eq!(order[0], entry);
        assert_eq!(order.len(), 2);
        assert!(!order.contains(&dead));
    }
}
