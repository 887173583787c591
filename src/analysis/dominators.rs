//! Dominator trees and dominance frontiers (`spec.md` §4.5).
//!
//! Immediate dominators are computed with the Cooper/Harvey/Kennedy
//! iterative dataflow algorithm (a worklist over reverse-postorder until
//! fixed point, `spec.md` §4.5's suggested approach), then the tree is
//! stamped with pre/post-order DFS timestamps so `dominates` queries are
//! O(1) rather than a tree walk. Dominance frontiers use the standard
//! Cytron et al. "runner" algorithm.

use std::collections::HashMap;

use crate::analysis::cfg::reverse_postorder;
use crate::ir::{BlockId, FuncData};

#[derive(Debug, Default)]
pub struct DomTree {
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
    tin: HashMap<BlockId, u32>,
    tout: HashMap<BlockId, u32>,
    frontier: HashMap<BlockId, Vec<BlockId>>,
    entry: Option<BlockId>,
}

impl DomTree {
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    pub fn dominance_frontier(&self, block: BlockId) -> &[BlockId] {
        self.frontier.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// `a` dominates `b` iff `a`'s DFS interval contains `b`'s.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        match (self.tin.get(&a), self.tout.get(&a), self.tin.get(&b), self.tout.get(&b)) {
            (Some(&tin_a), Some(&tout_a), Some(&tin_b), Some(&tout_b)) => {
                tin_a <= tin_b && tout_b <= tout_a
            }
            _ => false,
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }
}

pub fn compute(func: &FuncData, entry: BlockId) -> DomTree {
    let rpo = reverse_postorder(func, entry);
    let rpo_index: HashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
    idom.insert(entry, entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &block in rpo.iter().skip(1) {
            let preds: Vec<BlockId> = func
                .blocks
                .get(block)
                .preds
                .iter()
                .copied()
                .filter(|p| idom.contains_key(p))
                .collect();
            let Some(&first) = preds.first() else { continue };
            let mut new_idom = first;
            for &p in preds.iter().skip(1) {
                new_idom = intersect(&idom, &rpo_index, new_idom, p);
            }
            if idom.get(&block) != Some(&new_idom) {
                idom.insert(block, new_idom);
                changed = true;
            }
        }
    }
    idom.remove(&entry);

    let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for (&block, &parent) in &idom {
        children.entry(parent).or_default().push(block);
    }

    let mut tree = DomTree {
        idom,
        children,
        tin: HashMap::new(),
        tout: HashMap::new(),
        frontier: HashMap::new(),
        entry: Some(entry),
    };
    let mut timer = 0u32;
    stamp(&tree.children.clone(), entry, &mut timer, &mut tree.tin, &mut tree.tout);
    tree.frontier = dominance_frontiers(func, &rpo, &tree);
    tree
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    rpo_index: &HashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

fn stamp(
    children: &HashMap<BlockId, Vec<BlockId>>,
    block: BlockId,
    timer: &mut u32,
    tin: &mut HashMap<BlockId, u32>,
    tout: &mut HashMap<BlockId, u32>,
) {
    tin.insert(block, *timer);
    *timer += 1;
    if let Some(kids) = children.get(&block) {
        for &kid in kids {
            stamp(children, kid, timer, tin, tout);
        }
    }
    tout.insert(block, *timer);
    *timer += 1;
}

fn dominance_frontiers(
    func: &FuncData,
    rpo: &[BlockId],
    tree: &DomTree,
) -> HashMap<BlockId, Vec<BlockId>> {
    let mut df: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &block in rpo {
        let preds = &func.blocks.get(block).preds;
        if preds.len() < 2 {
            continue;
        }
        for &pred in preds {
            let mut runner = pred;
            while tree.idom(block) != Some(runner) && runner != block {
                let entry = df.entry(runner).or_default();
                if !entry.contains(&block) {
                    entry.push(block);
                }
                match tree.idom(runner) {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }
    df
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::module::Module;
    use crate::ir::types::Type;

    fn diamond() -> (Module, crate::ir::FuncId, [BlockId; 4]) {
        let mut m = Module::new();
        let f = m.add_func(FuncData::new("f".into(), Type::void()));
        let mut b = Builder::new(&mut m, f);
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        b.add_edge(entry, left);
        b.add_edge(entry, right);
        b.add_edge(left, join);
        b.add_edge(right, join);
        (m, f, [entry, left, right, join])
    }

    #[test]
    fn diamond_idoms() {
        let (m, f, [entry, left, right, join]) = diamond();
        let func = m.funcs.get(f);
        let tree = compute(func, entry);
        assert_eq!(tree.idom(left), Some(entry));
        assert_eq!(tree.idom(right), Some(entry));
        assert_eq!(tree.idom(join), Some(entry));
        assert!(tree.dominates(entry, join));
        assert!(!tree.dominates(left, join));
    }

    #[test]
    fn diamond_dominance_frontier_is_join() {
        let (m, f, [entry, left, right, join]) = diamond();
        let func = m.funcs.get(f);
        let tree = compute(func, entry);
        assert_eq!(tree.dominance_frontier(left), &[join]);
        assert_eq!(tree.dominance_frontier(right), &[join]);
        assert!(tree.dominance_frontier(entry).is_empty());
    }
}
