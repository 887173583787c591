//! The analysis framework (`spec.md` §4.4-§4.6): CFG queries, dominator
//! trees and dominance frontiers, and natural loop discovery. Each analysis
//! is a free function returning an owned result; nothing is cached on the
//! IR itself (see `ir::block`'s module doc), so a pass recomputes what it
//! needs after any edit that could invalidate it.

pub mod cfg;
pub mod dominators;
pub mod loops;

pub use dominators::DomTree;
pub use loops::{LoopData, LoopForest, LoopId};
