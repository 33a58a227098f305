//! CFG analyses: DFS orders, immediate dominators, dominator sets and
//! dominance frontiers.
//!
//! Dominance uses the Cooper–Harvey–Kennedy algorithm over reverse
//! postorder, with postorder indices driving the fast two-finger
//! intersection. Frontiers are the Cytron construction seeded at join
//! blocks (two or more inbound edges).

use crate::ir::{BlockId, Cfg};
use crate::utils::IndexSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfsOrder {
    Preorder,
    Postorder,
}

/// Iterative DFS over successors in edge-creation order.
///
/// Returns the reachable blocks in the requested order; the array is owned
/// by the caller.
pub fn node_order(cfg: &Cfg, order: DfsOrder) -> Vec<BlockId> {
    let num_nodes = cfg.blocks.len();
    let Some(entry) = cfg.entry else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(num_nodes);
    let mut stack = Vec::with_capacity(num_nodes);
    let mut visited = vec![false; num_nodes];
    // per-node next-child-to-visit cursor
    let mut nc = vec![0usize; num_nodes];

    stack.push(entry);
    visited[entry.index()] = true;

    while let Some(cur) = stack.last().copied() {
        if order == DfsOrder::Preorder && nc[cur.index()] == 0 {
            result.push(cur);
        }

        // locate next unvisited child
        let succs: Vec<BlockId> = cfg.successors(cur).collect();
        while nc[cur.index()] < succs.len()
            && visited[succs[nc[cur.index()]].index()]
        {
            nc[cur.index()] += 1;
        }

        if nc[cur.index()] >= succs.len() {
            stack.pop();
            if order == DfsOrder::Postorder {
                result.push(cur);
            }
        } else {
            let next = succs[nc[cur.index()]];
            stack.push(next);
            visited[next.index()] = true;
            nc[cur.index()] += 1;
        }
    }

    result
}

/// Immediate dominator per block, indexed by block id.
///
/// `idom[entry] == entry`; blocks unreachable from the entry stay `None`.
pub fn idom(cfg: &Cfg, postorder: &[BlockId]) -> Vec<Option<BlockId>> {
    let num_nodes = cfg.blocks.len();
    let mut idom: Vec<Option<BlockId>> = vec![None; num_nodes];
    let Some(entry) = cfg.entry else {
        return idom;
    };

    // node id → postorder index
    let mut node2post = vec![usize::MAX; num_nodes];
    for (i, block) in postorder.iter().enumerate() {
        node2post[block.index()] = i;
    }

    idom[entry.index()] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;

        for b in postorder.iter().rev() {
            if *b == entry {
                continue;
            }

            // first processed predecessor seeds the intersection
            let mut preds =
                cfg.predecessors(*b).filter(|p| idom[p.index()].is_some());
            let Some(mut new_idom) = preds.next() else {
                continue;
            };

            for pred in preds {
                // two-finger intersect on postorder indices, converging
                // to a common dominator
                let mut a = new_idom;
                let mut p = pred;

                while a != p {
                    while node2post[a.index()] < node2post[p.index()] {
                        a = idom[a.index()].expect("processed dominator");
                    }
                    while node2post[p.index()] < node2post[a.index()] {
                        p = idom[p.index()].expect("processed dominator");
                    }
                }

                new_idom = a;
            }

            if idom[b.index()] != Some(new_idom) {
                idom[b.index()] = Some(new_idom);
                changed = true;
            }
        }
    }

    idom
}

/// Dominator set per block: the idom chain walked up to the entry,
/// including the block itself.
pub fn dominators(cfg: &Cfg, idom: &[Option<BlockId>]) -> Vec<IndexSet> {
    let num_nodes = cfg.blocks.len();
    let mut dom: Vec<IndexSet> =
        (0..num_nodes).map(|_| IndexSet::new(num_nodes)).collect();

    for i in 0..num_nodes {
        dom[i].add(i); // n DOM n always holds

        let mut probe = idom[i];
        while let Some(b) = probe {
            dom[i].add(b.index());

            if Some(b) == cfg.entry {
                break;
            }
            probe = idom[b.index()];
        }
    }

    dom
}

/// Dominance frontier per block.
pub fn dominance_frontiers(
    cfg: &Cfg,
    idom: &[Option<BlockId>],
) -> Vec<IndexSet> {
    let num_nodes = cfg.blocks.len();
    let mut df: Vec<IndexSet> =
        (0..num_nodes).map(|_| IndexSet::new(num_nodes)).collect();

    for i in 0..num_nodes {
        let b = BlockId::from_index(i);

        if cfg.block(b).in_edges.len() < 2 {
            continue;
        }

        for pred in cfg.predecessors(b).collect::<Vec<_>>() {
            let mut probe = Some(pred);

            while let Some(p) = probe {
                if Some(p) == idom[i] {
                    break;
                }

                df[p.index()].add(i);
                probe = idom[p.index()];

                // broken chains only occur on unreachable predecessors
                if probe == Some(p) {
                    break;
                }
            }
        }
    }

    df
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::EdgeKind;

    /// diamond: 0 → {1, 2} → 3
    fn diamond() -> Cfg {
        let mut cfg = Cfg::new();
        let b0 = cfg.new_block(false);
        let b1 = cfg.new_block(false);
        let b2 = cfg.new_block(false);
        let b3 = cfg.new_block(false);

        cfg.new_edge(b0, b1, EdgeKind::True);
        cfg.new_edge(b0, b2, EdgeKind::False);
        cfg.new_edge(b1, b3, EdgeKind::Any);
        cfg.new_edge(b2, b3, EdgeKind::Any);
        cfg.entry = Some(b0);
        cfg
    }

    /// loop: 0 → 1(test) → 2(body) → 1, 1 → 3(exit)
    fn simple_loop() -> Cfg {
        let mut cfg = Cfg::new();
        let b0 = cfg.new_block(false);
        let b1 = cfg.new_block(false);
        let b2 = cfg.new_block(true);
        let b3 = cfg.new_block(false);

        cfg.new_edge(b0, b1, EdgeKind::Any);
        cfg.new_edge(b1, b3, EdgeKind::False);
        cfg.new_edge(b1, b2, EdgeKind::True);
        cfg.new_edge(b2, b1, EdgeKind::Jump);
        cfg.entry = Some(b0);
        cfg
    }

    #[test]
    fn postorder_covers_all_reachable_blocks() {
        let cfg = diamond();
        let post = node_order(&cfg, DfsOrder::Postorder);

        assert_eq!(post.len(), 4);
        // entry is last in postorder
        assert_eq!(*post.last().unwrap(), cfg.entry.unwrap());
        // the join appears before both arms' common ancestor
        assert_eq!(post[0].index(), 3);
    }

    #[test]
    fn idom_of_diamond_join_is_the_branch() {
        let cfg = diamond();
        let post = node_order(&cfg, DfsOrder::Postorder);
        let idom = idom(&cfg, &post);

        assert_eq!(idom[0].map(BlockId::index), Some(0));
        assert_eq!(idom[1].map(BlockId::index), Some(0));
        assert_eq!(idom[2].map(BlockId::index), Some(0));
        assert_eq!(idom[3].map(BlockId::index), Some(0));
    }

    #[test]
    fn dominator_sets_include_self_and_chain() {
        let cfg = diamond();
        let post = node_order(&cfg, DfsOrder::Postorder);
        let idom = idom(&cfg, &post);
        let dom = dominators(&cfg, &idom);

        assert_eq!(dom[3].iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(dom[1].iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn frontier_of_diamond_arms_is_the_join() {
        let cfg = diamond();
        let post = node_order(&cfg, DfsOrder::Postorder);
        let idom = idom(&cfg, &post);
        let df = dominance_frontiers(&cfg, &idom);

        assert_eq!(df[1].iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(df[2].iter().collect::<Vec<_>>(), vec![3]);
        assert!(df[0].is_empty());
        assert!(df[3].is_empty());
    }

    #[test]
    fn loop_header_is_in_its_own_frontier() {
        let cfg = simple_loop();
        let post = node_order(&cfg, DfsOrder::Postorder);
        let idom = idom(&cfg, &post);
        let df = dominance_frontiers(&cfg, &idom);

        // back edge makes the header a join dominated by itself
        assert_eq!(df[1].iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(df[2].iter().collect::<Vec<_>>(), vec![1]);
    }
}
