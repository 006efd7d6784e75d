//! Dominator analysis shared by the IR and CG sides.
//!
//! Implements the Cooper-Harvey-Kennedy iterative algorithm: blocks get
//! post-order numbers from a reverse post-order walk, the entry dominates
//! itself, and every other block's immediate dominator is refined to the
//! intersection of its already-processed predecessors' dominators, with the
//! intersection walking both fingers up the idom chain by post-order number.
//! On top of the idoms we build the dominator tree (children lists) and, for
//! the IR side's `mem2reg` consumer, dominance frontiers.

use crate::entity::{EntityRef, PackedOption, ReservedValue, SecondaryMap};
use crate::graph::Graph;

/// Result of dominator analysis over one function's CFG.
pub struct DominatorTree<N>
where
    N: EntityRef + ReservedValue,
{
    idom: SecondaryMap<N, PackedOption<N>>,
    po: SecondaryMap<N, u32>,
    children: SecondaryMap<N, Vec<N>>,
    entry: N,
}

impl<N> DominatorTree<N>
where
    N: EntityRef + ReservedValue,
{
    /// Compute the dominator tree for the graph restricted to `rpo`, a
    /// reverse post-order over the reachable blocks (entry first).
    pub fn compute<E>(graph: &Graph<N, E>, rpo: &[N]) -> Self {
        let n = rpo.len();
        assert!(n > 0, "dominator analysis needs an entry block");

        let mut po = SecondaryMap::new();
        for (i, &b) in rpo.iter().enumerate() {
            po[b] = (n - 1 - i) as u32;
        }

        let mut idom: SecondaryMap<N, PackedOption<N>> = SecondaryMap::new();
        let entry = rpo[0];
        idom[entry] = entry.into();

        let mut changed = true;
        while changed {
            changed = false;

            for &b in &rpo[1..] {
                // First already-processed predecessor seeds the intersection.
                let mut new_idom = match graph
                    .preds(b)
                    .iter()
                    .map(|&e| graph.tail(e))
                    .find(|&p| idom[p].is_some())
                {
                    Some(p) => p,
                    None => continue,
                };

                for &e in graph.preds(b) {
                    let p = graph.tail(e);
                    if p != new_idom && idom[p].is_some() {
                        new_idom = Self::intersect(&idom, &po, p, new_idom);
                    }
                }

                if idom[b].expand() != Some(new_idom) {
                    idom[b] = new_idom.into();
                    changed = true;
                }
            }
        }

        let mut children: SecondaryMap<N, Vec<N>> = SecondaryMap::new();
        for &b in &rpo[1..] {
            let parent = idom[b].unwrap();
            children[parent].push(b);
        }

        Self {
            idom,
            po,
            children,
            entry,
        }
    }

    fn intersect(
        idom: &SecondaryMap<N, PackedOption<N>>,
        po: &SecondaryMap<N, u32>,
        b1: N,
        b2: N,
    ) -> N {
        let mut finger1 = b1;
        let mut finger2 = b2;
        while finger1 != finger2 {
            while po[finger1] < po[finger2] {
                finger1 = idom[finger1].unwrap();
            }
            while po[finger2] < po[finger1] {
                finger2 = idom[finger2].unwrap();
            }
        }
        finger1
    }

    /// The entry block.
    pub fn entry(&self) -> N {
        self.entry
    }

    /// Immediate dominator of `b`. The entry block is its own idom.
    pub fn idom(&self, b: N) -> N {
        self.idom[b].unwrap()
    }

    /// Blocks whose immediate dominator is `b`, in reverse post-order.
    pub fn children(&self, b: N) -> &[N] {
        &self.children[b]
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: N, b: N) -> bool {
        let mut b = b;
        while self.po[b] < self.po[a] {
            b = self.idom(b);
        }
        a == b
    }

    /// Does `a` dominate `b` with `a != b`?
    pub fn strictly_dominates(&self, a: N, b: N) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Dominance frontiers: for each block, the join blocks where its
    /// dominance ends. Only join points (two or more predecessors) ever
    /// appear in a frontier.
    pub fn dominance_frontier<E>(
        &self,
        graph: &Graph<N, E>,
        rpo: &[N],
    ) -> SecondaryMap<N, Vec<N>> {
        let mut df: SecondaryMap<N, Vec<N>> = SecondaryMap::new();

        for &b in rpo {
            if graph.preds(b).len() < 2 {
                continue;
            }
            for &e in graph.preds(b) {
                let mut runner = graph.tail(e);
                while runner != self.idom(b) {
                    if !df[runner].contains(&b) {
                        df[runner].push(b);
                    }
                    runner = self.idom(runner);
                }
            }
        }

        df
    }
}
