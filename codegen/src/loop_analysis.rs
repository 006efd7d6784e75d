//! Reducible-loop detection over an arbitrary rooted graph.
//!
//! This is Havlak's algorithm: a DFS assigns pre-order and reverse
//! post-order numbers, then nodes are visited in reverse pre-order looking
//! for back-edge predecessors. Each back edge's natural loop body is walked
//! through a disjoint set over pre-order numbers, tagging every body node
//! with its header. The result is a per-node record from which loop nesting
//! depth can be derived.
//!
//! Irreducible graphs are rejected; upstream only produces the reducible
//! CFGs that structured C yields.

use crate::dset::DisjointSet;
use crate::entity::{EntityRef, SecondaryMap};
use crate::graph::Graph;
use crate::{CodegenError, CodegenResult};

/// How a node participates in the loop structure.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LoopKind {
    /// Not the header of any loop.
    NonHeader,
    /// Header of a natural loop.
    Header,
    /// Sole block of a single-node loop.
    SelfLoop,
}

/// Per-node result of the analysis.
#[derive(Clone, Debug)]
pub struct LoopInfo<N> {
    /// DFS pre-order number.
    pub pre: u32,
    /// DFS reverse post-order number.
    pub rpost: u32,
    /// Header of the innermost loop containing this node, if any.
    pub header: Option<N>,
    /// Loop role of this node.
    pub kind: LoopKind,
}

impl<N> Default for LoopInfo<N> {
    fn default() -> Self {
        Self {
            pre: 0,
            rpost: UNSET,
            header: None,
            kind: LoopKind::NonHeader,
        }
    }
}

const UNSET: u32 = u32::MAX;

/// Loop nesting depth of `n`: 1 for a loop header plus 1 for every enclosing
/// loop header on the chain.
pub fn loop_nest<N: EntityRef>(info: &SecondaryMap<N, LoopInfo<N>>, n: N) -> u32 {
    let mut nest = if info[n].kind == LoopKind::Header { 1 } else { 0 };
    let mut h = info[n].header;
    while let Some(b) = h {
        nest += 1;
        h = info[b].header;
    }
    nest
}

fn is_ancestor<N: EntityRef>(info: &SecondaryMap<N, LoopInfo<N>>, x: N, y: N) -> bool {
    info[x].pre < info[y].pre && info[x].rpost < info[y].rpost
}

fn dfs<N: EntityRef, E>(
    graph: &mut Graph<N, E>,
    root: N,
    n_nodes: usize,
    info: &mut SecondaryMap<N, LoopInfo<N>>,
    preorder: &mut Vec<N>,
    dset: &mut DisjointSet,
) {
    let marker = graph.alloc_marker();
    let mut stack: Vec<N> = Vec::with_capacity(n_nodes);
    let mut pre_counter = 0u32;
    let mut rpost_counter = n_nodes as u32;

    stack.push(root);
    while !stack.is_empty() {
        let top = *stack.last().unwrap();
        if !graph.mark(top, marker) {
            // Pre-order action.
            dset.make_set(pre_counter as usize);
            info[top] = LoopInfo {
                pre: pre_counter,
                rpost: UNSET,
                header: None,
                kind: LoopKind::NonHeader,
            };
            preorder.push(top);
            pre_counter += 1;

            for &edge in graph.succs(top).to_vec().iter() {
                let succ = graph.head(edge);
                if !graph.is_marked(succ, marker) {
                    stack.push(succ);
                }
            }
        }

        let top = *stack.last().unwrap();
        if graph.is_marked(top, marker) {
            if info[top].rpost == UNSET {
                // Post-order action.
                rpost_counter -= 1;
                info[top].rpost = rpost_counter;
            }
            stack.pop();
        }
    }

    graph.free_marker(marker);

    assert_eq!(pre_counter as usize, n_nodes, "unreachable nodes in graph");
    assert_eq!(rpost_counter, 0);
}

/// Analyze the loops of the graph rooted at `root`, which must reach all
/// `n_nodes` nodes. Fails on irreducible graphs.
pub fn analyze<N: EntityRef, E>(
    graph: &mut Graph<N, E>,
    root: N,
    n_nodes: usize,
) -> CodegenResult<SecondaryMap<N, LoopInfo<N>>> {
    let mut info = SecondaryMap::new();
    let mut preorder: Vec<N> = Vec::with_capacity(n_nodes);
    let mut dset = DisjointSet::with_universe(n_nodes);

    dfs(graph, root, n_nodes, &mut info, &mut preorder, &mut dset);

    // All nodes in reverse pre-order.
    for i in (0..n_nodes).rev() {
        let w = preorder[i];
        let mut body: Vec<N> = Vec::new();
        let mut worklist: Vec<N> = Vec::new();
        let pmarker = graph.alloc_marker();

        for &edge in graph.preds(w).to_vec().iter() {
            let v = graph.tail(edge);
            if v == w {
                info[w].kind = LoopKind::SelfLoop;
            } else if is_ancestor(&info, w, v) {
                // v is a back-edge predecessor of w.
                let vp = preorder[dset.find(info[v].pre as usize)];
                graph.mark(vp, pmarker);
                body.push(vp);
            }
        }

        worklist.extend(body.iter().copied());

        if !body.is_empty() {
            info[w].kind = LoopKind::Header;
        }

        while let Some(x) = worklist.pop() {
            for &edge in graph.preds(x).to_vec().iter() {
                let y = graph.tail(edge);
                if !is_ancestor(&info, x, y) {
                    // y reaches the loop body through a forward edge.
                    let yp = preorder[dset.find(info[y].pre as usize)];
                    if yp != w && !is_ancestor(&info, w, yp) {
                        graph.free_marker(pmarker);
                        return Err(CodegenError::Irreducible);
                    }
                    if yp != w && !graph.mark(yp, pmarker) {
                        body.push(yp);
                        worklist.push(yp);
                    }
                }
            }

            for &b in &body {
                info[b].header = Some(w);
                dset.union(info[b].pre as usize, info[w].pre as usize);
            }
        }

        graph.free_marker(pmarker);
    }

    Ok(info)
}
