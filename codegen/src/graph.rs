//! Directed multigraph substrate shared by the CFG and SSA use-def graphs.
//!
//! Nodes are entity references owned by the client (blocks, IR nodes, cg
//! instructions); the graph only stores their incident edge lists. Both lists
//! are kept sorted by a per-node *sort key* registered by the client, so
//! predecessor/successor traversal is deterministic regardless of mutation
//! history. Edges are entities of their own and can carry client data (a
//! phi-argument block, an operand index, a branch-target tag).
//!
//! A `Graph` also provides a monotonic version counter, bumped on every
//! mutation so clients can cache derived analyses (loops, RPO), and a small
//! pool of *markers*: per-node scratch epochs acquired and released like
//! temporary colours. Setting a marker reports whether it was already set,
//! which is what makes an iterative DFS idempotent.

use crate::entity::{entity_impl, EntityRef, PrimaryMap, SecondaryMap};

/// An opaque reference to a graph edge.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Edge(u32);
entity_impl!(Edge, "edge");

/// Number of markers in the pool. Two are enough for every pass in the
/// compiler; nesting deeper than that is a bug.
const NUM_MARKERS: usize = 2;

/// A scratch marker acquired from a graph. Markers must be released with
/// `free_marker`; leaking one exhausts the pool.
#[derive(Copy, Clone)]
pub struct Marker {
    idx: usize,
    pattern: u32,
}

#[derive(Clone, Debug)]
struct EdgeData<N, E> {
    tail: N,
    head: N,
    data: E,
}

#[derive(Clone, Debug)]
struct Links {
    preds: Vec<Edge>,
    succs: Vec<Edge>,
    markers: [u32; NUM_MARKERS],
    key: i64,
}

impl Default for Links {
    fn default() -> Self {
        Self {
            preds: Vec::new(),
            succs: Vec::new(),
            markers: [0; NUM_MARKERS],
            key: 0,
        }
    }
}

/// A directed multigraph over client-owned nodes of type `N`, with edge
/// payloads of type `E`.
#[derive(Debug)]
pub struct Graph<N: EntityRef, E> {
    links: SecondaryMap<N, Links>,
    edges: PrimaryMap<Edge, Option<EdgeData<N, E>>>,
    free_edges: Vec<Edge>,
    version: u32,
    marker_used: [bool; NUM_MARKERS],
    prev_marker: u32,
}

impl<N: EntityRef, E> Graph<N, E> {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            links: SecondaryMap::new(),
            edges: PrimaryMap::new(),
            free_edges: Vec::new(),
            version: 0,
            marker_used: [false; NUM_MARKERS],
            prev_marker: 0,
        }
    }

    /// Current version of the graph. Bumped on every edge mutation.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Register the sort key that orders `n` within the edge lists of its
    /// neighbours. Insertions compare keys at insertion time; edges already
    /// in place do not move when a key changes later.
    pub fn set_sort_key(&mut self, n: N, key: i64) {
        self.links[n].key = key;
    }

    fn key(&self, n: N) -> i64 {
        self.links[n].key
    }

    /// Add an edge `tail -> head` carrying `data`.
    pub fn add_edge(&mut self, tail: N, head: N, data: E) -> Edge {
        self.version += 1;

        let edge = match self.free_edges.pop() {
            Some(e) => {
                debug_assert!(self.edges[e].is_none());
                self.edges[e] = Some(EdgeData { tail, head, data });
                e
            }
            None => self.edges.push(Some(EdgeData { tail, head, data })),
        };

        // Insert before the first entry whose endpoint does not sort below
        // the new one, keeping both lists ordered by node identity.
        let head_key = self.key(head);
        let succs_len = self.links[tail].succs.len();
        let pos = (0..succs_len)
            .position(|i| {
                let e = self.links[tail].succs[i];
                let h = self.edges[e].as_ref().unwrap().head;
                head_key <= self.links[h].key
            })
            .unwrap_or(succs_len);
        self.links[tail].succs.insert(pos, edge);

        let tail_key = self.key(tail);
        let preds_len = self.links[head].preds.len();
        let pos = (0..preds_len)
            .position(|i| {
                let e = self.links[head].preds[i];
                let t = self.edges[e].as_ref().unwrap().tail;
                tail_key <= self.links[t].key
            })
            .unwrap_or(preds_len);
        self.links[head].preds.insert(pos, edge);

        edge
    }

    /// Delete `edge`, unlinking it from both endpoints, and return its data.
    pub fn remove_edge(&mut self, edge: Edge) -> E {
        self.version += 1;
        let EdgeData { tail, head, data } = self.edges[edge].take().expect("edge already removed");
        let succs = &mut self.links[tail].succs;
        let i = succs.iter().position(|&e| e == edge).expect("edge in succ list");
        succs.remove(i);
        let preds = &mut self.links[head].preds;
        let i = preds.iter().position(|&e| e == edge).expect("edge in pred list");
        preds.remove(i);
        self.free_edges.push(edge);
        data
    }

    /// Delete every edge ending at `n`.
    pub fn remove_preds(&mut self, n: N) {
        self.version += 1;
        loop {
            let e = match self.links[n].preds.first() {
                Some(&e) => e,
                None => break,
            };
            self.remove_edge(e);
        }
    }

    /// Delete every edge starting at `n`.
    pub fn remove_succs(&mut self, n: N) {
        self.version += 1;
        loop {
            let e = match self.links[n].succs.first() {
                Some(&e) => e,
                None => break,
            };
            self.remove_edge(e);
        }
    }

    /// Delete all edges incident to `n`. The node itself is client-owned and
    /// stays valid; it simply becomes disconnected.
    pub fn detach_node(&mut self, n: N) {
        self.remove_succs(n);
        self.remove_preds(n);
    }

    /// The ordered successor edges of `n`.
    pub fn succs(&self, n: N) -> &[Edge] {
        &self.links[n].succs
    }

    /// The ordered predecessor edges of `n`.
    pub fn preds(&self, n: N) -> &[Edge] {
        &self.links[n].preds
    }

    /// The single successor of `n`, if it has exactly one.
    pub fn single_succ(&self, n: N) -> Option<N> {
        match self.succs(n) {
            [e] => Some(self.head(*e)),
            _ => None,
        }
    }

    /// The single predecessor of `n`, if it has exactly one.
    pub fn single_pred(&self, n: N) -> Option<N> {
        match self.preds(n) {
            [e] => Some(self.tail(*e)),
            _ => None,
        }
    }

    /// The node `edge` starts at.
    pub fn tail(&self, edge: Edge) -> N {
        self.edges[edge].as_ref().expect("dead edge").tail
    }

    /// The node `edge` ends at.
    pub fn head(&self, edge: Edge) -> N {
        self.edges[edge].as_ref().expect("dead edge").head
    }

    /// The client data carried by `edge`.
    pub fn data(&self, edge: Edge) -> &E {
        &self.edges[edge].as_ref().expect("dead edge").data
    }

    /// Mutable access to the client data carried by `edge`.
    pub fn data_mut(&mut self, edge: Edge) -> &mut E {
        &mut self.edges[edge].as_mut().expect("dead edge").data
    }

    /// Is `edge` still alive?
    pub fn is_alive(&self, edge: Edge) -> bool {
        self.edges.get(edge).map_or(false, Option::is_some)
    }

    /// Acquire a marker from the pool. Panics when both markers are taken.
    pub fn alloc_marker(&mut self) -> Marker {
        for idx in 0..NUM_MARKERS {
            if !self.marker_used[idx] {
                self.marker_used[idx] = true;
                self.prev_marker += 1;
                return Marker {
                    idx,
                    pattern: self.prev_marker,
                };
            }
        }
        panic!("no free graph marker");
    }

    /// Release a marker back to the pool.
    pub fn free_marker(&mut self, marker: Marker) {
        self.marker_used[marker.idx] = false;
    }

    /// Set `marker` on `n`, returning whether it was already set.
    pub fn mark(&mut self, n: N, marker: Marker) -> bool {
        let slot = &mut self.links[n].markers[marker.idx];
        let was_set = *slot == marker.pattern;
        *slot = marker.pattern;
        was_set
    }

    /// Is `marker` set on `n`?
    pub fn is_marked(&self, n: N, marker: Marker) -> bool {
        self.links[n].markers[marker.idx] == marker.pattern
    }
}

impl<N: EntityRef, E> Default for Graph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}
