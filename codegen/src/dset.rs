//! Disjoint-set (union-find) structure over a fixed universe of integers.
//!
//! The allocator unions phi-webs of virtual registers and families of spill
//! ids with this. Elements must be created with `make_set` before use.

/// Union-find over the universe `0..size`.
#[derive(Clone, Debug)]
pub struct DisjointSet {
    parent: Vec<u32>,
}

const UNMADE: u32 = u32::MAX;

impl DisjointSet {
    /// Create a universe of `size` potential elements, none of them made.
    pub fn with_universe(size: usize) -> Self {
        Self {
            parent: vec![UNMADE; size],
        }
    }

    /// Make `x` a singleton set.
    pub fn make_set(&mut self, x: usize) {
        self.parent[x] = x as u32;
    }

    /// Find the representative of the set containing `x`.
    pub fn find(&self, x: usize) -> usize {
        debug_assert!(self.parent[x] != UNMADE, "find() on element never made");
        let mut x = x;
        while self.parent[x] as usize != x {
            x = self.parent[x] as usize;
        }
        x
    }

    /// Union the sets containing `x` and `y`. The representative of `y`'s
    /// set becomes the representative of the merged set.
    pub fn union(&mut self, x: usize, y: usize) {
        let xroot = self.find(x);
        let yroot = self.find(y);
        self.parent[xroot] = yroot as u32;
    }
}
