//! Incremental tracking of the set of live values.
//!
//! After the lifetime intervals exist, the spiller and the colorer both walk
//! the blocks in RPO and need "what is live here, and how many" at every
//! instruction. The tracker seeds itself from the intervals covering the
//! block entry and then steps: a terminating use retires its interval, a
//! def activates the front of its range.

use super::Context;
use crate::bitset::BitSet;
use crate::cg::{self, reg, ArgKind, N_ARGS};

pub(crate) struct LiveValueTracker {
    live: BitSet,
    cur_ival: Vec<Option<usize>>,
    n_live: u32,
    next: Option<cg::Inst>,
    /// A vreg not to count or report (a call's own output while the call's
    /// clobber demand is evaluated).
    pub skip_vreg: Option<u32>,
}

impl LiveValueTracker {
    /// Create a tracker with headroom for registers the current pass will
    /// still create.
    pub fn new(func: &cg::Function) -> Self {
        let cap = func.vreg_count as usize + 1024;
        Self {
            live: BitSet::with_capacity(cap),
            cur_ival: vec![None; cap],
            n_live: 0,
            next: None,
            skip_vreg: None,
        }
    }

    /// Position the tracker at the start of `b`.
    pub fn start(&mut self, ctx: &Context, func: &cg::Function, b: cg::Block) {
        self.next = func.first_inst(b);
        self.n_live = 0;

        for r in reg::FIRST_VREG..func.vreg_count {
            let ri = r as usize;
            assert!(ri < self.cur_ival.len(), "tracker capacity exceeded");
            let ival = ctx.rinfo[ri].liverange.find_covering(ctx.block_from[b]);
            self.cur_ival[ri] = ival;
            if ival.is_some() {
                self.live.add(ri);
                self.n_live += 1;
            } else {
                self.live.remove(ri);
            }
        }
    }

    /// Advance over the next instruction. Returns the instruction and the
    /// number of values live right at it (skip register discounted).
    pub fn step(&mut self, ctx: &Context, func: &cg::Function) -> Option<(cg::Inst, u32)> {
        let inst = self.next?;

        for l in 0..N_ARGS {
            if let ArgKind::Vreg(e) = func.insts[inst].args[l].kind {
                let arg = func.ssa.tail(e);
                let av = ctx.vreg[arg] as usize;
                // Two uses of the same value in one instruction retire the
                // interval on the first visit only.
                let idx = match self.cur_ival[av] {
                    Some(idx) => idx,
                    None => continue,
                };
                if ctx.pos[inst] == ctx.rinfo[av].liverange.interval(idx).1 {
                    // Terminating use.
                    self.live.remove(av);
                    self.n_live -= 1;
                    self.cur_ival[av] = if idx + 1 < ctx.rinfo[av].liverange.intervals().len() {
                        Some(idx + 1)
                    } else {
                        None
                    };
                }
            }
        }

        if func.insts[inst].reg.is_some() {
            let v = ctx.vreg[inst] as usize;
            debug_assert!(self.cur_ival[v].is_none(), "value live before its def");
            let lr = &ctx.rinfo[v].liverange;
            assert!(!lr.is_empty(), "def of a value with no live range");
            debug_assert_eq!(ctx.pos[inst], lr.interval(0).0, "def must start its range");
            self.cur_ival[v] = Some(0);
            self.live.add(v);
            self.n_live += 1;
        }

        let mut n = self.n_live;
        if let Some(skip) = self.skip_vreg {
            if func.insts[inst].reg == Some(skip) {
                n -= 1;
            }
        }

        self.next = func.next_inst(inst);
        debug_assert_eq!(self.live.count() as u32, self.n_live);
        Some((inst, n))
    }

    /// The live virtual registers, skip register excluded.
    pub fn live_vregs(&self, func: &cg::Function) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.n_live as usize);
        for r in reg::FIRST_VREG..func.vreg_count {
            if Some(r) != self.skip_vreg && self.live.contains(r as usize) {
                out.push(r);
            }
        }
        out
    }

    /// Forget `v` entirely (it was just spilled).
    pub fn remove(&mut self, v: u32) {
        if self.live.contains(v as usize) {
            self.live.remove(v as usize);
            self.n_live -= 1;
        }
        self.cur_ival[v as usize] = None;
    }

    /// Account for a reload inserted between the last stepped instruction
    /// and the next one. Its one-interval range is live at the next step
    /// only if that step is its use.
    pub fn add_local(&mut self, ctx: &Context, func: &cg::Function, inst: cg::Inst) {
        let v = func.insts[inst].reg.expect("reload without output") as usize;
        assert!(v < self.cur_ival.len(), "tracker capacity exceeded");

        if func.next_inst(inst) == self.next {
            self.next = Some(inst);
        }

        if let Some(next) = self.next {
            let (from, to) = ctx.rinfo[v].liverange.interval(0);
            if from < ctx.pos[next] && ctx.pos[next] <= to {
                self.cur_ival[v] = Some(0);
                self.live.add(v);
                self.n_live += 1;
            }
        }
    }
}
