//! SSA register allocation.
//!
//! The allocator runs on the SSA-form cg code and leaves it phi-free over
//! physical registers, with spill code materialised. Stages, in order:
//!
//! 1. *Phi lifting* inserts copies around every phi so the phi web carries
//!    no pre-existing interference (`coalescing`).
//! 2. *Lifetime intervals* builds per-register live ranges over block/
//!    instruction positions (`liveness`).
//! 3. *Phi analysis* unions phi webs and their ranges; *phi-mem coalescing*
//!    removes every lifted copy whose web ranges do not intersect
//!    (`coalescing`).
//! 4. *Spill selection* lowers the register pressure to the budget,
//!    assigning stack slots to spill families (`spilling`).
//! 5. *Color assignment* picks physical registers preference-first and
//!    materialises call/return constraints with moves and xor swaps
//!    (`coloring`).
//! 6. *SSA deconstruction* turns the phis into per-edge parallel copies
//!    (`deconstruct`).
//! 7. *Spill insertion* replaces the spill/reload pseudos with real stores
//!    and loads (`spilling`), and a final cleanup drops the scaffolding.
//!
//! All allocator scratch (the RPO order, live ranges, equivalence classes,
//! positions) lives in the `Context` and is dropped when the function is
//! done.

pub mod liverange;

mod coalescing;
mod coloring;
mod deconstruct;
mod live_value_tracker;
mod liveness;
mod spilling;

use self::liverange::{LiveRange, Pos};
use crate::bitset::BitSet;
use crate::cg::{self, reg, Arg, Opcode};
use crate::dominator_tree::DominatorTree;
use crate::dset::DisjointSet;
use crate::entity::SecondaryMap;
use crate::CodegenResult;
use log::debug;

/// Allocate registers for every function of the unit. `max_regs` is the
/// register budget; zero or out-of-range values fall back to the full
/// `r0..r12` set.
pub fn run_tu(tu: &mut cg::TranslationUnit, max_regs: u32) -> CodegenResult<()> {
    let max_regs = if max_regs > 0 && max_regs <= reg::SP {
        max_regs
    } else {
        reg::SP
    };

    for f in &mut tu.funcs {
        let mut ctx = Context::new(f, max_regs)?;
        ctx.run(f);
    }
    Ok(())
}

/// Per-register allocator state.
#[derive(Clone, Default)]
pub(crate) struct RegInfo {
    /// Defining instruction (reload or original def).
    pub inst: Option<cg::Inst>,
    /// Live range of the register.
    pub liverange: LiveRange,
    /// Union of the ranges of the register's phi-web, kept on the class
    /// leader.
    pub equiv_liverange: LiveRange,
}

/// Allocator context: one function's worth of scratch.
pub struct Context {
    pub(crate) max_regs: u32,
    /// Blocks in reverse post-order; index 0 is the entry.
    pub(crate) rpo: Vec<cg::Block>,
    pub(crate) rpo_idx: SecondaryMap<cg::Block, u32>,
    /// Entry/exit positions per block.
    pub(crate) block_from: SecondaryMap<cg::Block, Pos>,
    pub(crate) block_to: SecondaryMap<cg::Block, Pos>,
    pub(crate) livein: SecondaryMap<cg::Block, Option<BitSet>>,
    /// Indexed by register number; hardware registers first, then vregs.
    pub(crate) rinfo: Vec<RegInfo>,
    /// Position of each instruction.
    pub(crate) pos: SecondaryMap<cg::Inst, Pos>,
    /// Original virtual register of each def (the `reg` field is rewritten
    /// during coloring).
    pub(crate) vreg: SecondaryMap<cg::Inst, u32>,
    /// Register a live value currently sits in, while constraints shuffle
    /// values around. `-1` when unknown.
    pub(crate) curr_reg: SecondaryMap<cg::Inst, i32>,
    /// Spill family of an instruction, `-1` for none.
    pub(crate) spill_id: SecondaryMap<cg::Inst, i32>,
    pub(crate) equiv_vreg: DisjointSet,
    pub(crate) equiv_spill_id: DisjointSet,
    pub(crate) spill_slot_offsets: Vec<i32>,
    pub(crate) n_spill_slots: u32,
}

impl Context {
    /// Prepare allocator scratch: RPO block order, loop info, and the
    /// dominator sanity of the block order.
    pub fn new(func: &mut cg::Function, max_regs: u32) -> CodegenResult<Self> {
        func.analyze_loops()?;

        let rpo = compute_rpo(func);
        assert_eq!(rpo.len(), func.num_blocks() as usize, "unreachable blocks");

        let mut rpo_idx = SecondaryMap::new();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_idx[b] = i as u32;
        }

        // The interval construction relies on every predecessor except
        // back-edge latches appearing before its block; reverse post-order
        // gives that, and in particular puts dominators first.
        let domtree = DominatorTree::compute(&func.cfg, &rpo);
        for &b in &rpo[1..] {
            debug_assert!(
                rpo_idx[domtree.idom(b)] < rpo_idx[b],
                "rpo does not respect domination"
            );
        }

        let mut ctx = Self {
            max_regs,
            rpo,
            rpo_idx,
            block_from: SecondaryMap::new(),
            block_to: SecondaryMap::new(),
            livein: SecondaryMap::new(),
            rinfo: Vec::new(),
            pos: SecondaryMap::new(),
            vreg: SecondaryMap::new(),
            curr_reg: SecondaryMap::with_default(-1),
            spill_id: SecondaryMap::with_default(-1),
            equiv_vreg: DisjointSet::with_universe(0),
            equiv_spill_id: DisjointSet::with_universe(0),
            spill_slot_offsets: Vec::new(),
            n_spill_slots: 0,
        };

        ctx.grow_rinfo(func);
        for i in func.insts.keys() {
            if let Some(r) = func.insts[i].reg {
                ctx.vreg[i] = r;
                ctx.rinfo[r as usize].inst = Some(i);
            }
        }

        Ok(ctx)
    }

    /// Run all stages on `func`.
    pub fn run(&mut self, func: &mut cg::Function) {
        debug!("regalloc: {} ({} regs)", func.name, self.max_regs);

        let phi_lift_movs = coalescing::phi_lifting(self, func);
        debug!("regalloc: {} phi-lift copies", phi_lift_movs.len());

        liveness::compute(self, func);

        coalescing::phi_analysis(self, func);
        coalescing::phi_mem_coalesce(self, func, &phi_lift_movs);

        spilling::select(self, func);
        debug!("regalloc: {} spill slots", self.n_spill_slots);

        coloring::assign(self, func);

        deconstruct::run(self, func);

        spilling::insert_spills(self, func);

        self.cleanup(func);
    }

    pub(crate) fn grow_rinfo(&mut self, func: &cg::Function) {
        if self.rinfo.len() < func.vreg_count as usize {
            self.rinfo.resize(func.vreg_count as usize, RegInfo::default());
        }
    }

    /// Create an instruction and register it with the allocator scratch.
    pub(crate) fn new_inst(&mut self, func: &mut cg::Function, b: cg::Block, op: Opcode) -> cg::Inst {
        let i = func.build_inst(b, op);
        let r = func.insts[i].reg.unwrap();
        self.grow_rinfo(func);
        self.vreg[i] = r;
        self.rinfo[r as usize].inst = Some(i);
        i
    }

    pub(crate) fn range(&self, r: u32) -> &LiveRange {
        &self.rinfo[r as usize].liverange
    }

    pub(crate) fn range_mut(&mut self, r: u32) -> &mut LiveRange {
        &mut self.rinfo[r as usize].liverange
    }

    /// Spill cost of a def: cheap when defined and used outside loops.
    pub(crate) fn spill_cost(&self, func: &mut cg::Function, inst: cg::Inst) -> u32 {
        let mut cost = 1 + 10 * func.loop_nest(func.inst_block(inst));
        for &e in func.ssa.succs(inst).to_vec().iter() {
            let u = func.ssa.head(e);
            cost += 1 + 10 * func.loop_nest(func.inst_block(u));
        }
        cost
    }

    /// Equivalence-class representative slot of an instruction's spill
    /// family, if it has one.
    pub(crate) fn eq_spill_id(&self, i: cg::Inst) -> i32 {
        match self.spill_id[i] {
            -1 => -1,
            id => self.equiv_spill_id.find(id as usize) as i32,
        }
    }

    /// Stack byte offset of a spill family's slot.
    pub(crate) fn slot_offset(&self, func: &cg::Function, eq_id: i32) -> i32 {
        debug_assert!(eq_id >= 0);
        func.frame_size as i32 + self.spill_slot_offsets[eq_id as usize] * 4
    }

    /// Insert a three-eor register swap of the values `x` and `y` before
    /// `before` (or at the block end).
    pub(crate) fn insert_swap(
        &mut self,
        func: &mut cg::Function,
        b: cg::Block,
        before: Option<cg::Inst>,
        x: cg::Inst,
        y: cg::Inst,
    ) {
        let rx = self.curr_reg[x];
        let ry = self.curr_reg[y];
        debug_assert!(rx >= 0 && ry >= 0);

        for k in 0..3 {
            let e = self.new_inst(func, b, Opcode::Eor);
            func.insts[e].args[0] = Arg::hreg(rx as u32);
            func.insts[e].args[1] = Arg::hreg(ry as u32);
            let out = if k == 1 { ry } else { rx };
            func.insts[e].reg = Some(out as u32);
            self.curr_reg[e] = out;
            match before {
                Some(r) => func.link_inst_before(r, e),
                None => func.link_inst_last(e),
            }
        }
    }

    /// Final pass: drop the phi lists, remove the pseudo instructions and
    /// identity moves, compute the callee-saved clobber mask, and grow the
    /// frame by the spill area.
    fn cleanup(&mut self, func: &mut cg::Function) {
        for b in func.block_layout() {
            func.blocks[b].first_phi = None.into();
            func.blocks[b].last_phi = None.into();
            func.blocks[b].n_phis = 0;

            let mut cursor = func.first_inst(b);
            while let Some(inst) = cursor {
                cursor = func.next_inst(inst);

                match func.op(inst) {
                    Opcode::Spill | Opcode::Reload | Opcode::Ret | Opcode::Undef => {
                        func.unlink_inst(inst);
                        continue;
                    }
                    Opcode::Mov => {
                        if func.def_reg(inst).is_some()
                            && func.def_reg(inst) == func.arg_reg(inst, 0)
                        {
                            func.unlink_inst(inst);
                            continue;
                        }
                    }
                    _ => {}
                }

                if let Some(r) = func.def_reg(inst) {
                    assert!(!reg::is_vreg(r), "unallocated def after coloring");
                    if r >= reg::R4 {
                        func.clobber_mask |= 1 << r;
                    }
                }
            }
        }

        func.frame_size += self.n_spill_slots * 4;
    }
}

#[cfg(test)]
mod tests {
    use super::live_value_tracker::LiveValueTracker;
    use super::liverange::Pos;
    use super::*;
    use crate::cg::{Function, Inst};

    /// `n` moves all consumed by a chain of adds, so the early values stay
    /// live until their add uses them.
    fn straightline(n: usize) -> Function {
        let mut f = Function::new("t");
        let b = f.add_block();
        f.link_block_last(b);

        let mut vals: Vec<Inst> = Vec::new();
        for i in 0..n {
            let m = f.build_inst(b, Opcode::Mov);
            f.insts[m].args[0] = Arg::imm(i as u32);
            f.link_inst_last(m);
            vals.push(m);
        }

        let mut acc = vals[0];
        for &v in &vals[1..] {
            let a = f.build_inst(b, Opcode::Add);
            f.set_vreg_arg(a, 0, acc);
            f.set_vreg_arg(a, 1, v);
            f.link_inst_last(a);
            acc = a;
        }

        let r = f.build_inst(b, Opcode::Ret);
        f.insts[r].reg = None;
        f.set_vreg_arg(r, 0, acc);
        f.link_inst_last(r);
        f
    }

    fn count_covering(ctx: &Context, func: &cg::Function, pos: Pos) -> u32 {
        (reg::FIRST_VREG..func.vreg_count)
            .filter(|&v| ctx.rinfo[v as usize].liverange.find_covering(pos).is_some())
            .count() as u32
    }

    #[test]
    fn tracker_counts_match_the_intervals() {
        let mut f = straightline(4);
        let mut ctx = Context::new(&mut f, 13).unwrap();
        let movs = coalescing::phi_lifting(&mut ctx, &mut f);
        assert!(movs.is_empty());
        liveness::compute(&mut ctx, &mut f);

        let b = f.first_block().unwrap();
        let mut tracker = LiveValueTracker::new(&f);
        tracker.start(&ctx, &f, b);
        while let Some((inst, n_live)) = tracker.step(&ctx, &f) {
            assert_eq!(n_live, count_covering(&ctx, &f, ctx.pos[inst]));
        }
    }

    #[test]
    fn spilling_meets_the_budget() {
        let budget = 3;
        let mut f = straightline(6);
        let mut ctx = Context::new(&mut f, budget).unwrap();
        let movs = coalescing::phi_lifting(&mut ctx, &mut f);
        liveness::compute(&mut ctx, &mut f);
        coalescing::phi_analysis(&mut ctx, &f);
        coalescing::phi_mem_coalesce(&mut ctx, &mut f, &movs);
        spilling::select(&mut ctx, &mut f);

        assert!(ctx.n_spill_slots > 0, "six values in three registers must spill");

        let b = f.first_block().unwrap();
        let mut tracker = LiveValueTracker::new(&f);
        tracker.start(&ctx, &f, b);
        while let Some((_, n_live)) = tracker.step(&ctx, &f) {
            assert!(n_live <= budget, "pressure {} above budget", n_live);
        }
    }

    #[test]
    fn coloring_never_shares_a_register_between_overlapping_values() {
        let mut f = straightline(6);
        let mut ctx = Context::new(&mut f, 13).unwrap();
        let movs = coalescing::phi_lifting(&mut ctx, &mut f);
        liveness::compute(&mut ctx, &mut f);
        coalescing::phi_analysis(&mut ctx, &f);
        coalescing::phi_mem_coalesce(&mut ctx, &mut f, &movs);
        spilling::select(&mut ctx, &mut f);
        coloring::assign(&mut ctx, &mut f);

        let colored: Vec<(u32, u32)> = f
            .insts
            .keys()
            .filter_map(|i| {
                let home = f.insts[i].reg?;
                let v = ctx.vreg[i];
                if reg::is_vreg(v) && !reg::is_vreg(home) {
                    Some((v, home))
                } else {
                    None
                }
            })
            .collect();
        assert!(!colored.is_empty());

        for (i, &(v1, r1)) in colored.iter().enumerate() {
            for &(v2, r2) in &colored[i + 1..] {
                if ctx.rinfo[v1 as usize]
                    .liverange
                    .intersects(&ctx.rinfo[v2 as usize].liverange)
                {
                    assert_ne!(r1, r2, "%v{} and %v{} share {}", v1, v2, reg::name(r1));
                }
            }
        }
    }

    #[test]
    fn full_run_leaves_only_machine_code() {
        let mut f = straightline(6);
        let mut ctx = Context::new(&mut f, 3).unwrap();
        ctx.run(&mut f);

        assert!(f.frame_size >= 4, "spill slots must grow the frame");
        for b in f.block_layout() {
            assert_eq!(f.num_phis(b), 0);
            for i in f.body(b) {
                assert!(!matches!(
                    f.op(i),
                    Opcode::Spill | Opcode::Reload | Opcode::Ret | Opcode::Undef | Opcode::Phi
                ));
                if let Some(r) = f.def_reg(i) {
                    assert!(!reg::is_vreg(r));
                }
            }
        }
    }
}

fn compute_rpo(func: &mut cg::Function) -> Vec<cg::Block> {
    fn walk(
        func: &mut cg::Function,
        b: cg::Block,
        marker: crate::graph::Marker,
        out: &mut Vec<cg::Block>,
    ) {
        if func.cfg.mark(b, marker) {
            return;
        }
        for &e in func.cfg.succs(b).to_vec().iter() {
            let succ = func.cfg.head(e);
            walk(func, succ, marker, out);
        }
        out.push(b);
    }

    let entry = func.first_block().expect("function has no blocks");
    let marker = func.cfg.alloc_marker();
    let mut out = Vec::with_capacity(func.num_blocks() as usize);
    walk(func, entry, marker, &mut out);
    func.cfg.free_marker(marker);
    out.reverse();
    out
}
