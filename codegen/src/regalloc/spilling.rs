//! Spill selection, spill-slot assignment, and spill materialisation.
//!
//! The selector walks the blocks in RPO with the live tracker. Wherever
//! the live count plus an instruction's clobber demand (a call needs its
//! four argument registers) exceeds the budget, the cheapest live value is
//! evicted: its range shrinks to just the def, a `spill` pseudo lands after
//! the def, and every use gets a fresh one-position `reload` pseudo.
//! Phi defs drop their range entirely (the deconstruction copies will go
//! through memory); parameter defs keep only the entry position.
//!
//! Spill families that meet in a phi must share their stack slot, so the
//! families are unioned through the phis before slots are numbered. The
//! pseudos become real `str`/`ldr` against the frame after coloring.

use super::live_value_tracker::LiveValueTracker;
use super::liverange::Pos;
use super::Context;
use crate::cg::{self, reg, Arg, ArgKind, Opcode, N_ARGS};
use crate::dset::DisjointSet;
use log::trace;

pub(super) fn select(ctx: &mut Context, func: &mut cg::Function) {
    let mut tracker = LiveValueTracker::new(func);
    let mut curr_spill_id: i32 = 0;

    for bix in 0..ctx.rpo.len() {
        let b = ctx.rpo[bix];
        tracker.start(ctx, func, b);

        let mut cursor = func.first_inst(b);
        while let Some(inst) = cursor {
            let n_clobber = if func.op(inst) == Opcode::Call {
                reg::NUM_ARG_REGS
            } else {
                0
            };
            tracker.skip_vreg = if func.op(inst) == Opcode::Call {
                func.insts[inst].reg
            } else {
                None
            };

            let (stepped, mut n_live) = tracker.step(ctx, func).expect("tracker out of sync");
            debug_assert_eq!(stepped, inst);

            while n_live + n_clobber > ctx.max_regs {
                let live = tracker.live_vregs(func);
                let spillv = select_virtual_to_spill(ctx, func, &live, ctx.pos[inst]);
                n_live -= 1;
                spill_one(ctx, func, &mut tracker, spillv, curr_spill_id);
                curr_spill_id += 1;
            }

            cursor = func.next_inst(inst);
        }
    }

    union_phi_families(ctx, func, curr_spill_id);
    assign_slots(ctx, curr_spill_id);
}

fn select_virtual_to_spill(
    ctx: &Context,
    func: &mut cg::Function,
    live: &[u32],
    pos: Pos,
) -> u32 {
    let mut min_cost = u32::MAX;
    let mut min_virtual = None;

    for &v in live {
        // Only values whose range started strictly before this point can
        // move out of the way here.
        if reg::is_vreg(v) && ctx.rinfo[v as usize].liverange.starts_before(pos) {
            let def = ctx.rinfo[v as usize].inst.expect("live value without def");
            let cost = ctx.spill_cost(func, def);
            if cost < min_cost {
                min_cost = cost;
                min_virtual = Some(v);
            }
        }
    }

    min_virtual.expect("no spillable value at over-pressure point")
}

fn spill_one(
    ctx: &mut Context,
    func: &mut cg::Function,
    tracker: &mut LiveValueTracker,
    spillv: u32,
    spill_id: i32,
) {
    let spilli = ctx.rinfo[spillv as usize].inst.expect("live value without def");
    debug_assert!(func.op(spilli) != Opcode::Reload);
    trace!("spilling %v{} (family {})", spillv, spill_id);

    if func.op(spilli) == Opcode::Phi {
        // Deconstruction will route this phi through its stack slot.
        ctx.rinfo[spillv as usize].liverange.clear();
        ctx.spill_id[spilli] = spill_id;
    } else {
        let spill;
        if func.op(spilli) == Opcode::Arg {
            // Parameters materialise at function entry; park the value
            // right there.
            let entry = ctx.rpo[0];
            spill = ctx.new_inst(func, entry, Opcode::Spill);
            ctx.pos[spill] = Pos::new(0, 0);
            ctx.rinfo[spillv as usize].liverange.shrink_to_front(Pos::new(0, 0));
            func.link_inst_first(spill);
        } else {
            let def_pos = ctx.pos[spilli];
            let after = Pos::new(def_pos.b, def_pos.i + 1);
            spill = ctx.new_inst(func, func.inst_block(spilli), Opcode::Spill);
            ctx.pos[spill] = after;
            ctx.rinfo[spillv as usize].liverange.shrink_to_front(after);
            func.link_inst_after(spilli, spill);
        }

        func.insts[spill].reg = None;
        func.set_vreg_arg(spill, 0, spilli);
        ctx.spill_id[spill] = spill_id;
        ctx.spill_id[spilli] = spill_id;
    }

    tracker.remove(spillv);

    // Fresh short-lived reloads immediately before every use. A use
    // instruction gets one reload even when it consumes the value twice;
    // phi uses are handled by deconstruction and spills feed from the
    // register directly.
    let reload_marker = func.ssa.alloc_marker();
    let mut delayed_args: Vec<(cg::Inst, usize, cg::Inst)> = Vec::new();

    for &e in func.ssa.succs(spilli).to_vec().iter() {
        let use_i = func.ssa.head(e);
        if matches!(func.op(use_i), Opcode::Phi | Opcode::Spill) {
            continue;
        }
        if func.ssa.mark(use_i, reload_marker) {
            continue;
        }

        let reload = ctx.new_inst(func, func.inst_block(use_i), Opcode::Reload);
        func.link_inst_before(use_i, reload);
        ctx.spill_id[reload] = spill_id;

        let use_pos = ctx.pos[use_i];
        let from = Pos::new(use_pos.b, use_pos.i - 1);
        let r = func.insts[reload].reg.unwrap() as usize;
        ctx.rinfo[r].liverange.add(from, use_pos);
        ctx.pos[reload] = from;
        tracker.add_local(ctx, func, reload);

        for idx in 0..N_ARGS {
            if let ArgKind::Vreg(ae) = func.insts[use_i].args[idx].kind {
                if func.ssa.tail(ae) == spilli {
                    // The use list is being iterated; rewire afterwards.
                    delayed_args.push((use_i, idx, reload));
                }
            }
        }
    }
    func.ssa.free_marker(reload_marker);

    for (use_i, idx, reload) in delayed_args {
        func.set_vreg_arg(use_i, idx, reload);
    }
}

/// Phis whose inputs spill must share the slot with them.
fn union_phi_families(ctx: &mut Context, func: &cg::Function, n_ids: i32) {
    let mut equiv = DisjointSet::with_universe(n_ids as usize);
    for i in 0..n_ids as usize {
        equiv.make_set(i);
    }

    for b in func.block_layout() {
        for phi in func.phis(b) {
            if ctx.spill_id[phi] == -1 {
                continue;
            }
            let phi_eq = equiv.find(ctx.spill_id[phi] as usize);
            for (arg, _) in func.phi_args(phi) {
                if ctx.spill_id[arg] != -1 {
                    let arg_eq = equiv.find(ctx.spill_id[arg] as usize);
                    equiv.union(phi_eq, arg_eq);
                }
            }
        }
    }

    ctx.equiv_spill_id = equiv;
}

fn assign_slots(ctx: &mut Context, n_ids: i32) {
    ctx.spill_slot_offsets = vec![-1; n_ids as usize];
    ctx.n_spill_slots = 0;
    for i in 0..n_ids as usize {
        let eq = ctx.equiv_spill_id.find(i);
        if ctx.spill_slot_offsets[eq] == -1 {
            ctx.spill_slot_offsets[eq] = ctx.n_spill_slots as i32;
            ctx.n_spill_slots += 1;
        }
    }
}

/// Replace the pseudos with real frame accesses: a `str` after each spill,
/// an `ldr` after each reload.
pub(super) fn insert_spills(ctx: &mut Context, func: &mut cg::Function) {
    for b in func.block_layout() {
        let mut cursor = func.first_inst(b);
        while let Some(inst) = cursor {
            debug_assert!(func.op(inst) != Opcode::Phi);
            cursor = func.next_inst(inst);

            if ctx.spill_id[inst] == -1 {
                continue;
            }
            let eq = ctx.eq_spill_id(inst);
            let offset = ctx.slot_offset(func, eq);

            match func.op(inst) {
                Opcode::Reload => {
                    let load = ctx.new_inst(func, b, Opcode::Ldr);
                    func.insts[load].reg = func.insts[inst].reg;
                    func.insts[load].args[0] = Arg::hreg(reg::SP);
                    func.insts[load].args[0].offset = offset;
                    func.link_inst_after(inst, load);
                }
                Opcode::Spill => {
                    let src = match func.insts[inst].args[0].kind {
                        ArgKind::Hreg(r) => r,
                        _ => panic!("spill operand not hardened to a register"),
                    };
                    let store = ctx.new_inst(func, b, Opcode::Str);
                    func.insts[store].reg = None;
                    func.insts[store].args[0] = Arg::hreg(src);
                    func.insts[store].args[1] = Arg::hreg(reg::SP);
                    func.insts[store].args[1].offset = offset;
                    func.link_inst_after(inst, store);
                }
                _ => {}
            }
        }
    }
}
