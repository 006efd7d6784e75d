//! Color assignment.
//!
//! Defs are colored in RPO, phis first in each block. The candidate order
//! is preference-scored: registers the def will be forced into anyway
//! (calling-convention argument slots, the return register, pre-colored
//! moves, already-colored phi neighbours) come first, and the first
//! candidate whose reserved range does not intersect the def's range wins.
//! Choosing a register unions the def's range into that physical
//! register's range, reserving it.
//!
//! Calls and returns impose exact register assignments; they are
//! materialised by computing the desired register file before/after the
//! instruction and transforming the current one into it with moves first,
//! then three-eor swaps for whatever permutation remains.

use super::live_value_tracker::LiveValueTracker;
use super::Context;
use crate::cg::{self, reg, Arg, ArgKind, Opcode, N_ARGS};
use crate::entity::EntityRef;

const N_HREGS: usize = reg::FIRST_VREG as usize;

pub(super) fn assign(ctx: &mut Context, func: &mut cg::Function) {
    let mut tracker = LiveValueTracker::new(func);

    // Incoming parameters live in the argument registers.
    for i in 0..cg::MAX_PARAMS {
        let arg = match func.params[i] {
            Some(a) => a,
            None => break,
        };
        debug_assert_eq!(func.op(arg), Opcode::Arg);
        let v = ctx.vreg[arg] as usize;
        let range = ctx.rinfo[v].liverange.clone();
        ctx.rinfo[i].liverange.union(&range);
        func.insts[arg].reg = Some(i as u32);
        ctx.curr_reg[arg] = i as i32;
    }

    for bix in 0..ctx.rpo.len() {
        let b = ctx.rpo[bix];
        tracker.start(ctx, func, b);

        for phi in func.phis(b) {
            debug_assert!(reg::is_vreg(func.insts[phi].reg.unwrap()));
            assign_color(ctx, func, phi);
        }

        let mut cursor = func.first_inst(b);
        while let Some(inst) = cursor {
            let inst_next = func.next_inst(inst);

            debug_assert!(func.insts[inst].reg.map_or(true, reg::is_vreg));
            let (stepped, n_live) = tracker.step(ctx, func).expect("tracker out of sync");
            debug_assert_eq!(stepped, inst);
            assert!(
                n_live <= ctx.max_regs,
                "spilling has not lowered register usage to the budget"
            );

            let mut pre_regs: [Option<cg::Inst>; N_HREGS] = [None; N_HREGS];
            let mut call_regs: [Option<cg::Inst>; N_HREGS] = [None; N_HREGS];
            let mut post_regs: [Option<cg::Inst>; N_HREGS] = [None; N_HREGS];

            // Permute the register file into the shape constrained
            // instructions demand of their inputs.
            if func.op(inst) == Opcode::Call {
                gather_pre_call_post(
                    ctx,
                    func,
                    &tracker,
                    n_live,
                    inst,
                    &mut pre_regs,
                    &mut call_regs,
                    &mut post_regs,
                );
                move_swap(ctx, func, b, Some(inst), &mut pre_regs, &call_regs);
            } else if func.op(inst) == Opcode::Ret {
                let arg = func.arg_def(inst, 0).expect("ret without value operand");
                let cur = ctx.curr_reg[arg];
                assert!(cur >= 0 && (cur as u32) < reg::FIRST_VREG);
                pre_regs[cur as usize] = Some(arg);
                call_regs[0] = Some(arg);
                move_swap(ctx, func, b, Some(inst), &mut pre_regs, &call_regs);
                // The value's home register is unchanged by the return.
                ctx.curr_reg[arg] = func.insts[arg].reg.unwrap() as i32;
            }

            // Harden SSA operands into their defs' registers.
            for j in 0..N_ARGS {
                if let ArgKind::Vreg(e) = func.insts[inst].args[j].kind {
                    let a = func.ssa.tail(e);
                    let r = func.insts[a].reg.expect("operand def without register");
                    assert!(!reg::is_vreg(r), "operand used before being colored");
                    func.insts[inst].args[j].kind = ArgKind::Hreg(r);
                }
            }

            if func.insts[inst].reg.is_some() {
                assign_color(ctx, func, inst);
            }

            // After a call, the scratch registers are dead and the result
            // appears in r0; restore the survivors.
            if func.op(inst) == Opcode::Call {
                for r in call_regs.iter_mut().take(reg::NUM_ARG_REGS as usize) {
                    *r = None;
                }
                if func.insts[inst].reg.is_some() {
                    ctx.curr_reg[inst] = 0;
                    call_regs[0] = Some(inst);
                    let home = func.insts[inst].reg.unwrap() as usize;
                    debug_assert!(post_regs[home].is_none());
                    post_regs[home] = Some(inst);
                }
                move_swap(ctx, func, b, inst_next, &mut call_regs, &post_regs);
            }

            cursor = inst_next;
        }
    }
}

fn assign_color(ctx: &mut Context, func: &mut cg::Function, inst: cg::Inst) {
    let pref = compute_preference(ctx, func, inst);
    let v = ctx.vreg[inst] as usize;

    for &r in pref.iter().take(ctx.max_regs as usize) {
        let r = r as usize;
        if !ctx.rinfo[r].liverange.intersects(&ctx.rinfo[v].liverange) {
            // Reserve the physical register for the lifetime of the def.
            let range = ctx.rinfo[v].liverange.clone();
            ctx.rinfo[r].liverange.union(&range);
            func.insts[inst].reg = Some(r as u32);
            ctx.curr_reg[inst] = r as i32;
            return;
        }
    }
    panic!("no color available for %v{} in {}", v, func.name);
}

fn compute_preference(ctx: &Context, func: &cg::Function, inst: cg::Inst) -> [u32; N_HREGS] {
    let mut score = [0i32; N_HREGS];
    let data = &func.insts[inst];

    if data.op == Opcode::Mov {
        if let ArgKind::Hreg(h) = data.args[0].kind {
            // Pre-colored def.
            score[h as usize] += 1;
        }
    } else if data.op == Opcode::Call && data.reg.is_some() {
        // Calling convention returns in r0.
        score[reg::R0 as usize] += 1;
    } else if data.op == Opcode::Phi {
        for (arg, _) in func.phi_args(inst) {
            if let Some(r) = func.insts[arg].reg {
                if !reg::is_vreg(r) {
                    score[r as usize] += 1;
                }
            }
        }
    }

    for &e in func.ssa.succs(inst) {
        let u = func.ssa.head(e);
        match func.op(u) {
            Opcode::Call => {
                // Argument position i wants register i-1.
                for i in 1..N_ARGS {
                    if func.insts[u].args[i].kind == ArgKind::Vreg(e) {
                        score[i - 1] += 1;
                    }
                }
            }
            Opcode::Mov | Opcode::Phi => {
                if let Some(r) = func.insts[u].reg {
                    if !reg::is_vreg(r) {
                        score[r as usize] += 1;
                    }
                }
            }
            _ => {}
        }
    }

    let mut order: [u32; N_HREGS] = core::array::from_fn(|i| i as u32);
    order.sort_by(|&a, &b| score[b as usize].cmp(&score[a as usize]));
    order
}

#[allow(clippy::too_many_arguments)]
fn gather_pre_call_post(
    ctx: &Context,
    func: &cg::Function,
    tracker: &LiveValueTracker,
    n_live: u32,
    inst: cg::Inst,
    pre_regs: &mut [Option<cg::Inst>; N_HREGS],
    call_regs: &mut [Option<cg::Inst>; N_HREGS],
    post_regs: &mut [Option<cg::Inst>; N_HREGS],
) {
    debug_assert_eq!(func.op(inst), Opcode::Call);

    let live = tracker.live_vregs(func);
    debug_assert_eq!(live.len() as u32, n_live);

    let mut preserved: Vec<cg::Inst> = Vec::new();
    for &v in &live {
        let value = ctx.rinfo[v as usize].inst.expect("live value without def");
        // The call's own output is not a pre-state value.
        if value == inst {
            continue;
        }
        let cur = ctx.curr_reg[value];
        assert!(cur >= 0, "live value {} has no current register", value.index());
        pre_regs[cur as usize] = Some(value);
        post_regs[cur as usize] = Some(value);

        if (cur as u32) < reg::NUM_ARG_REGS {
            preserved.push(value);
        } else {
            // Already sitting in a call-preserved register.
            call_regs[cur as usize] = Some(value);
        }
    }

    for i in 1..N_ARGS {
        if let ArgKind::Vreg(e) = func.insts[inst].args[i].kind {
            let arg = func.ssa.tail(e);
            let cur = ctx.curr_reg[arg];
            assert!(cur >= 0 && (cur as u32) < reg::FIRST_VREG);
            pre_regs[cur as usize] = Some(arg);
            call_regs[i - 1] = Some(arg);
        }
    }

    // Values caught in the argument registers move to free preserved ones.
    let mut slot = reg::NUM_ARG_REGS as usize;
    while let Some(value) = preserved.pop() {
        loop {
            assert!(slot < ctx.max_regs as usize, "no free register across call");
            if call_regs[slot].is_none() {
                call_regs[slot] = Some(value);
                slot += 1;
                break;
            }
            slot += 1;
        }
    }
}

/// Insert moves, then swaps, transforming the `current` register file into
/// `target`. Every instruction lands before `before` (or at the block end).
fn move_swap(
    ctx: &mut Context,
    func: &mut cg::Function,
    b: cg::Block,
    before: Option<cg::Inst>,
    current: &mut [Option<cg::Inst>; N_HREGS],
    target: &[Option<cg::Inst>; N_HREGS],
) {
    for (i, &c) in current.iter().enumerate() {
        if let Some(value) = c {
            debug_assert_eq!(ctx.curr_reg[value], i as i32);
        }
    }

    // Moves into free registers first; each move can free another source.
    let mut keep_going = true;
    while keep_going {
        keep_going = false;
        for i in 0..N_HREGS {
            if current[i] != target[i] && current[i].is_none() {
                let wanted = target[i].expect("target hole differs from current");
                let src_reg = ctx.curr_reg[wanted] as usize;
                let dst_reg = i;

                let mov = ctx.new_inst(func, b, Opcode::Mov);
                func.insts[mov].args[0] = Arg::hreg(src_reg as u32);
                func.insts[mov].reg = Some(dst_reg as u32);
                ctx.curr_reg[mov] = dst_reg as i32;
                match before {
                    Some(r) => func.link_inst_before(r, mov),
                    None => func.link_inst_last(mov),
                }

                current[dst_reg] = current[src_reg];
                ctx.curr_reg[current[dst_reg].unwrap()] = dst_reg as i32;
                if current[src_reg] != target[src_reg] {
                    current[src_reg] = None;
                }
                keep_going = true;
            }
        }
    }

    // What remains is a permutation; break it with swaps.
    let mut keep_going = true;
    while keep_going {
        keep_going = false;
        for i in 0..N_HREGS {
            if current[i] != target[i] {
                debug_assert_eq!(ctx.curr_reg[current[i].unwrap()], i as i32);
                let wanted = target[i].unwrap();
                let src_reg = ctx.curr_reg[wanted] as usize;
                let dst_reg = i;

                ctx.insert_swap(
                    func,
                    b,
                    before,
                    current[dst_reg].unwrap(),
                    current[src_reg].unwrap(),
                );

                current.swap(dst_reg, src_reg);
                let a = current[dst_reg].unwrap();
                let c = current[src_reg].unwrap();
                let tmp = ctx.curr_reg[a];
                ctx.curr_reg[a] = ctx.curr_reg[c];
                ctx.curr_reg[c] = tmp;
                keep_going = true;
            }
        }
    }

    for i in 0..N_HREGS {
        assert_eq!(current[i], target[i], "register shuffle did not converge");
        if let Some(value) = current[i] {
            ctx.curr_reg[value] = i as i32;
        }
    }
}
