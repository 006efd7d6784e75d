//! SSA deconstruction.
//!
//! For every CFG edge into a block with phis, the `(source, destination)`
//! pairs form a parallel copy. As many pairs as possible resolve as *safe
//! copies* placed at the end of the predecessor: stores for spilled
//! destinations, loads for spilled sources whose target register is not
//! still needed, plain moves when the destination register is free, and
//! nothing at all when source and destination already agree (same register
//! or same stack slot). Whatever remains is a register permutation and is
//! broken with three-eor swaps.

use super::Context;
use crate::cg::{self, reg, Arg, Opcode};

pub(super) fn run(ctx: &mut Context, func: &mut cg::Function) {
    for b in func.block_layout() {
        if func.num_phis(b) == 0 {
            continue;
        }

        for &e in func.cfg.preds(b).to_vec().iter() {
            let pred = func.cfg.tail(e);

            let mut dst: Vec<Option<cg::Inst>> = Vec::new();
            let mut src: Vec<Option<cg::Inst>> = Vec::new();
            for phi in func.phis(b) {
                dst.push(Some(phi));
                src.push(Some(func.phi_input_of(phi, pred)));
            }

            insert_safe_copies(ctx, func, pred, &mut src, &mut dst);
            insert_swaps(ctx, func, pred, &src, &dst);
        }
    }
}

/// Is `value`'s register still wanted as the source of an unresolved copy
/// from a register (spilled sources come from memory instead)?
fn register_still_needed(
    ctx: &Context,
    func: &cg::Function,
    src: &[Option<cg::Inst>],
    value: cg::Inst,
) -> bool {
    src.iter().flatten().any(|&q| {
        ctx.spill_id[q] == -1 && func.insts[q].reg == func.insts[value].reg
    })
}

fn insert_safe_copies(
    ctx: &mut Context,
    func: &mut cg::Function,
    pred: cg::Block,
    src: &mut [Option<cg::Inst>],
    dst: &mut [Option<cg::Inst>],
) {
    let mut keep_going = true;
    while keep_going {
        keep_going = false;

        for i in 0..dst.len() {
            let d = match dst[i] {
                Some(d) => d,
                None => {
                    debug_assert!(src[i].is_none());
                    continue;
                }
            };
            let s = src[i].expect("copy pair lost its source");

            let d_slot = ctx.eq_spill_id(d);
            let s_slot = ctx.eq_spill_id(s);

            if d_slot != -1 && s_slot == -1 {
                // Register value into a spilled phi: store.
                let store = ctx.new_inst(func, pred, Opcode::Str);
                func.insts[store].reg = None;
                func.insts[store].args[0] =
                    Arg::hreg(func.insts[s].reg.expect("uncolored copy source"));
                func.insts[store].args[1] = Arg::hreg(reg::SP);
                func.insts[store].args[1].offset = ctx.slot_offset(func, d_slot);
                func.link_inst_last(store);
            } else if d_slot == -1 && s_slot != -1 {
                // Spilled value into a register, once that register is no
                // longer the source of another pending copy.
                if register_still_needed(ctx, func, src, d) {
                    continue;
                }
                let load = ctx.new_inst(func, pred, Opcode::Ldr);
                func.insts[load].reg = func.insts[d].reg;
                func.insts[load].args[0] = Arg::hreg(reg::SP);
                func.insts[load].args[0].offset = ctx.slot_offset(func, s_slot);
                func.link_inst_last(load);
            } else if d_slot != -1 && s_slot != -1 {
                // Memory to memory: families sharing a phi share the slot.
                assert_eq!(d_slot, s_slot, "phi family split across slots");
            } else if func.insts[d].reg == func.insts[s].reg {
                // Already in place.
            } else {
                if register_still_needed(ctx, func, src, d) {
                    continue;
                }
                let mov = ctx.new_inst(func, pred, Opcode::Mov);
                func.insts[mov].args[0] =
                    Arg::hreg(func.insts[s].reg.expect("uncolored copy source"));
                func.insts[mov].reg = func.insts[d].reg;
                func.link_inst_last(mov);
            }

            src[i] = None;
            dst[i] = None;
            keep_going = true;
        }
    }
}

fn insert_swaps(
    ctx: &mut Context,
    func: &mut cg::Function,
    pred: cg::Block,
    src: &[Option<cg::Inst>],
    dst: &[Option<cg::Inst>],
) {
    let mut psrc: Vec<cg::Inst> = Vec::new();
    let mut pdst: Vec<cg::Inst> = Vec::new();

    for i in 0..dst.len() {
        let d = match dst[i] {
            Some(d) => d,
            None => {
                debug_assert!(src[i].is_none());
                continue;
            }
        };
        let s = src[i].expect("copy pair lost its source");

        let dr = func.insts[d].reg.expect("uncolored swap destination");
        let sr = func.insts[s].reg.expect("uncolored swap source");
        debug_assert!(!reg::is_vreg(dr) && !reg::is_vreg(sr));

        psrc.push(s);
        pdst.push(d);
    }

    let n = psrc.len();
    if n <= 1 {
        return;
    }

    for i in 0..n - 1 {
        if func.insts[pdst[i]].reg != func.insts[psrc[i]].reg {
            for j in i + 1..n {
                if func.insts[psrc[j]].reg == func.insts[pdst[i]].reg {
                    psrc.swap(i, j);
                    let (x, y) = (psrc[i], psrc[j]);
                    ctx.insert_swap(func, pred, None, x, y);
                }
            }
        }
    }
    assert_eq!(
        func.insts[pdst[n - 1]].reg,
        func.insts[psrc[n - 1]].reg,
        "phi permutation did not resolve"
    );
}
