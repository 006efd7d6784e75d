//! Lifetime interval construction.
//!
//! Blocks are processed in reverse RPO with a backwards walk inside each
//! block: values live out of the block get a whole-block interval, uses
//! extend their value back to the block entry, defs tighten the interval to
//! start at the def. Phi uses are live only in the contributing
//! predecessor's live-out. When a block turns out to be a loop header
//! (detected by a predecessor appearing later in RPO), the header's live-in
//! set is smeared over every block of the natural loop, because those
//! values stay occupied for the entire loop.

use super::liverange::{Pos, IPOS_SPACING};
use super::Context;
use crate::bitset::BitSet;
use crate::cg::{self, N_ARGS};

pub(super) fn compute(ctx: &mut Context, func: &mut cg::Function) {
    let n_blocks = ctx.rpo.len();
    let mut live = BitSet::with_capacity(func.vreg_count as usize);

    for bidx in (0..n_blocks).rev() {
        let b = ctx.rpo[bidx];
        let bpos = bidx as i32;

        live.clear();

        // Live-out: union of the successors' live-in plus this block's
        // contributions to their phis.
        for &e in func.cfg.succs(b).to_vec().iter() {
            let succ = func.cfg.head(e);
            if let Some(li) = &ctx.livein[succ] {
                live.union(li);
            }
            for phi in func.phis(succ) {
                let input = func.phi_input_of(phi, b);
                live.add(func.insts[input].reg.expect("phi input without register") as usize);
            }
        }

        for v in 0..func.vreg_count as usize {
            if live.contains(v) {
                ctx.rinfo[v]
                    .liverange
                    .add(Pos::block_start(bpos), Pos::block_end(bpos));
            }
        }

        ctx.block_to[b] = Pos::block_end(bpos);

        let body = func.body(b);
        let mut ipos = body.len() as i32 * IPOS_SPACING;
        for &inst in body.iter().rev() {
            debug_assert!(func.op(inst) != cg::Opcode::Phi);
            ipos -= IPOS_SPACING;
            let pos = Pos::new(bpos, ipos);
            ctx.pos[inst] = pos;

            if let Some(r) = func.insts[inst].reg {
                debug_assert_eq!(
                    ctx.rinfo[r as usize].liverange.first().map(|(f, _)| f),
                    Some(Pos::block_start(bpos)),
                    "dead def of %v{}",
                    r
                );
                ctx.rinfo[r as usize].liverange.set_front_from(pos);
                live.remove(r as usize);
                ctx.rinfo[r as usize].inst = Some(inst);
            }

            for l in 0..N_ARGS {
                if let Some(r) = func.arg_reg(inst, l) {
                    if !live.contains(r as usize) {
                        ctx.rinfo[r as usize]
                            .liverange
                            .add(Pos::block_start(bpos), pos);
                        live.add(r as usize);
                    }
                }
            }
        }

        ctx.block_from[b] = Pos::block_start(bpos);

        for phi in func.phis(b).iter().rev() {
            let r = func.insts[*phi].reg.expect("phi without register") as usize;
            live.remove(r);
            ctx.rinfo[r].inst = Some(*phi);
        }

        // A predecessor later in RPO makes this block a loop header; keep
        // the header's live-in occupied through the whole natural loop.
        for &e in func.cfg.preds(b).to_vec().iter() {
            let pred = func.cfg.tail(e);
            if ctx.rpo_idx[pred] > ctx.rpo_idx[b] {
                propagate_live_in_loop_body(ctx, func, b, pred, &live);
            }
        }

        let mut livein = BitSet::with_capacity(func.vreg_count as usize);
        livein.copy_from(&live);
        ctx.livein[b] = Some(livein);
    }

    for &arg in func.params.iter().flatten() {
        let r = func.insts[arg].reg.expect("parameter without register");
        ctx.rinfo[r as usize].inst = Some(arg);
    }
}

/// Walk the natural loop of `header` backwards from the back edge's `tail`,
/// adding a whole-block interval for every value in `live` and extending
/// the body blocks' live-in sets.
fn propagate_live_in_loop_body(
    ctx: &mut Context,
    func: &mut cg::Function,
    header: cg::Block,
    tail: cg::Block,
    live: &BitSet,
) {
    let marker = func.cfg.alloc_marker();
    let mut stack = vec![tail];

    while let Some(b) = stack.pop() {
        if func.cfg.mark(b, marker) {
            continue;
        }

        for v in 0..func.vreg_count as usize {
            if live.contains(v) {
                let (from, to) = (ctx.block_from[b], ctx.block_to[b]);
                ctx.rinfo[v].liverange.add(from, to);
                if b != header {
                    ctx.livein[b]
                        .as_mut()
                        .expect("loop body processed before header")
                        .add(v);
                }
            }
        }

        if b != header {
            for &e in func.cfg.preds(b).to_vec().iter() {
                let pred = func.cfg.tail(e);
                if !func.cfg.is_marked(pred, marker) {
                    stack.push(pred);
                }
            }
        }
    }

    func.cfg.free_marker(marker);
}
