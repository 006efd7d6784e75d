//! Phi lifting, phi-web analysis, and phi-mem coalescing.
//!
//! Lifting inserts a copy for every phi argument at the end of the
//! contributing predecessor and a copy of the phi result at the head of the
//! phi's block. That breaks every interference a phi operand had before,
//! at the price of a lot of copies; the coalescing pass afterwards removes
//! each copy whose source and destination webs do not interfere, so only
//! the copies that are actually needed survive to deconstruction.

use super::Context;
use crate::cg::{self, Opcode};
use crate::dset::DisjointSet;
use smallvec::SmallVec;

/// Insert the lifting copies. Returns every inserted mov, in creation
/// order, for the coalescing pass.
pub(super) fn phi_lifting(ctx: &mut Context, func: &mut cg::Function) -> Vec<cg::Inst> {
    let mut movs = Vec::new();

    for b in func.block_layout() {
        for phi in func.phis(b) {
            let args = func.phi_args(phi);
            let mut lifted: SmallVec<[(cg::Inst, cg::Block); 4]> = SmallVec::new();

            // Copies for the arguments, at the end of each predecessor.
            for &(arg, arg_bb) in &args {
                let mov = ctx.new_inst(func, arg_bb, Opcode::Mov);
                func.set_vreg_arg(mov, 0, arg);
                func.link_inst_last(mov);
                lifted.push((mov, arg_bb));
                movs.push(mov);
            }
            func.ssa.remove_preds(phi);
            for &(mov, arg_bb) in &lifted {
                func.add_phi_arg(phi, arg_bb, mov);
            }

            // Copy for the result, at the head of the phi's block.
            let mov = ctx.new_inst(func, b, Opcode::Mov);
            func.replace_uses(phi, mov);
            func.set_vreg_arg(mov, 0, phi);
            func.link_inst_first(mov);
            movs.push(mov);
        }
    }

    movs
}

/// Union every phi with its arguments and accumulate each class's live
/// range on the class leader.
pub(super) fn phi_analysis(ctx: &mut Context, func: &cg::Function) {
    let n = func.vreg_count as usize;
    let mut equiv = DisjointSet::with_universe(n);
    for v in 0..n {
        equiv.make_set(v);
    }

    for b in func.block_layout() {
        for phi in func.phis(b) {
            let phi_reg = func.insts[phi].reg.expect("phi without register") as usize;
            for (arg, _) in func.phi_args(phi) {
                let arg_reg = func.insts[arg].reg.expect("phi arg without register") as usize;
                equiv.union(phi_reg, arg_reg);
            }
        }
    }

    for v in 0..n {
        let eq = equiv.find(v);
        let range = ctx.rinfo[v].liverange.clone();
        ctx.rinfo[eq].equiv_liverange.union(&range);
    }

    ctx.equiv_vreg = equiv;
}

/// Remove every lifted copy whose source and destination phi-webs do not
/// intersect, fusing the webs.
pub(super) fn phi_mem_coalesce(ctx: &mut Context, func: &mut cg::Function, movs: &[cg::Inst]) {
    let mut removed = 0usize;

    for &mov in movs {
        debug_assert_eq!(func.op(mov), Opcode::Mov);

        // x = mov y
        let x = func.insts[mov].reg.expect("lifted mov without register") as usize;
        let eq_x = ctx.equiv_vreg.find(x);
        let arg = func.arg_def(mov, 0).expect("lifted mov without SSA operand");
        let y = func.insts[arg].reg.expect("mov operand without register") as usize;
        let eq_y = ctx.equiv_vreg.find(y);

        if ctx.rinfo[eq_x]
            .equiv_liverange
            .intersects(&ctx.rinfo[eq_y].equiv_liverange)
        {
            continue;
        }

        ctx.equiv_vreg.union(eq_x, eq_y);
        if ctx.equiv_vreg.find(eq_x) == eq_x {
            let r = ctx.rinfo[eq_y].liverange.clone();
            ctx.rinfo[eq_x].equiv_liverange.union(&r);
        } else {
            debug_assert_eq!(ctx.equiv_vreg.find(eq_x), eq_y);
            let r = ctx.rinfo[eq_x].liverange.clone();
            ctx.rinfo[eq_y].equiv_liverange.union(&r);
        }

        // The source takes over the copy's range, uses, and place.
        let mov_range = ctx.rinfo[x].liverange.clone();
        ctx.rinfo[y].liverange.union(&mov_range);
        func.replace_uses(mov, arg);
        ctx.rinfo[x].liverange.clear();
        func.ssa.remove_preds(mov);
        func.unlink_inst(mov);
        removed += 1;
    }

    log::debug!(
        "regalloc: coalesced {} of {} phi copies",
        removed,
        movs.len()
    );
}
