//! Branch predication.
//!
//! Replaces short branch diamonds and triangles with predicated
//! instructions, removing the arm blocks entirely:
//!
//! ```text
//!     ...                         ...
//!     branch{gt} %bb1, %bb2       mov{gt} %r0, #1
//! bb1:                            mov{le} %r0, #2
//!     mov %r0, #1                 branch %bb3
//!     branch %bb3
//! bb2:
//!     mov %r0, #2
//!     branch %bb3
//! ```
//!
//! An arm qualifies when it has a single predecessor, a single successor,
//! at most two instructions, and no call. The triangle patterns handle a
//! lone true arm (predicated on the branch condition) and a lone false arm
//! (predicated on its inverse). Each block is tried once, first matching
//! pattern wins; the pass does not iterate.

use crate::cg::{self, Cond};
use log::debug;

/// Run the pass on every function of the unit.
pub fn run_tu(tu: &mut cg::TranslationUnit) {
    for f in &mut tu.funcs {
        run_func(f);
    }
}

fn run_func(func: &mut cg::Function) {
    for bb in func.block_layout() {
        if try_pattern_1(func, bb) {
            continue;
        }
        if try_pattern_2(func, bb) {
            continue;
        }
        if try_pattern_3(func, bb) {
            continue;
        }
    }
}

fn can_predicate_block(func: &cg::Function, b: cg::Block) -> bool {
    func.body(b)
        .iter()
        .all(|&i| func.op(i) != cg::Opcode::Call)
}

fn arm_is_simple(func: &cg::Function, arm: cg::Block) -> bool {
    func.num_insts(arm) <= 2 && can_predicate_block(func, arm)
}

/// Unlink every instruction of `from` and append it to `to` under `cond`.
fn move_and_conditionalize(func: &mut cg::Function, to: cg::Block, from: cg::Block, cond: Cond) {
    let mut cursor = func.first_inst(from);
    while let Some(inst) = cursor {
        cursor = func.next_inst(inst);
        func.unlink_inst(inst);
        func.set_inst_block(inst, to);
        func.insts[inst].cond = cond;
        func.link_inst_last(inst);
    }
}

/// Diamond: both arms join in the same block.
fn try_pattern_1(func: &mut cg::Function, bb: cg::Block) -> bool {
    let (t, f) = match (func.true_target(bb), func.false_target(bb)) {
        (Some(t), Some(f)) => (t, f),
        _ => return false,
    };

    if func.cfg.single_pred(t).is_none() || func.cfg.single_pred(f).is_none() {
        return false;
    }

    let join = match (func.cfg.single_succ(t), func.cfg.single_succ(f)) {
        (Some(a), Some(b)) if a == b => a,
        _ => return false,
    };

    if !arm_is_simple(func, t) || !arm_is_simple(func, f) {
        return false;
    }

    debug!("predication: diamond at bb{}", func.block_id(bb));

    let cond = func.true_cond(bb);
    move_and_conditionalize(func, bb, t, cond);
    move_and_conditionalize(func, bb, f, cond.inverse());

    func.cfg.detach_node(t);
    func.cfg.detach_node(f);
    func.link_cfg(bb, join);

    func.unlink_block(t);
    func.unlink_block(f);

    func.set_branch(bb, Cond::Al, None, None);
    true
}

/// Triangle, true arm: the true target falls into the false target.
fn try_pattern_2(func: &mut cg::Function, bb: cg::Block) -> bool {
    let (t, f) = match (func.true_target(bb), func.false_target(bb)) {
        (Some(t), Some(f)) => (t, f),
        _ => return false,
    };

    if func.cfg.single_pred(t).is_none() {
        return false;
    }
    if func.cfg.single_succ(t) != Some(f) {
        return false;
    }
    if !arm_is_simple(func, t) {
        return false;
    }

    debug!("predication: true triangle at bb{}", func.block_id(bb));

    let cond = func.true_cond(bb);
    move_and_conditionalize(func, bb, t, cond);
    func.cfg.detach_node(t);
    func.unlink_block(t);

    func.set_branch(bb, Cond::Al, None, None);
    true
}

/// Triangle, false arm: the false target falls into the true target.
fn try_pattern_3(func: &mut cg::Function, bb: cg::Block) -> bool {
    let (t, f) = match (func.true_target(bb), func.false_target(bb)) {
        (Some(t), Some(f)) => (t, f),
        _ => return false,
    };

    if func.cfg.single_pred(f).is_none() {
        return false;
    }
    if func.cfg.single_succ(f) != Some(t) {
        return false;
    }
    if !arm_is_simple(func, f) {
        return false;
    }

    debug!("predication: false triangle at bb{}", func.block_id(bb));

    let cond = func.true_cond(bb);
    move_and_conditionalize(func, bb, f, cond.inverse());
    func.cfg.detach_node(f);
    func.unlink_block(f);

    func.set_branch(bb, Cond::Al, None, None);
    true
}
