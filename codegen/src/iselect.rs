//! Instruction selection: lower typed SSA IR into target-instruction SSA.
//!
//! A top-down tile selector: blocks are visited in post-order and nodes in
//! reverse, so every use is seen before its def. Uses that cannot be wired
//! yet are queued on the defining node's shadow record and back-filled the
//! moment the defining cg instruction appears. Small constants fold into
//! the immediate operand of their consumer instead of materialising.
//!
//! A def whose remaining-use count is zero is not emitted at all; stores
//! always are, and a call with no uses is emitted without an output
//! register.

use crate::cg::{self, reg, Arg, Opcode as CgOp};
use crate::entity::{PackedOption, SecondaryMap};
use crate::ir::{self, Opcode as IrOp, Type};
use crate::{CodegenError, CodegenResult};
use log::debug;

#[derive(Clone)]
enum Slot {
    Arg(usize),
    Phi(cg::Block),
}

#[derive(Clone)]
struct PendingUse {
    inst: cg::Inst,
    slot: Slot,
}

/// Shadow record for one IR node.
#[derive(Clone, Default)]
struct Info {
    /// The cg instruction that materialised this node, once it exists.
    inst: Option<cg::Inst>,
    /// Uses waiting for the def to materialise.
    pending: Vec<PendingUse>,
    /// IR uses not yet wired up (best-effort; immediate folds decrement it).
    uses_left: i32,
    /// Frame offset, for entry-block allocas.
    sp_offset: u32,
    counted: bool,
}

struct Ctx<'a> {
    tu: &'a ir::TranslationUnit,
    irf: &'a ir::Function,
    info: SecondaryMap<ir::Node, Info>,
    bmap: SecondaryMap<ir::Block, PackedOption<cg::Block>>,
}

impl<'a> Ctx<'a> {
    fn touch(&mut self, n: ir::Node) {
        if !self.info[n].counted {
            let count = self.irf.ssa.succs(n).len() as i32;
            let e = &mut self.info[n];
            e.counted = true;
            e.uses_left = count;
        }
    }

    fn cg_block(&self, irb: ir::Block) -> cg::Block {
        self.bmap[irb].unwrap()
    }

    /// Wire all queued uses of `n` to `inst`.
    fn flush_uses(&mut self, cgf: &mut cg::Function, n: ir::Node, inst: cg::Inst) {
        let pending = core::mem::take(&mut self.info[n].pending);
        self.info[n].uses_left -= pending.len() as i32;
        for u in pending {
            match u.slot {
                Slot::Arg(idx) => cgf.set_vreg_arg(u.inst, idx, inst),
                Slot::Phi(bb) => cgf.add_phi_arg(u.inst, bb, inst),
            }
        }
    }

    /// Queue operand `idx` of `inst` to receive `arg`'s value; wires it
    /// immediately when the def already exists.
    fn add_delayed_arg(&mut self, cgf: &mut cg::Function, inst: cg::Inst, idx: usize, arg: ir::Node) {
        self.touch(arg);
        self.info[arg].pending.push(PendingUse {
            inst,
            slot: Slot::Arg(idx),
        });
        if let Some(def) = self.info[arg].inst {
            self.flush_uses(cgf, arg, def);
        }
    }

    /// Fold `n` into an op-2 immediate when it is a small constant;
    /// otherwise queue it as a register operand.
    fn reg_or_imm_arg(&mut self, cgf: &mut cg::Function, inst: cg::Inst, idx: usize, arg: ir::Node) {
        if self.irf.op(arg) == IrOp::Const && self.irf.const_u64(arg) <= 0xff {
            cgf.insts[inst].args[idx] = Arg::imm(self.irf.const_u64(arg) as u32);
            self.touch(arg);
            self.info[arg].uses_left -= 1;
        } else {
            self.add_delayed_arg(cgf, inst, idx, arg);
        }
    }
}

/// Lower a whole translation unit.
pub fn run(ir_tu: &ir::TranslationUnit) -> CodegenResult<cg::TranslationUnit> {
    let mut ctu = cg::TranslationUnit::new();

    for (_, d) in ir_tu.datas.iter() {
        ctu.datas.push(d.clone());
    }

    for f in ir_tu.funcs.values() {
        if f.is_definition() {
            debug!("iselect: lowering {}", f.name);
            ctu.funcs.push(select_func(ir_tu, f)?);
        }
    }

    Ok(ctu)
}

fn select_func(tu: &ir::TranslationUnit, irf: &ir::Function) -> CodegenResult<cg::Function> {
    let mut cgf = cg::Function::new(&irf.name);
    cgf.clobber_mask |= 1 << reg::LR;

    let mut ctx = Ctx {
        tu,
        irf,
        info: SecondaryMap::new(),
        bmap: SecondaryMap::new(),
    };

    // Build cg blocks in reverse post-order; this fixes the emission order.
    let rpo = irf.rpo();
    for &irb in &rpo {
        let cgb = cgf.add_block();
        cgf.link_block_last(cgb);
        ctx.bmap[irb] = cgb.into();
    }

    // Entry pre-pass: assign frame offsets to allocas.
    let mut sp_offset = 0;
    for n in irf.block_nodes(irf.entry()) {
        if irf.op(n) == IrOp::Alloca {
            ctx.touch(n);
            ctx.info[n].sp_offset = sp_offset;
            sp_offset += irf.alloca_size(n);
        }
    }
    cgf.frame_size = sp_offset;

    // Create phis and lower terminators.
    for &irb in &rpo {
        let cgb = ctx.cg_block(irb);

        for n in irf.block_nodes(irb) {
            if irf.op(n) != IrOp::Phi {
                break;
            }
            let phi = cgf.build_phi(cgb);
            ctx.touch(n);
            ctx.info[n].inst = Some(phi);
            for (parg, pargbb) in irf.phi_args(n) {
                ctx.touch(parg);
                let slot = Slot::Phi(ctx.cg_block(pargbb));
                ctx.info[parg].pending.push(PendingUse { inst: phi, slot });
            }
        }

        if Some(irb) == irf.exit() {
            continue;
        }

        match irf.term_node(irb) {
            Some(ircmp) => {
                let irb_true = irf.true_target(irb);
                let irb_false = irf.false_target(irb);
                let mut cg_true = ctx.cg_block(irb_true);
                let mut cg_false = ctx.cg_block(irb_false);

                cgf.link_cfg(cgb, cg_true);
                cgf.link_cfg(cgb, cg_false);

                let mut cond = match irf.op(ircmp) {
                    IrOp::IcmpEq => cg::Cond::Eq,
                    IrOp::IcmpNe => cg::Cond::Ne,
                    IrOp::IcmpSlt => cg::Cond::Lt,
                    IrOp::IcmpSle => cg::Cond::Le,
                    IrOp::IcmpSgt => cg::Cond::Gt,
                    IrOp::IcmpSge => cg::Cond::Ge,
                    op => return Err(CodegenError::Unsupported(op.as_str())),
                };

                // The true target must never be the fall-through block;
                // emission relies on it.
                if Some(cg_true) == cgf.next_block(cgb) {
                    cond = cond.inverse();
                    core::mem::swap(&mut cg_true, &mut cg_false);
                }
                cgf.set_branch(cgb, cond, Some(cg_true), Some(cg_false));

                let cgcmp = select_cmp(&mut ctx, &mut cgf, cgb, ircmp);
                cgf.insts[cgcmp].reg = None;
                cgf.link_inst_last(cgcmp);
                ctx.touch(ircmp);
                ctx.info[ircmp].uses_left -= 1;
            }
            None => {
                let target = ctx.cg_block(irf.default_target(irb));
                cgf.link_cfg(cgb, target);
                cgf.set_branch(cgb, cg::Cond::Al, None, None);
            }
        }
    }

    // Synthetic return of the function's value.
    if irf.sig.ret != Type::Void {
        let exit = irf.exit().expect("definition without exit block");
        let cgb = ctx.cg_block(exit);
        let ret = cgf.build_inst(cgb, CgOp::Ret);
        cgf.insts[ret].reg = None;
        let value = irf.term_node(exit).expect("value return without value");
        ctx.add_delayed_arg(&mut cgf, ret, 0, value);
        cgf.link_inst_last(ret);
    }

    // The selection proper: post-order blocks, reverse nodes.
    for &irb in rpo.iter().rev() {
        let cgb = ctx.cg_block(irb);

        for n in irf.block_nodes_rev(irb) {
            ctx.touch(n);

            match irf.op(n) {
                IrOp::Call => {
                    let call = cgf.build_inst(cgb, CgOp::Call);

                    if irf.ssa.succs(n).is_empty() {
                        cgf.insts[call].reg = None;
                    } else {
                        ctx.info[n].inst = Some(call);
                        ctx.flush_uses(&mut cgf, n, call);
                    }

                    let target = irf.call_target(n);
                    cgf.insts[call].args[0] = Arg::sym(&tu.funcs[target].name);
                    cgf.link_inst_first(call);

                    for (idx, arg) in irf.args(n).iter().enumerate() {
                        ctx.add_delayed_arg(&mut cgf, call, idx + 1, *arg);
                    }
                }

                IrOp::GetParam => {
                    // Materialised in the entry block afterwards.
                }

                IrOp::Phi => {
                    let phi = ctx.info[n].inst.expect("phi was created up front");
                    ctx.flush_uses(&mut cgf, n, phi);
                }

                op => {
                    if ctx.info[n].uses_left > 0 || op == IrOp::Store {
                        let cgi = select_tile(&mut ctx, &mut cgf, cgb, n)?;
                        cgf.link_inst_first(cgi);
                        ctx.info[n].inst = Some(cgi);
                        ctx.flush_uses(&mut cgf, n, cgi);
                    } else {
                        debug_assert!(ctx.info[n].pending.is_empty());
                    }
                }
            }
        }
    }

    // Materialise `arg` instructions for the used parameters. They are not
    // linked into any block; the argument table owns them.
    for n in irf.block_nodes(irf.entry()) {
        if irf.op(n) == IrOp::GetParam {
            let entry = cgf.first_block().unwrap();
            let arg = cgf.build_inst(entry, CgOp::Arg);
            let idx = irf.getparam_index(n) as usize;
            assert!(idx < cg::MAX_PARAMS);
            cgf.params[idx] = Some(arg);
            ctx.touch(n);
            ctx.info[n].inst = Some(arg);
            ctx.flush_uses(&mut cgf, n, arg);
        }
    }

    Ok(cgf)
}

fn select_cmp(ctx: &mut Ctx, cgf: &mut cg::Function, cgb: cg::Block, n: ir::Node) -> cg::Inst {
    let cgi = cgf.build_inst(cgb, CgOp::Cmp);
    let args = ctx.irf.args(n);
    ctx.add_delayed_arg(cgf, cgi, 0, args[0]);
    ctx.reg_or_imm_arg(cgf, cgi, 1, args[1]);
    cgi
}

fn select_tile(
    ctx: &mut Ctx,
    cgf: &mut cg::Function,
    cgb: cg::Block,
    n: ir::Node,
) -> CodegenResult<cg::Inst> {
    let irf = ctx.irf;

    match irf.op(n) {
        IrOp::AddrOf => {
            let cgi = cgf.build_inst(cgb, CgOp::Mov);
            let d = irf.addr_of_data(n);
            let name = ctx.tu.datas[d].name.clone();
            cgf.insts[cgi].args[0] = Arg::sym(&name);
            Ok(cgi)
        }

        IrOp::Alloca => {
            let sp_offset = ctx.info[n].sp_offset;
            let cgi = if sp_offset > 0 {
                let cgi = cgf.build_inst(cgb, CgOp::Add);
                cgf.insts[cgi].args[1] = Arg::imm(sp_offset);
                cgi
            } else {
                cgf.build_inst(cgb, CgOp::Mov)
            };
            cgf.insts[cgi].args[0] = Arg::hreg(reg::SP);
            Ok(cgi)
        }

        IrOp::Const => {
            let cgi = cgf.build_inst(cgb, CgOp::Mov);
            cgf.insts[cgi].args[0] = Arg::imm(irf.const_u64(n) as u32);
            Ok(cgi)
        }

        IrOp::Undef => Ok(cgf.build_inst(cgb, CgOp::Undef)),

        IrOp::Load => {
            let op = match irf.ty(n) {
                Type::I8 => CgOp::Ldrb,
                Type::I16 => CgOp::Ldrh,
                Type::I32 | Type::P32 => CgOp::Ldr,
                _ => return Err(CodegenError::Unsupported("load")),
            };
            let cgi = cgf.build_inst(cgb, op);
            let args = irf.args(n);
            ctx.add_delayed_arg(cgf, cgi, 0, args[0]);
            Ok(cgi)
        }

        IrOp::Store => {
            let op = match irf.ty(n) {
                Type::I8 => CgOp::Strb,
                Type::I16 => CgOp::Strh,
                Type::I32 | Type::P32 => CgOp::Str,
                _ => return Err(CodegenError::Unsupported("store")),
            };
            let cgi = cgf.build_inst(cgb, op);
            let args = irf.args(n);
            ctx.add_delayed_arg(cgf, cgi, 0, args[1]);
            ctx.add_delayed_arg(cgf, cgi, 1, args[0]);
            cgf.insts[cgi].reg = None;
            Ok(cgi)
        }

        IrOp::IcmpSlt | IrOp::IcmpSgt => Ok(select_cmp(ctx, cgf, cgb, n)),

        IrOp::Add
        | IrOp::Sub
        | IrOp::Mul
        | IrOp::And
        | IrOp::Or
        | IrOp::Xor
        | IrOp::Shl
        | IrOp::Ashr
        | IrOp::Lshr => {
            let (op, is_op2) = match irf.op(n) {
                IrOp::Add => (CgOp::Add, true),
                IrOp::Sub => (CgOp::Sub, true),
                IrOp::Mul => (CgOp::Mul, false),
                IrOp::And => (CgOp::And, true),
                IrOp::Or => (CgOp::Orr, true),
                IrOp::Xor => (CgOp::Eor, true),
                IrOp::Shl => (CgOp::Lsl, true),
                IrOp::Ashr => (CgOp::Asr, true),
                IrOp::Lshr => (CgOp::Lsr, true),
                _ => unreachable!(),
            };
            let cgi = cgf.build_inst(cgb, op);
            let args = irf.args(n);
            ctx.add_delayed_arg(cgf, cgi, 0, args[0]);
            if is_op2 {
                ctx.reg_or_imm_arg(cgf, cgi, 1, args[1]);
            } else {
                ctx.add_delayed_arg(cgf, cgi, 1, args[1]);
            }
            Ok(cgi)
        }

        IrOp::Sext | IrOp::Zext | IrOp::Trunc => {
            let args = irf.args(n);
            let op = match irf.op(n) {
                IrOp::Sext => match irf.ty(args[0]) {
                    Type::I8 => CgOp::Sxtb,
                    Type::I16 => CgOp::Sxth,
                    _ => return Err(CodegenError::Unsupported("sext")),
                },
                IrOp::Zext => match irf.ty(args[0]) {
                    Type::I8 => CgOp::Uxtb,
                    Type::I16 => CgOp::Uxth,
                    _ => return Err(CodegenError::Unsupported("zext")),
                },
                _ => match irf.ty(n) {
                    Type::I8 => CgOp::Uxtb,
                    Type::I16 => CgOp::Uxth,
                    _ => return Err(CodegenError::Unsupported("trunc")),
                },
            };
            let cgi = cgf.build_inst(cgb, op);
            ctx.add_delayed_arg(cgf, cgi, 0, args[0]);
            Ok(cgi)
        }

        op => Err(CodegenError::Unsupported(op.as_str())),
    }
}
