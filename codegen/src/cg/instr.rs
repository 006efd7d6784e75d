//! CG instructions and their operands.

use super::{Block, Cond, Function, Inst};
use crate::graph::Edge;

/// Maximum number of operands an instruction can carry. Calls use one slot
/// for the target symbol and up to four argument slots.
pub const N_ARGS: usize = 5;

/// A target instruction operation, plus the allocator's pseudo ops.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum Opcode {
    Mov,
    Add,
    Sub,
    Mul,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Sxtb,
    Sxth,
    Uxtb,
    Uxth,
    Ldr,
    Ldrh,
    Ldrb,
    Str,
    Strh,
    Strb,
    Cmp,
    Call,
    Ret,
    Arg,
    Phi,
    Spill,
    Reload,
    Undef,
}

impl Opcode {
    /// Textual mnemonic.
    pub fn as_str(self) -> &'static str {
        use Opcode::*;
        match self {
            Mov => "mov",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            And => "and",
            Orr => "orr",
            Eor => "eor",
            Lsl => "lsl",
            Lsr => "lsr",
            Asr => "asr",
            Sxtb => "sxtb",
            Sxth => "sxth",
            Uxtb => "uxtb",
            Uxth => "uxth",
            Ldr => "ldr",
            Ldrh => "ldrh",
            Ldrb => "ldrb",
            Str => "str",
            Strh => "strh",
            Strb => "strb",
            Cmp => "cmp",
            Call => "call",
            Ret => "ret",
            Arg => "arg",
            Phi => "phi",
            Spill => "spill",
            Reload => "reload",
            Undef => "undef",
        }
    }

    /// Is this one of the load instructions (first operand is an address)?
    pub fn is_load(self) -> bool {
        matches!(self, Opcode::Ldr | Opcode::Ldrh | Opcode::Ldrb)
    }

    /// Is this one of the store instructions (second operand is an address)?
    pub fn is_store(self) -> bool {
        matches!(self, Opcode::Str | Opcode::Strh | Opcode::Strb)
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand payload.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub enum ArgKind {
    /// Empty slot.
    #[default]
    None,
    /// SSA reference to the defining instruction, via the use edge.
    Vreg(Edge),
    /// A hardware register by index.
    Hreg(u32),
    /// An immediate.
    Imm(u32),
    /// A symbol name.
    Sym(String),
}

/// One instruction operand: its payload plus a byte offset, which is only
/// meaningful on the address operand of loads and stores.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Arg {
    /// The operand payload.
    pub kind: ArgKind,
    /// Byte offset for memory operands.
    pub offset: i32,
}

impl Arg {
    /// A hardware register operand.
    pub fn hreg(r: u32) -> Self {
        Arg {
            kind: ArgKind::Hreg(r),
            offset: 0,
        }
    }

    /// An immediate operand.
    pub fn imm(v: u32) -> Self {
        Arg {
            kind: ArgKind::Imm(v),
            offset: 0,
        }
    }

    /// A symbol operand.
    pub fn sym(s: &str) -> Self {
        Arg {
            kind: ArgKind::Sym(s.to_string()),
            offset: 0,
        }
    }

    /// Is this an empty slot?
    pub fn is_none(&self) -> bool {
        self.kind == ArgKind::None
    }
}

/// The data of one instruction.
#[derive(Clone, Debug)]
pub struct InstData {
    /// Operation.
    pub op: Opcode,
    /// Predicate; `Al` when unconditional.
    pub cond: Cond,
    /// Defined register (virtual or hardware), `None` for no output.
    pub reg: Option<u32>,
    /// Operands.
    pub args: [Arg; N_ARGS],
    pub(crate) block: Block,
    pub(crate) prev: crate::entity::PackedOption<Inst>,
    pub(crate) next: crate::entity::PackedOption<Inst>,
}

impl Function {
    /// Create an instruction in `b` (not yet linked into the block body).
    /// It defines a fresh virtual register; callers clear `reg` for
    /// no-output instructions.
    pub fn build_inst(&mut self, b: Block, op: Opcode) -> Inst {
        let reg = self.vreg_count;
        self.vreg_count += 1;
        let i = self.insts.push(InstData {
            op,
            cond: Cond::Al,
            reg: Some(reg),
            args: Default::default(),
            block: b,
            prev: None.into(),
            next: None.into(),
        });
        self.ssa.set_sort_key(i, i64::from(reg));
        i
    }

    /// Create a phi at the end of `b`'s phi list.
    pub fn build_phi(&mut self, b: Block) -> Inst {
        let i = self.build_inst(b, Opcode::Phi);
        let last = self.blocks[b].last_phi;
        self.insts[i].prev = last;
        match last.expand() {
            Some(l) => self.insts[l].next = i.into(),
            None => self.blocks[b].first_phi = i.into(),
        }
        self.blocks[b].last_phi = i.into();
        self.blocks[b].n_phis += 1;
        i
    }

    /// Attach the value `arg`, contributed along the CFG edge from
    /// `arg_bb`, to a phi.
    pub fn add_phi_arg(&mut self, phi: Inst, arg_bb: Block, arg: Inst) {
        debug_assert_eq!(self.insts[phi].op, Opcode::Phi);
        self.ssa.add_edge(arg, phi, Some(arg_bb));
    }

    /// Replace the phi input contributed by `arg_bb` with `arg`.
    pub fn change_phi_arg(&mut self, phi: Inst, arg_bb: Block, arg: Inst) {
        debug_assert_eq!(self.insts[phi].op, Opcode::Phi);
        let old = self
            .ssa
            .preds(phi)
            .iter()
            .copied()
            .find(|&e| *self.ssa.data(e) == Some(arg_bb))
            .expect("phi has no input for block");
        self.ssa.remove_edge(old);
        self.ssa.add_edge(arg, phi, Some(arg_bb));
    }

    /// Phi arguments as `(value, predecessor block)` pairs in edge order.
    pub fn phi_args(&self, phi: Inst) -> Vec<(Inst, Block)> {
        debug_assert_eq!(self.insts[phi].op, Opcode::Phi);
        self.ssa
            .preds(phi)
            .iter()
            .map(|&e| {
                (
                    self.ssa.tail(e),
                    self.ssa.data(e).expect("phi edge without block"),
                )
            })
            .collect()
    }

    /// The phi input contributed by predecessor `b`.
    pub fn phi_input_of(&self, phi: Inst, b: Block) -> Inst {
        debug_assert_eq!(self.insts[phi].op, Opcode::Phi);
        for &e in self.ssa.preds(phi) {
            if *self.ssa.data(e) == Some(b) {
                return self.ssa.tail(e);
            }
        }
        panic!("phi has no input for block bb{}", self.blocks[b].id);
    }

    /// Point operand `idx` of `inst` at the SSA value defined by `arg`,
    /// dropping any previous SSA operand in the slot.
    pub fn set_vreg_arg(&mut self, inst: Inst, idx: usize, arg: Inst) {
        debug_assert!(self.insts[inst].op != Opcode::Phi);
        debug_assert!(self.insts[arg].reg.is_some());
        if let ArgKind::Vreg(e) = self.insts[inst].args[idx].kind {
            self.ssa.remove_edge(e);
            self.insts[inst].args[idx].kind = ArgKind::None;
        }
        debug_assert!(self.insts[inst].args[idx].kind == ArgKind::None);
        let e = self.ssa.add_edge(arg, inst, None);
        self.insts[inst].args[idx].kind = ArgKind::Vreg(e);
    }

    /// The instruction defining the SSA operand at `idx`, if that operand
    /// is an SSA reference.
    pub fn arg_def(&self, inst: Inst, idx: usize) -> Option<Inst> {
        match self.insts[inst].args[idx].kind {
            ArgKind::Vreg(e) => Some(self.ssa.tail(e)),
            _ => None,
        }
    }

    /// The register operand at `idx`: the defining instruction's register
    /// for SSA operands, the index for hardware-register operands.
    pub fn arg_reg(&self, inst: Inst, idx: usize) -> Option<u32> {
        match self.insts[inst].args[idx].kind {
            ArgKind::Vreg(e) => self.insts[self.ssa.tail(e)].reg,
            ArgKind::Hreg(r) => Some(r),
            _ => None,
        }
    }

    /// Rewrite every use of `old` to use `new`, preserving phi-block
    /// annotations and fixing the operand slots that referenced the old
    /// edges.
    pub fn replace_uses(&mut self, old: Inst, new: Inst) {
        for &e in self.ssa.succs(old).to_vec().iter() {
            let succ = self.ssa.head(e);
            let payload = *self.ssa.data(e);
            let new_e = self.ssa.add_edge(new, succ, payload);
            for idx in 0..N_ARGS {
                if self.insts[succ].args[idx].kind == ArgKind::Vreg(e) {
                    self.insts[succ].args[idx].kind = ArgKind::Vreg(new_e);
                }
            }
            self.ssa.remove_edge(e);
        }
    }

    /// Move `inst` to block `b` (it must be unlinked).
    pub fn set_inst_block(&mut self, inst: Inst, b: Block) {
        debug_assert!(self.insts[inst].prev.is_none() && self.insts[inst].next.is_none());
        self.insts[inst].block = b;
    }

    /// Link `inst` first in its block's body.
    pub fn link_inst_first(&mut self, inst: Inst) {
        debug_assert!(self.insts[inst].op != Opcode::Phi);
        debug_assert!(self.insts[inst].prev.is_none() && self.insts[inst].next.is_none());
        let b = self.insts[inst].block;
        let first = self.blocks[b].first;
        self.insts[inst].next = first;
        match first.expand() {
            Some(f) => self.insts[f].prev = inst.into(),
            None => self.blocks[b].last = inst.into(),
        }
        self.blocks[b].first = inst.into();
        self.blocks[b].n_insts += 1;
    }

    /// Link `inst` last in its block's body.
    pub fn link_inst_last(&mut self, inst: Inst) {
        debug_assert!(self.insts[inst].op != Opcode::Phi);
        debug_assert!(self.insts[inst].prev.is_none() && self.insts[inst].next.is_none());
        let b = self.insts[inst].block;
        let last = self.blocks[b].last;
        self.insts[inst].prev = last;
        match last.expand() {
            Some(l) => self.insts[l].next = inst.into(),
            None => self.blocks[b].first = inst.into(),
        }
        self.blocks[b].last = inst.into();
        self.blocks[b].n_insts += 1;
    }

    /// Link `inst` immediately before `reference` in the block body.
    pub fn link_inst_before(&mut self, reference: Inst, inst: Inst) {
        debug_assert!(self.insts[inst].op != Opcode::Phi);
        debug_assert!(self.insts[inst].prev.is_none() && self.insts[inst].next.is_none());
        let b = self.insts[inst].block;
        debug_assert!(self.insts[reference].block == b);
        self.insts[inst].next = reference.into();
        self.insts[inst].prev = self.insts[reference].prev;
        match self.insts[reference].prev.expand() {
            Some(p) => self.insts[p].next = inst.into(),
            None => self.blocks[b].first = inst.into(),
        }
        self.insts[reference].prev = inst.into();
        self.blocks[b].n_insts += 1;
    }

    /// Link `inst` immediately after `reference` in the block body.
    pub fn link_inst_after(&mut self, reference: Inst, inst: Inst) {
        debug_assert!(self.insts[inst].op != Opcode::Phi);
        debug_assert!(self.insts[inst].prev.is_none() && self.insts[inst].next.is_none());
        let b = self.insts[inst].block;
        debug_assert!(self.insts[reference].block == b);
        self.insts[inst].prev = reference.into();
        self.insts[inst].next = self.insts[reference].next;
        match self.insts[reference].next.expand() {
            Some(s) => self.insts[s].prev = inst.into(),
            None => self.blocks[b].last = inst.into(),
        }
        self.insts[reference].next = inst.into();
        self.blocks[b].n_insts += 1;
    }

    /// Unlink `inst` from its block's body.
    pub fn unlink_inst(&mut self, inst: Inst) {
        debug_assert!(self.insts[inst].op != Opcode::Phi);
        let b = self.insts[inst].block;
        match self.insts[inst].prev.expand() {
            Some(p) => self.insts[p].next = self.insts[inst].next,
            None => {
                debug_assert!(self.blocks[b].first.expand() == Some(inst));
                self.blocks[b].first = self.insts[inst].next;
            }
        }
        match self.insts[inst].next.expand() {
            Some(s) => self.insts[s].prev = self.insts[inst].prev,
            None => {
                debug_assert!(self.blocks[b].last.expand() == Some(inst));
                self.blocks[b].last = self.insts[inst].prev;
            }
        }
        self.insts[inst].prev = None.into();
        self.insts[inst].next = None.into();
        self.blocks[b].n_insts -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_link() {
        let mut f = Function::new("t");
        let b = f.add_block();
        f.link_block_last(b);

        let i0 = f.build_inst(b, Opcode::Mov);
        f.link_inst_last(i0);
        let i1 = f.build_inst(b, Opcode::Add);
        f.link_inst_last(i1);
        let i2 = f.build_inst(b, Opcode::Cmp);
        f.link_inst_first(i2);

        assert_eq!(f.body(b), vec![i2, i0, i1]);
        assert_eq!(f.num_insts(b), 3);

        let i3 = f.build_inst(b, Opcode::Sub);
        f.link_inst_before(i1, i3);
        assert_eq!(f.body(b), vec![i2, i0, i3, i1]);

        f.unlink_inst(i0);
        assert_eq!(f.body(b), vec![i2, i3, i1]);

        // Virtual registers count up from the first vreg index.
        assert_eq!(f.def_reg(i0), Some(super::super::reg::FIRST_VREG));
        assert_eq!(f.def_reg(i1), Some(super::super::reg::FIRST_VREG + 1));
    }

    #[test]
    fn ssa_args_and_replacement() {
        let mut f = Function::new("t");
        let b = f.add_block();
        f.link_block_last(b);

        let a = f.build_inst(b, Opcode::Mov);
        f.link_inst_last(a);
        let c = f.build_inst(b, Opcode::Mov);
        f.link_inst_last(c);
        let add = f.build_inst(b, Opcode::Add);
        f.set_vreg_arg(add, 0, a);
        f.set_vreg_arg(add, 1, a);
        f.link_inst_last(add);

        assert_eq!(f.arg_def(add, 0), Some(a));
        assert_eq!(f.arg_reg(add, 1), f.def_reg(a));
        assert_eq!(f.ssa.succs(a).len(), 2);

        f.replace_uses(a, c);
        assert_eq!(f.arg_def(add, 0), Some(c));
        assert_eq!(f.arg_def(add, 1), Some(c));
        assert!(f.ssa.succs(a).is_empty());
    }

    #[test]
    fn phi_inputs_by_block() {
        let mut f = Function::new("t");
        let b0 = f.add_block();
        let b1 = f.add_block();
        let b2 = f.add_block();
        for b in [b0, b1, b2] {
            f.link_block_last(b);
        }

        let x = f.build_inst(b0, Opcode::Mov);
        f.link_inst_last(x);
        let y = f.build_inst(b1, Opcode::Mov);
        f.link_inst_last(y);

        let phi = f.build_phi(b2);
        f.add_phi_arg(phi, b0, x);
        f.add_phi_arg(phi, b1, y);

        assert_eq!(f.phi_input_of(phi, b0), x);
        assert_eq!(f.phi_input_of(phi, b1), y);
        assert_eq!(f.num_phis(b2), 1);

        let z = f.build_inst(b1, Opcode::Mov);
        f.link_inst_last(z);
        f.change_phi_arg(phi, b1, z);
        assert_eq!(f.phi_input_of(phi, b1), z);
        assert_eq!(f.phi_args(phi).len(), 2);
    }
}
