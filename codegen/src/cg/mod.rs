//! Target-instruction SSA.
//!
//! After instruction selection the program is expressed in the target's
//! instructions but still in SSA form over *virtual registers*: every
//! instruction that produces a value defines a fresh register numbered from
//! `reg::FIRST_VREG` upwards, and register operands are SSA edges to the
//! defining instruction. The register allocator rewrites everything below
//! `reg::FIRST_VREG` and deconstructs the phis; emission then prints the
//! final instructions.
//!
//! Blocks live on a doubly-linked layout list in emission order; each block
//! keeps separate doubly-linked lists for its phis and its body
//! instructions.

pub use self::cond::Cond;
pub use self::instr::{Arg, ArgKind, InstData, Opcode, N_ARGS};
pub use crate::ir::DataDecl;

mod cond;
pub mod emit;
mod instr;
pub mod interp;
pub mod print;

use crate::entity::{entity_impl, PackedOption, PrimaryMap, SecondaryMap};
use crate::graph::Graph;
use crate::loop_analysis::{self, LoopInfo};
use crate::CodegenResult;

/// An opaque reference to a cg instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a cg basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "cgbb");

/// Register numbering of the target.
pub mod reg {
    /// Return value / first argument register.
    pub const R0: u32 = 0;
    /// First callee-saved register.
    pub const R4: u32 = 4;
    /// Stack pointer.
    pub const SP: u32 = 13;
    /// Link register.
    pub const LR: u32 = 14;
    /// Program counter.
    pub const PC: u32 = 15;
    /// Total number of hardware registers.
    pub const NUM_REGS: u32 = 16;
    /// First virtual register index; everything at or above is virtual.
    pub const FIRST_VREG: u32 = 16;
    /// Number of argument-passing registers in the calling convention.
    pub const NUM_ARG_REGS: u32 = 4;

    /// Is `r` a virtual register?
    pub fn is_vreg(r: u32) -> bool {
        r >= FIRST_VREG
    }

    /// Name of a hardware register.
    pub fn name(r: u32) -> &'static str {
        const NAMES: [&str; 16] = [
            "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12",
            "sp", "lr", "pc",
        ];
        NAMES[r as usize]
    }
}

/// Payload of an SSA use edge: the contributing predecessor block when the
/// use is a phi argument, `None` for ordinary operands.
pub type UseData = Option<Block>;

/// Maximum number of function parameters passed in the argument table.
pub const MAX_PARAMS: usize = 16;

#[derive(Clone, Debug)]
pub(crate) struct BlockData {
    /// Display id; importer-controlled, otherwise the creation index.
    pub id: u32,
    pub prev: PackedOption<Block>,
    pub next: PackedOption<Block>,
    pub first_phi: PackedOption<Inst>,
    pub last_phi: PackedOption<Inst>,
    pub first: PackedOption<Inst>,
    pub last: PackedOption<Inst>,
    pub n_phis: u32,
    pub n_insts: u32,
    /// Taken target of a conditional branch.
    pub true_target: Option<Block>,
    /// Not-taken target of a conditional branch.
    pub false_target: Option<Block>,
    /// Branch condition; `Al` for unconditional blocks.
    pub true_cond: Cond,
}

impl Default for BlockData {
    fn default() -> Self {
        Self {
            id: 0,
            prev: None.into(),
            next: None.into(),
            first_phi: None.into(),
            last_phi: None.into(),
            first: None.into(),
            last: None.into(),
            n_phis: 0,
            n_insts: 0,
            true_target: None,
            false_target: None,
            true_cond: Cond::Al,
        }
    }
}

/// A translation unit of lowered code.
#[derive(Default, Debug)]
pub struct TranslationUnit {
    /// Data declarations, same semantics as on the IR side.
    pub datas: Vec<DataDecl>,
    /// Functions in definition order.
    pub funcs: Vec<Function>,
}

impl TranslationUnit {
    /// Create an empty unit.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A function in target-instruction form.
#[derive(Debug)]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Stack frame size in bytes.
    pub frame_size: u32,
    /// Callee-saved registers written by this function, as a bit mask.
    pub clobber_mask: u32,
    /// Parameter `arg` instructions by parameter index. These instructions
    /// are not linked into any block; they are reached through this table
    /// and the SSA graph only.
    pub params: [Option<Inst>; MAX_PARAMS],
    /// Next virtual register number.
    pub vreg_count: u32,
    /// CFG over blocks.
    pub cfg: Graph<Block, ()>,
    /// SSA use-def graph over instructions (def -> use).
    pub ssa: Graph<Inst, UseData>,

    /// Instruction storage. The layout links inside are crate-private;
    /// clients mutate operands, conditions and output registers directly.
    pub insts: PrimaryMap<Inst, InstData>,
    pub(crate) blocks: PrimaryMap<Block, BlockData>,
    pub(crate) first_block: PackedOption<Block>,
    pub(crate) last_block: PackedOption<Block>,
    pub(crate) n_blocks: u32,

    loop_info: Option<SecondaryMap<Block, LoopInfo<Block>>>,
    loop_version: u32,
}

impl Function {
    /// Create an empty function.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frame_size: 0,
            clobber_mask: 0,
            params: [None; MAX_PARAMS],
            vreg_count: reg::FIRST_VREG,
            cfg: Graph::new(),
            ssa: Graph::new(),
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            first_block: None.into(),
            last_block: None.into(),
            n_blocks: 0,
            loop_info: None,
            loop_version: 0,
        }
    }

    // ---------- blocks and layout ----------

    /// Create a block (not yet placed in the layout).
    pub fn add_block(&mut self) -> Block {
        let id = self.n_blocks;
        self.n_blocks += 1;
        let b = self.blocks.push(BlockData {
            id,
            ..BlockData::default()
        });
        self.cfg.set_sort_key(b, i64::from(id));
        b
    }

    /// Override the display id of a block (used by the importer).
    pub fn set_block_id(&mut self, b: Block, id: u32) {
        self.blocks[b].id = id;
        self.cfg.set_sort_key(b, i64::from(id));
    }

    /// Display id of `b`.
    pub fn block_id(&self, b: Block) -> u32 {
        self.blocks[b].id
    }

    /// Number of blocks currently in the layout.
    pub fn num_blocks(&self) -> u32 {
        self.n_blocks
    }

    /// First block of the layout (the entry).
    pub fn first_block(&self) -> Option<Block> {
        self.first_block.expand()
    }

    /// Last block of the layout.
    pub fn last_block(&self) -> Option<Block> {
        self.last_block.expand()
    }

    /// Block following `b` in the layout.
    pub fn next_block(&self, b: Block) -> Option<Block> {
        self.blocks[b].next.expand()
    }

    /// Block preceding `b` in the layout.
    pub fn prev_block(&self, b: Block) -> Option<Block> {
        self.blocks[b].prev.expand()
    }

    /// Blocks in layout order.
    pub fn block_layout(&self) -> Vec<Block> {
        let mut out = Vec::with_capacity(self.n_blocks as usize);
        let mut cur = self.first_block.expand();
        while let Some(b) = cur {
            out.push(b);
            cur = self.blocks[b].next.expand();
        }
        out
    }

    /// Append `b` to the layout.
    pub fn link_block_last(&mut self, b: Block) {
        debug_assert!(self.blocks[b].prev.is_none() && self.blocks[b].next.is_none());
        let last = self.last_block;
        self.blocks[b].prev = last;
        match last.expand() {
            Some(l) => self.blocks[l].next = b.into(),
            None => self.first_block = b.into(),
        }
        self.last_block = b.into();
    }

    /// Remove `b` from the layout. CFG edges are untouched.
    pub fn unlink_block(&mut self, b: Block) {
        match self.blocks[b].prev.expand() {
            Some(p) => self.blocks[p].next = self.blocks[b].next,
            None => self.first_block = self.blocks[b].next,
        }
        match self.blocks[b].next.expand() {
            Some(s) => self.blocks[s].prev = self.blocks[b].prev,
            None => self.last_block = self.blocks[b].prev,
        }
        self.blocks[b].prev = None.into();
        self.blocks[b].next = None.into();
        self.n_blocks -= 1;
    }

    /// Add a CFG edge `pred -> succ`.
    pub fn link_cfg(&mut self, pred: Block, succ: Block) {
        self.cfg.add_edge(pred, succ, ());
    }

    /// Branch condition of `b`.
    pub fn true_cond(&self, b: Block) -> Cond {
        self.blocks[b].true_cond
    }

    /// Set branch targets and condition of `b`.
    pub fn set_branch(&mut self, b: Block, cond: Cond, t: Option<Block>, f: Option<Block>) {
        self.blocks[b].true_cond = cond;
        self.blocks[b].true_target = t;
        self.blocks[b].false_target = f;
    }

    /// Taken target of `b`, when conditional.
    pub fn true_target(&self, b: Block) -> Option<Block> {
        self.blocks[b].true_target
    }

    /// Not-taken target of `b`, when conditional.
    pub fn false_target(&self, b: Block) -> Option<Block> {
        self.blocks[b].false_target
    }

    /// Number of phis in `b`.
    pub fn num_phis(&self, b: Block) -> u32 {
        self.blocks[b].n_phis
    }

    /// Number of body instructions in `b`.
    pub fn num_insts(&self, b: Block) -> u32 {
        self.blocks[b].n_insts
    }

    // ---------- instruction list walking ----------

    /// First body instruction of `b`.
    pub fn first_inst(&self, b: Block) -> Option<Inst> {
        self.blocks[b].first.expand()
    }

    /// Last body instruction of `b`.
    pub fn last_inst(&self, b: Block) -> Option<Inst> {
        self.blocks[b].last.expand()
    }

    /// First phi of `b`.
    pub fn first_phi(&self, b: Block) -> Option<Inst> {
        self.blocks[b].first_phi.expand()
    }

    /// Last phi of `b`.
    pub fn last_phi(&self, b: Block) -> Option<Inst> {
        self.blocks[b].last_phi.expand()
    }

    /// Instruction after `i` within its list.
    pub fn next_inst(&self, i: Inst) -> Option<Inst> {
        self.insts[i].next.expand()
    }

    /// Instruction before `i` within its list.
    pub fn prev_inst(&self, i: Inst) -> Option<Inst> {
        self.insts[i].prev.expand()
    }

    /// The phis of `b`, in order.
    pub fn phis(&self, b: Block) -> Vec<Inst> {
        let mut out = Vec::with_capacity(self.blocks[b].n_phis as usize);
        let mut cur = self.first_phi(b);
        while let Some(i) = cur {
            out.push(i);
            cur = self.next_inst(i);
        }
        out
    }

    /// The body instructions of `b`, in order.
    pub fn body(&self, b: Block) -> Vec<Inst> {
        let mut out = Vec::with_capacity(self.blocks[b].n_insts as usize);
        let mut cur = self.first_inst(b);
        while let Some(i) = cur {
            out.push(i);
            cur = self.next_inst(i);
        }
        out
    }

    // ---------- public instruction accessors ----------

    /// Operation of `i`.
    pub fn op(&self, i: Inst) -> Opcode {
        self.insts[i].op
    }

    /// Condition of `i`.
    pub fn cond(&self, i: Inst) -> Cond {
        self.insts[i].cond
    }

    /// Output register of `i` (virtual or hardware), `None` when the
    /// instruction produces nothing.
    pub fn def_reg(&self, i: Inst) -> Option<u32> {
        self.insts[i].reg
    }

    /// Block containing `i`.
    pub fn inst_block(&self, i: Inst) -> Block {
        self.insts[i].block
    }

    /// Operand at `idx`.
    pub fn arg(&self, i: Inst, idx: usize) -> &Arg {
        &self.insts[i].args[idx]
    }

    // ---------- loop analysis cache ----------

    /// (Re)compute loop information if the CFG changed since last time.
    pub fn analyze_loops(&mut self) -> CodegenResult<()> {
        if self.loop_info.is_none() || self.loop_version < self.cfg.version() {
            let entry = self.first_block.expand().expect("function has no blocks");
            let info = loop_analysis::analyze(&mut self.cfg, entry, self.n_blocks as usize)?;
            self.loop_info = Some(info);
            self.loop_version = self.cfg.version();
        }
        Ok(())
    }

    /// Loop nesting depth of `b`. Recomputes loop info if stale.
    pub fn loop_nest(&mut self, b: Block) -> u32 {
        self.analyze_loops().expect("irreducible control flow graph");
        loop_analysis::loop_nest(self.loop_info.as_ref().unwrap(), b)
    }

    /// Loop info of `b`; requires `analyze_loops` to have run.
    pub fn loop_info(&self, b: Block) -> &LoopInfo<Block> {
        &self.loop_info.as_ref().expect("loop analysis has not run")[b]
    }
}
