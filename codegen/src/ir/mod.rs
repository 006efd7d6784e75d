//! Typed SSA intermediate representation.
//!
//! A `TranslationUnit` holds data declarations and functions. Each function
//! owns its basic blocks and SSA nodes in arenas and maintains two graphs
//! over them: the CFG (block -> block, edges tagged with the branch target
//! they represent) and the SSA use-def graph (def -> use, edges tagged with
//! the operand index or phi-predecessor block). Every block carries a
//! sentinel `term` node whose single SSA operand is the branch condition or
//! return value; unconditional branches leave it without operands.
//!
//! Node constructors validate the typing rules on the spot, so an ill-typed
//! node never enters a function. Defs without uses are tracked on an
//! *unused list* (`call` and `store` are exempt, having side effects) that
//! `free_unused_nodes` drains transitively after the external optimisation
//! passes have run.

pub use self::types::Type;

pub mod print;
pub mod sim;
mod types;
mod validate;

use crate::entity::{entity_impl, EntityRef, PackedOption, PrimaryMap, SecondaryMap};
use crate::graph::Graph;
use core::fmt;

/// An opaque reference to an SSA node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "%");

/// An opaque reference to a basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "bb");

/// An opaque reference to a function of the translation unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// An opaque reference to a data declaration of the translation unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct DataId(u32);
entity_impl!(DataId, "data");

/// An IR operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum Opcode {
    Const,
    Undef,
    Phi,
    Add,
    Sub,
    Neg,
    Mul,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Shl,
    Lshr,
    Ashr,
    And,
    Not,
    Or,
    Xor,
    IcmpEq,
    IcmpNe,
    IcmpSlt,
    IcmpSle,
    IcmpSgt,
    IcmpSge,
    IcmpUlt,
    IcmpUle,
    IcmpUgt,
    IcmpUge,
    Trunc,
    Sext,
    Zext,
    Load,
    Store,
    AddrOf,
    Alloca,
    Call,
    GetParam,
    Br,
    Ret,
    Term,
}

impl Opcode {
    /// The textual mnemonic used by the IR printer.
    pub fn as_str(self) -> &'static str {
        use Opcode::*;
        match self {
            Const => "const",
            Undef => "undef",
            Phi => "phi",
            Add => "add",
            Sub => "sub",
            Neg => "neg",
            Mul => "mul",
            Udiv => "udiv",
            Sdiv => "sdiv",
            Urem => "urem",
            Srem => "srem",
            Shl => "shl",
            Lshr => "lshr",
            Ashr => "ashr",
            And => "and",
            Not => "not",
            Or => "or",
            Xor => "xor",
            IcmpEq => "icmp_eq",
            IcmpNe => "icmp_ne",
            IcmpSlt => "icmp_slt",
            IcmpSle => "icmp_sle",
            IcmpSgt => "icmp_sgt",
            IcmpSge => "icmp_sge",
            IcmpUlt => "icmp_ult",
            IcmpUle => "icmp_ule",
            IcmpUgt => "icmp_ugt",
            IcmpUge => "icmp_uge",
            Trunc => "trunc",
            Sext => "sext",
            Zext => "zext",
            Load => "load",
            Store => "store",
            AddrOf => "addr_of",
            Alloca => "alloca",
            Call => "call",
            GetParam => "getparam",
            Br => "br",
            Ret => "ret",
            Term => "term",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried on an SSA use-def edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Use {
    /// Ordinary operand at the given index.
    Arg(u32),
    /// Phi argument contributed by the given predecessor block.
    Phi(Block),
}

/// Payload carried on a CFG edge.
///
/// Unconditional branches and the false leg of conditional branches share
/// the `Default` tag; the true leg is tagged `True`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CfgTarget {
    /// Fall-through / false / unconditional target.
    Default,
    /// Taken target of a conditional branch.
    True,
}

/// How a block leaves the function.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TermKind {
    /// Branch (conditional or not) to other blocks.
    Br,
    /// Function return.
    Ret,
}

/// A function signature: return type, parameter types, variadic flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Return type, `Type::Void` for none.
    pub ret: Type,
    /// Parameter types in order.
    pub params: Vec<Type>,
    /// Whether extra arguments beyond `params` are accepted.
    pub variadic: bool,
}

impl Signature {
    /// A signature with the given return and parameter types.
    pub fn new(ret: Type, params: Vec<Type>) -> Self {
        Self {
            ret,
            params,
            variadic: false,
        }
    }
}

/// A named data object with optional initialiser bytes.
#[derive(Clone, Debug)]
pub struct DataDecl {
    /// Symbol name.
    pub name: String,
    /// Size in bytes.
    pub size: u32,
    /// Alignment in bytes; must be a power of two.
    pub align: u32,
    /// Initialiser; when present its length equals `size`.
    pub init: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
enum Payload {
    None,
    Const(u64),
    Alloca { size: u32, align: u32 },
    AddrOf(DataId),
    GetParam(u32),
    Call { target: FuncRef, sig: Signature },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Status {
    Used,
    Unused,
}

#[derive(Clone)]
struct NodeData {
    op: Opcode,
    ty: Type,
    block: Block,
    prev: PackedOption<Node>,
    next: PackedOption<Node>,
    depth: u32,
    status: Status,
    payload: Payload,
}

#[derive(Clone)]
struct BlockData {
    first_phi: PackedOption<Node>,
    last_phi: PackedOption<Node>,
    first: PackedOption<Node>,
    last: PackedOption<Node>,
    n_nodes: u32,
    term_kind: TermKind,
    term: PackedOption<Node>,
}

impl Default for BlockData {
    fn default() -> Self {
        Self {
            first_phi: None.into(),
            last_phi: None.into(),
            first: None.into(),
            last: None.into(),
            n_nodes: 0,
            term_kind: TermKind::Br,
            term: None.into(),
        }
    }
}

/// A translation unit: data declarations plus functions in order.
#[derive(Default)]
pub struct TranslationUnit {
    /// Data declarations.
    pub datas: PrimaryMap<DataId, DataDecl>,
    /// Functions, declarations and definitions alike.
    pub funcs: PrimaryMap<FuncRef, Function>,
}

impl TranslationUnit {
    /// Create an empty translation unit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data declaration.
    pub fn add_data(
        &mut self,
        name: &str,
        size: u32,
        align: u32,
        init: Option<Vec<u8>>,
    ) -> DataId {
        debug_assert!(init.as_ref().map_or(true, |i| i.len() == size as usize));
        self.datas.push(DataDecl {
            name: name.to_string(),
            size,
            align,
            init,
        })
    }

    /// Add a function with the given signature. It stays a declaration
    /// until blocks are added to it.
    pub fn add_func(&mut self, name: &str, sig: Signature) -> FuncRef {
        self.funcs.push(Function::new(name, sig))
    }
}

/// An IR function: blocks and SSA nodes plus the CFG and use-def graphs.
pub struct Function {
    /// Function name.
    pub name: String,
    /// Signature.
    pub sig: Signature,
    nodes: PrimaryMap<Node, NodeData>,
    blocks: PrimaryMap<Block, BlockData>,
    /// Control flow graph over blocks.
    pub cfg: Graph<Block, CfgTarget>,
    /// SSA use-def graph over nodes; an edge runs def -> use.
    pub ssa: Graph<Node, Use>,
    entry: PackedOption<Block>,
    exit: PackedOption<Block>,
    unused: Vec<Node>,
}

impl Function {
    /// Create an empty function (a declaration).
    pub fn new(name: &str, sig: Signature) -> Self {
        Self {
            name: name.to_string(),
            sig,
            nodes: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            cfg: Graph::new(),
            ssa: Graph::new(),
            entry: None.into(),
            exit: None.into(),
            unused: Vec::new(),
        }
    }

    /// Is this function a definition (has a body)?
    pub fn is_definition(&self) -> bool {
        self.entry.is_some()
    }

    /// The entry block. Panics on declarations.
    pub fn entry(&self) -> Block {
        self.entry.unwrap()
    }

    /// The exit block, once a return terminator has been built.
    pub fn exit(&self) -> Option<Block> {
        self.exit.expand()
    }

    /// Number of blocks created.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of node slots created (including removed ones).
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Create a new block. The first block created becomes the entry.
    pub fn add_block(&mut self) -> Block {
        let b = self.blocks.push(BlockData::default());
        self.cfg.set_sort_key(b, b.index() as i64);
        if self.entry.is_none() {
            self.entry = b.into();
        }
        let t = self.make_node(b, Opcode::Term, Type::I1, Payload::None);
        self.blocks[b].term = t.into();
        b
    }

    // ---------- node construction ----------

    fn make_node(&mut self, bb: Block, op: Opcode, ty: Type, payload: Payload) -> Node {
        let n = self.nodes.push(NodeData {
            op,
            ty,
            block: bb,
            prev: None.into(),
            next: None.into(),
            depth: 0,
            status: Status::Used,
            payload,
        });

        // Terminator-ish nodes order after everything else in their block's
        // SSA edge lists; ordinary nodes order by identity.
        let key = match op {
            Opcode::Br | Opcode::Ret | Opcode::Term => bb.index() as i64 * 0x10000,
            _ => n.index() as i64,
        };
        self.ssa.set_sort_key(n, key);

        if op != Opcode::Term {
            self.blocks[bb].n_nodes += 1;
            if op == Opcode::Phi {
                self.link_phi_last(n, bb);
            } else {
                let depth = self.blocks[bb]
                    .last
                    .expand()
                    .map_or(0, |l| self.nodes[l].depth)
                    + 0x10000;
                self.nodes[n].depth = depth;
                self.link_last(n, bb);
            }
            if op != Opcode::Store && op != Opcode::Call {
                self.mark_unused(n);
            }
        }

        n
    }

    fn add_arg(&mut self, n: Node, idx: u32, arg: Node) {
        if self.ssa.succs(arg).is_empty() {
            self.mark_used(arg);
        }
        self.ssa.add_edge(arg, n, Use::Arg(idx));
    }

    /// Build a node with no operands.
    pub fn build0(&mut self, bb: Block, op: Opcode, ty: Type) -> Node {
        let n = self.make_node(bb, op, ty, Payload::None);
        validate::validate_node(self, n);
        n
    }

    /// Build a node with one operand.
    pub fn build1(&mut self, bb: Block, op: Opcode, ty: Type, arg0: Node) -> Node {
        let n = self.make_node(bb, op, ty, Payload::None);
        self.add_arg(n, 0, arg0);
        validate::validate_node(self, n);
        n
    }

    /// Build a node with two operands.
    pub fn build2(&mut self, bb: Block, op: Opcode, ty: Type, arg0: Node, arg1: Node) -> Node {
        let n = self.make_node(bb, op, ty, Payload::None);
        self.add_arg(n, 0, arg0);
        self.add_arg(n, 1, arg1);
        validate::validate_node(self, n);
        n
    }

    /// Build a node with three operands.
    pub fn build3(
        &mut self,
        bb: Block,
        op: Opcode,
        ty: Type,
        arg0: Node,
        arg1: Node,
        arg2: Node,
    ) -> Node {
        let n = self.make_node(bb, op, ty, Payload::None);
        self.add_arg(n, 0, arg0);
        self.add_arg(n, 1, arg1);
        self.add_arg(n, 2, arg2);
        validate::validate_node(self, n);
        n
    }

    /// Build a constant. The value is truncated to the width of `ty`.
    pub fn build_const(&mut self, bb: Block, ty: Type, value: u64) -> Node {
        let masked = match ty {
            Type::I1 => u64::from(value != 0),
            Type::I8 | Type::I16 | Type::I32 | Type::P32 | Type::I64 | Type::P64 => {
                value & ty.mask()
            }
            Type::Void => panic!("void constant"),
        };
        let n = self.make_node(bb, Opcode::Const, ty, Payload::Const(masked));
        validate::validate_node(self, n);
        n
    }

    /// Build an undefined value.
    pub fn build_undef(&mut self, bb: Block, ty: Type) -> Node {
        self.build0(bb, Opcode::Undef, ty)
    }

    /// Build a stack allocation of `size` bytes aligned to `align`.
    pub fn build_alloca(&mut self, bb: Block, size: u32, align: u32) -> Node {
        let n = self.make_node(bb, Opcode::Alloca, Type::P32, Payload::Alloca { size, align });
        validate::validate_node(self, n);
        n
    }

    /// Build the address of a data symbol.
    pub fn build_addr_of(&mut self, bb: Block, data: DataId) -> Node {
        let n = self.make_node(bb, Opcode::AddrOf, Type::P32, Payload::AddrOf(data));
        validate::validate_node(self, n);
        n
    }

    /// Build a parameter read.
    pub fn build_getparam(&mut self, bb: Block, ty: Type, idx: u32) -> Node {
        let n = self.make_node(bb, Opcode::GetParam, ty, Payload::GetParam(idx));
        validate::validate_node(self, n);
        n
    }

    /// Build a call to `target`, whose signature the caller provides (the
    /// target may be the function under construction). The node's type is
    /// the signature's return type.
    pub fn build_call(
        &mut self,
        bb: Block,
        target: FuncRef,
        sig: &Signature,
        args: &[Node],
    ) -> Node {
        let n = self.make_node(
            bb,
            Opcode::Call,
            sig.ret,
            Payload::Call {
                target,
                sig: sig.clone(),
            },
        );
        for (i, &a) in args.iter().enumerate() {
            self.add_arg(n, i as u32, a);
        }
        validate::validate_node(self, n);
        n
    }

    /// Build a phi node. Arguments are attached with `add_phi_arg`.
    pub fn build_phi(&mut self, bb: Block, ty: Type) -> Node {
        let n = self.make_node(bb, Opcode::Phi, ty, Payload::None);
        validate::validate_node(self, n);
        n
    }

    /// Attach the value `arg`, contributed by predecessor `arg_bb`, to a phi.
    pub fn add_phi_arg(&mut self, phi: Node, arg_bb: Block, arg: Node) {
        debug_assert_eq!(self.nodes[phi].op, Opcode::Phi);
        if self.ssa.succs(arg).is_empty() {
            self.mark_used(arg);
        }
        self.ssa.add_edge(arg, phi, Use::Phi(arg_bb));
        validate::validate_node(self, phi);
    }

    // ---------- terminators ----------

    fn set_term(&mut self, bb: Block, value: Option<Node>) {
        let term = self.blocks[bb].term.unwrap();
        debug_assert_eq!(self.nodes[term].op, Opcode::Term);
        self.ssa.remove_preds(term);
        if let Some(n) = value {
            if self.ssa.succs(n).is_empty() {
                self.mark_used(n);
            }
            self.ssa.add_edge(n, term, Use::Arg(0));
        }
    }

    /// Terminate `bb` with an unconditional branch.
    pub fn build_br(&mut self, bb: Block, target: Block) {
        self.cfg.remove_succs(bb);
        self.blocks[bb].term_kind = TermKind::Br;
        self.set_term(bb, None);
        self.cfg.add_edge(bb, target, CfgTarget::Default);
    }

    /// Terminate `bb` with a conditional branch on `cond`.
    pub fn build_cond_br(&mut self, bb: Block, cond: Node, true_bb: Block, false_bb: Block) {
        self.cfg.remove_succs(bb);
        self.blocks[bb].term_kind = TermKind::Br;
        self.set_term(bb, Some(cond));
        self.cfg.add_edge(bb, true_bb, CfgTarget::True);
        self.cfg.add_edge(bb, false_bb, CfgTarget::Default);
    }

    /// Terminate `bb` with a void return, making it the exit block.
    pub fn build_ret(&mut self, bb: Block) {
        debug_assert!(self.exit.is_none());
        self.exit = bb.into();
        self.blocks[bb].term_kind = TermKind::Ret;
        self.set_term(bb, None);
    }

    /// Terminate `bb` with a value return, making it the exit block.
    pub fn build_value_ret(&mut self, bb: Block, value: Node) {
        debug_assert!(self.exit.is_none());
        self.exit = bb.into();
        self.blocks[bb].term_kind = TermKind::Ret;
        self.set_term(bb, Some(value));
    }

    /// The value feeding the terminator of `bb`: the branch condition or the
    /// returned value. `None` for unconditional branches and void returns.
    pub fn term_node(&self, bb: Block) -> Option<Node> {
        let term = self.blocks[bb].term.unwrap();
        self.ssa.preds(term).first().map(|&e| self.ssa.tail(e))
    }

    /// Terminator kind of `bb`.
    pub fn term_kind(&self, bb: Block) -> TermKind {
        self.blocks[bb].term_kind
    }

    /// Target of an unconditional branch.
    pub fn default_target(&self, bb: Block) -> Block {
        debug_assert_eq!(self.blocks[bb].term_kind, TermKind::Br);
        debug_assert!(self.term_node(bb).is_none());
        let succs = self.cfg.succs(bb);
        debug_assert_eq!(succs.len(), 1);
        self.cfg.head(succs[0])
    }

    fn find_target(&self, bb: Block, tag: CfgTarget) -> Block {
        debug_assert_eq!(self.blocks[bb].term_kind, TermKind::Br);
        debug_assert!(self.term_node(bb).is_some());
        for &e in self.cfg.succs(bb) {
            if *self.cfg.data(e) == tag {
                return self.cfg.head(e);
            }
        }
        panic!("block {} has no {:?} target", bb, tag);
    }

    /// Taken target of a conditional branch.
    pub fn true_target(&self, bb: Block) -> Block {
        self.find_target(bb, CfgTarget::True)
    }

    /// Not-taken target of a conditional branch.
    pub fn false_target(&self, bb: Block) -> Block {
        self.find_target(bb, CfgTarget::Default)
    }

    // ---------- accessors ----------

    /// Operation of `n`.
    pub fn op(&self, n: Node) -> Opcode {
        self.nodes[n].op
    }

    /// Type of `n`.
    pub fn ty(&self, n: Node) -> Type {
        self.nodes[n].ty
    }

    /// Block containing `n`.
    pub fn node_block(&self, n: Node) -> Block {
        self.nodes[n].block
    }

    /// Operands of a non-phi node, ordered by operand index.
    pub fn args(&self, n: Node) -> Vec<Node> {
        debug_assert!(self.nodes[n].op != Opcode::Phi);
        let preds = self.ssa.preds(n);
        let mut out: Vec<Option<Node>> = vec![None; preds.len()];
        for &e in preds {
            match *self.ssa.data(e) {
                Use::Arg(i) => out[i as usize] = Some(self.ssa.tail(e)),
                Use::Phi(_) => panic!("phi edge on non-phi node"),
            }
        }
        out.into_iter().map(|a| a.expect("operand slot gap")).collect()
    }

    /// Phi arguments as `(value, predecessor block)` pairs, in edge order.
    pub fn phi_args(&self, phi: Node) -> Vec<(Node, Block)> {
        debug_assert_eq!(self.nodes[phi].op, Opcode::Phi);
        self.ssa
            .preds(phi)
            .iter()
            .map(|&e| {
                let bb = match *self.ssa.data(e) {
                    Use::Phi(bb) => bb,
                    Use::Arg(_) => panic!("arg edge on phi node"),
                };
                (self.ssa.tail(e), bb)
            })
            .collect()
    }

    /// Nodes using `n`, in edge order.
    pub fn uses(&self, n: Node) -> Vec<Node> {
        self.ssa.succs(n).iter().map(|&e| self.ssa.head(e)).collect()
    }

    /// Constant payload zero-extended to 64 bits.
    pub fn const_u64(&self, n: Node) -> u64 {
        match self.nodes[n].payload {
            Payload::Const(v) => v,
            _ => panic!("{} is not a constant", n),
        }
    }

    /// Constant payload sign-extended to 64 bits.
    pub fn const_i64(&self, n: Node) -> i64 {
        let v = self.const_u64(n);
        match self.nodes[n].ty {
            Type::I8 => v as u8 as i8 as i64,
            Type::I16 => v as u16 as i16 as i64,
            Type::I32 | Type::P32 => v as u32 as i32 as i64,
            _ => v as i64,
        }
    }

    /// Size payload of an alloca.
    pub fn alloca_size(&self, n: Node) -> u32 {
        match self.nodes[n].payload {
            Payload::Alloca { size, .. } => size,
            _ => panic!("{} is not an alloca", n),
        }
    }

    /// Alignment payload of an alloca.
    pub fn alloca_align(&self, n: Node) -> u32 {
        match self.nodes[n].payload {
            Payload::Alloca { align, .. } => align,
            _ => panic!("{} is not an alloca", n),
        }
    }

    /// Data symbol referenced by an addr_of.
    pub fn addr_of_data(&self, n: Node) -> DataId {
        match self.nodes[n].payload {
            Payload::AddrOf(d) => d,
            _ => panic!("{} is not an addr_of", n),
        }
    }

    /// Parameter index of a getparam.
    pub fn getparam_index(&self, n: Node) -> u32 {
        match self.nodes[n].payload {
            Payload::GetParam(i) => i,
            _ => panic!("{} is not a getparam", n),
        }
    }

    /// Call target of a call node.
    pub fn call_target(&self, n: Node) -> FuncRef {
        match self.nodes[n].payload {
            Payload::Call { target, .. } => target,
            _ => panic!("{} is not a call", n),
        }
    }

    pub(crate) fn call_sig(&self, n: Node) -> &Signature {
        match &self.nodes[n].payload {
            Payload::Call { sig, .. } => sig,
            _ => panic!("{} is not a call", n),
        }
    }

    // ---------- iteration ----------

    /// Blocks reachable from the entry, in reverse post-order.
    pub fn rpo(&self) -> Vec<Block> {
        fn walk(
            f: &Function,
            b: Block,
            visited: &mut SecondaryMap<Block, bool>,
            out: &mut Vec<Block>,
        ) {
            if visited[b] {
                return;
            }
            visited[b] = true;
            for &e in f.cfg.succs(b) {
                walk(f, f.cfg.head(e), visited, out);
            }
            out.push(b);
        }

        let mut visited = SecondaryMap::new();
        let mut out = Vec::new();
        walk(self, self.entry(), &mut visited, &mut out);
        out.reverse();
        out
    }

    /// The nodes of `bb` in order: phis first, then the body.
    pub fn block_nodes(&self, bb: Block) -> Vec<Node> {
        let mut out = Vec::with_capacity(self.blocks[bb].n_nodes as usize);
        let mut cur = self.blocks[bb].first_phi.expand();
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].next.expand();
        }
        let mut cur = self.blocks[bb].first.expand();
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].next.expand();
        }
        out
    }

    /// The nodes of `bb` in the order the selector walks them: phis in
    /// reverse, then the body in reverse.
    pub fn block_nodes_rev(&self, bb: Block) -> Vec<Node> {
        let mut out = Vec::with_capacity(self.blocks[bb].n_nodes as usize);
        let mut cur = self.blocks[bb].last_phi.expand();
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].prev.expand();
        }
        let mut cur = self.blocks[bb].last.expand();
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].prev.expand();
        }
        out
    }

    // ---------- unused tracking and removal ----------

    fn mark_unused(&mut self, n: Node) {
        if matches!(self.nodes[n].op, Opcode::Call | Opcode::Store) {
            return;
        }
        debug_assert_eq!(self.nodes[n].status, Status::Used);
        self.unused.push(n);
        self.nodes[n].status = Status::Unused;
    }

    fn mark_used(&mut self, n: Node) {
        if matches!(self.nodes[n].op, Opcode::Call | Opcode::Store) {
            return;
        }
        debug_assert_eq!(self.nodes[n].status, Status::Unused);
        let i = self.unused.iter().position(|&u| u == n).unwrap();
        self.unused.remove(i);
        self.nodes[n].status = Status::Used;
    }

    /// Remove a def with no uses. Removing a def that still has uses is a
    /// bug and panics.
    pub fn remove(&mut self, n: Node) {
        assert!(
            self.ssa.succs(n).is_empty(),
            "cannot remove node {} which still has uses",
            n
        );
        if !matches!(self.nodes[n].op, Opcode::Call | Opcode::Store) {
            self.mark_used(n); // take it off the unused list
        }
        self.unlink_and_cascade(n);
    }

    fn unlink_and_cascade(&mut self, n: Node) {
        let bb = self.nodes[n].block;
        self.blocks[bb].n_nodes -= 1;
        if self.nodes[n].op == Opcode::Phi {
            self.unlink_phi(n);
        } else {
            self.unlink(n);
        }

        for &e in self.ssa.preds(n).to_vec().iter() {
            let arg = self.ssa.tail(e);
            if self.ssa.succs(arg).len() == 1 {
                self.mark_unused(arg);
            }
        }

        self.ssa.detach_node(n);
    }

    /// Rewrite every use of `old` to use `new` instead, preserving operand
    /// indices and phi-predecessor annotations, then move `new` up before
    /// its earliest in-block user if needed.
    pub fn replace(&mut self, old: Node, new: Node) {
        if !self.ssa.succs(old).is_empty() {
            self.mark_unused(old);
            if self.ssa.succs(new).is_empty() {
                self.mark_used(new);
            }
        }

        for &e in self.ssa.succs(old).to_vec().iter() {
            let succ = self.ssa.head(e);
            let data = *self.ssa.data(e);
            self.ssa.add_edge(new, succ, data);
            self.ssa.remove_edge(e);
            validate::validate_node(self, succ);
        }

        self.move_up_if_needed(new);
    }

    /// Drain the unused list, removing each def and transitively any
    /// operand that loses its last use.
    pub fn free_unused_nodes(&mut self) {
        loop {
            let n = match self.unused.first() {
                Some(&n) => n,
                None => break,
            };
            self.mark_used(n);
            self.unlink_and_cascade(n);
        }
    }

    // ---------- intra-block order ----------

    fn link_last(&mut self, n: Node, bb: Block) {
        debug_assert!(self.nodes[n].op != Opcode::Phi);
        debug_assert!(self.nodes[n].prev.is_none() && self.nodes[n].next.is_none());
        let last = self.blocks[bb].last;
        self.nodes[n].prev = last;
        match last.expand() {
            Some(l) => self.nodes[l].next = n.into(),
            None => self.blocks[bb].first = n.into(),
        }
        self.blocks[bb].last = n.into();
    }

    fn link_phi_last(&mut self, n: Node, bb: Block) {
        debug_assert_eq!(self.nodes[n].op, Opcode::Phi);
        let last = self.blocks[bb].last_phi;
        self.nodes[n].prev = last;
        match last.expand() {
            Some(l) => self.nodes[l].next = n.into(),
            None => self.blocks[bb].first_phi = n.into(),
        }
        self.blocks[bb].last_phi = n.into();
    }

    fn link_before(&mut self, n: Node, before: Node) {
        debug_assert!(self.nodes[n].op != Opcode::Phi);
        let bb = self.nodes[before].block;
        self.nodes[n].next = before.into();
        self.nodes[n].prev = self.nodes[before].prev;
        match self.nodes[before].prev.expand() {
            Some(p) => self.nodes[p].next = n.into(),
            None => self.blocks[bb].first = n.into(),
        }
        self.nodes[before].prev = n.into();
    }

    fn unlink(&mut self, n: Node) {
        debug_assert!(self.nodes[n].op != Opcode::Phi);
        let bb = self.nodes[n].block;
        match self.nodes[n].prev.expand() {
            Some(p) => self.nodes[p].next = self.nodes[n].next,
            None => self.blocks[bb].first = self.nodes[n].next,
        }
        match self.nodes[n].next.expand() {
            Some(s) => self.nodes[s].prev = self.nodes[n].prev,
            None => self.blocks[bb].last = self.nodes[n].prev,
        }
        self.nodes[n].prev = None.into();
        self.nodes[n].next = None.into();
    }

    fn unlink_phi(&mut self, n: Node) {
        debug_assert_eq!(self.nodes[n].op, Opcode::Phi);
        let bb = self.nodes[n].block;
        match self.nodes[n].prev.expand() {
            Some(p) => self.nodes[p].next = self.nodes[n].next,
            None => self.blocks[bb].first_phi = self.nodes[n].next,
        }
        match self.nodes[n].next.expand() {
            Some(s) => self.nodes[s].prev = self.nodes[n].prev,
            None => self.blocks[bb].last_phi = self.nodes[n].prev,
        }
        self.nodes[n].prev = None.into();
        self.nodes[n].next = None.into();
    }

    fn redist_depth(&mut self, bb: Block) {
        let mut depth = 0x10000;
        let mut cur = self.blocks[bb].first.expand();
        while let Some(n) = cur {
            self.nodes[n].depth = depth;
            depth += 0x10000;
            cur = self.nodes[n].next.expand();
        }
    }

    fn move_up_before(&mut self, before: Node, n: Node) {
        let bb = self.nodes[before].block;
        let gap = |f: &Self, b: Node| {
            f.nodes[b].depth - f.nodes[b].prev.expand().map_or(0, |p| f.nodes[p].depth)
        };

        let mut dist = gap(self, before);
        if dist < 2 {
            self.redist_depth(bb);
            dist = gap(self, before);
        }

        self.unlink(n);
        self.nodes[n].depth = self.nodes[before].depth - dist / 2;
        self.nodes[n].block = bb;
        self.link_before(n, before);

        for &e in self.ssa.preds(n).to_vec().iter() {
            let pred = self.ssa.tail(e);
            if self.nodes[pred].block == bb
                && self.nodes[pred].op != Opcode::Phi
                && self.nodes[pred].depth > self.nodes[n].depth
            {
                self.move_up_before(n, pred);
            }
        }
    }

    fn move_up_if_needed(&mut self, n: Node) {
        let bb = self.nodes[n].block;
        let mut min: Option<Node> = None;
        for &e in self.ssa.succs(n) {
            let succ = self.ssa.head(e);
            if self.nodes[succ].block == bb
                && self.nodes[succ].op != Opcode::Phi
                && self.nodes[succ].op != Opcode::Term
                && min.map_or(true, |m| self.nodes[succ].depth < self.nodes[m].depth)
            {
                min = Some(succ);
            }
        }

        if let Some(m) = min {
            if self.nodes[n].depth > self.nodes[m].depth {
                self.move_up_before(m, n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32_func() -> Function {
        Function::new("f", Signature::new(Type::I32, vec![Type::I32]))
    }

    #[test]
    fn build_and_order() {
        let mut f = i32_func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 1);
        let b = f.build_const(bb, Type::I32, 2);
        let s = f.build2(bb, Opcode::Add, Type::I32, a, b);
        f.build_value_ret(bb, s);

        assert_eq!(f.block_nodes(bb), vec![a, b, s]);
        assert_eq!(f.block_nodes_rev(bb), vec![s, b, a]);
        assert_eq!(f.args(s), vec![a, b]);
        assert_eq!(f.term_node(bb), Some(s));
        assert_eq!(f.term_kind(bb), TermKind::Ret);
        assert!(f.is_definition());
        assert_eq!(f.exit(), Some(bb));
    }

    #[test]
    fn cond_branch_targets() {
        let mut f = i32_func();
        let b0 = f.add_block();
        let b1 = f.add_block();
        let b2 = f.add_block();
        let p = f.build_getparam(b0, Type::I32, 0);
        let z = f.build_const(b0, Type::I32, 0);
        let c = f.build2(b0, Opcode::IcmpSgt, Type::I32, p, z);
        f.build_cond_br(b0, c, b1, b2);

        assert_eq!(f.true_target(b0), b1);
        assert_eq!(f.false_target(b0), b2);
        assert_eq!(f.term_node(b0), Some(c));
        assert_eq!(f.rpo()[0], b0);
    }

    #[test]
    fn unused_tracking() {
        let mut f = i32_func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 1);
        let b = f.build_const(bb, Type::I32, 2);
        let s = f.build2(bb, Opcode::Add, Type::I32, a, b);

        // a and b are used by s; s itself is unused.
        assert_eq!(f.unused, vec![s]);

        f.free_unused_nodes();
        assert!(f.block_nodes(bb).is_empty());
        assert!(f.unused.is_empty());
    }

    #[test]
    fn replace_rewrites_uses() {
        let mut f = i32_func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 1);
        let b = f.build_const(bb, Type::I32, 2);
        let s = f.build2(bb, Opcode::Add, Type::I32, a, a);
        f.build_value_ret(bb, s);

        f.replace(a, b);
        assert_eq!(f.args(s), vec![b, b]);
        assert!(f.uses(a).is_empty());
        // a lost its uses and is reclaimable.
        assert!(f.unused.contains(&a));
    }

    #[test]
    #[should_panic(expected = "cannot remove")]
    fn remove_used_def_panics() {
        let mut f = i32_func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 1);
        let b = f.build_const(bb, Type::I32, 2);
        let _ = f.build2(bb, Opcode::Add, Type::I32, a, b);
        f.remove(a);
    }
}
