//! Reference IR interpreter.
//!
//! Executes a function directly on the SSA form, with a sparse byte memory
//! that tracks per-byte validity so undefined values propagate the way the
//! `undef` op promises. The interpreter is the semantic oracle the back-end
//! tests compare against: whatever it computes, the compiled code must
//! compute too.

use super::{Block, DataId, FuncRef, Node, Opcode, TranslationUnit, Type};
use crate::entity::SecondaryMap;
use log::trace;
use std::collections::HashMap;

/// A simulated SSA value: raw bits plus a mask of undefined bits.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Value {
    /// The bits, zero-extended to 64.
    pub bits: u64,
    /// Mask of bits with undefined content.
    pub undef: u64,
}

impl Value {
    /// A fully-defined value.
    pub fn from_bits(bits: u64) -> Self {
        Self { bits, undef: 0 }
    }

    /// Is any bit covered by `ty` undefined?
    pub fn is_undef(&self, ty: Type) -> bool {
        self.undef & ty.mask() != 0
    }

    fn masked(self, ty: Type) -> Self {
        Self {
            bits: self.bits & ty.mask(),
            undef: self.undef & ty.mask(),
        }
    }
}

const PAGE: u64 = 256;

struct Page {
    bytes: [u8; PAGE as usize],
    valid: [u8; PAGE as usize],
}

/// Sparse byte-addressed memory with per-byte validity.
pub struct Memory {
    pages: HashMap<u64, Box<Page>>,
}

impl Memory {
    /// New memory with every byte unmapped (invalid).
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }

    /// Write one byte with its validity mask.
    pub fn write(&mut self, addr: u64, value: u8, valid: u8) {
        let page = self.pages.entry(addr / PAGE).or_insert_with(|| {
            Box::new(Page {
                bytes: [0; PAGE as usize],
                valid: [0; PAGE as usize],
            })
        });
        page.bytes[(addr % PAGE) as usize] = value;
        page.valid[(addr % PAGE) as usize] = valid;
    }

    /// Read one byte and its validity mask. Unmapped bytes read as invalid
    /// zero.
    pub fn read(&self, addr: u64) -> (u8, u8) {
        match self.pages.get(&(addr / PAGE)) {
            Some(p) => (
                p.bytes[(addr % PAGE) as usize],
                p.valid[(addr % PAGE) as usize],
            ),
            None => (0, 0),
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// Base address where data symbols are laid out.
pub const DATA_START: u32 = 0xe000_0000;
/// Base address of the simulated stack (allocas grow upwards from here).
pub const STACK_START: u32 = 0xf000_0000;

/// An interpreter instance over one translation unit.
pub struct Simulator<'a> {
    tu: &'a TranslationUnit,
    /// The simulated memory; public so tests can inspect data objects.
    pub mem: Memory,
    data_addr: SecondaryMap<DataId, u32>,
}

impl<'a> Simulator<'a> {
    /// Create a simulator, laying out the unit's data objects from
    /// `DATA_START` and writing their initialisers.
    pub fn new(tu: &'a TranslationUnit) -> Self {
        let mut mem = Memory::new();
        let mut data_addr = SecondaryMap::new();
        let mut dp = DATA_START;

        for (id, d) in tu.datas.iter() {
            assert!(d.align.is_power_of_two(), "data alignment not a power of two");
            dp = (dp + d.align - 1) & !(d.align - 1);
            data_addr[id] = dp;
            if let Some(init) = &d.init {
                for (i, &b) in init.iter().enumerate() {
                    mem.write(u64::from(dp) + i as u64, b, 0xff);
                }
            }
            dp += d.size;
        }

        Self { tu, mem, data_addr }
    }

    /// The address a data object was placed at.
    pub fn data_addr(&self, d: DataId) -> u32 {
        self.data_addr[d]
    }

    /// Run `func` with the given arguments and return its result.
    pub fn run(&mut self, func: FuncRef, args: &[Value]) -> Value {
        self.run_inner(func, STACK_START, args)
    }

    fn run_inner(&mut self, fref: FuncRef, mut sp: u32, fargs: &[Value]) -> Value {
        let tu: &TranslationUnit = self.tu;
        let f = &tu.funcs[fref];
        assert!(f.is_definition(), "simulating a declaration: {}", f.name);

        let mut values: SecondaryMap<Node, Value> = SecondaryMap::new();
        let mut bb = f.entry();
        let mut prev_bb: Option<Block> = None;

        loop {
            // Phi nodes read their inputs in parallel on block entry; the
            // new values are staged and only committed once the phi prefix
            // has been fully read.
            let mut staged: Vec<(Node, Value)> = Vec::new();
            let mut committed = false;

            for n in f.block_nodes(bb) {
                if f.op(n) != Opcode::Phi && !committed {
                    for &(phi, v) in &staged {
                        values[phi] = v;
                    }
                    committed = true;
                }

                let args = if f.op(n) == Opcode::Phi {
                    Vec::new()
                } else {
                    f.args(n)
                };
                let va: Vec<Value> = args.iter().map(|&a| values[a]).collect();
                let ty = f.ty(n);

                let v = match f.op(n) {
                    Opcode::AddrOf => Value::from_bits(u64::from(self.data_addr[f.addr_of_data(n)])),

                    Opcode::Alloca => {
                        let align = f.alloca_align(n);
                        sp = (sp + align - 1) & !(align - 1);
                        let v = Value::from_bits(u64::from(sp));
                        sp += f.alloca_size(n);
                        v
                    }

                    Opcode::Phi => {
                        let mut staged_v = None;
                        for (arg, arg_bb) in f.phi_args(n) {
                            if Some(arg_bb) == prev_bb {
                                staged_v = Some(values[arg]);
                                break;
                            }
                        }
                        staged.push((n, staged_v.expect("phi has no input for predecessor")));
                        continue;
                    }

                    Opcode::Const => Value::from_bits(f.const_u64(n)),

                    Opcode::Undef => Value {
                        bits: 0,
                        undef: u64::MAX,
                    },

                    Opcode::Load => {
                        let size = ty.bytes();
                        let mut bits = 0u64;
                        let mut undef = 0u64;
                        for i in 0..size {
                            let (b, valid) = self.mem.read(va[0].bits + u64::from(i));
                            bits |= u64::from(b) << (8 * i);
                            if valid != 0xff {
                                undef |= 0xffu64 << (8 * i);
                            }
                        }
                        Value { bits, undef }.masked(ty)
                    }

                    Opcode::Store => {
                        let size = ty.bytes();
                        for i in 0..size {
                            let byte = (va[1].bits >> (8 * i)) as u8;
                            let valid = !((va[1].undef >> (8 * i)) as u8);
                            self.mem.write(va[0].bits + u64::from(i), byte, valid);
                        }
                        va[1]
                    }

                    Opcode::Call => {
                        let r = self.run_inner(f.call_target(n), sp, &va);
                        if ty != Type::Void {
                            r.masked(ty)
                        } else {
                            Value::default()
                        }
                    }

                    Opcode::GetParam => {
                        let idx = f.getparam_index(n) as usize;
                        assert!(idx < fargs.len(), "missing argument {} to {}", idx, f.name);
                        fargs[idx].masked(ty)
                    }

                    Opcode::Add => binu(ty, &va, |a, b| a.wrapping_add(b)),
                    Opcode::Sub => binu(ty, &va, |a, b| a.wrapping_sub(b)),
                    Opcode::Neg => unu(ty, &va, |a| a.wrapping_neg()),
                    Opcode::Mul => binu(ty, &va, |a, b| a.wrapping_mul(b)),
                    Opcode::Udiv => binu(ty, &va, |a, b| a / b),
                    Opcode::Sdiv => bins(ty, &va, |a, b| a.wrapping_div(b) as u64),
                    Opcode::Urem => binu(ty, &va, |a, b| a % b),
                    Opcode::Srem => bins(ty, &va, |a, b| a.wrapping_rem(b) as u64),
                    Opcode::And => binu(ty, &va, |a, b| a & b),
                    Opcode::Or => binu(ty, &va, |a, b| a | b),
                    Opcode::Xor => binu(ty, &va, |a, b| a ^ b),
                    Opcode::Not => unu(ty, &va, |a| !a),
                    Opcode::Shl => binu(ty, &va, |a, b| a.wrapping_shl(b as u32)),
                    Opcode::Lshr => binu(ty, &va, |a, b| a.wrapping_shr(b as u32)),
                    Opcode::Ashr => bins(ty, &va, |a, b| a.wrapping_shr(b as u32) as u64),

                    Opcode::IcmpEq => binu(ty, &va, |a, b| u64::from(a == b)),
                    Opcode::IcmpNe => binu(ty, &va, |a, b| u64::from(a != b)),
                    Opcode::IcmpSlt => bins(ty, &va, |a, b| u64::from(a < b)),
                    Opcode::IcmpSle => bins(ty, &va, |a, b| u64::from(a <= b)),
                    Opcode::IcmpSgt => bins(ty, &va, |a, b| u64::from(a > b)),
                    Opcode::IcmpSge => bins(ty, &va, |a, b| u64::from(a >= b)),
                    Opcode::IcmpUlt => binu(ty, &va, |a, b| u64::from(a < b)),
                    Opcode::IcmpUle => binu(ty, &va, |a, b| u64::from(a <= b)),
                    Opcode::IcmpUgt => binu(ty, &va, |a, b| u64::from(a > b)),
                    Opcode::IcmpUge => binu(ty, &va, |a, b| u64::from(a >= b)),

                    Opcode::Sext => {
                        let from = f.ty(args[0]);
                        let widened = sext(va[0].bits, from) as u64;
                        Value {
                            bits: widened,
                            undef: if va[0].undef & from.mask() != 0 {
                                ty.mask()
                            } else {
                                0
                            },
                        }
                        .masked(ty)
                    }
                    Opcode::Zext | Opcode::Trunc => {
                        let from = f.ty(args[0]);
                        Value {
                            bits: va[0].bits & from.mask(),
                            undef: if va[0].undef & from.mask() != 0 {
                                ty.mask()
                            } else {
                                0
                            },
                        }
                        .masked(ty)
                    }

                    Opcode::Br | Opcode::Ret | Opcode::Term => {
                        panic!("terminator ops never appear in a block body")
                    }
                };

                trace!("sim {}: {} = {:#x}", f.name, n, v.bits);
                values[n] = v;
            }

            if !committed {
                for &(phi, v) in &staged {
                    values[phi] = v;
                }
            }

            if Some(bb) != f.exit() {
                prev_bb = Some(bb);
                bb = match f.term_node(bb) {
                    Some(cond) => {
                        let taken = values[cond].bits & f.ty(cond).mask() != 0;
                        if taken {
                            f.true_target(bb)
                        } else {
                            f.false_target(bb)
                        }
                    }
                    None => f.default_target(bb),
                };
            } else {
                return match f.term_node(bb) {
                    Some(v) => values[v].masked(f.sig.ret),
                    None => Value::default(),
                };
            }
        }
    }
}

fn width_bits(ty: Type) -> u32 {
    ty.bytes() * 8
}

fn sext(bits: u64, ty: Type) -> i64 {
    let w = width_bits(ty);
    if w == 64 {
        bits as i64
    } else {
        let shift = 64 - w;
        ((bits << shift) as i64) >> shift
    }
}

fn binu(ty: Type, va: &[Value], op: impl Fn(u64, u64) -> u64) -> Value {
    Value {
        bits: op(va[0].bits & ty.mask(), va[1].bits & ty.mask()),
        undef: va[0].undef | va[1].undef,
    }
    .masked(ty)
}

fn bins(ty: Type, va: &[Value], op: impl Fn(i64, i64) -> u64) -> Value {
    Value {
        bits: op(sext(va[0].bits, ty), sext(va[1].bits, ty)),
        undef: va[0].undef | va[1].undef,
    }
    .masked(ty)
}

fn unu(ty: Type, va: &[Value], op: impl Fn(u64) -> u64) -> Value {
    Value {
        bits: op(va[0].bits & ty.mask()),
        undef: va[0].undef,
    }
    .masked(ty)
}
