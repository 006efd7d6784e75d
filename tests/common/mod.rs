//! Shared fixtures for the end-to-end tests: the corpus programs built as
//! IR the way the front end would emit them (locals in stack slots, loops
//! as conditional branches), plus pipeline and oracle helpers.

#![allow(dead_code)]

use mycc_codegen::cg;
use mycc_codegen::ir::sim::{Simulator, Value};
use mycc_codegen::ir::{self, Block, Function, FuncRef, Node, Opcode, Signature, Type};
use mycc_codegen::{iselect, predication, regalloc};

/// Run the whole back end on an IR unit.
pub fn compile(tu: &ir::TranslationUnit, max_regs: u32, predicate: bool) -> cg::TranslationUnit {
    let mut ctu = iselect::run(tu).expect("instruction selection failed");
    regalloc::run_tu(&mut ctu, max_regs).expect("register allocation failed");
    if predicate {
        predication::run_tu(&mut ctu);
    }
    ctu
}

/// Reference result: simulate the IR.
pub fn ir_result(tu: &ir::TranslationUnit, func: FuncRef, args: &[u32]) -> u32 {
    let vals: Vec<Value> = args.iter().map(|&a| Value::from_bits(u64::from(a))).collect();
    let mut sim = Simulator::new(tu);
    sim.run(func, &vals).bits as u32
}

/// Compiled result: interpret the allocated cg code.
pub fn cg_result(ctu: &cg::TranslationUnit, name: &str, args: &[u32]) -> u32 {
    let mut interp = cg::interp::Interp::new(ctu);
    interp.run(name, args)
}

/// Emit the unit into a string.
pub fn asm_string(ctu: &cg::TranslationUnit) -> String {
    let mut out = Vec::new();
    cg::emit::write_tu(&mut out, ctu).unwrap();
    String::from_utf8(out).unwrap()
}

// ---------------------------------------------------------------------
// Small IR building helpers. Locals are 4-byte stack slots, all values
// are i32 unless a pointer is involved.
// ---------------------------------------------------------------------

pub struct B<'a> {
    pub f: &'a mut Function,
}

impl<'a> B<'a> {
    pub fn new(f: &'a mut Function) -> Self {
        Self { f }
    }

    pub fn c(&mut self, bb: Block, v: u32) -> Node {
        self.f.build_const(bb, Type::I32, u64::from(v))
    }

    pub fn slot(&mut self, bb: Block) -> Node {
        self.f.build_alloca(bb, 4, 4)
    }

    pub fn load(&mut self, bb: Block, addr: Node) -> Node {
        self.f.build1(bb, Opcode::Load, Type::I32, addr)
    }

    pub fn store(&mut self, bb: Block, addr: Node, v: Node) {
        self.f.build2(bb, Opcode::Store, Type::I32, addr, v);
    }

    pub fn bin(&mut self, bb: Block, op: Opcode, a: Node, b: Node) -> Node {
        self.f.build2(bb, op, Type::I32, a, b)
    }

    pub fn bini(&mut self, bb: Block, op: Opcode, a: Node, b: u32) -> Node {
        let b = self.c(bb, b);
        self.bin(bb, op, a, b)
    }

    /// `base + index * 4` as a pointer.
    pub fn elem(&mut self, bb: Block, base: Node, index: Node) -> Node {
        let off = self.bini(bb, Opcode::Mul, index, 4);
        self.f.build2(bb, Opcode::Add, Type::P32, base, off)
    }

    /// Spill a parameter into a fresh slot, front-end style.
    pub fn param_slot(&mut self, bb: Block, ty: Type, idx: u32) -> Node {
        let p = self.f.build_getparam(bb, ty, idx);
        let s = self.f.build_alloca(bb, 4, 4);
        self.f.build2(bb, Opcode::Store, ty, s, p);
        s
    }

    pub fn loadp(&mut self, bb: Block, addr: Node) -> Node {
        self.f.build1(bb, Opcode::Load, Type::P32, addr)
    }
}

/// Open a canonical counted loop `for (*i = init; *i < *limit; ++*i)`.
/// Terminates `cur`, creates header/body/latch-free exit blocks, and leaves
/// the body unterminated; `close_loop` seals it.
pub struct Loop {
    pub header: Block,
    pub body: Block,
    pub exit: Block,
    i_slot: Node,
}

pub fn open_loop(b: &mut B, cur: Block, i_slot: Node, limit_slot: Node) -> Loop {
    let zero = b.c(cur, 0);
    b.store(cur, i_slot, zero);

    let header = b.f.add_block();
    let body = b.f.add_block();
    let exit = b.f.add_block();
    b.f.build_br(cur, header);

    let iv = b.load(header, i_slot);
    let lim = b.load(header, limit_slot);
    let c = b.bin(header, Opcode::IcmpSlt, iv, lim);
    b.f.build_cond_br(header, c, body, exit);

    Loop {
        header,
        body,
        exit,
        i_slot,
    }
}

pub fn close_loop(b: &mut B, lp: &Loop, from: Block) {
    let iv = b.load(from, lp.i_slot);
    let inc = b.bini(from, Opcode::Add, iv, 1);
    b.store(from, lp.i_slot, inc);
    b.f.build_br(from, lp.header);
}

// ---------------------------------------------------------------------
// S1: fibonacci.
// ---------------------------------------------------------------------

/// The fibonacci corpus program: `non_recursive` fills a 16-element array
/// right to left, `run_test` returns `r[0]+r[4]+r[9]+r[14]`.
pub fn fib_tu() -> (ir::TranslationUnit, FuncRef) {
    let mut tu = ir::TranslationUnit::new();

    let nr_sig = Signature::new(Type::Void, vec![Type::I32, Type::P32]);
    let nr = tu.add_func("non_recursive", nr_sig.clone());
    {
        let f = &mut tu.funcs[nr];
        let mut b = B::new(f);

        let entry = b.f.add_block();
        let n_slot = b.param_slot(entry, Type::I32, 0);
        let res_slot = b.param_slot(entry, Type::P32, 1);
        let first = b.slot(entry);
        let second = b.slot(entry);
        let sum = b.slot(entry);
        let zero = b.c(entry, 0);
        b.store(entry, first, zero);
        let one = b.c(entry, 1);
        b.store(entry, second, one);

        let header = b.f.add_block();
        let body = b.f.add_block();
        let exit = b.f.add_block();
        b.f.build_br(entry, header);

        let n = b.load(header, n_slot);
        let zero = b.c(header, 0);
        let c = b.bin(header, Opcode::IcmpSgt, n, zero);
        b.f.build_cond_br(header, c, body, exit);

        // sum = first + second; first = second; second = sum;
        let fv = b.load(body, first);
        let sv = b.load(body, second);
        let sum_v = b.bin(body, Opcode::Add, fv, sv);
        b.store(body, sum, sum_v);
        let sv2 = b.load(body, second);
        b.store(body, first, sv2);
        let sum2 = b.load(body, sum);
        b.store(body, second, sum2);

        // res[--n] = sum;
        let n2 = b.load(body, n_slot);
        let n3 = b.bini(body, Opcode::Sub, n2, 1);
        b.store(body, n_slot, n3);
        let res = b.loadp(body, res_slot);
        let addr = b.elem(body, res, n3);
        let sum3 = b.load(body, sum);
        b.store(body, addr, sum3);
        b.f.build_br(body, header);

        b.f.build_ret(exit);
    }

    let rt = tu.add_func("run_test", Signature::new(Type::I32, vec![]));
    {
        let f = &mut tu.funcs[rt];
        let mut b = B::new(f);
        let bb = b.f.add_block();

        let r = b.f.build_alloca(bb, 64, 4);
        let sixteen = b.c(bb, 16);
        b.f.build_call(bb, nr, &nr_sig, &[sixteen, r]);

        let mut acc: Option<Node> = None;
        for idx in [0u32, 4, 9, 14] {
            let i = b.c(bb, idx);
            let addr = b.elem(bb, r, i);
            let v = b.load(bb, addr);
            acc = Some(match acc {
                None => v,
                Some(a) => b.bin(bb, Opcode::Add, a, v),
            });
        }
        let total = acc.unwrap();
        b.f.build_value_ret(bb, total);
    }

    (tu, rt)
}

/// Fibonacci in register form: the loop state flows through phis instead
/// of stack slots, exercising phi lifting, coalescing, and deconstruction.
pub fn fib_ssa_tu() -> (ir::TranslationUnit, FuncRef) {
    let mut tu = ir::TranslationUnit::new();

    let nr_sig = Signature::new(Type::Void, vec![Type::I32, Type::P32]);
    let nr = tu.add_func("fib_ssa", nr_sig.clone());
    {
        let f = &mut tu.funcs[nr];

        let entry = f.add_block();
        let header = f.add_block();
        let body = f.add_block();
        let exit = f.add_block();

        let n0 = f.build_getparam(entry, Type::I32, 0);
        let res = f.build_getparam(entry, Type::P32, 1);
        let zero = f.build_const(entry, Type::I32, 0);
        let one = f.build_const(entry, Type::I32, 1);
        f.build_br(entry, header);

        let n_phi = f.build_phi(header, Type::I32);
        let first_phi = f.build_phi(header, Type::I32);
        let second_phi = f.build_phi(header, Type::I32);
        let zero2 = f.build_const(header, Type::I32, 0);
        let c = f.build2(header, Opcode::IcmpSgt, Type::I32, n_phi, zero2);
        f.build_cond_br(header, c, body, exit);

        let sum = f.build2(body, Opcode::Add, Type::I32, first_phi, second_phi);
        let n_dec = {
            let one_b = f.build_const(body, Type::I32, 1);
            f.build2(body, Opcode::Sub, Type::I32, n_phi, one_b)
        };
        let four = f.build_const(body, Type::I32, 4);
        let off = f.build2(body, Opcode::Mul, Type::I32, n_dec, four);
        let addr = f.build2(body, Opcode::Add, Type::P32, res, off);
        f.build2(body, Opcode::Store, Type::I32, addr, sum);
        f.build_br(body, header);

        f.add_phi_arg(n_phi, entry, n0);
        f.add_phi_arg(n_phi, body, n_dec);
        f.add_phi_arg(first_phi, entry, zero);
        f.add_phi_arg(first_phi, body, second_phi);
        f.add_phi_arg(second_phi, entry, one);
        f.add_phi_arg(second_phi, body, sum);

        f.build_ret(exit);
    }

    let rt = tu.add_func("run_test", Signature::new(Type::I32, vec![]));
    {
        let f = &mut tu.funcs[rt];
        let mut b = B::new(f);
        let bb = b.f.add_block();

        let r = b.f.build_alloca(bb, 64, 4);
        let sixteen = b.c(bb, 16);
        b.f.build_call(bb, nr, &nr_sig, &[sixteen, r]);

        let mut acc: Option<Node> = None;
        for idx in [0u32, 4, 9, 14] {
            let i = b.c(bb, idx);
            let addr = b.elem(bb, r, i);
            let v = b.load(bb, addr);
            acc = Some(match acc {
                None => v,
                Some(a) => b.bin(bb, Opcode::Add, a, v),
            });
        }
        let total = acc.unwrap();
        b.f.build_value_ret(bb, total);
    }

    (tu, rt)
}

// ---------------------------------------------------------------------
// S2: matrix multiply, add-constant, running sum with clip.
// ---------------------------------------------------------------------

pub fn matrix_tu() -> (ir::TranslationUnit, FuncRef) {
    let mut tu = ir::TranslationUnit::new();

    // matrix_mul_matrix(N, C, A, B): C = A * B
    let mul_sig = Signature::new(Type::Void, vec![Type::I32, Type::P32, Type::P32, Type::P32]);
    let mul = tu.add_func("matrix_mul_matrix", mul_sig.clone());
    {
        let f = &mut tu.funcs[mul];
        let mut b = B::new(f);
        let entry = b.f.add_block();
        let n_slot = b.param_slot(entry, Type::I32, 0);
        let c_slot = b.param_slot(entry, Type::P32, 1);
        let a_slot = b.param_slot(entry, Type::P32, 2);
        let b_slot = b.param_slot(entry, Type::P32, 3);
        let i_slot = b.slot(entry);
        let j_slot = b.slot(entry);
        let k_slot = b.slot(entry);

        let li = open_loop(&mut b, entry, i_slot, n_slot);
        let lj = open_loop(&mut b, li.body, j_slot, n_slot);

        // C[i*N+j] = 0
        let jb = lj.body;
        let iv = b.load(jb, i_slot);
        let nv = b.load(jb, n_slot);
        let jv = b.load(jb, j_slot);
        let in_ = b.bin(jb, Opcode::Mul, iv, nv);
        let ij = b.bin(jb, Opcode::Add, in_, jv);
        let cp = b.loadp(jb, c_slot);
        let c_addr = b.elem(jb, cp, ij);
        let zero = b.c(jb, 0);
        b.store(jb, c_addr, zero);

        let lk = open_loop(&mut b, jb, k_slot, n_slot);

        // C[i*N+j] += A[i*N+k] * B[k*N+j]
        let kb = lk.body;
        let iv = b.load(kb, i_slot);
        let nv = b.load(kb, n_slot);
        let jv = b.load(kb, j_slot);
        let kv = b.load(kb, k_slot);
        let in_ = b.bin(kb, Opcode::Mul, iv, nv);
        let ij = b.bin(kb, Opcode::Add, in_, jv);
        let ik = b.bin(kb, Opcode::Add, in_, kv);
        let kn = b.bin(kb, Opcode::Mul, kv, nv);
        let kj = b.bin(kb, Opcode::Add, kn, jv);

        let ap = b.loadp(kb, a_slot);
        let a_addr = b.elem(kb, ap, ik);
        let av = b.load(kb, a_addr);
        let bp = b.loadp(kb, b_slot);
        let b_addr = b.elem(kb, bp, kj);
        let bv = b.load(kb, b_addr);
        let prod = b.bin(kb, Opcode::Mul, av, bv);

        let cp = b.loadp(kb, c_slot);
        let c_addr = b.elem(kb, cp, ij);
        let cv = b.load(kb, c_addr);
        let acc = b.bin(kb, Opcode::Add, cv, prod);
        b.store(kb, c_addr, acc);

        close_loop(&mut b, &lk, kb);
        close_loop(&mut b, &lj, lk.exit);
        close_loop(&mut b, &li, lj.exit);
        b.f.build_ret(li.exit);
    }

    // matrix_add_const(N, A, val)
    let add_sig = Signature::new(Type::Void, vec![Type::I32, Type::P32, Type::I32]);
    let addc = tu.add_func("matrix_add_const", add_sig.clone());
    {
        let f = &mut tu.funcs[addc];
        let mut b = B::new(f);
        let entry = b.f.add_block();
        let n_slot = b.param_slot(entry, Type::I32, 0);
        let a_slot = b.param_slot(entry, Type::P32, 1);
        let v_slot = b.param_slot(entry, Type::I32, 2);
        let i_slot = b.slot(entry);
        let j_slot = b.slot(entry);

        let li = open_loop(&mut b, entry, i_slot, n_slot);
        let lj = open_loop(&mut b, li.body, j_slot, n_slot);

        let jb = lj.body;
        let iv = b.load(jb, i_slot);
        let nv = b.load(jb, n_slot);
        let jv = b.load(jb, j_slot);
        let in_ = b.bin(jb, Opcode::Mul, iv, nv);
        let ij = b.bin(jb, Opcode::Add, in_, jv);
        let ap = b.loadp(jb, a_slot);
        let addr = b.elem(jb, ap, ij);
        let old = b.load(jb, addr);
        let vv = b.load(jb, v_slot);
        let new = b.bin(jb, Opcode::Add, old, vv);
        b.store(jb, addr, new);

        close_loop(&mut b, &lj, jb);
        close_loop(&mut b, &li, lj.exit);
        b.f.build_ret(li.exit);
    }

    // matrix_sum(N, C, clipval) -> score
    let sum_sig = Signature::new(Type::I32, vec![Type::I32, Type::P32, Type::I32]);
    let msum = tu.add_func("matrix_sum", sum_sig.clone());
    {
        let f = &mut tu.funcs[msum];
        let mut b = B::new(f);
        let entry = b.f.add_block();
        let n_slot = b.param_slot(entry, Type::I32, 0);
        let c_slot = b.param_slot(entry, Type::P32, 1);
        let clip_slot = b.param_slot(entry, Type::I32, 2);
        let tmp = b.slot(entry);
        let prev = b.slot(entry);
        let cur = b.slot(entry);
        let ret = b.slot(entry);
        let i_slot = b.slot(entry);
        let j_slot = b.slot(entry);
        for s in [tmp, prev, cur, ret] {
            let z = b.c(entry, 0);
            b.store(entry, s, z);
        }

        let li = open_loop(&mut b, entry, i_slot, n_slot);
        let lj = open_loop(&mut b, li.body, j_slot, n_slot);

        // cur = C[i*N+j]; tmp += cur;
        let jb = lj.body;
        let iv = b.load(jb, i_slot);
        let nv = b.load(jb, n_slot);
        let jv = b.load(jb, j_slot);
        let in_ = b.bin(jb, Opcode::Mul, iv, nv);
        let ij = b.bin(jb, Opcode::Add, in_, jv);
        let cp = b.loadp(jb, c_slot);
        let addr = b.elem(jb, cp, ij);
        let cv = b.load(jb, addr);
        b.store(jb, cur, cv);
        let tv = b.load(jb, tmp);
        let t2 = b.bin(jb, Opcode::Add, tv, cv);
        b.store(jb, tmp, t2);

        // if (tmp > clipval) { ret += 10; tmp = 0; }
        // else ret += (cur > prev) ? 1 : 0;
        let clipped = b.f.add_block();
        let not_clipped = b.f.add_block();
        let bump = b.f.add_block();
        let join = b.f.add_block();

        let clip = b.load(jb, clip_slot);
        let over = b.bin(jb, Opcode::IcmpSgt, t2, clip);
        b.f.build_cond_br(jb, over, clipped, not_clipped);

        let rv = b.load(clipped, ret);
        let r10 = b.bini(clipped, Opcode::Add, rv, 10);
        b.store(clipped, ret, r10);
        let z = b.c(clipped, 0);
        b.store(clipped, tmp, z);
        b.f.build_br(clipped, join);

        let cv2 = b.load(not_clipped, cur);
        let pv = b.load(not_clipped, prev);
        let rising = b.bin(not_clipped, Opcode::IcmpSgt, cv2, pv);
        b.f.build_cond_br(not_clipped, rising, bump, join);

        let rv2 = b.load(bump, ret);
        let r1 = b.bini(bump, Opcode::Add, rv2, 1);
        b.store(bump, ret, r1);
        b.f.build_br(bump, join);

        // prev = cur
        let cv3 = b.load(join, cur);
        b.store(join, prev, cv3);

        close_loop(&mut b, &lj, join);
        close_loop(&mut b, &li, lj.exit);

        let result = b.load(li.exit, ret);
        b.f.build_value_ret(li.exit, result);
    }

    // run_test: a[i][j] = 17i + 2j, b[i][j] = 34i + 6j, C = A*B, +10, score
    let rt = tu.add_func("run_test", Signature::new(Type::I32, vec![]));
    {
        let f = &mut tu.funcs[rt];
        let mut b = B::new(f);
        let entry = b.f.add_block();
        let a = b.f.build_alloca(entry, 64, 4);
        let bb_arr = b.f.build_alloca(entry, 64, 4);
        let c = b.f.build_alloca(entry, 64, 4);
        let i_slot = b.slot(entry);
        let j_slot = b.slot(entry);
        let four_slot = b.slot(entry);
        let four = b.c(entry, 4);
        b.store(entry, four_slot, four);

        let li = open_loop(&mut b, entry, i_slot, four_slot);
        let lj = open_loop(&mut b, li.body, j_slot, four_slot);

        let jb = lj.body;
        let iv = b.load(jb, i_slot);
        let jv = b.load(jb, j_slot);
        let i4 = b.bini(jb, Opcode::Mul, iv, 4);
        let ij = b.bin(jb, Opcode::Add, i4, jv);

        let i17 = b.bini(jb, Opcode::Mul, iv, 17);
        let j2 = b.bini(jb, Opcode::Mul, jv, 2);
        let av = b.bin(jb, Opcode::Add, i17, j2);
        let a_addr = b.elem(jb, a, ij);
        b.store(jb, a_addr, av);

        let i34 = b.bini(jb, Opcode::Mul, iv, 34);
        let j6 = b.bini(jb, Opcode::Mul, jv, 6);
        let bv = b.bin(jb, Opcode::Add, i34, j6);
        let b_addr = b.elem(jb, bb_arr, ij);
        b.store(jb, b_addr, bv);

        close_loop(&mut b, &lj, jb);
        close_loop(&mut b, &li, lj.exit);

        let tail = li.exit;
        let four2 = b.c(tail, 4);
        b.f.build_call(tail, mul, &mul_sig, &[four2, c, a, bb_arr]);
        let four3 = b.c(tail, 4);
        let ten = b.c(tail, 10);
        b.f.build_call(tail, addc, &add_sig, &[four3, c, ten]);
        let four4 = b.c(tail, 4);
        let clip = b.c(tail, 0x8800);
        let score = b.f.build_call(tail, msum, &sum_sig, &[four4, c, clip]);
        b.f.build_value_ret(tail, score);
    }

    (tu, rt)
}

// ---------------------------------------------------------------------
// S3: byte-wise CRC-16 over four words.
// ---------------------------------------------------------------------

pub fn crc_tu() -> (ir::TranslationUnit, FuncRef) {
    let mut tu = ir::TranslationUnit::new();

    // crcu8(data, crc) -> crc
    let crcu8_sig = Signature::new(Type::I32, vec![Type::I32, Type::I32]);
    let crcu8 = tu.add_func("crcu8", crcu8_sig.clone());
    {
        let f = &mut tu.funcs[crcu8];
        let mut b = B::new(f);
        let entry = b.f.add_block();
        let data = b.param_slot(entry, Type::I32, 0);
        let crc = b.param_slot(entry, Type::I32, 1);
        let carry = b.slot(entry);
        let i_slot = b.slot(entry);
        let eight_slot = b.slot(entry);
        let eight = b.c(entry, 8);
        b.store(entry, eight_slot, eight);

        let li = open_loop(&mut b, entry, i_slot, eight_slot);
        let body = li.body;

        // x16 = (data & 1) ^ (crc & 1); data >>= 1;
        let dv = b.load(body, data);
        let d1 = b.bini(body, Opcode::And, dv, 1);
        let cv = b.load(body, crc);
        let c1 = b.bini(body, Opcode::And, cv, 1);
        let x16 = b.bin(body, Opcode::Xor, d1, c1);
        let d2 = b.bini(body, Opcode::Lshr, dv, 1);
        b.store(body, data, d2);

        // if (x16 == 1) { crc ^= 0x4002; carry = 1; } else carry = 0;
        let set = b.f.add_block();
        let clear = b.f.add_block();
        let shift = b.f.add_block();
        let one = b.c(body, 1);
        let is_set = b.f.build2(body, Opcode::IcmpEq, Type::I32, x16, one);
        b.f.build_cond_br(body, is_set, set, clear);

        let cv2 = b.load(set, crc);
        let x = b.bini(set, Opcode::Xor, cv2, 0x4002);
        b.store(set, crc, x);
        let one2 = b.c(set, 1);
        b.store(set, carry, one2);
        b.f.build_br(set, shift);

        let z = b.c(clear, 0);
        b.store(clear, carry, z);
        b.f.build_br(clear, shift);

        // crc >>= 1; if (carry) crc |= 0x8000; else crc &= 0x7fff;
        let cv3 = b.load(shift, crc);
        let shr = b.bini(shift, Opcode::Lshr, cv3, 1);
        b.store(shift, crc, shr);

        let high = b.f.add_block();
        let low = b.f.add_block();
        let latch = b.f.add_block();
        let carv = b.load(shift, carry);
        let zero = b.c(shift, 0);
        let has_carry = b.f.build2(shift, Opcode::IcmpNe, Type::I32, carv, zero);
        b.f.build_cond_br(shift, has_carry, high, low);

        let cv4 = b.load(high, crc);
        let or = b.bini(high, Opcode::Or, cv4, 0x8000);
        b.store(high, crc, or);
        b.f.build_br(high, latch);

        let cv5 = b.load(low, crc);
        let and = b.bini(low, Opcode::And, cv5, 0x7fff);
        b.store(low, crc, and);
        b.f.build_br(low, latch);

        close_loop(&mut b, &li, latch);

        let result = b.load(li.exit, crc);
        b.f.build_value_ret(li.exit, result);
    }

    let rt = tu.add_func("run_test", Signature::new(Type::I32, vec![]));
    {
        let f = &mut tu.funcs[rt];
        let mut b = B::new(f);
        let bb = b.f.add_block();

        let words = [0x0000_0a11u32, 0x0000_1404, 0x0000_23c3, 0x0000_33b2];
        let mut crc = b.c(bb, 0);
        for w in words {
            let wv = b.c(bb, w);
            for byte in 0..4u32 {
                let shifted = b.bini(bb, Opcode::Lshr, wv, byte * 8);
                // Take the low byte through the narrow type and back.
                let narrow = b.f.build1(bb, Opcode::Trunc, Type::I8, shifted);
                let wide = b.f.build1(bb, Opcode::Zext, Type::I32, narrow);
                crc = b.f.build_call(bb, crcu8, &crcu8_sig, &[wide, crc]);
            }
        }
        b.f.build_value_ret(bb, crc);
    }

    (tu, rt)
}

// ---------------------------------------------------------------------
// S5: eight values live across a call.
// ---------------------------------------------------------------------

pub fn pressure_tu() -> (ir::TranslationUnit, FuncRef) {
    let mut tu = ir::TranslationUnit::new();

    let helper_sig = Signature::new(Type::I32, vec![Type::I32]);
    let helper = tu.add_func("helper", helper_sig.clone());
    {
        let f = &mut tu.funcs[helper];
        let bb = f.add_block();
        let a = f.build_getparam(bb, Type::I32, 0);
        let three = f.build_const(bb, Type::I32, 3);
        let m = f.build2(bb, Opcode::Mul, Type::I32, a, three);
        f.build_value_ret(bb, m);
    }

    let rt = tu.add_func("run_test", Signature::new(Type::I32, vec![]));
    {
        let f = &mut tu.funcs[rt];
        let bb = f.add_block();
        let seed = f.build_const(bb, Type::I32, 7);

        // Eight distinct values, all live across the call.
        let mut vals = Vec::new();
        for k in 1..=8u64 {
            let ck = f.build_const(bb, Type::I32, k);
            let shifted = f.build2(bb, Opcode::Shl, Type::I32, seed, ck);
            let v = f.build2(bb, Opcode::Add, Type::I32, shifted, ck);
            vals.push(v);
        }

        let t = f.build_call(bb, helper, &helper_sig, &[seed]);

        let mut acc = t;
        for v in vals {
            acc = f.build2(bb, Opcode::Add, Type::I32, acc, v);
        }
        f.build_value_ret(bb, acc);
    }

    (tu, rt)
}
