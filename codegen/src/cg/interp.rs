//! Interpreter for allocated cg code.
//!
//! Executes a translation unit after register allocation (physical
//! registers, no phis), the same way the IR simulator executes the input:
//! it is the oracle that lets tests check the whole back end preserves
//! semantics without a real target simulator. Data lives at the same
//! addresses the IR simulator uses, so results are directly comparable.
//!
//! The machine model is minimal: sixteen 32-bit registers per frame, a
//! compare-flags pair, byte memory, and a downward stack. Calls resolve
//! within the unit; the scratch registers `r1..r3` are poisoned across
//! calls so a miscompile that relies on them surfaces.

use super::{reg, ArgKind, Cond, Function, Inst, Opcode, TranslationUnit};
use crate::ir::sim::{Memory, DATA_START, STACK_START};
use std::collections::HashMap;

/// An interpreter instance over one translation unit.
pub struct Interp<'a> {
    tu: &'a TranslationUnit,
    /// Simulated memory; public so tests can inspect data objects.
    pub mem: Memory,
    data_addr: HashMap<String, u32>,
}

const SCRATCH_POISON: u32 = 0xdead_beef;

type Regs = [u32; reg::NUM_REGS as usize];

impl<'a> Interp<'a> {
    /// Create an interpreter, laying out the unit's data objects exactly
    /// like the IR simulator does.
    pub fn new(tu: &'a TranslationUnit) -> Self {
        let mut mem = Memory::new();
        let mut data_addr = HashMap::new();
        let mut dp = DATA_START;

        for d in &tu.datas {
            assert!(d.align.is_power_of_two());
            dp = (dp + d.align - 1) & !(d.align - 1);
            data_addr.insert(d.name.clone(), dp);
            if let Some(init) = &d.init {
                for (i, &b) in init.iter().enumerate() {
                    mem.write(u64::from(dp) + i as u64, b, 0xff);
                }
            }
            dp += d.size;
        }

        Self { tu, mem, data_addr }
    }

    /// Run the named function with up to four register arguments.
    pub fn run(&mut self, name: &str, args: &[u32]) -> u32 {
        self.run_func(name, args, STACK_START)
    }

    fn run_func(&mut self, name: &str, args: &[u32], sp: u32) -> u32 {
        let tu: &TranslationUnit = self.tu;
        let f = tu
            .funcs
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("call to undefined function {}", name));

        let mut regs: Regs = [0; reg::NUM_REGS as usize];
        for (i, &a) in args.iter().enumerate().take(reg::NUM_ARG_REGS as usize) {
            regs[i] = a;
        }
        regs[reg::SP as usize] = sp.wrapping_sub(f.frame_size);

        let mut flags: Option<(i32, i32)> = None;
        let mut bb = f.first_block().expect("running a function without blocks");

        loop {
            for inst in f.body(bb) {
                self.exec(f, inst, &mut regs, &mut flags);
            }

            if let Some(t) = f.true_target(bb) {
                let fa = f.false_target(bb).expect("conditional without false target");
                bb = if eval_cond(f.true_cond(bb), flags) { t } else { fa };
            } else if let Some(&e) = f.cfg.succs(bb).first() {
                bb = f.cfg.head(e);
            } else {
                return regs[reg::R0 as usize];
            }
        }
    }

    fn arg_value(&self, f: &Function, inst: Inst, idx: usize, regs: &Regs) -> u32 {
        match &f.insts[inst].args[idx].kind {
            ArgKind::Hreg(r) => regs[*r as usize],
            ArgKind::Imm(v) => *v,
            ArgKind::Sym(s) => *self
                .data_addr
                .get(s)
                .unwrap_or_else(|| panic!("unknown symbol {}", s)),
            ArgKind::Vreg(_) => panic!("virtual operand after allocation"),
            ArgKind::None => panic!("missing operand"),
        }
    }

    fn arg_addr(&self, f: &Function, inst: Inst, idx: usize, regs: &Regs) -> u64 {
        let base = self.arg_value(f, inst, idx, regs);
        u64::from(base.wrapping_add(f.insts[inst].args[idx].offset as u32))
    }

    fn exec(&mut self, f: &Function, inst: Inst, regs: &mut Regs, flags: &mut Option<(i32, i32)>) {
        if !eval_cond(f.cond(inst), *flags) {
            return;
        }

        let value = match f.op(inst) {
            Opcode::Mov => self.arg_value(f, inst, 0, regs),
            Opcode::Add => self
                .arg_value(f, inst, 0, regs)
                .wrapping_add(self.arg_value(f, inst, 1, regs)),
            Opcode::Sub => self
                .arg_value(f, inst, 0, regs)
                .wrapping_sub(self.arg_value(f, inst, 1, regs)),
            Opcode::Mul => self
                .arg_value(f, inst, 0, regs)
                .wrapping_mul(self.arg_value(f, inst, 1, regs)),
            Opcode::And => self.arg_value(f, inst, 0, regs) & self.arg_value(f, inst, 1, regs),
            Opcode::Orr => self.arg_value(f, inst, 0, regs) | self.arg_value(f, inst, 1, regs),
            Opcode::Eor => self.arg_value(f, inst, 0, regs) ^ self.arg_value(f, inst, 1, regs),
            Opcode::Lsl => self
                .arg_value(f, inst, 0, regs)
                .wrapping_shl(self.arg_value(f, inst, 1, regs)),
            Opcode::Lsr => self
                .arg_value(f, inst, 0, regs)
                .wrapping_shr(self.arg_value(f, inst, 1, regs)),
            Opcode::Asr => {
                (self.arg_value(f, inst, 0, regs) as i32)
                    .wrapping_shr(self.arg_value(f, inst, 1, regs)) as u32
            }
            Opcode::Sxtb => self.arg_value(f, inst, 0, regs) as u8 as i8 as i32 as u32,
            Opcode::Sxth => self.arg_value(f, inst, 0, regs) as u16 as i16 as i32 as u32,
            Opcode::Uxtb => self.arg_value(f, inst, 0, regs) & 0xff,
            Opcode::Uxth => self.arg_value(f, inst, 0, regs) & 0xffff,

            Opcode::Ldr | Opcode::Ldrh | Opcode::Ldrb => {
                let size = match f.op(inst) {
                    Opcode::Ldr => 4,
                    Opcode::Ldrh => 2,
                    _ => 1,
                };
                let base = self.arg_addr(f, inst, 0, regs);
                let mut v = 0u32;
                for i in 0..size {
                    let (b, _) = self.mem.read(base + i);
                    v |= u32::from(b) << (8 * i);
                }
                v
            }

            Opcode::Str | Opcode::Strh | Opcode::Strb => {
                let size = match f.op(inst) {
                    Opcode::Str => 4,
                    Opcode::Strh => 2,
                    _ => 1,
                };
                let v = self.arg_value(f, inst, 0, regs);
                let base = self.arg_addr(f, inst, 1, regs);
                for i in 0..size {
                    self.mem.write(base + i, (v >> (8 * i)) as u8, 0xff);
                }
                return;
            }

            Opcode::Cmp => {
                *flags = Some((
                    self.arg_value(f, inst, 0, regs) as i32,
                    self.arg_value(f, inst, 1, regs) as i32,
                ));
                return;
            }

            Opcode::Call => {
                let target = match &f.insts[inst].args[0].kind {
                    ArgKind::Sym(s) => s.clone(),
                    _ => panic!("call without target symbol"),
                };
                let call_args: Vec<u32> = regs[..reg::NUM_ARG_REGS as usize].to_vec();
                let sp = regs[reg::SP as usize];
                let ret = self.run_func(&target, &call_args, sp);
                regs[0] = ret;
                for r in regs.iter_mut().take(reg::NUM_ARG_REGS as usize).skip(1) {
                    *r = SCRATCH_POISON;
                }
                return;
            }

            op => panic!("{} survived into final code", op),
        };

        let def = f.def_reg(inst).expect("value-producing instruction without register");
        regs[def as usize] = value;
    }
}

fn eval_cond(cond: Cond, flags: Option<(i32, i32)>) -> bool {
    match cond {
        Cond::Al => true,
        c => {
            let (a, b) = flags.expect("conditional instruction without a preceding cmp");
            match c {
                Cond::Eq => a == b,
                Cond::Ne => a != b,
                Cond::Lt => a < b,
                Cond::Le => a <= b,
                Cond::Gt => a > b,
                Cond::Ge => a >= b,
                Cond::Al => unreachable!(),
            }
        }
    }
}
