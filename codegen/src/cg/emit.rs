//! Final assembly emission.
//!
//! By the time emission runs, every register is physical, phis are gone and
//! the only control flow left is the per-block branch description. Branches
//! to the textual next block are elided; blocks without successors are
//! returns and emit the epilogue.

use super::{reg, ArgKind, Function, Inst, Opcode, TranslationUnit};
use std::io::{self, Write};

/// Emit a whole translation unit as assembly.
pub fn write_tu(w: &mut dyn Write, tu: &TranslationUnit) -> io::Result<()> {
    writeln!(w, "\t.syntax unified")?;
    writeln!(w, "\t.arch armv7-a")?;
    writeln!(w, "\t.section .data")?;
    writeln!(w)?;

    for d in &tu.datas {
        writeln!(w, "\t.align {}", d.align)?;
        writeln!(w, "{}:", d.name)?;
        if let Some(init) = &d.init {
            for b in init {
                writeln!(w, "\t.byte 0x{:02x}", b)?;
            }
        }
        writeln!(w)?;
    }

    for f in &tu.funcs {
        write_func(w, f)?;
    }
    Ok(())
}

fn write_clobbers(w: &mut dyn Write, mask: u32) -> io::Result<()> {
    write!(w, "{{")?;
    for i in 0..reg::FIRST_VREG {
        if mask & (1 << i) != 0 {
            write!(
                w,
                "{}{}",
                reg::name(i),
                if mask >> (i + 1) != 0 { "," } else { "" }
            )?;
        }
    }
    writeln!(w, "}}")
}

/// Emit one function.
pub fn write_func(w: &mut dyn Write, f: &Function) -> io::Result<()> {
    writeln!(w)?;
    writeln!(w, "\t.align 4")?;
    writeln!(w, "\t.global {}", f.name)?;
    writeln!(w, "\t.arm")?;
    writeln!(w, "\t.type {}, %function", f.name)?;
    writeln!(w, "{}:", f.name)?;

    write!(w, "\tstmdb sp!, ")?;
    write_clobbers(w, f.clobber_mask)?;
    if f.frame_size > 0 {
        writeln!(w, "\tsub sp, sp, #0x{:x}", f.frame_size)?;
    }

    for b in f.block_layout() {
        writeln!(w, ".{}_{:03}:", f.name, f.block_id(b))?;
        for i in f.body(b) {
            write_inst(w, f, i)?;
        }

        if let Some(t) = f.true_target(b) {
            debug_assert!(Some(t) != f.next_block(b), "true target must not fall through");
            writeln!(w, "\tb{} .{}_{:03}", f.true_cond(b), f.name, f.block_id(t))?;
        } else if let Some(&e) = f.cfg.succs(b).first() {
            let succ = f.cfg.head(e);
            if Some(succ) != f.next_block(b) {
                writeln!(w, "\tb .{}_{:03}", f.name, f.block_id(succ))?;
            }
        } else {
            if f.frame_size > 0 {
                writeln!(w, "\tadd sp, sp, #0x{:x}", f.frame_size)?;
            }
            write!(w, "\tldmia sp!, ")?;
            write_clobbers(w, f.clobber_mask)?;
            writeln!(w, "\tbx lr")?;
        }
    }
    Ok(())
}

/// Emit one instruction.
pub fn write_inst(w: &mut dyn Write, f: &Function, inst: Inst) -> io::Result<()> {
    let op = f.op(inst);
    let def = f.def_reg(inst);
    debug_assert!(
        def.map_or(true, |r| !reg::is_vreg(r)),
        "emission after allocation only"
    );

    // A mov of a symbol or a wide immediate becomes a literal-pool load.
    let mut mnemonic = op.as_str();
    if op == Opcode::Mov {
        match f.arg(inst, 0).kind {
            ArgKind::Sym(_) => mnemonic = "ldr",
            ArgKind::Imm(v) if v > 0xff => mnemonic = "ldr",
            _ => {}
        }
    }
    if op == Opcode::Call {
        mnemonic = "blx";
    }

    match f.cond(inst) {
        super::Cond::Al => write!(w, "\t{}", mnemonic)?,
        c => write!(w, "\t{}{}", mnemonic, c)?,
    }

    let mut need_comma = false;
    if let Some(r) = def {
        if op != Opcode::Call {
            write!(w, " {}", reg::name(r))?;
            need_comma = true;
        }
    }

    for i in 0..super::N_ARGS {
        let arg = f.arg(inst, i);
        if !arg.is_none() && need_comma {
            write!(w, ",")?;
        }
        match &arg.kind {
            ArgKind::None => {}
            ArgKind::Vreg(_) => panic!("unallocated SSA operand at emission"),
            ArgKind::Hreg(r) => {
                let mem = (op.is_load() && i == 0) || (op.is_store() && i == 1);
                if mem {
                    if arg.offset > 0 {
                        write!(w, " [{}, #0x{:x}]", reg::name(*r), arg.offset)?;
                    } else {
                        write!(w, " [{}]", reg::name(*r))?;
                    }
                } else {
                    write!(w, " {}", reg::name(*r))?;
                }
            }
            ArgKind::Imm(v) => {
                if op == Opcode::Mov && *v > 0xff {
                    write!(w, " =#0x{:x}", v)?;
                } else {
                    write!(w, " #0x{:x}", v)?;
                }
            }
            ArgKind::Sym(s) => {
                if op == Opcode::Mov {
                    write!(w, " ={}", s)?;
                } else {
                    write!(w, " {}", s)?;
                }
            }
        }
        need_comma = true;

        if op == Opcode::Call {
            // Only the target symbol is printed; argument registers are
            // implied by the calling convention.
            break;
        }
    }

    writeln!(w)
}

#[cfg(test)]
mod tests {
    use super::super::{Arg, Cond};
    use super::*;

    fn inst_string(f: &Function, i: Inst) -> String {
        let mut v = Vec::new();
        write_inst(&mut v, f, i).unwrap();
        String::from_utf8(v).unwrap()
    }

    #[test]
    fn wide_immediates_use_the_literal_pool() {
        let mut f = Function::new("t");
        let b = f.add_block();
        f.link_block_last(b);

        let small = f.build_inst(b, Opcode::Mov);
        f.insts[small].reg = Some(0);
        f.insts[small].args[0] = Arg::imm(0xff);
        f.link_inst_last(small);
        assert_eq!(inst_string(&f, small), "\tmov r0, #0xff\n");

        let wide = f.build_inst(b, Opcode::Mov);
        f.insts[wide].reg = Some(1);
        f.insts[wide].args[0] = Arg::imm(0x1234);
        f.link_inst_last(wide);
        assert_eq!(inst_string(&f, wide), "\tldr r1, =#0x1234\n");

        let sym = f.build_inst(b, Opcode::Mov);
        f.insts[sym].reg = Some(2);
        f.insts[sym].args[0] = Arg::sym("table");
        f.link_inst_last(sym);
        assert_eq!(inst_string(&f, sym), "\tldr r2, =table\n");
    }

    #[test]
    fn predicated_and_memory_forms() {
        let mut f = Function::new("t");
        let b = f.add_block();
        f.link_block_last(b);

        let m = f.build_inst(b, Opcode::Mov);
        f.insts[m].reg = Some(0);
        f.insts[m].cond = Cond::Le;
        f.insts[m].args[0] = Arg::imm(2);
        f.link_inst_last(m);
        assert_eq!(inst_string(&f, m), "\tmovle r0, #0x2\n");

        let st = f.build_inst(b, Opcode::Str);
        f.insts[st].reg = None;
        f.insts[st].args[0] = Arg::hreg(0);
        f.insts[st].args[1] = Arg::hreg(reg::SP);
        f.insts[st].args[1].offset = 8;
        f.link_inst_last(st);
        assert_eq!(inst_string(&f, st), "\tstr r0, [sp, #0x8]\n");
    }

    #[test]
    fn call_prints_only_the_target() {
        let mut f = Function::new("t");
        let b = f.add_block();
        f.link_block_last(b);
        let c = f.build_inst(b, Opcode::Call);
        f.insts[c].reg = None;
        f.insts[c].args[0] = Arg::sym("callee");
        f.insts[c].args[1] = Arg::hreg(0);
        f.link_inst_last(c);
        assert_eq!(inst_string(&f, c), "\tblx callee\n");
    }
}
