//! Textual CG IR printer.
//!
//! The output round-trips through `mycc-reader`: printing a parsed unit
//! reproduces the input byte for byte. Operands are comma-separated;
//! everything after `;;` on a line is a comment.

use super::{reg, ArgKind, Function, Inst, Opcode, TranslationUnit};
use core::fmt::{self, Write};

fn reg_str(r: u32) -> String {
    if reg::is_vreg(r) {
        format!("%v{}", r)
    } else {
        format!("%{}", reg::name(r))
    }
}

/// Print a whole translation unit.
pub fn write_tu(w: &mut dyn Write, tu: &mut TranslationUnit) -> fmt::Result {
    for d in &tu.datas {
        write!(w, "@{} = size({}), align({})", d.name, d.size, d.align)?;
        if let Some(init) = &d.init {
            write!(w, " , init(")?;
            for (i, b) in init.iter().enumerate() {
                write!(w, "0x{:02x}{}", b, if i + 1 < init.len() { ", " } else { "" })?;
            }
            write!(w, ")")?;
        }
        writeln!(w)?;
    }
    writeln!(w)?;

    for f in &mut tu.funcs {
        write_func(w, f)?;
        writeln!(w)?;
    }
    Ok(())
}

/// Print one function.
pub fn write_func(w: &mut dyn Write, f: &mut Function) -> fmt::Result {
    write!(w, "define @{}( ", f.name)?;
    for p in f.params.iter().flatten() {
        write!(w, "{} ", reg_str(f.def_reg(*p).unwrap()))?;
    }
    writeln!(w, ") [0x{:x},0x{:x}] {{", f.frame_size, f.clobber_mask)?;

    for b in f.block_layout() {
        let nest = f.loop_nest(b);
        let li = f.loop_info(b);
        writeln!(
            w,
            "bb{}: ;; loop{{nest={}, type={}, pre={}, rpost={}}}",
            f.block_id(b),
            nest,
            li.kind as u32,
            li.pre,
            li.rpost
        )?;

        for i in f.phis(b) {
            write!(w, "  ")?;
            write_inst(w, f, i)?;
            writeln!(w)?;
        }
        for i in f.body(b) {
            write!(w, "  ")?;
            write_inst(w, f, i)?;
            writeln!(w)?;
        }

        let succs = f.cfg.succs(b);
        if succs.len() == 2 {
            let t = f.true_target(b).expect("conditional block without targets");
            let fa = f.false_target(b).expect("conditional block without targets");
            writeln!(
                w,
                "  branch{{{}}} %bb{}, %bb{}",
                f.true_cond(b),
                f.block_id(t),
                f.block_id(fa)
            )?;
        } else if succs.len() == 1 {
            debug_assert!(f.true_target(b).is_none() && f.false_target(b).is_none());
            let succ = f.cfg.head(succs[0]);
            writeln!(w, "  branch %bb{}", f.block_id(succ))?;
        }
    }
    writeln!(w, "}}")
}

/// Print one instruction (no trailing newline).
pub fn write_inst(w: &mut dyn Write, f: &Function, inst: Inst) -> fmt::Result {
    if f.op(inst) == Opcode::Phi {
        write!(w, "{} = phi ", reg_str(f.def_reg(inst).unwrap()))?;
        for (i, (arg, arg_bb)) in f.phi_args(inst).iter().enumerate() {
            if i > 0 {
                write!(w, ", ")?;
            }
            let r = f.def_reg(*arg).expect("phi argument without register");
            write!(w, "[{}, %bb{}]", reg_str(r), f.block_id(*arg_bb))?;
        }
        return Ok(());
    }

    if let Some(r) = f.def_reg(inst) {
        write!(w, "{} = ", reg_str(r))?;
    }
    match f.cond(inst) {
        super::Cond::Al => write!(w, "{}", f.op(inst))?,
        c => write!(w, "{}{{{}}}", f.op(inst), c)?,
    }

    let mut need_comma = false;
    for i in 0..super::N_ARGS {
        let arg = f.arg(inst, i);
        if arg.is_none() {
            continue;
        }
        if need_comma {
            write!(w, ",")?;
        }
        match &arg.kind {
            ArgKind::Hreg(_) | ArgKind::Vreg(_) => {
                let r = f.arg_reg(inst, i).expect("register operand without def");
                let mem = (f.op(inst).is_load() && i == 0) || (f.op(inst).is_store() && i == 1);
                if mem {
                    if arg.offset > 0 {
                        write!(w, " [{}, #0x{:x}]", reg_str(r), arg.offset)?;
                    } else {
                        write!(w, " [{}]", reg_str(r))?;
                    }
                } else {
                    write!(w, " {}", reg_str(r))?;
                }
            }
            ArgKind::Imm(v) => write!(w, " #0x{:x}", v)?,
            ArgKind::Sym(s) => write!(w, " @{}", s)?,
            ArgKind::None => unreachable!(),
        }
        need_comma = true;
    }
    Ok(())
}

/// Print a unit into a string.
pub fn tu_string(tu: &mut TranslationUnit) -> String {
    let mut s = String::new();
    write_tu(&mut s, tu).unwrap();
    s
}
