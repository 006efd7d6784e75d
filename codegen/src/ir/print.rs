//! Textual dump of the IR (`--dump-ir`).

use super::{Function, Node, Opcode, TermKind, TranslationUnit, Type};
use core::fmt::{self, Write};

/// Print a whole translation unit.
pub fn write_tu(w: &mut dyn Write, tu: &TranslationUnit) -> fmt::Result {
    for func in tu.funcs.values() {
        write_func(w, Some(tu), func)?;
        writeln!(w)?;
    }
    Ok(())
}

/// Print one function.
pub fn write_func(w: &mut dyn Write, tu: Option<&TranslationUnit>, f: &Function) -> fmt::Result {
    let kw = if f.is_definition() { "define" } else { "declare" };
    write!(w, "{} {} @{}(", kw, f.sig.ret, f.name)?;
    for (i, p) in f.sig.params.iter().enumerate() {
        write!(w, "{}{}", p, if i + 1 < f.sig.params.len() { ", " } else { "" })?;
    }
    write!(w, ")")?;

    if f.is_definition() {
        writeln!(w, " {{")?;
        for bb in f.rpo() {
            write_block(w, tu, f, bb)?;
        }
        writeln!(w, "}}")?;
    } else {
        writeln!(w)?;
    }
    Ok(())
}

fn write_block(w: &mut dyn Write, tu: Option<&TranslationUnit>, f: &Function, bb: super::Block) -> fmt::Result {
    writeln!(w, " {}:", bb)?;
    for n in f.block_nodes(bb) {
        write!(w, "  ")?;
        write_node(w, tu, f, n)?;
        writeln!(w)?;
    }

    match f.term_kind(bb) {
        TermKind::Br => match f.term_node(bb) {
            None => writeln!(w, "  br label %{}", f.default_target(bb))?,
            Some(cond) => writeln!(
                w,
                "  br {}, label %{}, label %{}",
                cond,
                f.true_target(bb),
                f.false_target(bb)
            )?,
        },
        TermKind::Ret => match f.term_node(bb) {
            None => writeln!(w, "  ret")?,
            Some(v) => writeln!(w, "  ret {} {}", f.ty(v), v)?,
        },
    }
    writeln!(w)
}

/// Print a single node. With no translation unit at hand, data symbols show
/// their entity number instead of their name.
pub fn write_node(
    w: &mut dyn Write,
    tu: Option<&TranslationUnit>,
    f: &Function,
    n: Node,
) -> fmt::Result {
    write!(w, "{} = {} {} ", n, f.op(n), f.ty(n))?;

    match f.op(n) {
        Opcode::AddrOf => {
            let d = f.addr_of_data(n);
            match tu {
                Some(tu) => write!(w, "@{}", tu.datas[d].name),
                None => write!(w, "@{}", d),
            }
        }
        Opcode::Alloca => write!(w, "{}, {}", f.alloca_size(n), f.alloca_align(n)),
        Opcode::GetParam => write!(w, "{}", f.getparam_index(n)),
        Opcode::Const => match f.ty(n) {
            Type::I1 => write!(w, "{}", if f.const_u64(n) != 0 { "true" } else { "false" }),
            Type::I8 => write!(w, "0x{:02x}", f.const_u64(n)),
            Type::I16 => write!(w, "0x{:04x}", f.const_u64(n)),
            Type::I32 | Type::P32 => write!(w, "0x{:08x}", f.const_u64(n)),
            Type::I64 | Type::P64 => write!(w, "0x{:016x}", f.const_u64(n)),
            Type::Void => unreachable!(),
        },
        Opcode::Phi => {
            for (i, (arg, arg_bb)) in f.phi_args(n).iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write!(w, "[{}, %{}]", arg, arg_bb)?;
            }
            Ok(())
        }
        op => {
            if op == Opcode::Call {
                let target = f.call_target(n);
                match tu {
                    Some(tu) => write!(w, "@{} ", tu.funcs[target].name)?,
                    None => write!(w, "@{} ", target)?,
                }
            }
            let args = f.args(n);
            for (i, a) in args.iter().enumerate() {
                write!(w, "{}{}", a, if i + 1 < args.len() { ", " } else { "" })?;
            }
            Ok(())
        }
    }
}

/// Format one node into a string, without symbol names. Used by validation
/// reports.
pub fn node_string(f: &Function, n: Node) -> String {
    let mut s = String::new();
    write_node(&mut s, None, f, n).unwrap();
    s
}
