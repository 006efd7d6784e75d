//! Constructor-time validation of IR nodes.
//!
//! Each rule mirrors what the node constructors promise: a violation is a
//! bug in the IR producer, so the failure prints the offending node with its
//! operands and aborts.

use super::{print, Function, Node, Opcode, Type};

pub(super) fn validate_node(f: &Function, n: Node) {
    if let Err(msg) = check(f, n) {
        report(f, n, &msg);
    }
}

fn report(f: &Function, n: Node, msg: &str) -> ! {
    let mut out = String::new();
    out.push_str("=== IR validation failure ===\n");
    if f.op(n) == Opcode::Phi {
        for (arg, _) in f.phi_args(n) {
            out.push_str(&print::node_string(f, arg));
            out.push('\n');
        }
    } else {
        for arg in f.args(n) {
            out.push_str(&print::node_string(f, arg));
            out.push('\n');
        }
    }
    out.push_str(&print::node_string(f, n));
    eprintln!("{}", out);
    panic!("IR validation failure: {}", msg);
}

fn check(f: &Function, n: Node) -> Result<(), String> {
    use Opcode::*;

    match f.op(n) {
        Const | Undef => Ok(()),

        Phi => {
            for (arg, _) in f.phi_args(n) {
                if f.ty(n) != f.ty(arg) {
                    return Err(format!(
                        "phi argument {} has type {}, phi has {}",
                        arg,
                        f.ty(arg),
                        f.ty(n)
                    ));
                }
            }
            Ok(())
        }

        Ret | Br | Term => Ok(()),

        Call => {
            let args = f.args(n);
            let sig = f.call_sig(n);
            if args.len() < sig.params.len()
                || (!sig.variadic && args.len() > sig.params.len())
            {
                return Err(format!(
                    "call passes {} arguments, target takes {}",
                    args.len(),
                    sig.params.len()
                ));
            }
            for (i, (&a, &p)) in args.iter().zip(sig.params.iter()).enumerate() {
                if f.ty(a) != p {
                    return Err(format!(
                        "call argument {} has type {}, parameter wants {}",
                        i,
                        f.ty(a),
                        p
                    ));
                }
            }
            Ok(())
        }

        // Pointer arithmetic mixes p32 with i32, so add/sub only require
        // matching widths.
        Add | Sub => {
            for a in f.args(n) {
                if f.ty(n).bytes() != f.ty(a).bytes() {
                    return Err(format!("operand {} width differs from result", a));
                }
            }
            Ok(())
        }

        Neg | Mul | Udiv | Sdiv | Urem | Srem | Shl | Lshr | Ashr | And | Not | Or | Xor => {
            for a in f.args(n) {
                if f.ty(n) != f.ty(a) {
                    return Err(format!("operand {} type differs from result", a));
                }
            }
            Ok(())
        }

        AddrOf | Alloca => {
            if f.ty(n) != Type::P32 {
                return Err("address does not have type p32".to_string());
            }
            Ok(())
        }

        Load | Store => {
            let args = f.args(n);
            if f.ty(args[0]) != Type::P32 {
                return Err("memory address does not have type p32".to_string());
            }
            if f.op(n) == Store && f.ty(n) != f.ty(args[1]) {
                return Err("stored value type differs from store type".to_string());
            }
            Ok(())
        }

        Trunc => {
            let args = f.args(n);
            if f.ty(n).bytes() >= f.ty(args[0]).bytes() {
                return Err("trunc does not narrow".to_string());
            }
            Ok(())
        }

        Sext | Zext => {
            let args = f.args(n);
            if f.ty(n).bytes() <= f.ty(args[0]).bytes() {
                return Err("extension does not widen".to_string());
            }
            Ok(())
        }

        IcmpEq | IcmpNe | IcmpSlt | IcmpSle | IcmpSgt | IcmpSge | IcmpUlt | IcmpUle | IcmpUgt
        | IcmpUge => {
            let args = f.args(n);
            if f.ty(n) != f.ty(args[0]) || f.ty(args[0]) != f.ty(args[1]) {
                return Err("compare operand types disagree".to_string());
            }
            Ok(())
        }

        GetParam => {
            let idx = f.getparam_index(n) as usize;
            if idx >= f.sig.params.len() || f.ty(n) != f.sig.params[idx] {
                return Err(format!("getparam {} out of range or mistyped", idx));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{Function, Opcode, Signature, Type};

    fn func() -> Function {
        Function::new("t", Signature::new(Type::I32, vec![Type::I32]))
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn mistyped_binop() {
        let mut f = func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 1);
        let b = f.build_const(bb, Type::I16, 2);
        let _ = f.build2(bb, Opcode::Mul, Type::I32, a, b);
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn phi_argument_type_mismatch() {
        let mut f = func();
        let b0 = f.add_block();
        let b1 = f.add_block();
        let a = f.build_const(b0, Type::I16, 1);
        let phi = f.build_phi(b1, Type::I32);
        f.add_phi_arg(phi, b0, a);
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn load_from_non_pointer() {
        let mut f = func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 0x100);
        let _ = f.build1(bb, Opcode::Load, Type::I32, a);
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn trunc_must_narrow() {
        let mut f = func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I16, 3);
        let _ = f.build1(bb, Opcode::Trunc, Type::I32, a);
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn zext_must_widen() {
        let mut f = func();
        let bb = f.add_block();
        let a = f.build_const(bb, Type::I32, 3);
        let _ = f.build1(bb, Opcode::Zext, Type::I16, a);
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn getparam_out_of_range() {
        let mut f = func();
        let bb = f.add_block();
        let _ = f.build_getparam(bb, Type::I32, 4);
    }

    #[test]
    #[should_panic(expected = "IR validation failure")]
    fn call_arity_mismatch() {
        let mut f = func();
        let bb = f.add_block();
        let sig = Signature::new(Type::I32, vec![Type::I32, Type::I32]);
        let a = f.build_const(bb, Type::I32, 1);
        let target = crate::ir::FuncRef::from_u32(0);
        let _ = f.build_call(bb, target, &sig, &[a]);
    }

    #[test]
    fn pointer_add_is_allowed() {
        let mut f = func();
        let bb = f.add_block();
        let p = f.build_alloca(bb, 16, 4);
        let four = f.build_const(bb, Type::I32, 4);
        let _ = f.build2(bb, Opcode::Add, Type::P32, p, four);
    }
}
