//! Textual CG IR reader.
//!
//! Parses the format `mycc_codegen::cg::print` writes. Parsing a printed
//! unit and printing it again is byte-identical, which the driver and the
//! test suite both rely on.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

pub use crate::error::{Location, ParseError, ParseResult};
pub use crate::parser::parse_tu;

mod error;
mod lexer;
mod parser;

#[cfg(test)]
mod tests {
    use super::*;
    use mycc_codegen::cg;

    #[test]
    fn round_trip_is_byte_identical() {
        let text = "\
@tab = size(4), align(4) , init(0x01, 0x02, 0x03, 0x04)

define @f( %v16 ) [0x0,0x4000] {
bb0: ;; loop{nest=0, type=0, pre=0, rpost=0}
  %v17 = mov #0x0
  cmp %v16, #0x0
  branch{gt} %bb1, %bb2
bb1: ;; loop{nest=0, type=0, pre=2, rpost=1}
  %v18 = add %v16, #0x1
  branch %bb2
bb2: ;; loop{nest=0, type=0, pre=1, rpost=2}
  %v19 = phi [%v17, %bb0], [%v18, %bb1]
  ret %v19
}

";
        let mut tu = parse_tu(text).expect("parse");
        let printed = cg::print::tu_string(&mut tu);
        assert_eq!(printed, text);

        let mut reparsed = parse_tu(&printed).expect("reparse");
        assert_eq!(cg::print::tu_string(&mut reparsed), printed);
    }

    #[test]
    fn parses_memory_operands_and_conditions() {
        let text = "\
define @g( ) [0x8,0x0] {
bb0: ;; x
  %v16 = ldr [%sp, #0x4]
  %v17 = mov{le} #0x1
  str %v16, [%sp]
}
";
        let tu = parse_tu(text).expect("parse");
        let f = &tu.funcs[0];
        let b = f.first_block().unwrap();
        let body = f.body(b);
        assert_eq!(body.len(), 3);
        assert_eq!(f.op(body[0]), cg::Opcode::Ldr);
        assert_eq!(f.arg(body[0], 0).offset, 4);
        assert_eq!(f.cond(body[1]), cg::Cond::Le);
        assert_eq!(f.def_reg(body[2]), None);
    }

    #[test]
    fn reports_locations() {
        let e = parse_tu("define @f( ) [0x0,0x0] {\nbb0: ;;\n  %v16 = bogus\n}\n").unwrap_err();
        assert_eq!(e.location.line, 3);
        assert!(e.to_string().contains("3:"));
    }

    #[test]
    fn undefined_vreg_is_an_error() {
        let e = parse_tu("define @f( ) [0x0,0x0] {\nbb0: ;;\n  %v16 = mov %v99\n}\n").unwrap_err();
        assert!(e.message.contains("%v99"));
    }
}
