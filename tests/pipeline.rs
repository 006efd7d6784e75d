//! End-to-end pipeline tests: the corpus programs are built as IR,
//! simulated for the reference result, compiled through instruction
//! selection, register allocation and branch predication, and executed
//! again on the allocated code.

mod common;

use common::{asm_string, cg_result, compile, ir_result};

#[test]
fn fibonacci() {
    let (tu, run_test) = common::fib_tu();

    let reference = ir_result(&tu, run_test, &[]);
    assert_eq!(reference, 1597 + 233 + 21 + 2);

    let ctu = compile(&tu, 13, true);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);
}

#[test]
fn fibonacci_in_register_form() {
    let (tu, run_test) = common::fib_ssa_tu();

    let reference = ir_result(&tu, run_test, &[]);
    assert_eq!(reference, 1597 + 233 + 21 + 2);

    let ctu = compile(&tu, 13, true);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);
}

#[test]
fn matrix_sum_score() {
    let (tu, run_test) = common::matrix_tu();

    let reference = ir_result(&tu, run_test, &[]);
    let ctu = compile(&tu, 13, true);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);
}

#[test]
fn crc_over_four_words() {
    let (tu, run_test) = common::crc_tu();

    let reference = ir_result(&tu, run_test, &[]);
    let ctu = compile(&tu, 13, true);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);
}

#[test]
fn emitted_assembly_shape() {
    let (tu, _) = common::fib_tu();
    let ctu = compile(&tu, 13, true);
    let asm = asm_string(&ctu);

    assert!(asm.contains("\t.syntax unified"));
    assert!(asm.contains("\t.arch armv7-a"));
    assert!(asm.contains("\t.global non_recursive"));
    assert!(asm.contains("\t.global run_test"));
    assert!(asm.contains("\t.type run_test, %function"));
    assert!(asm.contains("run_test:"));
    assert!(asm.contains("\tstmdb sp!, {"));
    assert!(asm.contains("\tbx lr"));
    assert!(asm.contains("\tblx non_recursive"));
    // The link register is always saved.
    assert!(asm.contains("lr}") || asm.contains("lr,"));
    // No virtual register can survive to the final output.
    assert!(!asm.contains("%v"));
}

#[test]
fn branches_never_jump_to_the_fall_through() {
    // Every `b<cond>` in the output goes to a block that is not the next
    // one; unconditional fall-through branches are elided entirely.
    let (tu, _) = common::matrix_tu();
    let ctu = compile(&tu, 13, false);
    let asm = asm_string(&ctu);

    let lines: Vec<&str> = asm.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("b") {
            // Branch mnemonics here are `b`, `b<cond>`, `blx`, `bx`.
            if rest.starts_with("lx") || rest.starts_with("x") {
                continue;
            }
            let target = trimmed.split_whitespace().last().unwrap();
            if let Some(next) = lines.get(i + 1) {
                assert_ne!(
                    next.trim_end_matches(':'),
                    target,
                    "branch to the fall-through block"
                );
            }
        }
    }
}
