//! Spilling under a reduced register budget: results are unchanged and
//! spill code actually appears.

mod common;

use common::{asm_string, cg_result, compile, ir_result};

#[test]
fn eight_values_across_a_call_with_four_registers() {
    let (tu, run_test) = common::pressure_tu();
    let reference = ir_result(&tu, run_test, &[]);

    let ctu = compile(&tu, 4, false);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);

    let run_test_fn = ctu.funcs.iter().find(|f| f.name == "run_test").unwrap();
    assert!(run_test_fn.frame_size > 0, "expected spill slots in the frame");

    let asm = asm_string(&ctu);
    assert!(asm.contains("str"), "expected spill stores");
    assert!(asm.contains("[sp"), "expected frame-relative accesses");
}

#[test]
fn pressure_function_is_clean_with_full_budget() {
    let (tu, run_test) = common::pressure_tu();
    let reference = ir_result(&tu, run_test, &[]);

    let ctu = compile(&tu, 13, false);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);

    // Thirteen registers fit the eight values plus scratch; no frame.
    let run_test_fn = ctu.funcs.iter().find(|f| f.name == "run_test").unwrap();
    assert_eq!(run_test_fn.frame_size, 0);
}

#[test]
fn fibonacci_still_correct_when_squeezed() {
    let (tu, run_test) = common::fib_tu();
    let reference = ir_result(&tu, run_test, &[]);

    for budget in [4, 5, 6, 8] {
        let ctu = compile(&tu, budget, false);
        assert_eq!(
            cg_result(&ctu, "run_test", &[]),
            reference,
            "wrong result with {} registers",
            budget
        );
    }
}

#[test]
fn phi_loops_still_correct_when_squeezed() {
    let (tu, run_test) = common::fib_ssa_tu();
    let reference = ir_result(&tu, run_test, &[]);

    for budget in [4, 5, 6] {
        let ctu = compile(&tu, budget, false);
        assert_eq!(
            cg_result(&ctu, "run_test", &[]),
            reference,
            "wrong result with {} registers",
            budget
        );
    }
}

#[test]
fn matrix_still_correct_when_squeezed() {
    let (tu, run_test) = common::matrix_tu();
    let reference = ir_result(&tu, run_test, &[]);

    let ctu = compile(&tu, 6, false);
    assert_eq!(cg_result(&ctu, "run_test", &[]), reference);
}
