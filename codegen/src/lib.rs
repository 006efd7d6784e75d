//! MyCC code generation library.
//!
//! The back end of a small C compiler: it consumes a typed SSA intermediate
//! representation (`ir`), lowers it to target-instruction SSA (`cg`) via
//! instruction selection (`iselect`), allocates physical registers
//! (`regalloc`), folds short branch diamonds into predicated instructions
//! (`predication`), and prints assembly for a 32-bit ARM-like load/store
//! machine with 16 general registers (`cg::emit`).
//!
//! The front end (lexing, parsing, AST lowering, `mem2reg`) is an external
//! IR producer; this crate starts at the IR.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use mycc_entity as entity;

pub mod bitset;
pub mod cg;
pub mod dominator_tree;
pub mod dset;
pub mod graph;
pub mod ir;
pub mod iselect;
pub mod loop_analysis;
pub mod predication;
pub mod regalloc;

use thiserror::Error;

/// An error produced while running a back-end pass.
///
/// Internal invariant violations (broken SSA, failed post-conditions) are
/// bugs and panic instead; `CodegenError` is for conditions a correct
/// compiler can meet on hostile or unsupported input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// The control flow graph is irreducible; the passes only support the
    /// reducible graphs a structured-C front end produces.
    #[error("irreducible control flow graph")]
    Irreducible,

    /// An IR operation reached instruction selection that the target has no
    /// tile for.
    #[error("unsupported IR operation `{0}` in instruction selection")]
    Unsupported(&'static str),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error.
pub type CodegenResult<T> = Result<T, CodegenError>;
