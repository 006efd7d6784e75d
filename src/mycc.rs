//! The `mycc` driver.
//!
//! This build ships the back end only; the C front end is an external IR
//! producer. The driver therefore operates on imported textual CG IR: parse
//! with `--cg-import`, then optionally dump, allocate registers, predicate
//! branches, and emit assembly, in that order, matching the pipeline.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use mycc_codegen::{cg, predication, regalloc};
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "mycc", version, about = "A lightweight C compiler back end")]
struct Options {
    /// C source input. Compiling C requires the front end, which is not
    /// part of this build.
    input: Option<PathBuf>,

    /// Dump every intermediate representation.
    #[arg(long)]
    dump_all: bool,

    /// Dump the AST (front end only).
    #[arg(long)]
    dump_ast: bool,

    /// Dump the IR after each pass (front end only).
    #[arg(long)]
    dump_ir: bool,

    /// Dump the CG IR after each back-end pass.
    #[arg(long)]
    dump_cg: bool,

    /// Simulate the named IR function and dump per-step values (front end
    /// only).
    #[arg(long, value_name = "FUNC")]
    sim_ir: Option<String>,

    /// Register budget for the allocator (r0..r12 by default).
    #[arg(long, value_name = "N", default_value_t = 13)]
    cg_max_regs: u32,

    /// Skip the front end and parse textual CG IR from the given file.
    #[arg(long, value_name = "PATH")]
    cg_import: Option<PathBuf>,

    /// Print the imported CG IR to the given file.
    #[arg(long, value_name = "PATH")]
    cg_dump: Option<PathBuf>,

    /// Run the register allocator on the imported CG IR.
    #[arg(long)]
    cg_run_ra: bool,

    /// Run branch predication on the imported CG IR.
    #[arg(long)]
    cg_run_branch_predication: bool,

    /// Emit assembly to the given file and exit.
    #[arg(long, value_name = "PATH")]
    cg_run_emit: Option<PathBuf>,
}

fn main() {
    pretty_env_logger::init();
    if let Err(e) = run() {
        eprintln!("mycc: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Options::parse();

    let mut ctu = match &opt.cg_import {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to open '{}'", path.display()))?;
            mycc_reader::parse_tu(&text)
                .map_err(|e| anyhow!("{}: {}", path.display(), e))?
        }
        None => match &opt.input {
            Some(p) => bail!(
                "the C front end is not part of this build; \
                 cannot compile '{}', use --cg-import",
                p.display()
            ),
            None => bail!("no input; use --cg-import=<path>"),
        },
    };

    if opt.dump_all || opt.dump_ast || opt.dump_ir || opt.sim_ir.is_some() {
        bail!("--dump-all, --dump-ast, --dump-ir and --sim-ir need the C front end");
    }

    if let Some(path) = &opt.cg_dump {
        fs::write(path, cg::print::tu_string(&mut ctu))
            .with_context(|| format!("failed to write '{}'", path.display()))?;
    }

    if opt.cg_run_ra {
        regalloc::run_tu(&mut ctu, opt.cg_max_regs)?;
        if opt.dump_cg {
            fs::write("cg_01_regalloc.txt", cg::print::tu_string(&mut ctu))?;
        }
    }

    if opt.cg_run_branch_predication {
        predication::run_tu(&mut ctu);
        if opt.dump_cg {
            fs::write("cg_02_branch_predication.txt", cg::print::tu_string(&mut ctu))?;
        }
    }

    if let Some(path) = &opt.cg_run_emit {
        let mut out = fs::File::create(path)
            .with_context(|| format!("failed to create '{}'", path.display()))?;
        cg::emit::write_tu(&mut out, &ctu)?;
    }

    Ok(())
}
