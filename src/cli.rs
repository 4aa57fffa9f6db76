use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::{add_windows, WorkbookPackage};

/// CLI arguments for the `xlsx_add_windows` binary.
///
/// This lives in the library crate so integration tests can drive the exact
/// command-line surface without spawning a process.
#[derive(Parser)]
#[command(about = "Add saved window views to an XLSX workbook so Excel opens extra windows onto it.")]
pub struct Args {
    /// Input workbook.
    input: PathBuf,

    /// Output workbook (overwritten if it already exists).
    output: PathBuf,

    /// Number of windows to add.
    #[arg(short = 'n', long = "num-windows", default_value_t = 10)]
    num_windows: u32,
}

pub fn run() -> Result<()> {
    run_with_args(Args::parse())
}

pub fn run_with_args(args: Args) -> Result<()> {
    let mut package = WorkbookPackage::open(&args.input)?;
    add_windows(&mut package, args.num_windows)?;
    package.save(&args.output)?;

    println!(
        "Added {} window view(s): {} -> {}",
        args.num_windows,
        args.input.display(),
        args.output.display()
    );
    Ok(())
}
