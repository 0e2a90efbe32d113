//! Thin CLI entry point for the recording utility; all the testable logic
//! lives in `tes_core::recorder` (`spec.md` §1: "a thin bin that calls
//! it").

use clap::Parser;
use tes_core::recorder::{run, RecorderArgs};

fn main() {
    let args = RecorderArgs::parse();
    if let Err(err) = run(args) {
        eprintln!("tes-record: {err}");
        std::process::exit(1);
    }
}
