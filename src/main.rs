//! # tiffbeam CLI
//!
//! Command-line front end for exporting experiment-run document streams to
//! TIFF files.
//!
//! ## Usage
//!
//! ```bash
//! # Export a JSON Lines document stream to one file per frame
//! tiffbeam export run.jsonl out/ --mode series
//!
//! # Generate and export a synthetic demo run
//! tiffbeam demo demo_out/
//!
//! # Inspect a produced file
//! tiffbeam info out/abc123-primary-det_img.tiff
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
