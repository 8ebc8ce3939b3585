use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tiffbeam::export::ExportMode;

mod config;
mod demo;
mod export;
mod info;

/// tiffbeam - Document Streams to TIFF Files
#[derive(Parser)]
#[command(name = "tiffbeam")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Output mode selection.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum ModeArg {
    /// All frames of a stream/field in one multi-page file
    #[default]
    Stack,
    /// One sequentially numbered file per frame
    Series,
}

impl From<ModeArg> for ExportMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Stack => ExportMode::Stack,
            ModeArg::Series => ExportMode::Series,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Export a JSON Lines document stream to TIFF files
    Export {
        /// Input document stream (one ["kind", {body}] pair per line)
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output directory (defaults to the input file stem)
        #[arg(value_name = "OUTPUT_DIR")]
        output: Option<PathBuf>,

        /// Output mode (stack or series)
        #[arg(short = 'm', long, value_enum)]
        mode: Option<ModeArg>,

        /// File-prefix template; "{run}" expands to the run identifier
        #[arg(short = 'p', long)]
        prefix: Option<String>,

        /// Load settings from a TOML config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Generate a synthetic demo run and export it
    Demo {
        /// Output directory
        #[arg(value_name = "OUTPUT_DIR", default_value = "demo_run")]
        output: PathBuf,

        /// Number of events to generate
        #[arg(short = 'n', long, default_value = "5")]
        events: usize,

        /// Output mode (stack or series)
        #[arg(short = 'm', long, value_enum, default_value = "series")]
        mode: ModeArg,
    },

    /// Display information about a produced TIFF file
    Info {
        /// Input TIFF file path
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Export {
            input,
            output,
            mode,
            prefix,
            config,
        } => export::run(input, output, mode, prefix, config),
        Commands::Demo {
            output,
            events,
            mode,
        } => demo::run(output, events, mode.into()),
        Commands::Info { file } => info::run(file),
    }
}
