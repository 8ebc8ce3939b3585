use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tiffbeam::document::Document;
use tiffbeam::export::{ExportConfig, ExportMode, ExportOrchestrator};
use tiffbeam::naming::DEFAULT_FILE_PREFIX;

use super::config::Config;
use super::ModeArg;

/// Export a JSON Lines document stream to TIFF files.
pub fn run(
    input: PathBuf,
    output: Option<PathBuf>,
    mode: Option<ModeArg>,
    prefix: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let file_config = match &config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Precedence: CLI flag, then config file, then default.
    let output_directory = output
        .or(file_config.export.output_directory)
        .unwrap_or_else(|| input.with_extension(""));
    let file_prefix = prefix
        .or(file_config.export.file_prefix)
        .unwrap_or_else(|| DEFAULT_FILE_PREFIX.to_string());
    let mode = mode
        .map(ExportMode::from)
        .or(file_config.export.mode)
        .unwrap_or(ExportMode::Stack);

    info!("Exporting {} in {:?} mode", input.display(), mode);
    info!("Output directory: {}", output_directory.display());

    let export_config = ExportConfig {
        output_directory,
        file_prefix,
        mode,
    };
    let mut orchestrator = ExportOrchestrator::new(export_config);

    let reader = BufReader::new(
        File::open(&input).with_context(|| format!("Failed to open {}", input.display()))?,
    );
    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let document = Document::from_json_line(&line)
            .with_context(|| format!("Invalid document on line {}", number + 1))?;
        if let Err(err) = orchestrator.process(document) {
            orchestrator.abort();
            return Err(err).with_context(|| format!("Export failed on line {}", number + 1));
        }
    }

    let stats = orchestrator.finish().context("Failed to finalize export")?;

    info!("Export complete!");
    info!("  Run: {}", stats.run_id);
    info!("  Frames written: {}", stats.frames_written);
    info!("  Files written: {}", stats.files_written);
    for path in &stats.artifacts {
        println!("{}", path.display());
    }

    Ok(())
}
