use anyhow::{Context, Result};
use std::path::PathBuf;

use tiffbeam::reader::read_frames;

/// Print a per-page summary of a TIFF file.
pub fn run(file: PathBuf) -> Result<()> {
    let frames = read_frames(&file)
        .with_context(|| format!("Failed to read TIFF file: {}", file.display()))?;

    println!("File: {}", file.display());
    println!("Pages: {}", frames.len());
    println!();

    for (index, frame) in frames.iter().enumerate() {
        let dims: Vec<String> = frame.shape().iter().map(|d| d.to_string()).collect();
        println!(
            "  page {index}: {} {} ({} pixels)",
            dims.join("x"),
            frame.dtype().name(),
            frame.len()
        );
    }

    Ok(())
}
