//! TOML configuration file support for the export command.
//!
//! Instead of passing flags, users can specify settings in a config file:
//!
//! ```toml
//! # tiffbeam.toml
//! [export]
//! output_directory = "out"
//! file_prefix = "{run}-"
//! mode = "series"
//! ```
//!
//! Command-line flags take precedence over config-file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use tiffbeam::export::ExportMode;

/// Root configuration structure for tiffbeam.toml files.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Export-specific settings.
    #[serde(default)]
    pub export: ExportSection,
}

/// Configuration for the export command.
#[derive(Debug, Default, Deserialize)]
pub struct ExportSection {
    /// Directory the output files land in.
    pub output_directory: Option<PathBuf>,

    /// File-prefix template; "{run}" expands to the run identifier.
    pub file_prefix: Option<String>,

    /// Output mode ("stack" or "series").
    pub mode: Option<ExportMode>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [export]
            output_directory = "out"
            file_prefix = "scan_{run}_"
            mode = "series"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.export.output_directory, Some(PathBuf::from("out")));
        assert_eq!(config.export.file_prefix.as_deref(), Some("scan_{run}_"));
        assert_eq!(config.export.mode, Some(ExportMode::Series));
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
            [export]
            mode = "stack"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.export.mode, Some(ExportMode::Stack));
        assert_eq!(config.export.output_directory, None);
    }

    #[test]
    fn parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.export.mode, None);
    }
}
