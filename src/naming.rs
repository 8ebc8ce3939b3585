//! # Output File Naming
//!
//! Deterministic, collision-free mapping from `(run, stream, field[, index])`
//! to paths under the output directory.
//!
//! Stack mode produces `<prefix><stream>-<field>.tiff`; series mode produces
//! `<prefix><stream>-<field>-<index>.tiff` with a zero-based contiguous index
//! per `(stream, field)`. The prefix comes from a template in which `{run}`
//! is replaced by the run identifier; the default template is `"{run}-"`.
//!
//! Stream and field names are sanitized for the filesystem before use. Two
//! distinct fields that sanitize to the same name would silently target the
//! same file, so uniqueness is checked eagerly, when a descriptor arrives,
//! before any file is opened.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default file-prefix template; `{run}` expands to the run identifier.
pub const DEFAULT_FILE_PREFIX: &str = "{run}-";

/// Template token replaced by the run identifier.
pub const RUN_TOKEN: &str = "{run}";

/// Extension of every output file.
pub const TIFF_EXTENSION: &str = "tiff";

/// Naming failures detected before any file is opened.
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    /// Two distinct fields map to the same sanitized path.
    #[error(
        "fields '{first_stream}/{first_field}' and '{second_stream}/{second_field}' \
         both sanitize to output stem '{stem}'"
    )]
    Collision {
        /// Sanitized stem both fields map to.
        stem: String,
        /// Stream of the field that claimed the stem first.
        first_stream: String,
        /// Field that claimed the stem first.
        first_field: String,
        /// Stream of the colliding field.
        second_stream: String,
        /// Colliding field.
        second_field: String,
    },
}

/// Replace characters that are unsafe in file names with `_`.
///
/// Keeps ASCII alphanumerics, `.`, `_` and `-`; everything else (path
/// separators, drive colons, whitespace, non-ASCII) becomes `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Pure path computation for one run's output files.
#[derive(Debug, Clone)]
pub struct FileNamer {
    directory: PathBuf,
    prefix: String,
}

impl FileNamer {
    /// Build a namer for one run by expanding the prefix template.
    pub fn new(directory: impl AsRef<Path>, prefix_template: &str, run_id: &str) -> Self {
        let prefix = prefix_template.replace(RUN_TOKEN, &sanitize(run_id));
        Self {
            directory: directory.as_ref().to_path_buf(),
            prefix,
        }
    }

    /// Output directory the paths land in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Sanitized `<stream>-<field>` stem shared by both modes.
    pub fn stem(&self, stream: &str, field: &str) -> String {
        format!("{}-{}", sanitize(stream), sanitize(field))
    }

    /// Path of the single multi-page file for `(stream, field)` in stack mode.
    pub fn stack_path(&self, stream: &str, field: &str) -> PathBuf {
        self.directory.join(format!(
            "{}{}.{}",
            self.prefix,
            self.stem(stream, field),
            TIFF_EXTENSION
        ))
    }

    /// Path of the `index`-th single-frame file for `(stream, field)` in
    /// series mode.
    pub fn series_path(&self, stream: &str, field: &str, index: usize) -> PathBuf {
        self.directory.join(format!(
            "{}{}-{}.{}",
            self.prefix,
            self.stem(stream, field),
            index,
            TIFF_EXTENSION
        ))
    }
}

/// Tracks which sanitized stems are claimed and by whom.
///
/// Owned by the orchestrator for the life of one run; collisions surface here,
/// at descriptor time, rather than as an overwrite at write time.
#[derive(Debug, Default)]
pub struct NameTable {
    claimed: BTreeMap<String, (String, String)>,
}

impl NameTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the stem for `(stream, field)`.
    ///
    /// Re-claiming by the same field (stream re-description) is a no-op;
    /// a claim by a different field is a [`NamingError::Collision`].
    pub fn claim(
        &mut self,
        namer: &FileNamer,
        stream: &str,
        field: &str,
    ) -> Result<(), NamingError> {
        let stem = namer.stem(stream, field);
        match self.claimed.get(&stem) {
            None => {
                self.claimed
                    .insert(stem, (stream.to_string(), field.to_string()));
                Ok(())
            }
            Some((s, f)) if s == stream && f == field => Ok(()),
            Some((s, f)) => Err(NamingError::Collision {
                stem,
                first_stream: s.clone(),
                first_field: f.clone(),
                second_stream: stream.to_string(),
                second_field: field.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_passes_safe_names_through() {
        assert_eq!(sanitize("det_img-2.roi"), "det_img-2.roi");
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("img/a"), "img_a");
        assert_eq!(sanitize("img:a"), "img_a");
        assert_eq!(sanitize("a b\tc"), "a_b_c");
    }

    #[test]
    fn default_prefix_embeds_run_id() {
        let namer = FileNamer::new("/out", DEFAULT_FILE_PREFIX, "abc123");
        assert_eq!(
            namer.stack_path("primary", "det_img"),
            PathBuf::from("/out/abc123-primary-det_img.tiff")
        );
    }

    #[test]
    fn series_path_embeds_index_before_extension() {
        let namer = FileNamer::new("/out", DEFAULT_FILE_PREFIX, "abc123");
        assert_eq!(
            namer.series_path("primary", "det_img", 2),
            PathBuf::from("/out/abc123-primary-det_img-2.tiff")
        );
    }

    #[test]
    fn custom_template_substitutes_run_token() {
        let namer = FileNamer::new("/out", "scan_{run}_", "xyz");
        assert_eq!(
            namer.stack_path("primary", "img"),
            PathBuf::from("/out/scan_xyz_primary-img.tiff")
        );
    }

    #[test]
    fn run_id_is_sanitized_in_prefix() {
        let namer = FileNamer::new("/out", DEFAULT_FILE_PREFIX, "ab/cd");
        assert_eq!(
            namer.stack_path("primary", "img"),
            PathBuf::from("/out/ab_cd-primary-img.tiff")
        );
    }

    #[test]
    fn colliding_sanitized_fields_are_rejected() {
        let namer = FileNamer::new("/out", DEFAULT_FILE_PREFIX, "r");
        let mut table = NameTable::new();
        table.claim(&namer, "primary", "img/a").unwrap();
        let err = table.claim(&namer, "primary", "img:a").unwrap_err();
        assert!(matches!(err, NamingError::Collision { ref stem, .. } if stem == "primary-img_a"));
    }

    #[test]
    fn reclaim_by_same_field_is_a_no_op() {
        let namer = FileNamer::new("/out", DEFAULT_FILE_PREFIX, "r");
        let mut table = NameTable::new();
        table.claim(&namer, "primary", "img").unwrap();
        table.claim(&namer, "primary", "img").unwrap();
    }
}
