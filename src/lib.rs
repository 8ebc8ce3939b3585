//! # tiffbeam - Document Streams to TIFF Files
//!
//! `tiffbeam` serializes a self-describing stream of experiment-run documents
//! (metadata plus numeric array payloads, possibly stored externally and
//! referenced indirectly) into TIFF image files on disk.
//!
//! ## Key Features
//!
//! - **Two output modes**: *stack* (all frames of a `(stream, field)` as pages
//!   of one multi-page TIFF) and *series* (one sequentially numbered file per
//!   frame).
//! - **Streaming**: documents are consumed one at a time and frames flow
//!   straight to disk; memory stays bounded at one frame per field regardless
//!   of run length.
//! - **Indirect references**: event values may point at externally stored
//!   arrays through resource/datum records, dereferenced via pluggable
//!   [`resolve::FrameReader`] capabilities keyed by resource kind.
//! - **Eager failure**: out-of-order documents, schema drift and file-name
//!   collisions surface as typed errors before output is corrupted, and every
//!   open handle is released before an error propagates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiffbeam::document::Document;
//! use tiffbeam::export::{export, ExportConfig, ExportMode};
//!
//! let lines = [
//!     r#"["start", {"run_id": "abc123"}]"#,
//!     r#"["descriptor", {"stream_name": "primary",
//!         "fields": {"det_img": {"shape": [2, 2], "dtype": "uint16"}}}]"#,
//!     r#"["event", {"stream_name": "primary", "timestamp": 0.0,
//!         "data": {"det_img": [[1, 2], [3, 4]]}}]"#,
//!     r#"["stop", {"run_id": "abc123"}]"#,
//! ];
//! let documents = lines
//!     .iter()
//!     .map(|line| Document::from_json_line(line))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let config = ExportConfig::new("out", ExportMode::Series);
//! let stats = export(documents, &config)?;
//! println!("wrote {} files", stats.files_written);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! This writes `out/abc123-primary-det_img-0.tiff`; stack mode would write a
//! single `out/abc123-primary-det_img.tiff` holding every frame in arrival
//! order.
//!
//! ## Document Protocol
//!
//! One export call processes exactly one run. Documents are `(kind, body)`
//! pairs arriving in order:
//!
//! | Kind | Role |
//! |------|------|
//! | `start` | opens the run; carries `run_id` and run metadata |
//! | `descriptor` | declares a stream's fields (shape, dtype, external flag) |
//! | `resource` | registers an external data source |
//! | `datum` | points one reference id at a slice of a resource |
//! | `event` | one timestamped sample; values inline or datum references |
//! | `stop` | closes the run and finalizes every writer |
//!
//! Unrecognized kinds are ignored for forward compatibility.
//!
//! ## Architecture
//!
//! - [`document`]: the closed document union and its wire form
//! - [`frame`]: typed array payloads and JSON conversion
//! - [`schema`]: declared field shapes/dtypes and re-description rules
//! - [`resolve`]: inline and indirect value resolution
//! - [`naming`]: deterministic, collision-checked output paths
//! - [`codec`]: the injected TIFF encoder seam and its file-backed impl
//! - [`writer`]: the stack and series sinks
//! - [`reader`]: read-back of produced files
//! - [`export`]: the run state machine and `export` entry point

// Documentation lints - enforce complete documentation for publication
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod codec;
pub mod document;
pub mod export;
pub mod frame;
pub mod naming;
pub mod reader;
pub mod resolve;
pub mod schema;
pub mod writer;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::codec::{CodecError, FileTiffCodec, TiffCodec, TiffSink};
    pub use crate::document::{
        Datum, Document, DocumentError, Event, FieldValue, Resource, RunStart, RunStop,
        StreamDescriptor,
    };
    pub use crate::export::{
        export, ExportConfig, ExportError, ExportMode, ExportOrchestrator, ExportStats,
    };
    pub use crate::frame::{Dtype, Frame, FrameData, FrameError};
    pub use crate::naming::{sanitize, FileNamer, NameTable, NamingError, DEFAULT_FILE_PREFIX};
    pub use crate::reader::{read_frames, ReaderError};
    pub use crate::resolve::{
        FieldResolver, FrameReader, JsonArrayReader, ResolveError, JSON_ARRAY_KIND,
    };
    pub use crate::schema::{FieldSpec, SchemaMismatchError, StreamSchema};
    pub use crate::writer::{FrameBuffer, SeriesWriter, StackWriter, WriterError, WriterStats};
}
