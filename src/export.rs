//! # Export Orchestrator
//!
//! The state machine that consumes one run's document stream and drives
//! resolver → writers. States:
//!
//! ```text
//! AwaitingRunStart → InRun → Closed
//! ```
//!
//! A start document enters `InRun` and fixes the run identifier, the file
//! prefix and the output mode for the whole run. Descriptors register stream
//! schemas (and eagerly claim output names), resources and datums populate the
//! reference registries, events resolve into frames and flow to the active
//! writer, and the stop document finalizes everything. Out-of-order documents
//! raise [`ExportError::Protocol`]; unknown kinds are ignored.
//!
//! Processing is strictly single-threaded and synchronous: the only suspension
//! point is waiting for the next document, and file identity is a pure
//! function of `(run, stream, field[, index])`, so no locking exists anywhere.
//! On any error every open writer is released before the error propagates;
//! files already finalized stay on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::codec::{FileTiffCodec, TiffCodec};
use crate::document::{Document, Event, Resource, RunStart, RunStop, StreamDescriptor};
use crate::frame::Frame;
use crate::naming::{FileNamer, NameTable, NamingError, DEFAULT_FILE_PREFIX};
use crate::resolve::{FieldResolver, FrameReader, ResolveError};
use crate::schema::{SchemaMismatchError, StreamSchema};
use crate::writer::{SeriesWriter, StackWriter, WriterError, WriterStats};

/// Errors that abort an export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Documents arrived outside the legal state-machine order.
    #[error("protocol error ({state}): {detail}")]
    Protocol {
        /// Machine state when the document arrived.
        state: &'static str,
        /// What was wrong with the document.
        detail: String,
    },

    /// Declared vs observed shape/dtype conflict.
    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),

    /// A reference could not be resolved, or a value was invalid.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Two fields sanitize to the same output path.
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// A writer or the TIFF codec failed.
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// Filesystem failure outside the codec (e.g. creating the output
    /// directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output mode, fixed for the whole run at export start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// All frames of a `(stream, field)` appended to one multi-page file.
    Stack,
    /// One single-page file per frame, numbered sequentially.
    Series,
}

/// Configuration for one export invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory the output files land in; created if absent.
    pub output_directory: PathBuf,

    /// File-prefix template; `{run}` expands to the run identifier.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// Stack or series output.
    pub mode: ExportMode,
}

fn default_prefix() -> String {
    DEFAULT_FILE_PREFIX.to_string()
}

impl ExportConfig {
    /// Stack-mode configuration with the default prefix.
    pub fn new(output_directory: impl Into<PathBuf>, mode: ExportMode) -> Self {
        Self {
            output_directory: output_directory.into(),
            file_prefix: default_prefix(),
            mode,
        }
    }
}

/// Statistics from a completed export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Identifier of the exported run (empty if no start document arrived).
    pub run_id: String,
    /// Total pages written.
    pub frames_written: usize,
    /// Output files created.
    pub files_written: usize,
    /// Paths of every written file, in creation order.
    pub artifacts: Vec<PathBuf>,
}

impl std::fmt::Display for ExportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run '{}': {} frames in {} files",
            self.run_id, self.frames_written, self.files_written
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    AwaitingStart,
    InRun,
    Closed,
}

impl RunState {
    fn name(self) -> &'static str {
        match self {
            RunState::AwaitingStart => "awaiting-run-start",
            RunState::InRun => "in-run",
            RunState::Closed => "closed",
        }
    }
}

enum SinkDispatch<C: TiffCodec> {
    Stack(StackWriter<C>),
    Series(SeriesWriter<C>),
}

impl<C: TiffCodec> SinkDispatch<C> {
    fn write_frame(&mut self, stream: &str, field: &str, frame: Frame) -> Result<(), WriterError> {
        match self {
            SinkDispatch::Stack(w) => w.write_frame(stream, field, frame),
            SinkDispatch::Series(w) => w.write_frame(stream, field, frame),
        }
    }

    fn close_all(&mut self) -> Result<(), WriterError> {
        match self {
            SinkDispatch::Stack(w) => w.close_all(),
            SinkDispatch::Series(w) => w.close_all(),
        }
    }

    fn artifacts(&self) -> Vec<PathBuf> {
        match self {
            SinkDispatch::Stack(w) => w.artifacts().to_vec(),
            SinkDispatch::Series(w) => w.artifacts().to_vec(),
        }
    }

    fn stats(&self) -> WriterStats {
        match self {
            SinkDispatch::Stack(w) => w.stats(),
            SinkDispatch::Series(w) => w.stats(),
        }
    }
}

/// Stateful consumer of one run's document stream.
///
/// Feed documents in arrival order via [`process`](Self::process), then call
/// [`finish`](Self::finish). The convenience wrapper [`export`] does both.
pub struct ExportOrchestrator<C: TiffCodec> {
    config: ExportConfig,
    resolver: FieldResolver,
    state: RunState,
    run_id: Option<String>,
    schemas: BTreeMap<String, StreamSchema>,
    names: NameTable,
    codec: Option<C>,
    sink: Option<SinkDispatch<C>>,
}

impl ExportOrchestrator<FileTiffCodec> {
    /// An orchestrator writing real TIFF files, with the built-in readers.
    pub fn new(config: ExportConfig) -> Self {
        Self::with_codec(config, FileTiffCodec)
    }
}

impl<C: TiffCodec> ExportOrchestrator<C> {
    /// An orchestrator over an injected codec, with the built-in readers.
    pub fn with_codec(config: ExportConfig, codec: C) -> Self {
        Self::with_resolver(config, codec, FieldResolver::with_default_readers())
    }

    /// An orchestrator over an injected codec and a caller-built resolver.
    pub fn with_resolver(config: ExportConfig, codec: C, resolver: FieldResolver) -> Self {
        Self {
            config,
            resolver,
            state: RunState::AwaitingStart,
            run_id: None,
            schemas: BTreeMap::new(),
            names: NameTable::new(),
            codec: Some(codec),
            sink: None,
        }
    }

    /// Register a frame reader for one resource kind.
    pub fn register_reader(&mut self, kind: impl Into<String>, reader: Box<dyn FrameReader>) {
        self.resolver.register_reader(kind, reader);
    }

    /// Identifier of the run being exported, once the start document arrived.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn protocol(&self, detail: impl Into<String>) -> ExportError {
        ExportError::Protocol {
            state: self.state.name(),
            detail: detail.into(),
        }
    }

    /// Dispatch one document to its lifecycle transition.
    pub fn process(&mut self, document: Document) -> Result<(), ExportError> {
        match document {
            Document::Start(start) => self.handle_start(start),
            Document::Descriptor(descriptor) => self.handle_descriptor(descriptor),
            Document::Resource(resource) => self.handle_resource(resource),
            Document::Datum(datum) => {
                self.require_in_run("datum")?;
                self.resolver.register_datum(datum);
                Ok(())
            }
            Document::Event(event) => self.handle_event(event),
            Document::Stop(stop) => self.handle_stop(stop),
            Document::Other { kind } => {
                // Forward compatibility: unrecognized kinds are never fatal,
                // in any state.
                debug!("ignoring document of unrecognized kind '{kind}'");
                Ok(())
            }
        }
    }

    fn require_in_run(&self, kind: &str) -> Result<(), ExportError> {
        match self.state {
            RunState::InRun => Ok(()),
            RunState::AwaitingStart => {
                Err(self.protocol(format!("'{kind}' document before run start")))
            }
            RunState::Closed => Err(self.protocol(format!("'{kind}' document after run stop"))),
        }
    }

    fn handle_start(&mut self, start: RunStart) -> Result<(), ExportError> {
        match self.state {
            RunState::AwaitingStart => {}
            RunState::InRun => {
                return Err(self.protocol(format!(
                    "second start document (run '{}') inside an open run",
                    start.run_id
                )))
            }
            RunState::Closed => return Err(self.protocol("start document after run stop")),
        }

        std::fs::create_dir_all(&self.config.output_directory)?;
        let namer = FileNamer::new(
            &self.config.output_directory,
            &self.config.file_prefix,
            &start.run_id,
        );
        let codec = match self.codec.take() {
            Some(codec) => codec,
            None => return Err(self.protocol("start document after run stop")),
        };
        self.sink = Some(match self.config.mode {
            ExportMode::Stack => SinkDispatch::Stack(StackWriter::new(codec, namer)),
            ExportMode::Series => SinkDispatch::Series(SeriesWriter::new(codec, namer)),
        });

        info!(
            "run '{}' started, exporting to {} in {:?} mode",
            start.run_id,
            self.config.output_directory.display(),
            self.config.mode
        );
        self.run_id = Some(start.run_id);
        self.state = RunState::InRun;
        Ok(())
    }

    fn handle_descriptor(&mut self, descriptor: StreamDescriptor) -> Result<(), ExportError> {
        self.require_in_run("descriptor")?;

        // Claim output names before anything is opened, so a sanitization
        // collision surfaces now instead of as an overwrite later.
        let namer = self.namer()?;
        let image_fields: Vec<String> = descriptor
            .fields
            .iter()
            .filter(|(_, spec)| spec.is_image())
            .map(|(name, _)| name.clone())
            .collect();
        for field in &image_fields {
            self.names.claim(&namer, &descriptor.stream_name, field)?;
        }

        match self.schemas.get_mut(&descriptor.stream_name) {
            Some(existing) => {
                debug!("stream '{}' redescribed", descriptor.stream_name);
                existing.redescribe(descriptor.fields)?;
            }
            None => {
                debug!(
                    "stream '{}' declared with {} image field(s)",
                    descriptor.stream_name,
                    image_fields.len()
                );
                self.schemas.insert(
                    descriptor.stream_name.clone(),
                    StreamSchema::new(descriptor.stream_name, descriptor.fields),
                );
            }
        }
        Ok(())
    }

    fn handle_resource(&mut self, resource: Resource) -> Result<(), ExportError> {
        self.require_in_run("resource")?;
        debug!("registered resource '{}' of kind '{}'", resource.id, resource.kind);
        self.resolver.register_resource(resource);
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<(), ExportError> {
        self.require_in_run("event")?;
        let schema = self
            .schemas
            .get(&event.stream_name)
            .ok_or_else(|| {
                self.protocol(format!(
                    "event for stream '{}' which has no descriptor",
                    event.stream_name
                ))
            })?
            .clone();

        for (field, value) in &event.data {
            let Some(spec) = schema.field(field) else {
                return Err(self.protocol(format!(
                    "event carries field '{}' not declared by stream '{}'",
                    field, event.stream_name
                )));
            };
            if !spec.is_image() {
                debug!(
                    "skipping non-image field '{}' in stream '{}'",
                    field, event.stream_name
                );
                continue;
            }

            let frame = self
                .resolver
                .resolve(&event.stream_name, field, spec, value)?;
            let sink = match self.sink.as_mut() {
                Some(sink) => sink,
                None => return Err(ExportError::Protocol {
                    state: RunState::InRun.name(),
                    detail: "event before run start".to_string(),
                }),
            };
            sink.write_frame(&event.stream_name, field, frame)?;
        }
        Ok(())
    }

    fn handle_stop(&mut self, stop: RunStop) -> Result<(), ExportError> {
        self.require_in_run("stop")?;
        if let Some(run_id) = &self.run_id {
            if *run_id != stop.run_id {
                return Err(self.protocol(format!(
                    "stop document for run '{}' inside run '{}'",
                    stop.run_id, run_id
                )));
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.close_all()?;
        }
        self.state = RunState::Closed;
        info!("run '{}' stopped", stop.run_id);
        Ok(())
    }

    fn namer(&self) -> Result<FileNamer, ExportError> {
        match (&self.run_id, self.state) {
            (Some(run_id), RunState::InRun) => Ok(FileNamer::new(
                &self.config.output_directory,
                &self.config.file_prefix,
                run_id,
            )),
            _ => Err(self.protocol("no open run")),
        }
    }

    /// Release every open writer, swallowing secondary errors. Used on the
    /// error path so no handle outlives a failed export.
    pub fn abort(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.close_all();
        }
        self.state = RunState::Closed;
    }

    /// Finalize any writers still open and report statistics.
    ///
    /// A stream that ends without a stop document is closed here, exactly as
    /// if the stop had arrived.
    pub fn finish(mut self) -> Result<ExportStats, ExportError> {
        if let Some(sink) = self.sink.as_mut() {
            sink.close_all()?;
        }
        let (frames_written, files_written, artifacts) = match &self.sink {
            Some(sink) => {
                let stats = sink.stats();
                (stats.frames_written, stats.files_written, sink.artifacts())
            }
            None => (0, 0, Vec::new()),
        };
        Ok(ExportStats {
            run_id: self.run_id.unwrap_or_default(),
            frames_written,
            files_written,
            artifacts,
        })
    }
}

/// Export one run's document stream to TIFF files.
///
/// Pulls documents one at a time, in order. On success returns the run's
/// statistics including every written path; on failure all open writers are
/// released first, and files finalized before the failure remain on disk.
pub fn export<I>(documents: I, config: &ExportConfig) -> Result<ExportStats, ExportError>
where
    I: IntoIterator<Item = Document>,
{
    let mut orchestrator = ExportOrchestrator::new(config.clone());
    for document in documents {
        if let Err(err) = orchestrator.process(document) {
            orchestrator.abort();
            return Err(err);
        }
    }
    orchestrator.finish()
}
