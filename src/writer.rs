//! # Frame Writers
//!
//! The two terminal sinks of the export pipeline.
//!
//! [`StackWriter`] keeps one open output target per `(stream, field)` and
//! appends every frame as the next page of that target's multi-page file.
//! [`SeriesWriter`] writes one single-page file per frame and closes it
//! immediately, so it holds no handle across frames and is crash-safe up to
//! the last fully written file. A crash mid-run can leave the current stack
//! file unreadable; that asymmetry is inherent to stack mode and is not
//! papered over here.
//!
//! [`FrameBuffer`] is the shared arrival-order counter: frames flow through,
//! they are never accumulated, so memory stays bounded at one frame per field
//! regardless of run length.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::debug;

use crate::codec::{CodecError, TiffCodec, TiffSink};
use crate::frame::{Dtype, Frame};
use crate::naming::FileNamer;
use crate::schema::SchemaMismatchError;

/// Errors surfaced by the frame writers.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// A write was attempted after the target was finalized.
    #[error("stream '{stream}' field '{field}': write attempted after finalize")]
    Closed {
        /// Stream of the rejected write.
        stream: String,
        /// Field of the rejected write.
        field: String,
    },

    /// A page disagrees with the first page written to its file.
    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),

    /// Failure inside the TIFF codec for one output file.
    #[error("codec failure for '{path}': {source}")]
    Codec {
        /// File the codec was writing.
        path: PathBuf,
        /// Underlying codec error.
        #[source]
        source: CodecError,
    },
}

/// Statistics reported by a writer when the run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Total pages written across all fields.
    pub frames_written: usize,
    /// Output files created.
    pub files_written: usize,
}

/// Arrival-order page counter for one `(stream, field)`.
///
/// Deliberately a counter and not a cache: it hands out the next zero-based
/// index and remembers how many pages have flowed through, nothing more.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameBuffer {
    count: usize,
}

impl FrameBuffer {
    /// A counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next index in arrival order.
    pub fn next_index(&mut self) -> usize {
        let index = self.count;
        self.count += 1;
        index
    }

    /// Pages seen so far.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no page has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

struct StackTarget {
    path: PathBuf,
    sink: Option<Box<dyn TiffSink>>,
    first_page: Option<([usize; 2], Dtype)>,
    pages: FrameBuffer,
    closed: bool,
}

/// Writes all frames of each `(stream, field)` into one multi-page file.
pub struct StackWriter<C: TiffCodec> {
    codec: C,
    namer: FileNamer,
    targets: BTreeMap<(String, String), StackTarget>,
    artifacts: Vec<PathBuf>,
    frames_written: usize,
}

impl<C: TiffCodec> StackWriter<C> {
    /// Build a stack writer over `codec`, naming files via `namer`.
    pub fn new(codec: C, namer: FileNamer) -> Self {
        Self {
            codec,
            namer,
            targets: BTreeMap::new(),
            artifacts: Vec::new(),
            frames_written: 0,
        }
    }

    /// Append one frame (one or more pages) to the field's file, creating the
    /// file lazily on the first frame.
    pub fn write_frame(
        &mut self,
        stream: &str,
        field: &str,
        frame: Frame,
    ) -> Result<(), WriterError> {
        let key = (stream.to_string(), field.to_string());
        if !self.targets.contains_key(&key) {
            let path = self.namer.stack_path(stream, field);
            debug!("opening stack file {}", path.display());
            let sink = self
                .codec
                .open(&path)
                .map_err(|source| WriterError::Codec {
                    path: path.clone(),
                    source,
                })?;
            self.artifacts.push(path.clone());
            self.targets.insert(
                key.clone(),
                StackTarget {
                    path,
                    sink: Some(sink),
                    first_page: None,
                    pages: FrameBuffer::new(),
                    closed: false,
                },
            );
        }

        for page in frame.into_pages() {
            self.append_page(stream, field, &key, page)?;
        }
        Ok(())
    }

    fn append_page(
        &mut self,
        stream: &str,
        field: &str,
        key: &(String, String),
        page: Frame,
    ) -> Result<(), WriterError> {
        // Entry exists by construction in write_frame.
        let Some(target) = self.targets.get_mut(key) else {
            return Err(WriterError::Closed {
                stream: stream.to_string(),
                field: field.to_string(),
            });
        };
        if target.closed {
            return Err(WriterError::Closed {
                stream: stream.to_string(),
                field: field.to_string(),
            });
        }

        if let Some(dims) = page.page_dims() {
            match target.first_page {
                None => target.first_page = Some((dims, page.dtype())),
                Some((expected, expected_dtype))
                    if expected != dims || expected_dtype != page.dtype() =>
                {
                    // Abort the file rather than writing a corrupt page; the
                    // handle is dropped without finalizing further pages.
                    target.sink = None;
                    target.closed = true;
                    return Err(SchemaMismatchError::PageDrift {
                        stream: stream.to_string(),
                        field: field.to_string(),
                        index: target.pages.len(),
                        expected,
                        expected_dtype,
                        observed: dims,
                        observed_dtype: page.dtype(),
                    }
                    .into());
                }
                Some(_) => {}
            }
        }

        let sink = target.sink.as_mut().ok_or_else(|| WriterError::Closed {
            stream: stream.to_string(),
            field: field.to_string(),
        })?;
        sink.append_page(&page).map_err(|source| WriterError::Codec {
            path: target.path.clone(),
            source,
        })?;
        target.pages.next_index();
        self.frames_written += 1;
        Ok(())
    }

    /// Finalize one field's file. Idempotent; unknown targets are a no-op.
    pub fn close(&mut self, stream: &str, field: &str) -> Result<(), WriterError> {
        let key = (stream.to_string(), field.to_string());
        if let Some(target) = self.targets.get_mut(&key) {
            Self::finalize_target(target)?;
        }
        Ok(())
    }

    fn finalize_target(target: &mut StackTarget) -> Result<(), WriterError> {
        target.closed = true;
        if let Some(sink) = target.sink.take() {
            debug!("finalizing stack file {}", target.path.display());
            sink.finish().map_err(|source| WriterError::Codec {
                path: target.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Finalize every open target. Idempotent. All handles are released even
    /// when one of them fails to finalize; the first failure is reported.
    pub fn close_all(&mut self) -> Result<(), WriterError> {
        let mut first_error = None;
        for target in self.targets.values_mut() {
            if let Err(err) = Self::finalize_target(target) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Paths of every file created so far, in creation order.
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Page and file counts.
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            frames_written: self.frames_written,
            files_written: self.artifacts.len(),
        }
    }
}

/// Writes each frame to its own sequentially numbered single-page file.
pub struct SeriesWriter<C: TiffCodec> {
    codec: C,
    namer: FileNamer,
    counters: BTreeMap<(String, String), FrameBuffer>,
    artifacts: Vec<PathBuf>,
    frames_written: usize,
    finalized: bool,
}

impl<C: TiffCodec> SeriesWriter<C> {
    /// Build a series writer over `codec`, naming files via `namer`.
    pub fn new(codec: C, namer: FileNamer) -> Self {
        Self {
            codec,
            namer,
            counters: BTreeMap::new(),
            artifacts: Vec::new(),
            frames_written: 0,
            finalized: false,
        }
    }

    /// Write one frame (one file per page), numbering files contiguously from
    /// zero per `(stream, field)` for the life of the run.
    pub fn write_frame(
        &mut self,
        stream: &str,
        field: &str,
        frame: Frame,
    ) -> Result<(), WriterError> {
        if self.finalized {
            return Err(WriterError::Closed {
                stream: stream.to_string(),
                field: field.to_string(),
            });
        }

        let counter = self
            .counters
            .entry((stream.to_string(), field.to_string()))
            .or_default();

        for page in frame.into_pages() {
            let index = counter.next_index();
            let path = self.namer.series_path(stream, field, index);
            debug!("writing series file {}", path.display());
            let codec_err = |source| WriterError::Codec {
                path: path.clone(),
                source,
            };
            let mut sink = self.codec.open(&path).map_err(codec_err)?;
            sink.append_page(&page).map_err(codec_err)?;
            sink.finish().map_err(codec_err)?;
            self.artifacts.push(path);
            self.frames_written += 1;
        }
        Ok(())
    }

    /// Finalize the writer. No handles are held between frames, so this only
    /// marks the writer closed; calling it again is a no-op.
    pub fn close_all(&mut self) -> Result<(), WriterError> {
        self.finalized = true;
        Ok(())
    }

    /// Paths of every file written so far, in write order.
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Page and file counts.
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            frames_written: self.frames_written,
            files_written: self.artifacts.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::FrameData;
    use crate::naming::DEFAULT_FILE_PREFIX;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    /// In-memory codec fake recording every page handed to it.
    #[derive(Default)]
    pub(crate) struct MemState {
        pub files: Vec<MemFile>,
    }

    pub(crate) struct MemFile {
        pub path: PathBuf,
        pub pages: Vec<Frame>,
        pub finished: bool,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemCodec {
        pub state: Rc<RefCell<MemState>>,
    }

    struct MemSink {
        state: Rc<RefCell<MemState>>,
        index: usize,
    }

    impl TiffCodec for MemCodec {
        fn open(&self, path: &Path) -> Result<Box<dyn TiffSink>, CodecError> {
            let mut state = self.state.borrow_mut();
            state.files.push(MemFile {
                path: path.to_path_buf(),
                pages: Vec::new(),
                finished: false,
            });
            Ok(Box::new(MemSink {
                state: self.state.clone(),
                index: state.files.len() - 1,
            }))
        }
    }

    impl TiffSink for MemSink {
        fn append_page(&mut self, frame: &Frame) -> Result<(), CodecError> {
            if frame.page_dims().is_none() {
                return Err(CodecError::NotAPage {
                    shape: frame.shape().to_vec(),
                });
            }
            self.state.borrow_mut().files[self.index].pages.push(frame.clone());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), CodecError> {
            self.state.borrow_mut().files[self.index].finished = true;
            Ok(())
        }
    }

    fn namer() -> FileNamer {
        FileNamer::new("/out", DEFAULT_FILE_PREFIX, "run0")
    }

    fn page(fill: u16) -> Frame {
        Frame::new(vec![2, 2], FrameData::U16(vec![fill; 4])).unwrap()
    }

    #[test]
    fn stack_appends_pages_to_one_file_per_field() {
        let codec = MemCodec::default();
        let mut writer = StackWriter::new(codec.clone(), namer());
        for i in 0..3 {
            writer.write_frame("primary", "det_img", page(i)).unwrap();
        }
        writer.close_all().unwrap();

        let state = codec.state.borrow();
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files[0].path, PathBuf::from("/out/run0-primary-det_img.tiff"));
        assert_eq!(state.files[0].pages.len(), 3);
        assert!(state.files[0].finished);
        assert_eq!(
            writer.stats(),
            WriterStats {
                frames_written: 3,
                files_written: 1
            }
        );
    }

    #[test]
    fn stack_close_is_idempotent() {
        let codec = MemCodec::default();
        let mut writer = StackWriter::new(codec, namer());
        writer.write_frame("primary", "det_img", page(1)).unwrap();
        writer.close("primary", "det_img").unwrap();
        writer.close("primary", "det_img").unwrap();
        writer.close_all().unwrap();
        writer.close_all().unwrap();
    }

    #[test]
    fn stack_append_after_finalize_is_fatal() {
        let codec = MemCodec::default();
        let mut writer = StackWriter::new(codec, namer());
        writer.write_frame("primary", "det_img", page(1)).unwrap();
        writer.close("primary", "det_img").unwrap();
        let err = writer.write_frame("primary", "det_img", page(2)).unwrap_err();
        assert!(matches!(err, WriterError::Closed { .. }));
    }

    #[test]
    fn stack_rejects_page_drift_and_aborts_the_file() {
        let codec = MemCodec::default();
        let mut writer = StackWriter::new(codec.clone(), namer());
        writer.write_frame("primary", "det_img", page(1)).unwrap();

        let drifted = Frame::new(vec![3, 3], FrameData::U16(vec![0; 9])).unwrap();
        let err = writer.write_frame("primary", "det_img", drifted).unwrap_err();
        assert!(matches!(
            err,
            WriterError::Schema(SchemaMismatchError::PageDrift { index: 1, .. })
        ));

        // The file was abandoned, not finalized, and accepts nothing further.
        assert!(!codec.state.borrow().files[0].finished);
        let err = writer.write_frame("primary", "det_img", page(2)).unwrap_err();
        assert!(matches!(err, WriterError::Closed { .. }));
    }

    #[test]
    fn stack_rejects_dtype_drift() {
        let codec = MemCodec::default();
        let mut writer = StackWriter::new(codec, namer());
        writer.write_frame("primary", "det_img", page(1)).unwrap();
        let drifted = Frame::new(vec![2, 2], FrameData::F32(vec![0.0; 4])).unwrap();
        let err = writer.write_frame("primary", "det_img", drifted).unwrap_err();
        assert!(matches!(err, WriterError::Schema(_)));
    }

    #[test]
    fn series_writes_one_file_per_page_with_contiguous_indices() {
        let codec = MemCodec::default();
        let mut writer = SeriesWriter::new(codec.clone(), namer());
        for i in 0..3 {
            writer.write_frame("primary", "det_img", page(i)).unwrap();
        }
        writer.close_all().unwrap();

        let state = codec.state.borrow();
        assert_eq!(state.files.len(), 3);
        for (i, file) in state.files.iter().enumerate() {
            assert_eq!(
                file.path,
                PathBuf::from(format!("/out/run0-primary-det_img-{i}.tiff"))
            );
            assert_eq!(file.pages.len(), 1);
            assert!(file.finished);
        }
    }

    #[test]
    fn series_burst_frames_number_consecutively() {
        let codec = MemCodec::default();
        let mut writer = SeriesWriter::new(codec.clone(), namer());
        let burst = Frame::new(vec![2, 2, 2], FrameData::U16(vec![7; 8])).unwrap();
        writer.write_frame("primary", "det_img", burst).unwrap();
        writer.write_frame("primary", "det_img", page(9)).unwrap();

        let state = codec.state.borrow();
        let names: Vec<String> = state
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "run0-primary-det_img-0.tiff",
                "run0-primary-det_img-1.tiff",
                "run0-primary-det_img-2.tiff"
            ]
        );
    }

    #[test]
    fn series_write_after_finalize_is_fatal() {
        let codec = MemCodec::default();
        let mut writer = SeriesWriter::new(codec, namer());
        writer.close_all().unwrap();
        let err = writer.write_frame("primary", "det_img", page(1)).unwrap_err();
        assert!(matches!(err, WriterError::Closed { .. }));
    }

    #[test]
    fn fields_in_the_same_stream_get_separate_files() {
        let codec = MemCodec::default();
        let mut writer = StackWriter::new(codec.clone(), namer());
        writer.write_frame("primary", "a", page(1)).unwrap();
        writer.write_frame("primary", "b", page(2)).unwrap();
        writer.close_all().unwrap();
        assert_eq!(codec.state.borrow().files.len(), 2);
    }
}
