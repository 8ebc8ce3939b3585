//! # TIFF Codec Seam
//!
//! The engine never touches TIFF bytes itself; it drives an injected codec
//! capability. [`TiffCodec`] opens a sink for one output file and
//! [`TiffSink`] appends rank-2 pages to it until finalized. The writers are
//! generic over this seam, so they can be exercised against an in-memory fake
//! without a filesystem.
//!
//! [`FileTiffCodec`] is the production implementation on the `tiff` crate:
//! one grayscale IFD per page, multi-page files built by appending IFDs.

use std::fs::File;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};

use crate::frame::{Frame, FrameData};

/// Errors surfaced by the TIFF codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Filesystem failure while creating or writing the output file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the TIFF encoder.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// The frame is not a rank-2 page.
    #[error("frame of shape {shape:?} is not a rank-2 page")]
    NotAPage {
        /// Shape of the rejected frame.
        shape: Vec<usize>,
    },

    /// Page dimensions exceed what a TIFF IFD can describe.
    #[error("page dimensions {rows}x{cols} exceed the TIFF limit")]
    PageTooLarge {
        /// Page rows.
        rows: usize,
        /// Page columns.
        cols: usize,
    },
}

/// An open output target accepting rank-2 pages in order.
pub trait TiffSink {
    /// Append one page as the next frame of the file.
    fn append_page(&mut self, frame: &Frame) -> Result<(), CodecError>;

    /// Finalize the file and release the handle.
    fn finish(self: Box<Self>) -> Result<(), CodecError>;
}

/// Factory for output targets; one sink per output file.
pub trait TiffCodec {
    /// Create the file at `path` and return a sink for its pages.
    fn open(&self, path: &Path) -> Result<Box<dyn TiffSink>, CodecError>;
}

/// Production codec writing grayscale TIFF files via the `tiff` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTiffCodec;

impl TiffCodec for FileTiffCodec {
    fn open(&self, path: &Path) -> Result<Box<dyn TiffSink>, CodecError> {
        let file = File::create(path)?;
        let encoder = TiffEncoder::new(file)?;
        Ok(Box::new(FileTiffSink { encoder }))
    }
}

struct FileTiffSink {
    encoder: TiffEncoder<File>,
}

impl TiffSink for FileTiffSink {
    fn append_page(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let [rows, cols] = frame.page_dims().ok_or_else(|| CodecError::NotAPage {
            shape: frame.shape().to_vec(),
        })?;
        let too_large = || CodecError::PageTooLarge { rows, cols };
        let height = u32::try_from(rows).map_err(|_| too_large())?;
        let width = u32::try_from(cols).map_err(|_| too_large())?;

        match frame.data() {
            FrameData::U8(v) => self
                .encoder
                .write_image::<colortype::Gray8>(width, height, v)?,
            FrameData::U16(v) => self
                .encoder
                .write_image::<colortype::Gray16>(width, height, v)?,
            FrameData::U32(v) => self
                .encoder
                .write_image::<colortype::Gray32>(width, height, v)?,
            FrameData::I8(v) => self
                .encoder
                .write_image::<colortype::GrayI8>(width, height, v)?,
            FrameData::I16(v) => self
                .encoder
                .write_image::<colortype::GrayI16>(width, height, v)?,
            FrameData::I32(v) => self
                .encoder
                .write_image::<colortype::GrayI32>(width, height, v)?,
            FrameData::F32(v) => self
                .encoder
                .write_image::<colortype::Gray32Float>(width, height, v)?,
            FrameData::F64(v) => self
                .encoder
                .write_image::<colortype::Gray64Float>(width, height, v)?,
        }

        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), CodecError> {
        // The encoder writes each IFD eagerly; dropping it releases the file.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Dtype;
    use serde_json::json;

    #[test]
    fn rejects_non_page_frames() {
        let dir = tempfile::tempdir().unwrap();
        let codec = FileTiffCodec;
        let mut sink = codec.open(&dir.path().join("x.tiff")).unwrap();
        let frame = Frame::from_json(&json!([1, 2, 3]), Dtype::U8).unwrap();
        let err = sink.append_page(&frame).unwrap_err();
        assert!(matches!(err, CodecError::NotAPage { .. }));
    }

    #[test]
    fn writes_multi_page_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.tiff");
        let codec = FileTiffCodec;
        let mut sink = codec.open(&path).unwrap();
        for base in [0u16, 10, 20] {
            let frame = Frame::new(
                vec![2, 2],
                FrameData::U16(vec![base, base + 1, base + 2, base + 3]),
            )
            .unwrap();
            sink.append_page(&frame).unwrap();
        }
        sink.finish().unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
