//! # TIFF Read-Back
//!
//! Decodes files produced by this crate back into [`Frame`]s. Used by the
//! `info` CLI command and by round-trip tests; not part of the export path.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};

use crate::frame::{Frame, FrameData, FrameError};

/// Errors surfaced while reading a produced TIFF file back.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Filesystem failure while opening the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the TIFF decoder.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// The file decodes to a sample format this crate never writes.
    #[error("unsupported sample format in {path}")]
    UnsupportedSampleFormat {
        /// File being read.
        path: String,
    },

    /// Decoded buffer and dimensions disagree.
    #[error("inconsistent page in {path}: {source}")]
    Inconsistent {
        /// File being read.
        path: String,
        /// Underlying shape/length error.
        #[source]
        source: FrameError,
    },
}

/// Read every page of a TIFF file, in file order, as rank-2 frames.
pub fn read_frames(path: &Path) -> Result<Vec<Frame>, ReaderError> {
    let display = path.display().to_string();
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(file)?;
    let mut frames = Vec::new();

    loop {
        let (width, height) = decoder.dimensions()?;
        let shape = vec![height as usize, width as usize];
        let data = match decoder.read_image()? {
            DecodingResult::U8(v) => FrameData::U8(v),
            DecodingResult::U16(v) => FrameData::U16(v),
            DecodingResult::U32(v) => FrameData::U32(v),
            DecodingResult::I8(v) => FrameData::I8(v),
            DecodingResult::I16(v) => FrameData::I16(v),
            DecodingResult::I32(v) => FrameData::I32(v),
            DecodingResult::F32(v) => FrameData::F32(v),
            DecodingResult::F64(v) => FrameData::F64(v),
            _ => {
                return Err(ReaderError::UnsupportedSampleFormat { path: display });
            }
        };
        frames.push(Frame::new(shape, data).map_err(|source| ReaderError::Inconsistent {
            path: display.clone(),
            source,
        })?);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    Ok(frames)
}
