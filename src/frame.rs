//! # Frame Model
//!
//! Typed numeric array payloads extracted from event documents.
//!
//! A [`Frame`] is one array value for one field at one sample: a shape plus a
//! flat, row-major buffer in one of the supported dtypes. Frames are transient;
//! they flow from the resolver to a writer and are dropped once on disk.
//!
//! Event documents carry array values as nested JSON lists with no dtype of
//! their own, so conversion is always driven by the dtype the stream descriptor
//! declared ([`Frame::from_json`]). A rank-3 value is a burst of rank-2 images
//! along the leading axis and fans out into individual pages via
//! [`Frame::into_pages`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of element types a frame can carry.
///
/// Wire names follow the numpy convention used by acquisition pipelines
/// (`"uint16"`, `"float64"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    /// Unsigned 8-bit integer.
    #[serde(rename = "uint8")]
    U8,
    /// Unsigned 16-bit integer.
    #[serde(rename = "uint16")]
    U16,
    /// Unsigned 32-bit integer.
    #[serde(rename = "uint32")]
    U32,
    /// Signed 8-bit integer.
    #[serde(rename = "int8")]
    I8,
    /// Signed 16-bit integer.
    #[serde(rename = "int16")]
    I16,
    /// Signed 32-bit integer.
    #[serde(rename = "int32")]
    I32,
    /// 32-bit float.
    #[serde(rename = "float32")]
    F32,
    /// 64-bit float.
    #[serde(rename = "float64")]
    F64,
}

impl Dtype {
    /// Wire name of this dtype.
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::U8 => "uint8",
            Dtype::U16 => "uint16",
            Dtype::U32 => "uint32",
            Dtype::I8 => "int8",
            Dtype::I16 => "int16",
            Dtype::I32 => "int32",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced while building a frame from raw values.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The JSON value is not a nested numeric array.
    #[error("value is not a nested numeric array")]
    NotAnArray,

    /// A nested row does not match the length established by its siblings.
    #[error("ragged nested array: found a row of length {got}, expected {expected}")]
    Ragged {
        /// Observed row length.
        got: usize,
        /// Row length established by the first row at this depth.
        expected: usize,
    },

    /// A leaf element is not a number of the declared dtype.
    #[error("element {value} does not fit dtype {dtype}")]
    OutOfRange {
        /// Textual rendering of the offending element.
        value: String,
        /// The declared dtype.
        dtype: Dtype,
    },

    /// Buffer length does not agree with the shape product.
    #[error("buffer holds {got} elements but shape {shape:?} requires {expected}")]
    LengthMismatch {
        /// Declared shape.
        shape: Vec<usize>,
        /// Elements required by the shape.
        expected: usize,
        /// Elements actually present.
        got: usize,
    },
}

/// Flat element buffer in one of the supported dtypes.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// Unsigned 8-bit elements.
    U8(Vec<u8>),
    /// Unsigned 16-bit elements.
    U16(Vec<u16>),
    /// Unsigned 32-bit elements.
    U32(Vec<u32>),
    /// Signed 8-bit elements.
    I8(Vec<i8>),
    /// Signed 16-bit elements.
    I16(Vec<i16>),
    /// Signed 32-bit elements.
    I32(Vec<i32>),
    /// 32-bit float elements.
    F32(Vec<f32>),
    /// 64-bit float elements.
    F64(Vec<f64>),
}

impl FrameData {
    /// Dtype of the buffered elements.
    pub fn dtype(&self) -> Dtype {
        match self {
            FrameData::U8(_) => Dtype::U8,
            FrameData::U16(_) => Dtype::U16,
            FrameData::U32(_) => Dtype::U32,
            FrameData::I8(_) => Dtype::I8,
            FrameData::I16(_) => Dtype::I16,
            FrameData::I32(_) => Dtype::I32,
            FrameData::F32(_) => Dtype::F32,
            FrameData::F64(_) => Dtype::F64,
        }
    }

    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        match self {
            FrameData::U8(v) => v.len(),
            FrameData::U16(v) => v.len(),
            FrameData::U32(v) => v.len(),
            FrameData::I8(v) => v.len(),
            FrameData::I16(v) => v.len(),
            FrameData::I32(v) => v.len(),
            FrameData::F32(v) => v.len(),
            FrameData::F64(v) => v.len(),
        }
    }

    /// True when the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty(dtype: Dtype, capacity: usize) -> FrameData {
        match dtype {
            Dtype::U8 => FrameData::U8(Vec::with_capacity(capacity)),
            Dtype::U16 => FrameData::U16(Vec::with_capacity(capacity)),
            Dtype::U32 => FrameData::U32(Vec::with_capacity(capacity)),
            Dtype::I8 => FrameData::I8(Vec::with_capacity(capacity)),
            Dtype::I16 => FrameData::I16(Vec::with_capacity(capacity)),
            Dtype::I32 => FrameData::I32(Vec::with_capacity(capacity)),
            Dtype::F32 => FrameData::F32(Vec::with_capacity(capacity)),
            Dtype::F64 => FrameData::F64(Vec::with_capacity(capacity)),
        }
    }

    /// Split the buffer into consecutive chunks of `chunk_len` elements.
    fn split(self, chunk_len: usize) -> Vec<FrameData> {
        fn chunked<T: Clone>(values: Vec<T>, chunk_len: usize) -> Vec<Vec<T>> {
            values.chunks(chunk_len).map(|c| c.to_vec()).collect()
        }

        match self {
            FrameData::U8(v) => chunked(v, chunk_len).into_iter().map(FrameData::U8).collect(),
            FrameData::U16(v) => chunked(v, chunk_len).into_iter().map(FrameData::U16).collect(),
            FrameData::U32(v) => chunked(v, chunk_len).into_iter().map(FrameData::U32).collect(),
            FrameData::I8(v) => chunked(v, chunk_len).into_iter().map(FrameData::I8).collect(),
            FrameData::I16(v) => chunked(v, chunk_len).into_iter().map(FrameData::I16).collect(),
            FrameData::I32(v) => chunked(v, chunk_len).into_iter().map(FrameData::I32).collect(),
            FrameData::F32(v) => chunked(v, chunk_len).into_iter().map(FrameData::F32).collect(),
            FrameData::F64(v) => chunked(v, chunk_len).into_iter().map(FrameData::F64).collect(),
        }
    }

    fn push_number(&mut self, number: &serde_json::Number) -> Result<(), FrameError> {
        let reject = |dtype: Dtype| FrameError::OutOfRange {
            value: number.to_string(),
            dtype,
        };

        match self {
            FrameData::U8(v) => v.push(
                number
                    .as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| reject(Dtype::U8))?,
            ),
            FrameData::U16(v) => v.push(
                number
                    .as_u64()
                    .and_then(|n| u16::try_from(n).ok())
                    .ok_or_else(|| reject(Dtype::U16))?,
            ),
            FrameData::U32(v) => v.push(
                number
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| reject(Dtype::U32))?,
            ),
            FrameData::I8(v) => v.push(
                number
                    .as_i64()
                    .and_then(|n| i8::try_from(n).ok())
                    .ok_or_else(|| reject(Dtype::I8))?,
            ),
            FrameData::I16(v) => v.push(
                number
                    .as_i64()
                    .and_then(|n| i16::try_from(n).ok())
                    .ok_or_else(|| reject(Dtype::I16))?,
            ),
            FrameData::I32(v) => v.push(
                number
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| reject(Dtype::I32))?,
            ),
            FrameData::F32(v) => {
                v.push(number.as_f64().ok_or_else(|| reject(Dtype::F32))? as f32)
            }
            FrameData::F64(v) => v.push(number.as_f64().ok_or_else(|| reject(Dtype::F64))?),
        }

        Ok(())
    }
}

/// One array payload for one field at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    shape: Vec<usize>,
    data: FrameData,
}

impl Frame {
    /// Build a frame from a shape and a matching flat buffer.
    pub fn new(shape: Vec<usize>, data: FrameData) -> Result<Self, FrameError> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                got: data.len(),
                shape,
            });
        }
        Ok(Self { shape, data })
    }

    /// Convert a nested JSON array into a frame of the declared dtype.
    ///
    /// The nesting depth determines the rank; every row at a given depth must
    /// have the same length, and every leaf must be a number representable in
    /// `dtype`. Float-typed JSON literals are rejected for integer dtypes
    /// rather than truncated.
    pub fn from_json(value: &serde_json::Value, dtype: Dtype) -> Result<Self, FrameError> {
        let shape = infer_shape(value)?;
        let mut data = FrameData::empty(dtype, shape.iter().product());
        collect(value, &shape, &mut data)?;
        Frame::new(shape, data)
    }

    /// Shape of the frame, row-major, leading axis first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Dtype of the elements.
    pub fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the frame holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `[rows, cols]` for a rank-2 frame, `None` otherwise.
    pub fn page_dims(&self) -> Option<[usize; 2]> {
        match self.shape.as_slice() {
            [rows, cols] => Some([*rows, *cols]),
            _ => None,
        }
    }

    /// Borrow the underlying buffer.
    pub fn data(&self) -> &FrameData {
        &self.data
    }

    /// Decompose into individual rank-2 pages.
    ///
    /// A rank-2 frame is one page. A rank-3 frame of shape `(k, h, w)` is `k`
    /// pages of shape `(h, w)`, in leading-axis order. Frames of any other
    /// rank are passed through unchanged; the codec rejects them downstream.
    pub fn into_pages(self) -> Vec<Frame> {
        match self.shape.as_slice() {
            [_, h, w] => {
                let (rows, cols) = (*h, *w);
                let plane = rows * cols;
                if plane == 0 {
                    return Vec::new();
                }
                self.data
                    .split(plane)
                    .into_iter()
                    .map(|data| Frame {
                        shape: vec![rows, cols],
                        data,
                    })
                    .collect()
            }
            _ => vec![self],
        }
    }
}

fn infer_shape(value: &serde_json::Value) -> Result<Vec<usize>, FrameError> {
    let mut shape = Vec::new();
    let mut cursor = value;
    loop {
        match cursor {
            serde_json::Value::Array(items) => {
                shape.push(items.len());
                match items.first() {
                    Some(first) => cursor = first,
                    None => break,
                }
            }
            serde_json::Value::Number(_) => break,
            _ => return Err(FrameError::NotAnArray),
        }
    }
    if shape.is_empty() {
        return Err(FrameError::NotAnArray);
    }
    Ok(shape)
}

fn collect(
    value: &serde_json::Value,
    shape: &[usize],
    out: &mut FrameData,
) -> Result<(), FrameError> {
    match (shape.split_first(), value) {
        (None, serde_json::Value::Number(n)) => out.push_number(n),
        (Some((dim, rest)), serde_json::Value::Array(items)) => {
            if items.len() != *dim {
                return Err(FrameError::Ragged {
                    got: items.len(),
                    expected: *dim,
                });
            }
            for item in items {
                collect(item, rest, out)?;
            }
            Ok(())
        }
        _ => Err(FrameError::NotAnArray),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_2d_u16() {
        let frame = Frame::from_json(&json!([[1, 2], [3, 4]]), Dtype::U16).unwrap();
        assert_eq!(frame.shape(), &[2, 2]);
        assert_eq!(frame.dtype(), Dtype::U16);
        assert_eq!(frame.data(), &FrameData::U16(vec![1, 2, 3, 4]));
    }

    #[test]
    fn from_json_float() {
        let frame = Frame::from_json(&json!([[0.5, 1.5]]), Dtype::F64).unwrap();
        assert_eq!(frame.shape(), &[1, 2]);
        assert_eq!(frame.data(), &FrameData::F64(vec![0.5, 1.5]));
    }

    #[test]
    fn from_json_rejects_ragged() {
        let err = Frame::from_json(&json!([[1, 2], [3]]), Dtype::U8).unwrap_err();
        assert!(matches!(err, FrameError::Ragged { got: 1, expected: 2 }));
    }

    #[test]
    fn from_json_rejects_float_for_integer_dtype() {
        let err = Frame::from_json(&json!([[1.5]]), Dtype::U16).unwrap_err();
        assert!(matches!(err, FrameError::OutOfRange { .. }));
    }

    #[test]
    fn from_json_rejects_out_of_range() {
        let err = Frame::from_json(&json!([[300]]), Dtype::U8).unwrap_err();
        assert!(matches!(err, FrameError::OutOfRange { .. }));
    }

    #[test]
    fn from_json_rejects_non_array() {
        assert!(matches!(
            Frame::from_json(&json!("not an array"), Dtype::U8),
            Err(FrameError::NotAnArray)
        ));
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let err = Frame::new(vec![2, 2], FrameData::U8(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn rank2_is_one_page() {
        let frame = Frame::from_json(&json!([[1, 2], [3, 4]]), Dtype::U16).unwrap();
        let pages = frame.clone().into_pages();
        assert_eq!(pages, vec![frame]);
    }

    #[test]
    fn rank3_fans_out_along_leading_axis() {
        let frame = Frame::from_json(&json!([[[1, 2]], [[3, 4]], [[5, 6]]]), Dtype::U16).unwrap();
        assert_eq!(frame.shape(), &[3, 1, 2]);
        let pages = frame.into_pages();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].shape(), &[1, 2]);
        assert_eq!(pages[2].data(), &FrameData::U16(vec![5, 6]));
    }
}
