//! # Stream Schemas
//!
//! Declared shapes and dtypes for the fields of a stream, as carried by
//! descriptor documents, plus the validation applied when frames arrive and
//! when a stream is re-described mid-run.
//!
//! Only the leading dimension of a field may vary between frames. Everything
//! else is fixed for the life of the stream: a mismatch is an error, never a
//! silent reshape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::frame::{Dtype, Frame};

/// Declared vs observed shape/dtype conflicts.
#[derive(Debug, thiserror::Error)]
pub enum SchemaMismatchError {
    /// A frame's shape does not agree with the field's declaration.
    #[error(
        "stream '{stream}' field '{field}': frame shape {observed:?} \
         incompatible with declared shape {declared:?}"
    )]
    Shape {
        /// Stream name.
        stream: String,
        /// Field name.
        field: String,
        /// Shape declared by the descriptor.
        declared: Vec<usize>,
        /// Shape observed on the frame.
        observed: Vec<usize>,
    },

    /// A frame's dtype does not agree with the field's declaration.
    #[error(
        "stream '{stream}' field '{field}': frame dtype {observed} \
         incompatible with declared dtype {declared}"
    )]
    Dtype {
        /// Stream name.
        stream: String,
        /// Field name.
        field: String,
        /// Dtype declared by the descriptor.
        declared: Dtype,
        /// Dtype observed on the frame.
        observed: Dtype,
    },

    /// A mid-run re-description changed an already-declared field.
    #[error(
        "stream '{stream}' redescribed field '{field}' from shape {previous:?} \
         dtype {previous_dtype} to shape {incoming:?} dtype {incoming_dtype}; \
         only the leading dimension may change"
    )]
    Redescription {
        /// Stream name.
        stream: String,
        /// Field name.
        field: String,
        /// Previously declared shape.
        previous: Vec<usize>,
        /// Previously declared dtype.
        previous_dtype: Dtype,
        /// Newly declared shape.
        incoming: Vec<usize>,
        /// Newly declared dtype.
        incoming_dtype: Dtype,
    },

    /// A later page disagrees with the first page written to a stack file.
    #[error(
        "stream '{stream}' field '{field}': page {index} has shape {observed:?} \
         dtype {observed_dtype}, file began with shape {expected:?} dtype {expected_dtype}"
    )]
    PageDrift {
        /// Stream name.
        stream: String,
        /// Field name.
        field: String,
        /// Zero-based page index within the file.
        index: usize,
        /// Dimensions of the first page.
        expected: [usize; 2],
        /// Dtype of the first page.
        expected_dtype: Dtype,
        /// Dimensions of the offending page.
        observed: [usize; 2],
        /// Dtype of the offending page.
        observed_dtype: Dtype,
    },
}

/// Declared schema for one field of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Declared array shape. The leading dimension is advisory; trailing
    /// dimensions are binding.
    pub shape: Vec<usize>,
    /// Declared element dtype.
    pub dtype: Dtype,
    /// True when values arrive as indirect references instead of inline.
    #[serde(default)]
    pub external: bool,
}

impl FieldSpec {
    /// True when the field carries image-like data this engine exports
    /// (rank 2 or 3). Scalars and higher-rank fields are ignored.
    pub fn is_image(&self) -> bool {
        matches!(self.shape.len(), 2 | 3)
    }

    /// The binding trailing `[rows, cols]` dimensions of an image field.
    pub fn page_dims(&self) -> Option<[usize; 2]> {
        match self.shape.as_slice() {
            [rows, cols] | [_, rows, cols] => Some([*rows, *cols]),
            _ => None,
        }
    }

    /// Validate an observed frame against this declaration.
    ///
    /// The frame must have the declared dtype, rank 2 or 3, and trailing
    /// dimensions equal to the declared ones. The leading dimension of a
    /// rank-3 frame is free.
    pub fn validate_frame(
        &self,
        stream: &str,
        field: &str,
        frame: &Frame,
    ) -> Result<(), SchemaMismatchError> {
        if frame.dtype() != self.dtype {
            return Err(SchemaMismatchError::Dtype {
                stream: stream.to_string(),
                field: field.to_string(),
                declared: self.dtype,
                observed: frame.dtype(),
            });
        }

        let declared = self.page_dims();
        let observed = match frame.shape() {
            [rows, cols] | [_, rows, cols] => Some([*rows, *cols]),
            _ => None,
        };
        match (declared, observed) {
            (Some(d), Some(o)) if d == o => Ok(()),
            _ => Err(SchemaMismatchError::Shape {
                stream: stream.to_string(),
                field: field.to_string(),
                declared: self.shape.clone(),
                observed: frame.shape().to_vec(),
            }),
        }
    }
}

/// Declared schema for one named stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSchema {
    /// Stream name (e.g. `"primary"`).
    pub name: String,
    /// Declared fields, keyed by field name.
    pub fields: BTreeMap<String, FieldSpec>,
}

impl StreamSchema {
    /// Build a schema from a descriptor's field map.
    pub fn new(name: impl Into<String>, fields: BTreeMap<String, FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up one field's declaration.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Names of the image-like fields this engine will export.
    pub fn image_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.is_image())
            .map(|(name, _)| name.as_str())
    }

    /// Apply a mid-run re-description.
    ///
    /// Fields present in both declarations must keep their trailing
    /// dimensions and dtype; the leading dimension may change. New fields
    /// may appear. Frame counters elsewhere are unaffected.
    pub fn redescribe(
        &mut self,
        incoming: BTreeMap<String, FieldSpec>,
    ) -> Result<(), SchemaMismatchError> {
        for (name, spec) in &incoming {
            if let Some(previous) = self.fields.get(name) {
                let compatible = previous.dtype == spec.dtype
                    && previous.page_dims() == spec.page_dims()
                    && previous.is_image() == spec.is_image();
                if !compatible {
                    return Err(SchemaMismatchError::Redescription {
                        stream: self.name.clone(),
                        field: name.clone(),
                        previous: previous.shape.clone(),
                        previous_dtype: previous.dtype,
                        incoming: spec.shape.clone(),
                        incoming_dtype: spec.dtype,
                    });
                }
            }
        }
        self.fields = incoming;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(shape: &[usize], dtype: Dtype) -> FieldSpec {
        FieldSpec {
            shape: shape.to_vec(),
            dtype,
            external: false,
        }
    }

    #[test]
    fn scalar_fields_are_not_images() {
        assert!(!spec(&[], Dtype::F64).is_image());
        assert!(!spec(&[10], Dtype::F64).is_image());
        assert!(spec(&[4, 4], Dtype::U16).is_image());
        assert!(spec(&[3, 4, 4], Dtype::U16).is_image());
    }

    #[test]
    fn validate_accepts_matching_frame() {
        let s = spec(&[2, 2], Dtype::U16);
        let frame = Frame::from_json(&json!([[1, 2], [3, 4]]), Dtype::U16).unwrap();
        s.validate_frame("primary", "det_img", &frame).unwrap();
    }

    #[test]
    fn validate_accepts_burst_for_rank2_declaration() {
        // A rank-3 value against a rank-2 declaration is a burst of frames.
        let s = spec(&[2, 2], Dtype::U16);
        let frame =
            Frame::from_json(&json!([[[1, 2], [3, 4]], [[5, 6], [7, 8]]]), Dtype::U16).unwrap();
        s.validate_frame("primary", "det_img", &frame).unwrap();
    }

    #[test]
    fn validate_rejects_wrong_trailing_dims() {
        let s = spec(&[2, 2], Dtype::U16);
        let frame = Frame::from_json(&json!([[1, 2, 3], [4, 5, 6]]), Dtype::U16).unwrap();
        let err = s.validate_frame("primary", "det_img", &frame).unwrap_err();
        assert!(matches!(err, SchemaMismatchError::Shape { .. }));
    }

    #[test]
    fn validate_rejects_wrong_dtype() {
        let s = spec(&[2, 2], Dtype::U16);
        let frame = Frame::from_json(&json!([[1.0, 2.0], [3.0, 4.0]]), Dtype::F32).unwrap();
        let err = s.validate_frame("primary", "det_img", &frame).unwrap_err();
        assert!(matches!(err, SchemaMismatchError::Dtype { .. }));
    }

    #[test]
    fn redescribe_allows_leading_dim_change() {
        let mut schema = StreamSchema::new(
            "primary",
            BTreeMap::from([("det_img".to_string(), spec(&[1, 4, 4], Dtype::U16))]),
        );
        schema
            .redescribe(BTreeMap::from([(
                "det_img".to_string(),
                spec(&[8, 4, 4], Dtype::U16),
            )]))
            .unwrap();
    }

    #[test]
    fn redescribe_rejects_trailing_dim_change() {
        let mut schema = StreamSchema::new(
            "primary",
            BTreeMap::from([("det_img".to_string(), spec(&[4, 4], Dtype::U16))]),
        );
        let err = schema
            .redescribe(BTreeMap::from([(
                "det_img".to_string(),
                spec(&[4, 8], Dtype::U16),
            )]))
            .unwrap_err();
        assert!(matches!(err, SchemaMismatchError::Redescription { .. }));
    }

    #[test]
    fn redescribe_rejects_dtype_change() {
        let mut schema = StreamSchema::new(
            "primary",
            BTreeMap::from([("det_img".to_string(), spec(&[4, 4], Dtype::U16))]),
        );
        let err = schema
            .redescribe(BTreeMap::from([(
                "det_img".to_string(),
                spec(&[4, 4], Dtype::F32),
            )]))
            .unwrap_err();
        assert!(matches!(err, SchemaMismatchError::Redescription { .. }));
    }
}
