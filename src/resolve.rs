//! # Field Resolution
//!
//! Turns one event value into a concrete [`Frame`], validated against the
//! stream's declared schema.
//!
//! Inline values are converted directly. Reference values are dereferenced in
//! two hops: the datum id carried by the event selects a datum record, whose
//! `resource_id` selects a resource record, whose `kind` selects an injected
//! [`FrameReader`]. Both records must have been registered before the event
//! that uses them; a missing record is an error, never a silent skip.
//!
//! The resolver performs no I/O of its own. Retrieval of external pixels is
//! delegated entirely to the registered readers.

use std::collections::HashMap;

use crate::document::{Datum, FieldValue, Resource};
use crate::frame::{Frame, FrameError};
use crate::schema::{FieldSpec, SchemaMismatchError};

/// Resource kind handled by the built-in [`JsonArrayReader`].
pub const JSON_ARRAY_KIND: &str = "json-array";

/// Errors surfaced while resolving an event value to a frame.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The event references a datum or resource that was never registered.
    #[error(
        "stream '{stream}' field '{field}': unresolved reference '{reference}': \
         no {missing} record registered"
    )]
    UnresolvedReference {
        /// Stream name.
        stream: String,
        /// Field name.
        field: String,
        /// The datum id the event carried.
        reference: String,
        /// Which record was missing: `"datum"` or `"resource"`.
        missing: &'static str,
    },

    /// No reader is registered for the resource's kind.
    #[error("no reader registered for resource kind '{kind}' (resource '{resource_id}')")]
    NoReader {
        /// The unhandled resource kind.
        kind: String,
        /// The resource that required it.
        resource_id: String,
    },

    /// The resolved or inline value conflicts with the declared schema.
    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),

    /// An inline value could not be converted to a frame.
    #[error("stream '{stream}' field '{field}': invalid inline value: {source}")]
    InvalidValue {
        /// Stream name.
        stream: String,
        /// Field name.
        field: String,
        /// Underlying conversion error.
        #[source]
        source: FrameError,
    },

    /// A reader failed to retrieve data from its resource.
    #[error("resource '{resource_id}': {message}")]
    Resource {
        /// The resource being read.
        resource_id: String,
        /// Reader-specific failure description.
        message: String,
    },

    /// Filesystem failure inside a reader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Injected capability that retrieves one frame from an external resource.
///
/// Implementations are keyed by resource kind and own all actual I/O; the
/// resolver only hands them the matching records and the declared field spec.
pub trait FrameReader {
    /// Retrieve the frame selected by `datum` from `resource`.
    fn read_frame(
        &self,
        spec: &FieldSpec,
        resource: &Resource,
        datum: &Datum,
    ) -> Result<Frame, ResolveError>;
}

/// Resolves event values against registered resource/datum records.
pub struct FieldResolver {
    resources: HashMap<String, Resource>,
    datums: HashMap<String, Datum>,
    readers: HashMap<String, Box<dyn FrameReader>>,
}

impl FieldResolver {
    /// A resolver with no readers registered; inline values only.
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            datums: HashMap::new(),
            readers: HashMap::new(),
        }
    }

    /// A resolver with the built-in readers registered
    /// (currently [`JsonArrayReader`] under [`JSON_ARRAY_KIND`]).
    pub fn with_default_readers() -> Self {
        let mut resolver = Self::new();
        resolver.register_reader(JSON_ARRAY_KIND, Box::new(JsonArrayReader));
        resolver
    }

    /// Register a reader for one resource kind, replacing any previous one.
    pub fn register_reader(&mut self, kind: impl Into<String>, reader: Box<dyn FrameReader>) {
        self.readers.insert(kind.into(), reader);
    }

    /// Register a resource record for later datum lookups.
    pub fn register_resource(&mut self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    /// Register a datum record for later event lookups.
    pub fn register_datum(&mut self, datum: Datum) {
        self.datums.insert(datum.datum_id.clone(), datum);
    }

    /// Resolve one event value to a frame validated against `spec`.
    pub fn resolve(
        &self,
        stream: &str,
        field: &str,
        spec: &FieldSpec,
        value: &FieldValue,
    ) -> Result<Frame, ResolveError> {
        let frame = match value {
            FieldValue::Inline(raw) => {
                Frame::from_json(raw, spec.dtype).map_err(|source| ResolveError::InvalidValue {
                    stream: stream.to_string(),
                    field: field.to_string(),
                    source,
                })?
            }
            FieldValue::Reference(datum_id) => {
                let unresolved = |missing| ResolveError::UnresolvedReference {
                    stream: stream.to_string(),
                    field: field.to_string(),
                    reference: datum_id.clone(),
                    missing,
                };
                let datum = self.datums.get(datum_id).ok_or_else(|| unresolved("datum"))?;
                let resource = self
                    .resources
                    .get(&datum.resource_id)
                    .ok_or_else(|| unresolved("resource"))?;
                let reader = self
                    .readers
                    .get(&resource.kind)
                    .ok_or_else(|| ResolveError::NoReader {
                        kind: resource.kind.clone(),
                        resource_id: resource.id.clone(),
                    })?;
                reader.read_frame(spec, resource, datum)?
            }
        };

        spec.validate_frame(stream, field, &frame)?;
        Ok(frame)
    }
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in reader for resources whose `resource_path` is a JSON file holding
/// an array of stacked frames; `datum_kwargs["index"]` selects one (default 0).
pub struct JsonArrayReader;

impl FrameReader for JsonArrayReader {
    fn read_frame(
        &self,
        spec: &FieldSpec,
        resource: &Resource,
        datum: &Datum,
    ) -> Result<Frame, ResolveError> {
        let failure = |message: String| ResolveError::Resource {
            resource_id: resource.id.clone(),
            message,
        };

        let raw = std::fs::read_to_string(&resource.resource_path)?;
        let stacked: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| failure(format!("invalid JSON: {e}")))?;
        let frames = stacked
            .as_array()
            .ok_or_else(|| failure("top-level value is not an array of frames".to_string()))?;

        let index = datum
            .datum_kwargs
            .get("index")
            .map(|v| {
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| failure(format!("non-integer index {v}")))
            })
            .transpose()?
            .unwrap_or(0);

        let value = frames.get(index).ok_or_else(|| {
            failure(format!(
                "index {index} out of range for {} stored frames",
                frames.len()
            ))
        })?;

        Frame::from_json(value, spec.dtype).map_err(|e| failure(e.to_string()))
    }
}
