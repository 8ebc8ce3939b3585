//! # Document Model
//!
//! The self-describing run protocol: a closed tagged union over the document
//! kinds `{start, descriptor, resource, datum, event, stop}` plus a
//! forward-compatible `Other` arm for kinds this engine does not recognize.
//!
//! Documents arrive as ordered `(kind, body)` pairs; on the wire each pair is
//! a two-element JSON array, one per line in JSON Lines transports.
//! Keeping the union closed makes the orchestrator's dispatch an exhaustive
//! `match`, so a new lifecycle transition cannot be added without the compiler
//! pointing at every consumer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::FieldSpec;

/// Errors produced while decoding documents from their wire form.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The line is not a two-element `["kind", {body}]` JSON array.
    #[error("malformed document pair: {0}")]
    Pair(#[source] serde_json::Error),

    /// The body does not match the schema for its kind.
    #[error("malformed '{kind}' document body: {source}")]
    Body {
        /// Document kind whose body failed to decode.
        kind: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Opens a run: carries the run identifier and run-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStart {
    /// Unique identifier for the run.
    pub run_id: String,
    /// Run-level metadata; every key other than `run_id` lands here.
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Declares (or re-declares) the schema of one named stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Name of the stream being described.
    pub stream_name: String,
    /// Declared fields, keyed by field name.
    pub fields: BTreeMap<String, FieldSpec>,
}

/// Registers an external data source for later datum lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identifier referenced by datum documents.
    pub id: String,
    /// Reader kind that can retrieve frames from this resource.
    pub kind: String,
    /// Location of the stored data, interpreted by the reader.
    pub resource_path: String,
    /// Reader-specific parameters.
    #[serde(default)]
    pub resource_kwargs: BTreeMap<String, serde_json::Value>,
}

/// Points one event value at a slice of a registered resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datum {
    /// Identifier carried by event values that reference this datum.
    pub datum_id: String,
    /// The resource this datum selects from.
    pub resource_id: String,
    /// Reader-specific selection parameters (e.g. a frame index).
    #[serde(default)]
    pub datum_kwargs: BTreeMap<String, serde_json::Value>,
}

/// One field value inside an event: inline data or an indirect reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A datum id to be resolved through the resource/datum registries.
    Reference(String),
    /// An inline nested numeric array.
    Inline(serde_json::Value),
}

/// One timestamped sample of some or all of a stream's fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stream this event belongs to.
    pub stream_name: String,
    /// Sample time, seconds since the epoch.
    pub timestamp: f64,
    /// Field values, keyed by field name.
    #[serde(default)]
    pub data: BTreeMap<String, FieldValue>,
}

/// Closes the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStop {
    /// Identifier of the run being closed.
    pub run_id: String,
}

/// One document of the run protocol.
#[derive(Debug, Clone)]
pub enum Document {
    /// Run-start record.
    Start(RunStart),
    /// Stream schema declaration.
    Descriptor(StreamDescriptor),
    /// External data source registration.
    Resource(Resource),
    /// Indirect reference registration.
    Datum(Datum),
    /// One sample.
    Event(Event),
    /// Run-stop record.
    Stop(RunStop),
    /// A kind this engine does not recognize; ignored, never fatal.
    Other {
        /// The unrecognized kind tag.
        kind: String,
    },
}

impl Document {
    /// Decode a document from its kind tag and JSON body.
    ///
    /// Unknown kinds decode to [`Document::Other`] without touching the body.
    pub fn from_parts(kind: &str, body: serde_json::Value) -> Result<Self, DocumentError> {
        let wrap = |source| DocumentError::Body {
            kind: kind.to_string(),
            source,
        };
        match kind {
            "start" => Ok(Document::Start(serde_json::from_value(body).map_err(wrap)?)),
            "descriptor" => Ok(Document::Descriptor(
                serde_json::from_value(body).map_err(wrap)?,
            )),
            "resource" => Ok(Document::Resource(
                serde_json::from_value(body).map_err(wrap)?,
            )),
            "datum" => Ok(Document::Datum(serde_json::from_value(body).map_err(wrap)?)),
            "event" => Ok(Document::Event(serde_json::from_value(body).map_err(wrap)?)),
            "stop" => Ok(Document::Stop(serde_json::from_value(body).map_err(wrap)?)),
            other => Ok(Document::Other {
                kind: other.to_string(),
            }),
        }
    }

    /// Decode one JSON Lines record of the form `["kind", {body}]`.
    pub fn from_json_line(line: &str) -> Result<Self, DocumentError> {
        let (kind, body): (String, serde_json::Value) =
            serde_json::from_str(line).map_err(DocumentError::Pair)?;
        Self::from_parts(&kind, body)
    }

    /// The kind tag of this document.
    pub fn kind(&self) -> &str {
        match self {
            Document::Start(_) => "start",
            Document::Descriptor(_) => "descriptor",
            Document::Resource(_) => "resource",
            Document::Datum(_) => "datum",
            Document::Event(_) => "event",
            Document::Stop(_) => "stop",
            Document::Other { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Dtype;

    #[test]
    fn parses_start_with_flattened_metadata() {
        let doc = Document::from_json_line(
            r#"["start", {"run_id": "abc123", "plan_name": "count", "shots": 3}]"#,
        )
        .unwrap();
        match doc {
            Document::Start(start) => {
                assert_eq!(start.run_id, "abc123");
                assert_eq!(
                    start.metadata.get("plan_name"),
                    Some(&serde_json::json!("count"))
                );
            }
            other => panic!("expected start, got {}", other.kind()),
        }
    }

    #[test]
    fn parses_descriptor_fields() {
        let doc = Document::from_json_line(
            r#"["descriptor", {"stream_name": "primary",
                "fields": {"det_img": {"shape": [2, 2], "dtype": "uint16"}}}]"#,
        )
        .unwrap();
        match doc {
            Document::Descriptor(d) => {
                assert_eq!(d.stream_name, "primary");
                let spec = &d.fields["det_img"];
                assert_eq!(spec.shape, vec![2, 2]);
                assert_eq!(spec.dtype, Dtype::U16);
                assert!(!spec.external);
            }
            other => panic!("expected descriptor, got {}", other.kind()),
        }
    }

    #[test]
    fn event_values_split_inline_from_references() {
        let doc = Document::from_json_line(
            r#"["event", {"stream_name": "primary", "timestamp": 1.5,
                "data": {"a": [[1, 2]], "b": "datum/7"}}]"#,
        )
        .unwrap();
        match doc {
            Document::Event(e) => {
                assert!(matches!(e.data["a"], FieldValue::Inline(_)));
                assert!(matches!(e.data["b"], FieldValue::Reference(_)));
            }
            other => panic!("expected event, got {}", other.kind()),
        }
    }

    #[test]
    fn unknown_kinds_are_preserved_not_rejected() {
        let doc = Document::from_json_line(r#"["monitor", {"whatever": true}]"#).unwrap();
        assert!(matches!(doc, Document::Other { ref kind } if kind == "monitor"));
    }

    #[test]
    fn malformed_body_reports_its_kind() {
        let err = Document::from_json_line(r#"["start", {"no_run_id": 1}]"#).unwrap_err();
        assert!(matches!(err, DocumentError::Body { ref kind, .. } if kind == "start"));
    }

    #[test]
    fn malformed_pair_is_rejected() {
        assert!(matches!(
            Document::from_json_line(r#"{"kind": "start"}"#),
            Err(DocumentError::Pair(_))
        ));
    }
}
