use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::json;
use uuid::Uuid;

use tiffbeam::document::{Document, Event, FieldValue, RunStart, RunStop, StreamDescriptor};
use tiffbeam::export::{export, ExportConfig, ExportMode};
use tiffbeam::frame::Dtype;
use tiffbeam::schema::FieldSpec;

const DEMO_ROWS: usize = 32;
const DEMO_COLS: usize = 32;

/// Generate a synthetic run and export it.
pub fn run(output: PathBuf, events: usize, mode: ExportMode) -> Result<()> {
    info!("tiffbeam demo - synthetic run export");
    info!("====================================");

    let run_id = Uuid::new_v4().simple().to_string();
    info!("Run id: {run_id}");
    info!("Generating {events} events of {DEMO_ROWS}x{DEMO_COLS} uint16 frames");

    let documents = generate_run(&run_id, events);

    let config = ExportConfig::new(&output, mode);
    let stats = export(documents, &config).context("Demo export failed")?;

    info!("Export complete!");
    info!("  Frames written: {}", stats.frames_written);
    info!("  Files written: {}", stats.files_written);
    for path in &stats.artifacts {
        println!("{}", path.display());
    }

    Ok(())
}

/// Build the document stream for one synthetic run: a start document, one
/// "primary" stream with an image field and an ignored scalar field, `events`
/// gradient frames, and a stop document.
fn generate_run(run_id: &str, events: usize) -> Vec<Document> {
    let started_at = Utc::now();
    let mut documents = Vec::with_capacity(events + 3);

    documents.push(Document::Start(RunStart {
        run_id: run_id.to_string(),
        metadata: BTreeMap::from([
            ("plan_name".to_string(), json!("demo")),
            ("time".to_string(), json!(started_at.timestamp() as f64)),
        ]),
    }));

    documents.push(Document::Descriptor(StreamDescriptor {
        stream_name: "primary".to_string(),
        fields: BTreeMap::from([
            (
                "det_img".to_string(),
                FieldSpec {
                    shape: vec![DEMO_ROWS, DEMO_COLS],
                    dtype: Dtype::U16,
                    external: false,
                },
            ),
            (
                "ring_current".to_string(),
                FieldSpec {
                    shape: vec![],
                    dtype: Dtype::F64,
                    external: false,
                },
            ),
        ]),
    }));

    for index in 0..events {
        let rows: Vec<Vec<u16>> = (0..DEMO_ROWS)
            .map(|r| {
                (0..DEMO_COLS)
                    .map(|c| ((r * DEMO_COLS + c + index * 7) % usize::from(u16::MAX)) as u16)
                    .collect()
            })
            .collect();
        documents.push(Document::Event(Event {
            stream_name: "primary".to_string(),
            timestamp: started_at.timestamp() as f64 + index as f64,
            data: BTreeMap::from([
                ("det_img".to_string(), FieldValue::Inline(json!(rows))),
                ("ring_current".to_string(), FieldValue::Inline(json!(402.1))),
            ]),
        }));
    }

    documents.push(Document::Stop(RunStop {
        run_id: run_id.to_string(),
    }));

    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_run_is_well_formed() {
        let documents = generate_run("demo0", 3);
        assert_eq!(documents.len(), 6);
        assert!(matches!(documents[0], Document::Start(_)));
        assert!(matches!(documents[1], Document::Descriptor(_)));
        assert!(matches!(documents[5], Document::Stop(_)));
    }
}
