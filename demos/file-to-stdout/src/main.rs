//! Reads a CSV file, parses it, and prints one JSON object per row.
//!
//! Run with `RUST_LOG=debug` to watch the lifecycle.

use std::time::Duration;

use rill::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let csv_path = dir.path().join("people.csv");
    tokio::fs::write(&csv_path, "name,age\nalice,30\nbob,25").await?;

    register_defaults()?;

    let mut workflow = Workflow::new("file_printer_stdout");
    let mut reader = registry::build("read_file")?;
    reader
        .properties_mut()
        .set("path", csv_path.to_string_lossy().to_string())?;
    workflow.add_processor(reader, None, Some("raw"))?;
    workflow.add_processor(registry::build("parse_csv")?, Some("raw"), Some("rows"))?;
    workflow.add_processor(registry::build("stdout")?, Some("rows"), None)?;

    workflow.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    workflow.stop().await;

    if let Some(parser) = workflow.processor("parse_csv") {
        for metric in parser.metrics().all() {
            println!("{}: {}", metric.name, metric.value);
        }
    }
    Ok(())
}
