use std::time::Duration;

use indexmap::IndexMap;
use serial_test::serial;
use tokio::time::timeout;

use rill_core::payload::Payload;
use rill_core::registry;
use rill_processors::register_defaults;
use rill_workflow::{Workflow, WorkflowState};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn csv_happy_path_end_to_end() {
    register_defaults().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("a.csv");
    std::fs::write(&csv_path, "name,age\nalice,30\nbob,25").unwrap();

    let mut workflow = Workflow::new("csv-pipeline");
    let mut reader = registry::build("read_file").unwrap();
    reader
        .properties_mut()
        .set("path", csv_path.to_string_lossy().to_string())
        .unwrap();
    workflow.add_processor(reader, None, Some("raw")).unwrap();
    workflow
        .add_processor(registry::build("parse_csv").unwrap(), Some("raw"), Some("rows"))
        .unwrap();

    let mut rows = workflow.broker().subscribe("rows", 100).await;
    workflow.start().await.unwrap();

    let first = timeout(Duration::from_secs(2), rows.receiver.recv())
        .await
        .unwrap()
        .unwrap();
    let first_row: IndexMap<String, String> = serde_json::from_slice(&first.bytes()).unwrap();
    assert_eq!(first_row.get("name").unwrap(), "alice");
    assert_eq!(first_row.get("age").unwrap(), "30");
    assert_eq!(first.source(), csv_path.to_string_lossy());

    let second = timeout(Duration::from_secs(2), rows.receiver.recv())
        .await
        .unwrap()
        .unwrap();
    let second_row: IndexMap<String, String> = serde_json::from_slice(&second.bytes()).unwrap();
    assert_eq!(second_row.get("name").unwrap(), "bob");
    assert_eq!(second_row.get("age").unwrap(), "25");

    let metrics = workflow.processor("parse_csv").unwrap().metrics();
    assert_eq!(metrics.get("payloads_in").unwrap().value, 1);
    assert_eq!(metrics.get("payloads_out").unwrap().value, 2);

    workflow.stop().await;
    assert_eq!(workflow.state(), WorkflowState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn header_mismatch_becomes_a_failure_envelope() {
    register_defaults().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("bad.csv");
    std::fs::write(&csv_path, "a,b\n1,2,3").unwrap();

    let mut workflow = Workflow::new("bad-csv");
    let mut reader = registry::build("read_file").unwrap();
    reader
        .properties_mut()
        .set("path", csv_path.to_string_lossy().to_string())
        .unwrap();
    workflow.add_processor(reader, None, Some("raw")).unwrap();
    workflow
        .add_processor(registry::build("parse_csv").unwrap(), Some("raw"), Some("rows"))
        .unwrap();

    let mut failures = workflow.take_failures().unwrap();
    workflow.start().await.unwrap();

    let envelope = timeout(Duration::from_secs(2), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.processor, "parse_csv");
    assert!(envelope.error.contains("header"));
    let offending = envelope.payload.unwrap();
    assert_eq!(&offending.bytes()[..], b"a,b\n1,2,3");

    let metrics = workflow.processor("parse_csv").unwrap().metrics();
    assert_eq!(metrics.get("failures").unwrap().value, 1);
    assert!(metrics.get("payloads_out").is_none());

    workflow.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn cancellation_stops_every_worker_within_grace() {
    register_defaults().unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.csv"), "x,y\n1,2").unwrap();

    let mut workflow = Workflow::new("cancel-me");
    let mut monitor = registry::build("monitor_directory").unwrap();
    monitor
        .properties_mut()
        .set("path", dir.path().to_string_lossy().to_string())
        .unwrap();
    monitor.properties_mut().set("poll_interval", 20).unwrap();
    workflow.add_processor(monitor, None, Some("raw")).unwrap();
    workflow
        .add_processor(registry::build("parse_csv").unwrap(), Some("raw"), Some("rows"))
        .unwrap();
    workflow
        .add_processor(registry::build("stdout").unwrap(), Some("rows"), None)
        .unwrap();

    let mut failures = workflow.take_failures().unwrap();
    workflow.start().await.unwrap();
    for id in ["monitor_directory", "parse_csv", "stdout"] {
        assert!(workflow.processor(id).unwrap().is_running());
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    workflow.stop().await;

    assert_eq!(workflow.state(), WorkflowState::Stopped);
    for id in ["monitor_directory", "parse_csv", "stdout"] {
        assert!(!workflow.processor(id).unwrap().is_running());
    }
    // Closed and empty: the run produced no failures.
    assert!(failures.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn file_pipeline_described_by_names_alone() {
    register_defaults().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.txt");
    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();
    std::fs::write(&in_path, b"moved through the pipeline").unwrap();

    let json = serde_json::json!({
        "id": "file-mover",
        "processors": [
            {
                "id": "reader",
                "kind": "read_file",
                "properties": { "path": in_path.to_string_lossy() },
                "publishes_to": "raw"
            },
            {
                "id": "writer",
                "kind": "write_file",
                "properties": {
                    "path": out_dir.to_string_lossy(),
                    "append": false
                },
                "subscribes_to": "raw"
            }
        ]
    });
    let descriptor = serde_json::from_value(json).unwrap();
    let mut workflow = Workflow::from_descriptor(&descriptor).unwrap();
    workflow.start().await.unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let entries: Vec<_> = std::fs::read_dir(&out_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        if let [only] = entries.as_slice() {
            if std::fs::read(only).unwrap() == b"moved through the pipeline" {
                break;
            }
        }
        assert!(std::time::Instant::now() < deadline, "no output file appeared");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    workflow.stop().await;
}
