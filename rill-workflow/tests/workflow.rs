use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rill_core::error::ProcessorError;
use rill_core::payload::{BasePayload, Payload, PayloadRef};
use rill_core::processor::{Processor, ProcessorBase};
use rill_core::property::PropertyValue;
use rill_core::registry;
use rill_workflow::{
    ProcessorDescriptor, Workflow, WorkflowDescriptor, WorkflowError, WorkflowState,
};

/// Source that emits `count` payloads then idles until cancelled.
struct Emitter {
    base: ProcessorBase,
    count: usize,
}

impl Emitter {
    fn boxed(name: &str, count: usize) -> Box<dyn Processor> {
        Box::new(Self {
            base: ProcessorBase::new(name),
            count,
        })
    }
}

#[async_trait]
impl Processor for Emitter {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "emitter"
    }

    fn subscriptionless(&self) -> bool {
        true
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let count = self.count;
        let ctx = self.base.begin_start(&cancel, false)?;
        let worker = tokio::spawn(async move {
            for n in 0..count {
                let payload: PayloadRef =
                    Arc::new(BasePayload::new("emitter", format!("value-{n}")));
                if !ctx.emit(payload).await {
                    return;
                }
            }
            ctx.cancel_token().cancelled().await;
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// Sink that captures everything it receives.
struct Capture {
    base: ProcessorBase,
    seen: Arc<Mutex<Vec<PayloadRef>>>,
}

impl Capture {
    fn boxed(name: &str, seen: Arc<Mutex<Vec<PayloadRef>>>) -> Box<dyn Processor> {
        Box::new(Self {
            base: ProcessorBase::new(name),
            seen,
        })
    }
}

#[async_trait]
impl Processor for Capture {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "capture"
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let seen = Arc::clone(&self.seen);
        let mut ctx = self.base.begin_start(&cancel, true)?;
        let worker = tokio::spawn(async move {
            while let Some(payload) = ctx.next().await {
                seen.lock().unwrap().push(payload);
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// Transform that turns every input into a failure envelope.
struct AlwaysFails {
    base: ProcessorBase,
}

impl AlwaysFails {
    fn boxed(name: &str) -> Box<dyn Processor> {
        Box::new(Self {
            base: ProcessorBase::new(name),
        })
    }
}

#[async_trait]
impl Processor for AlwaysFails {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "always_fails"
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let mut ctx = self.base.begin_start(&cancel, true)?;
        let worker = tokio::spawn(async move {
            while let Some(payload) = ctx.next().await {
                ctx.fail("synthetic failure", Some(payload));
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// Source with a required property, for validation scenarios.
struct NeedsPath {
    base: ProcessorBase,
}

impl NeedsPath {
    fn boxed(name: &str) -> Box<dyn Processor> {
        let mut base = ProcessorBase::new(name);
        base.properties_mut()
            .add("path", "where to look", true);
        Box::new(Self { base })
    }
}

#[async_trait]
impl Processor for NeedsPath {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "needs_path"
    }

    fn subscriptionless(&self) -> bool {
        true
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let ctx = self.base.begin_start(&cancel, false)?;
        let worker = tokio::spawn(async move {
            ctx.cancel_token().cancelled().await;
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn rejects_duplicate_processor_ids() {
    let mut workflow = Workflow::new("dupes");
    workflow
        .add_processor(Emitter::boxed("source", 1), None, Some("lines"))
        .unwrap();
    let result = workflow.add_processor(Emitter::boxed("source", 1), None, Some("other"));
    assert!(matches!(
        result,
        Err(WorkflowError::DuplicateProcessor(id)) if id == "source"
    ));
}

#[tokio::test]
async fn initialize_failure_names_every_invalid_processor() {
    let mut workflow = Workflow::new("invalid");
    workflow
        .add_processor(NeedsPath::boxed("first"), None, None)
        .unwrap();
    workflow
        .add_processor(NeedsPath::boxed("second"), None, None)
        .unwrap();

    match workflow.start().await {
        Err(WorkflowError::InitializeFailed(failures)) => {
            let ids: Vec<_> = failures.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids, vec!["first", "second"]);
        }
        other => panic!("expected InitializeFailed, got {other:?}"),
    }
    assert_eq!(workflow.state(), WorkflowState::Built);

    // Fulfilling the properties makes the same workflow startable.
    for id in ["first", "second"] {
        workflow
            .processor_mut(id)
            .unwrap()
            .properties_mut()
            .set("path", "/somewhere")
            .unwrap();
    }
    workflow.start().await.unwrap();
    assert_eq!(workflow.state(), WorkflowState::Running);
    workflow.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipeline_flows_and_stops_within_grace() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new("pipeline");
    workflow
        .add_processor(Emitter::boxed("source", 5), None, Some("lines"))
        .unwrap();
    workflow
        .add_processor(Capture::boxed("sink", Arc::clone(&seen)), Some("lines"), None)
        .unwrap();

    let mut failures = workflow.take_failures().unwrap();
    workflow.start().await.unwrap();
    assert_eq!(workflow.state(), WorkflowState::Running);
    assert!(workflow.processor("source").unwrap().is_running());

    {
        let seen = Arc::clone(&seen);
        wait_for("all payloads to arrive", move || seen.lock().unwrap().len() == 5).await;
    }
    let bytes: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|p| String::from_utf8(p.bytes().to_vec()).unwrap())
        .collect();
    assert_eq!(bytes, vec!["value-0", "value-1", "value-2", "value-3", "value-4"]);

    workflow.stop().await;
    assert_eq!(workflow.state(), WorkflowState::Stopped);
    assert!(!workflow.processor("source").unwrap().is_running());
    assert!(!workflow.processor("sink").unwrap().is_running());

    // The failure stream is closed and carried nothing.
    assert!(failures.recv().await.is_none());
}

#[tokio::test]
async fn start_failure_rolls_back_started_processors() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new("rollback");
    workflow
        .add_processor(Emitter::boxed("source", 1), None, Some("lines"))
        .unwrap();
    // No subscribed topic: the sink cannot start without an ingress.
    workflow
        .add_processor(Capture::boxed("sink", seen), None, None)
        .unwrap();

    match workflow.start().await {
        Err(WorkflowError::StartFailed { id, .. }) => assert_eq!(id, "sink"),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert_eq!(workflow.state(), WorkflowState::Failed);
    assert!(!workflow.processor("source").unwrap().is_running());
}

#[tokio::test]
async fn subscriptionless_processor_rejects_declared_input() {
    let mut workflow = Workflow::new("bad-wiring");
    workflow
        .add_processor(Emitter::boxed("source", 1), Some("lines"), None)
        .unwrap();

    match workflow.start().await {
        Err(WorkflowError::StartFailed { id, source }) => {
            assert_eq!(id, "source");
            assert!(matches!(source, ProcessorError::IngressNotAccepted));
        }
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert_eq!(workflow.state(), WorkflowState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_is_idempotent_and_restart_revalidates() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new("restart");
    workflow
        .add_processor(Emitter::boxed("source", 3), None, Some("lines"))
        .unwrap();
    workflow
        .add_processor(Capture::boxed("sink", Arc::clone(&seen)), Some("lines"), None)
        .unwrap();

    workflow.start().await.unwrap();
    {
        let seen = Arc::clone(&seen);
        wait_for("first batch", move || seen.lock().unwrap().len() == 3).await;
    }
    workflow.stop().await;
    workflow.stop().await;
    assert_eq!(workflow.state(), WorkflowState::Stopped);

    workflow.start().await.unwrap();
    assert!(workflow.take_failures().is_some());
    {
        let seen = Arc::clone(&seen);
        wait_for("second batch", move || seen.lock().unwrap().len() == 6).await;
    }
    workflow.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_surface_on_the_shared_channel() {
    let mut workflow = Workflow::new("failing");
    workflow
        .add_processor(Emitter::boxed("source", 1), None, Some("lines"))
        .unwrap();
    workflow
        .add_processor(AlwaysFails::boxed("failer"), Some("lines"), None)
        .unwrap();

    let mut failures = workflow.take_failures().unwrap();
    workflow.start().await.unwrap();

    let envelope = failures.recv().await.unwrap();
    assert_eq!(envelope.processor, "failer");
    assert_eq!(envelope.error, "synthetic failure");
    let payload = envelope.payload.unwrap();
    assert_eq!(&payload.bytes()[..], b"value-0");

    workflow.stop().await;
    let metrics = workflow.processor("failer").unwrap().metrics();
    assert_eq!(metrics.get("failures").unwrap().value, 1);
    assert_eq!(metrics.get("payloads_in").unwrap().value, 1);
}

#[tokio::test]
#[serial_test::serial]
async fn builds_from_descriptor() {
    if !registry::is_registered("needs_path") {
        registry::register("needs_path", || NeedsPath::boxed("needs_path")).unwrap();
    }

    let descriptor = WorkflowDescriptor {
        id: "described".to_string(),
        processors: vec![ProcessorDescriptor {
            id: "lister".to_string(),
            kind: "needs_path".to_string(),
            properties: [(
                "path".to_string(),
                PropertyValue::String("/var/data".to_string()),
            )]
            .into_iter()
            .collect(),
            subscribes_to: None,
            publishes_to: Some("files".to_string()),
        }],
    };

    // The descriptor itself round-trips through JSON.
    let json = serde_json::to_string(&descriptor).unwrap();
    let parsed: WorkflowDescriptor = serde_json::from_str(&json).unwrap();

    let mut workflow = Workflow::from_descriptor(&parsed).unwrap();
    assert_eq!(workflow.id(), "described");
    let lister = workflow.processor("lister").unwrap();
    assert_eq!(lister.kind(), "needs_path");
    assert_eq!(
        lister.properties().get("path").unwrap().as_str().unwrap(),
        "/var/data"
    );

    workflow.start().await.unwrap();
    workflow.stop().await;
}

#[tokio::test]
#[serial_test::serial]
async fn descriptor_with_unknown_kind_fails() {
    let descriptor = WorkflowDescriptor {
        id: "broken".to_string(),
        processors: vec![ProcessorDescriptor {
            id: "ghost".to_string(),
            kind: "does_not_exist".to_string(),
            properties: Default::default(),
            subscribes_to: None,
            publishes_to: None,
        }],
    };
    assert!(matches!(
        Workflow::from_descriptor(&descriptor),
        Err(WorkflowError::Registry(_))
    ));
}
