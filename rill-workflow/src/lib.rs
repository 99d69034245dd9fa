//! Workflow supervisor: owns a set of processors and starts, wires, and
//! cancels them as a unit.
//!
//! A workflow validates every processor before anything runs, subscribes
//! their ingresses to the declared topics, pumps their egresses onto the
//! declared topics, shares one failure channel and one cancellation root,
//! and tears the whole arrangement down within a bounded grace period.

mod descriptor;

pub use descriptor::{ProcessorDescriptor, WorkflowDescriptor};

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rill_broker::{Broker, DEFAULT_TOPIC_BUFFER};
use rill_core::error::{ProcessorError, PropertyError, RegistryError};
use rill_core::failure::{
    failure_channel, FailureReceiver, FailureSender, DEFAULT_FAILURE_BUFFER,
};
use rill_core::processor::{PayloadReceiver, Processor};

/// How long `stop` waits for each worker before abandoning it.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow is already running")]
    AlreadyRunning,
    #[error("duplicate processor id: {0}")]
    DuplicateProcessor(String),
    /// One or more processors failed validation; nothing was started.
    #[error("initialize failed for: {}", fmt_failures(.0))]
    InitializeFailed(Vec<(String, String)>),
    /// A processor failed to start; already started ones were rolled back.
    #[error("start failed for processor '{id}': {source}")]
    StartFailed {
        id: String,
        #[source]
        source: ProcessorError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Property(#[from] PropertyError),
}

fn fmt_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!("{id} ({err})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Built,
    Running,
    Stopped,
    Failed,
}

struct Entry {
    processor: Box<dyn Processor>,
    subscribes_to: Option<String>,
    publishes_to: Option<String>,
}

/// A supervised set of processors sharing a cancellation root and a failure
/// channel.
pub struct Workflow {
    id: String,
    entries: Vec<Entry>,
    broker: Broker,
    cancel: CancellationToken,
    failure_tx: Option<FailureSender>,
    failure_rx: Option<FailureReceiver>,
    pumps: Vec<JoinHandle<()>>,
    state: WorkflowState,
    grace: Duration,
}

impl Workflow {
    /// An empty supervisor with its own broker, cancellation root, and
    /// failure channel.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_broker(id, Broker::new())
    }

    /// An empty supervisor wired to a shared, process-wide broker.
    pub fn with_broker(id: impl Into<String>, broker: Broker) -> Self {
        let (failure_tx, failure_rx) = failure_channel(DEFAULT_FAILURE_BUFFER);
        Self {
            id: id.into(),
            entries: Vec::new(),
            broker,
            cancel: CancellationToken::new(),
            failure_tx: Some(failure_tx),
            failure_rx: Some(failure_rx),
            pumps: Vec::new(),
            state: WorkflowState::Built,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn set_grace_period(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Record a processor and the topics it binds.
    ///
    /// # Errors
    ///
    /// `DuplicateProcessor` when the id is already taken.
    pub fn add_processor(
        &mut self,
        processor: Box<dyn Processor>,
        subscribes_to: Option<&str>,
        publishes_to: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let id = processor.name().to_string();
        if self.entries.iter().any(|e| e.processor.name() == id) {
            return Err(WorkflowError::DuplicateProcessor(id));
        }
        self.entries.push(Entry {
            processor,
            subscribes_to: subscribes_to.map(str::to_string),
            publishes_to: publishes_to.map(str::to_string),
        });
        Ok(())
    }

    /// Look at an owned processor (metrics, running state).
    pub fn processor(&self, id: &str) -> Option<&dyn Processor> {
        self.entries
            .iter()
            .find(|e| e.processor.name() == id)
            .map(|e| e.processor.as_ref())
    }

    pub fn processor_mut(&mut self, id: &str) -> Option<&mut dyn Processor> {
        self.entries
            .iter_mut()
            .find(|e| e.processor.name() == id)
            .map(|e| e.processor.as_mut())
    }

    /// The read side of the shared failure stream. Closed by `stop`;
    /// re-created on the next `start`.
    pub fn take_failures(&mut self) -> Option<FailureReceiver> {
        self.failure_rx.take()
    }

    /// Validate, wire, and start every processor.
    ///
    /// Nothing runs unless all processors validate. Processors start in
    /// insertion order; the first start failure rolls the already started
    /// ones back and leaves the workflow `Failed`. Restarting a `Stopped`
    /// workflow re-validates and re-wires from scratch.
    pub async fn start(&mut self) -> Result<(), WorkflowError> {
        if matches!(self.state, WorkflowState::Running) {
            return Err(WorkflowError::AlreadyRunning);
        }

        // A stopped workflow restarts on a fresh root and failure channel.
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let failure_tx = match &self.failure_tx {
            Some(tx) => tx.clone(),
            None => {
                let (tx, rx) = failure_channel(DEFAULT_FAILURE_BUFFER);
                self.failure_tx = Some(tx.clone());
                self.failure_rx = Some(rx);
                tx
            }
        };

        let mut invalid: Vec<(String, String)> = Vec::new();
        for entry in &mut self.entries {
            if let Err(err) = entry.processor.initialize() {
                invalid.push((entry.processor.name().to_string(), err.to_string()));
            }
        }
        if !invalid.is_empty() {
            return Err(WorkflowError::InitializeFailed(invalid));
        }

        let broker = self.broker.clone();
        let mut wiring_error: Option<(String, ProcessorError)> = None;
        for entry in &mut self.entries {
            if let Some(topic) = &entry.subscribes_to {
                let subscription = broker.subscribe(topic, DEFAULT_TOPIC_BUFFER).await;
                if let Err(err) = entry.processor.set_ingress(subscription.receiver) {
                    wiring_error = Some((entry.processor.name().to_string(), err));
                    break;
                }
            }
            entry.processor.set_failure_channel(failure_tx.clone());
            entry
                .processor
                .metrics()
                .set_scope(format!("{}.{}", self.id, entry.processor.name()));
        }
        if let Some((id, source)) = wiring_error {
            self.rollback(0).await;
            self.state = WorkflowState::Failed;
            return Err(WorkflowError::StartFailed { id, source });
        }

        for index in 0..self.entries.len() {
            // Wire the pump first so the worker's egress always drains.
            let egress = self.entries[index].processor.take_egress();
            let pump_cancel = self.cancel.child_token();
            let pump = match self.entries[index].publishes_to.clone() {
                Some(topic) => broker.spawn_pump(
                    topic,
                    egress,
                    pump_cancel,
                    Some(failure_tx.clone()),
                    self.entries[index].processor.name().to_string(),
                ),
                None => spawn_discard(egress, pump_cancel),
            };
            self.pumps.push(pump);

            let child = self.cancel.child_token();
            if let Err(err) = self.entries[index].processor.start(child).await {
                let id = self.entries[index].processor.name().to_string();
                tracing::error!(
                    workflow = %self.id,
                    processor = %id,
                    error = %err,
                    "Start failed; rolling back"
                );
                self.rollback(index).await;
                self.state = WorkflowState::Failed;
                return Err(WorkflowError::StartFailed { id, source: err });
            }
            tracing::debug!(
                workflow = %self.id,
                processor = %self.entries[index].processor.name(),
                "Processor started"
            );
        }

        self.state = WorkflowState::Running;
        tracing::info!(
            workflow = %self.id,
            processors = self.entries.len(),
            "Workflow started"
        );
        Ok(())
    }

    /// Cancel the root token and wait for every worker and pump up to the
    /// grace period. Idempotent.
    pub async fn stop(&mut self) {
        if !matches!(self.state, WorkflowState::Running) {
            return;
        }
        tracing::info!(workflow = %self.id, "Stopping workflow");
        self.cancel.cancel();

        for entry in &mut self.entries {
            entry.processor.stop();
            if let Some(worker) = entry.processor.take_worker() {
                if tokio::time::timeout(self.grace, worker).await.is_err() {
                    tracing::warn!(
                        workflow = %self.id,
                        processor = %entry.processor.name(),
                        "Worker exceeded the grace period during shutdown; abandoning"
                    );
                }
            }
        }
        for pump in self.pumps.drain(..) {
            if tokio::time::timeout(self.grace, pump).await.is_err() {
                tracing::warn!(workflow = %self.id, "Topic pump exceeded the grace period; abandoning");
            }
        }

        for topic in self.bound_topics() {
            let _ = self.broker.drain_topic(&topic).await;
        }
        self.failure_tx = None;
        self.state = WorkflowState::Stopped;
        tracing::info!(workflow = %self.id, "Workflow stopped");
    }

    fn bound_topics(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|e| {
                e.subscribes_to
                    .iter()
                    .chain(e.publishes_to.iter())
                    .cloned()
            })
            .collect()
    }

    async fn rollback(&mut self, started: usize) {
        self.cancel.cancel();
        for entry in self.entries.iter_mut().take(started) {
            entry.processor.stop();
            if let Some(worker) = entry.processor.take_worker() {
                let _ = tokio::time::timeout(self.grace, worker).await;
            }
        }
        for pump in self.pumps.drain(..) {
            let _ = tokio::time::timeout(self.grace, pump).await;
        }
        self.failure_tx = None;
    }
}

impl Drop for Workflow {
    fn drop(&mut self) {
        // Workers unwind on their own once the root token fires; only
        // `stop().await` gives the graceful drain.
        self.cancel.cancel();
    }
}

/// Drains an egress nobody subscribed a topic for, so a forwarding
/// processor can never wedge on a full channel without a reader.
fn spawn_discard(mut egress: PayloadReceiver, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                payload = egress.recv() => {
                    if payload.is_none() {
                        break;
                    }
                }
            }
        }
        while egress.try_recv().is_ok() {}
    })
}
