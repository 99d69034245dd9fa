//! The processor lifecycle contract and its shared runtime state.
//!
//! A processor is constructed, configured through its [`PropertyMap`],
//! validated by `initialize`, and then started with a cancellation token.
//! `start` spawns exactly one worker task that loops on
//! `{ingress → process → emit / fail}` until the token fires. The shared
//! bookkeeping lives in [`ProcessorBase`]; concrete processors expose it via
//! [`Processor::base`] and the trait's default methods delegate to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessorError;
use crate::failure::{FailureEnvelope, FailureSender};
use crate::metric::{
    Metrics, METRIC_FAILURES, METRIC_FAILURES_DROPPED, METRIC_PAYLOADS_IN, METRIC_PAYLOADS_OUT,
};
use crate::payload::PayloadRef;
use crate::property::PropertyMap;

pub type PayloadSender = mpsc::Sender<PayloadRef>;
pub type PayloadReceiver = mpsc::Receiver<PayloadRef>;

/// Default buffer depth of a processor's egress channel.
pub const DEFAULT_EGRESS_BUFFER: usize = 1000;

const PAYLOADS_IN_DESC: &str = "number of payloads that entered the processor";
const PAYLOADS_OUT_DESC: &str = "number of payloads the processor has published";
const FAILURES_DESC: &str = "number of failures the processor has reported";
const FAILURES_DROPPED_DESC: &str = "number of failure envelopes dropped unread";

/// The contract every processor implements.
#[async_trait]
pub trait Processor: Send {
    /// Shared lifecycle state; the default methods delegate to it.
    fn base(&self) -> &ProcessorBase;
    fn base_mut(&mut self) -> &mut ProcessorBase;

    /// Registry factory key for this processor kind.
    fn kind(&self) -> &'static str;

    /// Validate properties ahead of `start`.
    fn initialize(&mut self) -> Result<(), ProcessorError> {
        self.base().properties().validate()?;
        Ok(())
    }

    /// Spawn the single worker task. Returns once the worker is running.
    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError>;

    /// Identifier, unique within a workflow.
    fn name(&self) -> &str {
        self.base().name()
    }

    fn set_name(&mut self, name: &str) {
        self.base_mut().set_name(name);
    }

    fn properties(&self) -> &PropertyMap {
        self.base().properties()
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        self.base_mut().properties_mut()
    }

    fn metrics(&self) -> &Metrics {
        self.base().metrics()
    }

    /// True for source processors that produce without consuming.
    fn subscriptionless(&self) -> bool {
        false
    }

    fn is_running(&self) -> bool {
        self.base().is_running()
    }

    /// Trigger the cancel handle. Idempotent; the worker exits on its own.
    fn stop(&mut self) {
        self.base_mut().stop();
    }

    /// Hand the ingress read side to this processor.
    fn set_ingress(&mut self, ingress: PayloadReceiver) -> Result<(), ProcessorError> {
        if self.subscriptionless() {
            return Err(ProcessorError::IngressNotAccepted);
        }
        self.base_mut().set_ingress(ingress);
        Ok(())
    }

    /// Hand the egress read side to a broker pump.
    ///
    /// Call before `start`: a previously taken egress is replaced with a
    /// fresh channel, so the worker spawned next writes to the side handed
    /// out here.
    fn take_egress(&mut self) -> PayloadReceiver {
        self.base_mut().take_egress()
    }

    fn set_failure_channel(&mut self, failures: FailureSender) {
        self.base_mut().set_failure_channel(failures);
    }

    /// The worker join handle, for supervised grace-period waits.
    fn take_worker(&mut self) -> Option<JoinHandle<()>> {
        self.base_mut().take_worker()
    }
}

/// Lifecycle state shared by every processor implementation.
pub struct ProcessorBase {
    name: String,
    properties: PropertyMap,
    metrics: Arc<Metrics>,
    running: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
    ingress: Option<PayloadReceiver>,
    egress_buffer: usize,
    egress_tx: PayloadSender,
    egress_rx: Option<PayloadReceiver>,
    failures: Option<FailureSender>,
    worker: Option<JoinHandle<()>>,
}

impl ProcessorBase {
    pub fn new(name: &str) -> Self {
        Self::with_egress_buffer(name, DEFAULT_EGRESS_BUFFER)
    }

    pub fn with_egress_buffer(name: &str, buffer: usize) -> Self {
        let (egress_tx, egress_rx) = mpsc::channel(buffer);
        Self {
            name: name.to_string(),
            properties: PropertyMap::new(),
            metrics: Arc::new(Metrics::new(name)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: None,
            ingress: None,
            egress_buffer: buffer,
            egress_tx,
            egress_rx: Some(egress_rx),
            failures: None,
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.metrics.set_scope(name);
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_ingress(&mut self, ingress: PayloadReceiver) {
        self.ingress = Some(ingress);
    }

    pub fn has_ingress(&self) -> bool {
        self.ingress.is_some()
    }

    /// The egress read side. Once taken, a subsequent call installs a fresh
    /// channel pair, which is what lets a stopped processor be rewired and
    /// restarted.
    pub fn take_egress(&mut self) -> PayloadReceiver {
        match self.egress_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(self.egress_buffer);
                self.egress_tx = tx;
                rx
            }
        }
    }

    pub fn set_failure_channel(&mut self, failures: FailureSender) {
        self.failures = Some(failures);
    }

    pub fn take_worker(&mut self) -> Option<JoinHandle<()>> {
        self.worker.take()
    }

    /// Guard the start sequence and assemble the context handed to the
    /// worker task.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` on a double start; `IngressRelationshipNeeded` when
    /// `needs_ingress` is set and no ingress was wired.
    pub fn begin_start(
        &mut self,
        cancel: &CancellationToken,
        needs_ingress: bool,
    ) -> Result<WorkerContext, ProcessorError> {
        if self.is_running() {
            return Err(ProcessorError::AlreadyRunning);
        }
        if needs_ingress && self.ingress.is_none() {
            return Err(ProcessorError::IngressRelationshipNeeded);
        }
        self.cancel = Some(cancel.clone());
        self.running.store(true, Ordering::SeqCst);
        Ok(WorkerContext {
            processor: self.name.clone(),
            cancel: cancel.clone(),
            metrics: Arc::clone(&self.metrics),
            ingress: self.ingress.take(),
            egress: self.egress_tx.clone(),
            // Moved, not cloned: when the worker ends, its send side drops
            // and a stopping workflow can observe the failure stream close.
            failures: self.failures.take(),
            _running: RunningGuard {
                flag: Arc::clone(&self.running),
            },
        })
    }

    /// Record the spawned worker so the supervisor can await it.
    pub fn finish_start(&mut self, worker: JoinHandle<()>) {
        self.worker = Some(worker);
    }

    /// Trigger the cancel handle, if the processor ever started.
    pub fn stop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

/// Clears the running flag when the worker task ends, clean exit or not.
struct RunningGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Everything a worker task needs, detached from the processor itself.
///
/// The context owns the running flag: dropping it (worker return, clean or
/// cancelled) marks the processor as stopped.
pub struct WorkerContext {
    processor: String,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
    ingress: Option<PayloadReceiver>,
    egress: PayloadSender,
    failures: Option<FailureSender>,
    _running: RunningGuard,
}

impl WorkerContext {
    pub fn processor(&self) -> &str {
        &self.processor
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Receive the next ingress payload, counting `payloads_in`.
    ///
    /// Returns `None` on cancellation or when the ingress closed — either
    /// way the worker loop should end.
    pub async fn next(&mut self) -> Option<PayloadRef> {
        let Self {
            cancel,
            ingress,
            metrics,
            ..
        } = self;
        let ingress = ingress.as_mut()?;
        tokio::select! {
            _ = cancel.cancelled() => None,
            payload = ingress.recv() => {
                if payload.is_some() {
                    metrics.add(METRIC_PAYLOADS_IN, PAYLOADS_IN_DESC, 1);
                }
                payload
            }
        }
    }

    /// Publish on egress, counting `payloads_out`.
    ///
    /// Blocks under backpressure. Returns false when cancelled or when the
    /// egress side is gone; the worker loop should end then.
    pub async fn emit(&self, payload: PayloadRef) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.egress.send(payload) => {
                if sent.is_ok() {
                    self.metrics.add(METRIC_PAYLOADS_OUT, PAYLOADS_OUT_DESC, 1);
                }
                sent.is_ok()
            }
        }
    }

    /// Report a per-payload failure, counting `failures`. Never blocks:
    /// envelopes nobody can receive are dropped and counted.
    pub fn fail(&self, error: impl ToString, payload: Option<PayloadRef>) {
        self.metrics.add(METRIC_FAILURES, FAILURES_DESC, 1);
        let envelope = FailureEnvelope::new(error, self.processor.clone(), payload);
        match &self.failures {
            Some(failures) => {
                if failures.try_send(envelope).is_err() {
                    self.metrics
                        .add(METRIC_FAILURES_DROPPED, FAILURES_DROPPED_DESC, 1);
                    tracing::debug!(processor = %self.processor, "Failure envelope dropped");
                }
            }
            None => {
                self.metrics
                    .add(METRIC_FAILURES_DROPPED, FAILURES_DROPPED_DESC, 1);
                tracing::debug!(
                    processor = %self.processor,
                    "No failure channel attached; envelope dropped"
                );
            }
        }
    }
}
