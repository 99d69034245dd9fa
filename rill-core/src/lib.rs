//! Core contracts for the Rill dataflow engine.
//!
//! Rill composes small units of work ("processors") into supervised
//! pipelines ("workflows") that stream payloads between them over a topic
//! broker. This crate holds everything the other crates agree on:
//!
//! - [`payload`] — the [`Payload`] capability set and the plain byte
//!   payload, shared immutably between processors.
//! - [`property`] — typed, validated, named configuration.
//! - [`metric`] — per-processor metrics with a pluggable export provider.
//! - [`failure`] — the best-effort failure envelope stream.
//! - [`processor`] — the lifecycle contract and shared worker plumbing.
//! - [`registry`] — the process-wide kind → factory table.

pub mod error;
pub mod failure;
pub mod metric;
pub mod payload;
pub mod processor;
pub mod property;
pub mod registry;

pub use error::{PayloadError, ProcessorError, PropertyError, RegistryError};
pub use failure::{
    failure_channel, FailureEnvelope, FailureReceiver, FailureSender, FailureWire,
    DEFAULT_FAILURE_BUFFER,
};
pub use metric::{
    InMemoryProvider, Metric, MetricProvider, MetricSnapshot, Metrics, METRIC_FAILURES,
    METRIC_FAILURES_DROPPED, METRIC_PAYLOADS_IN, METRIC_PAYLOADS_OUT,
};
pub use payload::{BasePayload, Payload, PayloadRef, MAX_PAYLOAD_BYTES};
pub use processor::{
    PayloadReceiver, PayloadSender, Processor, ProcessorBase, WorkerContext, DEFAULT_EGRESS_BUFFER,
};
pub use property::{Property, PropertyMap, PropertyValue};
