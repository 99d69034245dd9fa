//! The failure stream: uniform error envelopes shared by a workflow.
//!
//! Emission is best-effort by design. A slow or missing failure consumer
//! must never stall the data plane, so senders use `try_send` and count
//! what they drop.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::payload::PayloadRef;

/// Default buffer depth of a workflow's shared failure channel.
pub const DEFAULT_FAILURE_BUFFER: usize = 1000;

/// `{error, processor, offending payload}` published on the failure stream.
#[derive(Debug, Clone)]
pub struct FailureEnvelope {
    pub error: String,
    pub processor: String,
    pub payload: Option<PayloadRef>,
}

impl FailureEnvelope {
    pub fn new(
        error: impl ToString,
        processor: impl Into<String>,
        payload: Option<PayloadRef>,
    ) -> Self {
        Self {
            error: error.to_string(),
            processor: processor.into(),
            payload,
        }
    }

    /// Wire form with the payload flattened to bytes.
    pub fn to_wire(&self) -> FailureWire {
        FailureWire {
            error: self.error.clone(),
            processor: self.processor.clone(),
            payload: self.payload.as_ref().map(|p| p.bytes().to_vec()),
        }
    }
}

/// `{error, processor, payload?}` as serialized for external consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureWire {
    pub error: String,
    pub processor: String,
    pub payload: Option<Vec<u8>>,
}

pub type FailureSender = mpsc::Sender<FailureEnvelope>;
pub type FailureReceiver = mpsc::Receiver<FailureEnvelope>;

pub fn failure_channel(buffer: usize) -> (FailureSender, FailureReceiver) {
    mpsc::channel(buffer)
}
