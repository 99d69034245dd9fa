//! Payloads are the opaque data records exchanged between processors.
//!
//! A payload is created by its producing processor, published through the
//! broker as an [`PayloadRef`], and treated as read-only by every consumer.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::property::PropertyMap;

/// Maximum payload size the broker accepts, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Capability set every payload variant implements.
pub trait Payload: fmt::Debug + Send + Sync {
    /// Wire kind tag identifying the concrete variant.
    fn kind(&self) -> &'static str;

    /// Stable byte representation of the current logical value.
    fn bytes(&self) -> Bytes;

    /// Byte length of [`Payload::bytes`].
    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trace-back tag naming where the payload came from (a path, a topic).
    fn source(&self) -> &str;

    fn set_source(&mut self, source: String);

    /// Replace the logical value with raw bytes. Mapping variants parse.
    fn set_bytes(&mut self, bytes: Bytes) -> Result<(), PayloadError>;

    /// Payload metadata, when the variant carries any.
    fn metadata(&self) -> Option<&PropertyMap> {
        None
    }

    /// Self-describing wire encoding: kind tag plus JSON body.
    fn encode(&self) -> Result<Vec<u8>, PayloadError>;
}

/// A payload shared between the broker and its subscribers.
pub type PayloadRef = Arc<dyn Payload>;

#[derive(Serialize)]
struct WireEnvelopeRef<'a, B: Serialize> {
    kind: &'a str,
    body: &'a B,
}

#[derive(Deserialize)]
struct WireEnvelope<B> {
    kind: String,
    body: B,
}

/// Encode `body` under a kind tag; the counterpart of [`decode_tagged`].
pub fn encode_tagged<B: Serialize>(kind: &str, body: &B) -> Result<Vec<u8>, PayloadError> {
    Ok(serde_json::to_vec(&WireEnvelopeRef { kind, body })?)
}

/// Decode a tagged wire envelope, checking the kind tag.
pub fn decode_tagged<B: DeserializeOwned>(
    expected: &str,
    bytes: &[u8],
) -> Result<B, PayloadError> {
    let envelope: WireEnvelope<B> = serde_json::from_slice(bytes)?;
    if envelope.kind != expected {
        return Err(PayloadError::KindMismatch {
            expected: expected.to_string(),
            found: envelope.kind,
        });
    }
    Ok(envelope.body)
}

/// The plain byte payload: bytes, a source tag, optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasePayload {
    source: String,
    data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<PropertyMap>,
}

impl BasePayload {
    pub const KIND: &'static str = "base";

    pub fn new(source: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            source: source.into(),
            data: data.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: PropertyMap) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Restore a payload from its wire encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        decode_tagged(Self::KIND, bytes)
    }
}

impl Payload for BasePayload {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn set_source(&mut self, source: String) {
        self.source = source;
    }

    fn set_bytes(&mut self, bytes: Bytes) -> Result<(), PayloadError> {
        self.data = bytes;
        Ok(())
    }

    fn metadata(&self) -> Option<&PropertyMap> {
        self.metadata.as_ref()
    }

    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        encode_tagged(Self::KIND, self)
    }
}
