//! Topic broker: process-wide pub/sub wiring between processors.
//!
//! A topic is a named multicast bus. Publishing fans the payload out to
//! every current subscriber; each subscriber owns a buffered channel and
//! receives the same shared payload reference, which it must treat as
//! read-only. Topics are created lazily by the first subscribe or publish.
//!
//! The broker is the sole arbiter of wiring: processors only ever see the
//! channels handed to them. The only tasks the broker runs are per-topic
//! pumps translating a processor's egress channel into publishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rill_core::failure::{FailureEnvelope, FailureSender};
use rill_core::payload::{PayloadRef, MAX_PAYLOAD_BYTES};
use rill_core::processor::{PayloadReceiver, PayloadSender};

/// Default buffer depth of a subscriber channel.
pub const DEFAULT_TOPIC_BUFFER: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The payload exceeds the broker's size bound.
    #[error("payload of {len} bytes exceeds the {} byte limit", MAX_PAYLOAD_BYTES)]
    PayloadTooLarge { len: usize },
    #[error("topic not found: {0}")]
    TopicNotFound(String),
}

/// What publish does when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Block the publisher until the subscriber drains (backpressure).
    #[default]
    Block,
    /// Skip the subscriber and count the payload as dropped.
    Drop,
}

/// Counters exposed per topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicStats {
    pub subscribers: usize,
    pub published: u64,
    pub dropped: u64,
}

/// A subscriber's handle: the read side of its channel plus the identity
/// needed to unsubscribe.
pub struct Subscription {
    pub topic: String,
    pub id: u64,
    pub receiver: PayloadReceiver,
}

struct Subscriber {
    id: u64,
    tx: PayloadSender,
}

#[derive(Default)]
struct Topic {
    policy: DeliveryPolicy,
    subscribers: Vec<Subscriber>,
    published: u64,
    dropped: u64,
}

struct BrokerInner {
    topics: RwLock<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

/// Cloneable handle to the shared topic registry.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to a topic, creating it lazily.
    ///
    /// Returns a fresh channel with the requested buffer depth.
    pub async fn subscribe(&self, topic: &str, buffer: usize) -> Subscription {
        let (tx, receiver) = tokio::sync::mpsc::channel(buffer.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.inner.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push(Subscriber { id, tx });
        tracing::debug!(topic = %topic, subscriber = id, "Subscribed");
        Subscription {
            topic: topic.to_string(),
            id,
            receiver,
        }
    }

    /// Remove a subscriber from a topic. Idempotent.
    pub async fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.inner.topics.write().await;
        if let Some(entry) = topics.get_mut(topic) {
            entry.subscribers.retain(|s| s.id != id);
        }
    }

    /// Set the delivery policy of a topic, creating it lazily.
    pub async fn set_policy(&self, topic: &str, policy: DeliveryPolicy) {
        let mut topics = self.inner.topics.write().await;
        topics.entry(topic.to_string()).or_default().policy = policy;
    }

    /// Fan a payload out to every current subscriber of the topic.
    ///
    /// Returns the number of subscribers the payload was delivered to.
    /// Under [`DeliveryPolicy::Block`] a full subscriber buffer exerts
    /// backpressure on the caller; under [`DeliveryPolicy::Drop`] the
    /// subscriber is skipped and the topic's dropped counter grows.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` when the payload exceeds [`MAX_PAYLOAD_BYTES`].
    pub async fn publish(&self, topic: &str, payload: PayloadRef) -> Result<usize, BrokerError> {
        let len = payload.len();
        if len > MAX_PAYLOAD_BYTES {
            return Err(BrokerError::PayloadTooLarge { len });
        }

        // Clone the senders out so no lock is held across a blocking send.
        let (policy, subscribers) = {
            let mut topics = self.inner.topics.write().await;
            let entry = topics.entry(topic.to_string()).or_default();
            entry.published += 1;
            let senders: Vec<(u64, PayloadSender)> = entry
                .subscribers
                .iter()
                .map(|s| (s.id, s.tx.clone()))
                .collect();
            (entry.policy, senders)
        };

        let mut delivered = 0usize;
        let mut dropped = 0u64;
        let mut closed: Vec<u64> = Vec::new();
        for (id, tx) in subscribers {
            match policy {
                DeliveryPolicy::Block => match tx.send(payload.clone()).await {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(id),
                },
                DeliveryPolicy::Drop => match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Closed(_)) => closed.push(id),
                },
            }
        }

        if dropped > 0 || !closed.is_empty() {
            let mut topics = self.inner.topics.write().await;
            if let Some(entry) = topics.get_mut(topic) {
                entry.dropped += dropped;
                entry.subscribers.retain(|s| !closed.contains(&s.id));
            }
        }
        Ok(delivered)
    }

    /// Remove every subscriber and delete the topic.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` when the topic does not exist.
    pub async fn drain_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let mut topics = self.inner.topics.write().await;
        topics
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))
    }

    /// Current counters for a topic.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` when the topic does not exist.
    pub async fn stats(&self, topic: &str) -> Result<TopicStats, BrokerError> {
        let topics = self.inner.topics.read().await;
        topics
            .get(topic)
            .map(|t| TopicStats {
                subscribers: t.subscribers.len(),
                published: t.published,
                dropped: t.dropped,
            })
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))
    }

    pub async fn topic_exists(&self, topic: &str) -> bool {
        self.inner.topics.read().await.contains_key(topic)
    }

    /// Spawn the pump that forwards a processor's egress channel onto a
    /// topic.
    ///
    /// The pump runs until the token fires or the egress closes. On
    /// cancellation it drains whatever the worker left behind without
    /// publishing, so a stopping workflow never leaks buffered payloads
    /// into the topic. Publish failures become failure envelopes attributed
    /// to the producing processor.
    pub fn spawn_pump(
        &self,
        topic: impl Into<String>,
        mut egress: PayloadReceiver,
        cancel: CancellationToken,
        failures: Option<FailureSender>,
        processor: impl Into<String>,
    ) -> JoinHandle<()> {
        let broker = self.clone();
        let topic = topic.into();
        let processor = processor.into();
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = cancel.cancelled() => break,
                    payload = egress.recv() => match payload {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    published = broker.publish(&topic, payload.clone()) => {
                        if let Err(err) = published {
                            tracing::warn!(
                                topic = %topic,
                                processor = %processor,
                                error = %err,
                                "Publish failed"
                            );
                            if let Some(failures) = &failures {
                                let _ = failures.try_send(FailureEnvelope::new(
                                    err,
                                    processor.clone(),
                                    Some(payload),
                                ));
                            }
                        }
                    }
                }
            }
            while egress.try_recv().is_ok() {}
            tracing::debug!(topic = %topic, processor = %processor, "Topic pump stopped");
        })
    }
}
