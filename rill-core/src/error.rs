use thiserror::Error;

/// Configuration errors raised by the property system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// The named property was never declared on the map.
    #[error("no such property: {0}")]
    NoSuchProperty(String),
    /// The value cannot be converted to the requested or established type.
    #[error("wrong property type for '{name}': expected {expected}")]
    WrongPropertyType { name: String, expected: &'static str },
    /// One or more required properties have no value.
    #[error("required properties not fulfilled: {}", .0.join(", "))]
    RequiredPropertiesNotFulfilled(Vec<String>),
}

/// Lifecycle errors returned by processor operations.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor is already running")]
    AlreadyRunning,
    /// A non-subscriptionless processor was started without an ingress.
    #[error("an ingress relationship is needed before start")]
    IngressRelationshipNeeded,
    /// A subscriptionless processor was handed an ingress.
    #[error("subscriptionless processors do not accept an ingress")]
    IngressNotAccepted,
    #[error(transparent)]
    Property(#[from] PropertyError),
}

/// Errors from the process-wide kind registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown processor kind: {0}")]
    UnknownKind(String),
    #[error("processor kind already registered: {0}")]
    AlreadyRegistered(String),
}

/// Errors from payload wire (de)serialization.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// The wire envelope carried a different kind tag than expected.
    #[error("unexpected payload kind: expected '{expected}', found '{found}'")]
    KindMismatch { expected: String, found: String },
}
