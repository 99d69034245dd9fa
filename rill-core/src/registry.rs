//! Process-wide registry mapping processor kinds to factories.
//!
//! Concrete processor crates register their kinds once at setup time; a
//! workflow described by names alone builds processors through [`build`]
//! without compile-time coupling to the concrete types.

use std::sync::Mutex;

use crate::error::RegistryError;
use crate::processor::Processor;

/// Zero-argument constructor for a processor kind.
pub type ProcessorFactory = fn() -> Box<dyn Processor>;

struct Registration {
    kind: &'static str,
    factory: ProcessorFactory,
}

static PROCESS_REGISTRY: Mutex<Vec<Registration>> = Mutex::new(Vec::new());

/// Register a processor kind.
///
/// # Errors
///
/// `AlreadyRegistered` when the kind name is taken.
pub fn register(kind: &'static str, factory: ProcessorFactory) -> Result<(), RegistryError> {
    let mut registry = PROCESS_REGISTRY.lock().unwrap();
    if registry.iter().any(|r| r.kind == kind) {
        return Err(RegistryError::AlreadyRegistered(kind.to_string()));
    }
    registry.push(Registration { kind, factory });
    Ok(())
}

pub fn is_registered(kind: &str) -> bool {
    PROCESS_REGISTRY
        .lock()
        .unwrap()
        .iter()
        .any(|r| r.kind == kind)
}

/// Instantiate a processor of the named kind.
///
/// # Errors
///
/// `UnknownKind` when no factory was registered under the name.
pub fn build(kind: &str) -> Result<Box<dyn Processor>, RegistryError> {
    let registry = PROCESS_REGISTRY.lock().unwrap();
    let registration = registry
        .iter()
        .find(|r| r.kind == kind)
        .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))?;
    Ok((registration.factory)())
}

/// All registered kind names.
pub fn registered_kinds() -> Vec<&'static str> {
    PROCESS_REGISTRY
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.kind)
        .collect()
}
