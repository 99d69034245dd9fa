//! Reference processors exercising the Rill core contracts.
//!
//! Sources: [`ReadFile`] (one file, once) and [`MonitorDirectory`] (poll a
//! directory for new files). Transform: [`ParseCsv`] (one row payload per
//! CSV data row). Sinks: [`WriteFile`] and [`Stdout`].
//!
//! Call [`register_defaults`] once at setup to make every kind buildable
//! through the process registry.

pub mod csv;
pub mod files;
pub mod stdout;

pub use csv::{CsvRowPayload, ParseCsv};
pub use files::{MonitorDirectory, ReadFile, WriteFile};
pub use stdout::Stdout;

use thiserror::Error;

use rill_core::error::{PropertyError, RegistryError};
use rill_core::property::PropertyMap;
use rill_core::registry;

/// Per-payload domain errors reported on the failure channel.
///
/// None of these stop a worker: the offending payload is wrapped in a
/// failure envelope and the loop moves on.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("this is not a proper csv payload")]
    NotCsv,
    #[error("the header is not the same size as the records")]
    HeaderMismatch,
    #[error("trying to write to a file that already exists, but append is false")]
    FileExists,
    #[error("the size written to file does not match the payload")]
    BadWriteData,
    #[error("the path provided is not a proper path to a file or directory")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Register the reference kinds with the process registry. Idempotent.
pub fn register_defaults() -> Result<(), RegistryError> {
    let kinds: [(&'static str, registry::ProcessorFactory); 5] = [
        (ReadFile::KIND, ReadFile::boxed as registry::ProcessorFactory),
        (MonitorDirectory::KIND, MonitorDirectory::boxed),
        (ParseCsv::KIND, ParseCsv::boxed),
        (WriteFile::KIND, WriteFile::boxed),
        (Stdout::KIND, Stdout::boxed),
    ];
    for (kind, factory) in kinds {
        if !registry::is_registered(kind) {
            registry::register(kind, factory)?;
        }
    }
    Ok(())
}

pub(crate) fn required_str(props: &PropertyMap, name: &str) -> Result<String, PropertyError> {
    props
        .get(name)
        .ok_or_else(|| PropertyError::NoSuchProperty(name.to_string()))?
        .as_str()
}

pub(crate) fn required_bool(props: &PropertyMap, name: &str) -> Result<bool, PropertyError> {
    props
        .get(name)
        .ok_or_else(|| PropertyError::NoSuchProperty(name.to_string()))?
        .as_bool()
}

pub(crate) fn opt_str(
    props: &PropertyMap,
    name: &str,
    default: &str,
) -> Result<String, PropertyError> {
    match props.get(name) {
        Some(p) if p.is_set() => p.as_str(),
        _ => Ok(default.to_string()),
    }
}

pub(crate) fn opt_bool(
    props: &PropertyMap,
    name: &str,
    default: bool,
) -> Result<bool, PropertyError> {
    match props.get(name) {
        Some(p) if p.is_set() => p.as_bool(),
        _ => Ok(default),
    }
}

pub(crate) fn opt_int(props: &PropertyMap, name: &str, default: i64) -> Result<i64, PropertyError> {
    match props.get(name) {
        Some(p) if p.is_set() => p.as_int(),
        _ => Ok(default),
    }
}
