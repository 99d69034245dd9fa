//! Serialized workflow descriptions.
//!
//! A workflow can be described by names alone: an ordered list of
//! `{id, kind, properties, subscribes_to, publishes_to}` entries resolved
//! through the process registry. This is the form pipelines are stored and
//! exchanged in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use rill_core::property::PropertyValue;
use rill_core::registry;

use crate::{Workflow, WorkflowError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub id: String,
    pub processors: Vec<ProcessorDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorDescriptor {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub properties: IndexMap<String, PropertyValue>,
    #[serde(default)]
    pub subscribes_to: Option<String>,
    #[serde(default)]
    pub publishes_to: Option<String>,
}

impl Workflow {
    /// Build a workflow from its serialized description.
    ///
    /// # Errors
    ///
    /// `UnknownKind` for unregistered kinds, property errors for values the
    /// named processor does not declare or accept, `DuplicateProcessor` for
    /// repeated ids.
    pub fn from_descriptor(descriptor: &WorkflowDescriptor) -> Result<Workflow, WorkflowError> {
        let mut workflow = Workflow::new(descriptor.id.clone());
        for proc in &descriptor.processors {
            let mut processor = registry::build(&proc.kind)?;
            processor.set_name(&proc.id);
            for (name, value) in &proc.properties {
                processor.properties_mut().set(name, value.clone())?;
            }
            workflow.add_processor(
                processor,
                proc.subscribes_to.as_deref(),
                proc.publishes_to.as_deref(),
            )?;
        }
        Ok(workflow)
    }
}
