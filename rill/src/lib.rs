//! Rill — a dataflow engine composing concurrent processors into supervised
//! pub/sub pipelines.
//!
//! This facade crate re-exports the Rill sub-crates through a single
//! dependency with feature flags. Import the common surface with:
//!
//! ```ignore
//! use rill::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature      | Default | Crate              |
//! |--------------|---------|--------------------|
//! | `broker`     | **yes** | `rill-broker`      |
//! | `workflow`   | **yes** | `rill-workflow`    |
//! | `processors` | **yes** | `rill-processors`  |
//! | `prometheus` | no      | `rill-prometheus`  |
//! | `full`       | no      | All of the above   |

pub use rill_core::*;

#[cfg(feature = "broker")]
pub use rill_broker as broker;

#[cfg(feature = "workflow")]
pub use rill_workflow as workflow;

#[cfg(feature = "processors")]
pub use rill_processors as processors;

#[cfg(feature = "prometheus")]
pub use rill_prometheus as prometheus;

pub mod prelude {
    //! Re-exports of the most commonly used types.

    pub use rill_core::failure::{FailureEnvelope, FailureReceiver};
    pub use rill_core::metric::{MetricProvider, Metrics};
    pub use rill_core::payload::{BasePayload, Payload, PayloadRef};
    pub use rill_core::processor::{Processor, ProcessorBase, WorkerContext};
    pub use rill_core::property::{PropertyMap, PropertyValue};
    pub use rill_core::registry;

    #[cfg(feature = "broker")]
    pub use rill_broker::{Broker, DeliveryPolicy};

    #[cfg(feature = "workflow")]
    pub use rill_workflow::{Workflow, WorkflowDescriptor, WorkflowState};

    #[cfg(feature = "processors")]
    pub use rill_processors::register_defaults;
}
