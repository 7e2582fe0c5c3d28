//! # Orchestration Domain Model
//!
//! In-process representation of orchestration instances, history events,
//! orchestrator actions, failure details, and typed property values. The
//! wire representation (generated protobuf types) lives in [`crate::proto`];
//! the conversion glue between the two belongs to the dispatcher crate.

pub mod actions;
pub mod failure;
pub mod history;
pub mod instance;
pub mod values;

pub use actions::{ActionKind, OrchestratorAction};
pub use failure::TaskFailureDetails;
pub use history::{
    EventKind, HistoryEvent, OrchestrationStatus, ParentInstanceInfo, TraceContext,
};
pub use instance::OrchestrationInstance;
pub use values::PropertyValue;
