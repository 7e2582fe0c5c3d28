//! # sidecar-shared
//!
//! Shared foundation for the durable task sidecar: the orchestration domain
//! model (history events, orchestrator actions, failure details, typed
//! property values), the error taxonomy, configuration loading, logging
//! bootstrap, the generated gRPC wire types, and pooled base-64 payload
//! encoding.
//!
//! The dispatcher core lives in `sidecar-dispatcher`; this crate carries
//! everything both the dispatcher and SDK-side tooling need to agree on.

pub mod config;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod models;
pub mod proto;

pub use error::{SidecarError, SidecarResult};
