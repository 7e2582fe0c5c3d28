//! # gRPC Bridge
//!
//! The worker-facing service surface (work-item stream, completion
//! endpoints, history stream), the management surface, the shared bridge
//! state, and the model ↔ wire conversion glue.

pub mod conversions;
pub mod management;
pub mod state;
pub mod worker;

pub use management::ManagementApi;
pub use state::BridgeState;
pub use worker::WorkerBridge;
