//! # sidecar-dispatcher
//!
//! The dispatcher core of the durable task sidecar. Mediates between a
//! local orchestration-execution service (which owns history, queues, and
//! leases) and one remote SDK worker (which executes user orchestrator and
//! activity code out of process).
//!
//! ## Architecture
//!
//! ```text
//! OrchestrationService <── dispatchers ──> TaskExecutor (worker bridge)
//!        │                     │                  │
//!   lock/complete        fetch/execute      gRPC stream to the
//!   work items           loop + drain       connected worker
//! ```
//!
//! Work items flow: service → dispatcher fetch → executor dispatch over the
//! single work-item stream → worker reply via unary completion endpoints →
//! pending-correlation future resolves → dispatcher commits the result back
//! to the service.

pub mod chunks;
pub mod correlation;
pub mod dispatch;
pub mod executor;
pub mod grpc;
pub mod history_stream;
pub mod service;
pub mod signal;

pub use signal::TrafficSignal;
