//! # Task Executor Contract
//!
//! The interface dispatchers use to run a work item on the connected
//! worker. The gRPC bridge implements it: dispatching writes one work item
//! to the worker stream and awaits the correlated reply.

use async_trait::async_trait;

use sidecar_shared::models::{
    HistoryEvent, OrchestrationInstance, OrchestratorAction, TraceContext,
};
use sidecar_shared::SidecarResult;

/// Outcome of one orchestrator episode: the actions the worker produced,
/// the custom status, and optional orchestration-span metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrchestratorExecutionResult {
    pub actions: Vec<OrchestratorAction>,
    pub custom_status: Option<String>,
    pub trace_context: Option<TraceContext>,
}

/// Outcome of one activity execution: a `TaskCompleted` or `TaskFailed`
/// history event addressed back to the source orchestration.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityExecutionResult {
    pub response_event: HistoryEvent,
}

/// Executes work items on the connected worker.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one orchestrator episode: replay `past_events`, deliver
    /// `new_events`, and return the worker's actions.
    async fn execute_orchestrator(
        &self,
        instance: &OrchestrationInstance,
        past_events: &[HistoryEvent],
        new_events: &[HistoryEvent],
    ) -> SidecarResult<OrchestratorExecutionResult>;

    /// Run one activity described by its `TaskScheduled` event.
    async fn execute_activity(
        &self,
        instance: &OrchestrationInstance,
        scheduled_event: &HistoryEvent,
    ) -> SidecarResult<ActivityExecutionResult>;
}
