//! # Orchestration Service Contract
//!
//! The persistent orchestration-execution service is an external
//! collaborator: it owns history, message queues, and work-item leases.
//! The dispatcher core only depends on this contract. An in-process
//! implementation for tests and local runs lives in [`in_memory`].

pub mod in_memory;

pub use in_memory::InMemoryOrchestrationService;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use sidecar_shared::models::{
    HistoryEvent, OrchestrationInstance, OrchestrationStatus, TaskFailureDetails,
};
use sidecar_shared::{SidecarError, SidecarResult};

/// A leased orchestrator episode: the instance, its persisted past events,
/// and the new events that triggered this episode.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorWorkItem {
    pub instance: OrchestrationInstance,
    pub past_events: Vec<HistoryEvent>,
    pub new_events: Vec<HistoryEvent>,
}

impl OrchestratorWorkItem {
    /// The orchestration's registered name, taken from the
    /// `ExecutionStarted` event in past or new events.
    pub fn orchestration_name(&self) -> Option<&str> {
        self.past_events
            .iter()
            .chain(self.new_events.iter())
            .find_map(|event| match &event.kind {
                sidecar_shared::models::EventKind::ExecutionStarted { name, .. } => {
                    Some(name.as_str())
                }
                _ => None,
            })
    }
}

/// A leased activity invocation, described by its `TaskScheduled` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityWorkItem {
    pub instance: OrchestrationInstance,
    pub scheduled_event: HistoryEvent,
}

/// A history event addressed to an orchestration instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    pub target: OrchestrationInstance,
    pub event: HistoryEvent,
}

/// The completion bundle for one orchestrator episode. The service persists
/// the new history and enqueues the outbound messages atomically, then
/// releases the lease.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorCompletion {
    /// Runtime status after this episode.
    pub runtime_status: OrchestrationStatus,
    /// History events to append, in order.
    pub new_history: Vec<HistoryEvent>,
    /// Custom status string reported by the worker.
    pub custom_status: Option<String>,
    /// One message per non-terminal action, in action-list order.
    pub outbound_messages: Vec<TaskMessage>,
    /// Timer messages to deliver at their fire time.
    pub timer_messages: Vec<TaskMessage>,
    /// The `ExecutionStarted` message for a continue-as-new restart.
    pub continued_as_new: Option<TaskMessage>,
}

/// Request to start a new orchestration instance.
#[derive(Debug, Clone)]
pub struct NewInstanceRequest {
    pub instance: OrchestrationInstance,
    pub name: String,
    pub version: Option<String>,
    pub input: Option<String>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
}

/// Queryable state of an orchestration instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationMetadata {
    pub instance_id: String,
    pub name: String,
    pub version: Option<String>,
    pub status: OrchestrationStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub custom_status: Option<String>,
    pub failure_details: Option<TaskFailureDetails>,
}

/// Filter for instance queries.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    pub statuses: Vec<OrchestrationStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub name_prefix: Option<String>,
    pub page_size: Option<u32>,
}

/// Filter for purging completed instances.
#[derive(Debug, Clone, Default)]
pub struct PurgeFilter {
    pub statuses: Vec<OrchestrationStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

/// Contract the dispatcher core and the management surface program against.
///
/// Lease semantics, storage, and delivery timing are the implementation's
/// concern; the core only assumes that completing a work item atomically
/// persists history, enqueues downstream messages, and releases the lease.
#[async_trait]
pub trait OrchestrationService: Send + Sync + 'static {
    // -- work item dispatch ---------------------------------------------

    /// Long-poll the next orchestrator work item, bounded by `timeout` and
    /// `cancel`. Returns `Ok(None)` when the poll elapses without work and
    /// `Err(SidecarError::Shutdown)` when cancelled.
    async fn lock_next_orchestrator_work_item(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<OrchestratorWorkItem>>;

    async fn lock_next_activity_work_item(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<ActivityWorkItem>>;

    /// Extend the lease on a held work item.
    async fn renew_orchestrator_work_item(
        &self,
        item: OrchestratorWorkItem,
    ) -> SidecarResult<OrchestratorWorkItem>;

    async fn renew_activity_work_item(
        &self,
        item: ActivityWorkItem,
    ) -> SidecarResult<ActivityWorkItem>;

    /// Return a work item unprocessed; the service re-delivers it later.
    async fn abandon_orchestrator_work_item(&self, item: &OrchestratorWorkItem)
        -> SidecarResult<()>;

    async fn abandon_activity_work_item(&self, item: &ActivityWorkItem) -> SidecarResult<()>;

    /// Atomically persist an episode's results and release the lease.
    async fn complete_orchestrator_work_item(
        &self,
        item: &OrchestratorWorkItem,
        completion: OrchestratorCompletion,
    ) -> SidecarResult<()>;

    /// Submit an activity's response message to its source orchestration
    /// and release the lease.
    async fn complete_activity_work_item(
        &self,
        item: &ActivityWorkItem,
        response: TaskMessage,
    ) -> SidecarResult<()>;

    /// Concurrency bound for orchestrator work items.
    fn max_concurrent_orchestrator_work_items(&self) -> usize;

    /// Concurrency bound for activity work items.
    fn max_concurrent_activity_work_items(&self) -> usize;

    /// Backoff the dispatcher should apply after a fetch error.
    fn delay_after_fetch_error(&self, err: &SidecarError) -> Duration;

    // -- management -----------------------------------------------------

    async fn create_task_hub(&self, recreate_if_exists: bool) -> SidecarResult<()>;

    async fn delete_task_hub(&self) -> SidecarResult<()>;

    /// Create and schedule a new orchestration instance.
    async fn create_instance(&self, request: NewInstanceRequest) -> SidecarResult<()>;

    /// Deliver an event-bearing message to an orchestration.
    async fn send_task_message(&self, message: TaskMessage) -> SidecarResult<()>;

    /// Terminate an instance regardless of its pending work.
    async fn force_terminate(
        &self,
        instance_id: &str,
        reason: Option<String>,
        recurse: bool,
    ) -> SidecarResult<()>;

    async fn get_instance(&self, instance_id: &str)
        -> SidecarResult<Option<OrchestrationMetadata>>;

    /// Block until the instance has left the pending state.
    async fn wait_for_instance_start(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> SidecarResult<OrchestrationMetadata>;

    /// Block until the instance reaches a terminal status.
    async fn wait_for_instance_completion(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> SidecarResult<OrchestrationMetadata>;

    async fn query_instances(
        &self,
        query: InstanceQuery,
    ) -> SidecarResult<Vec<OrchestrationMetadata>>;

    /// Remove terminal instances matching the filter; returns the count.
    async fn purge_instances(&self, filter: PurgeFilter) -> SidecarResult<u32>;
}
