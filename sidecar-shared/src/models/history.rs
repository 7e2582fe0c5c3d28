//! # History Events
//!
//! The tagged history-event record that flows between the orchestration
//! service, the dispatcher, and the SDK worker. Event ids are assigned
//! monotonically by whoever appends to a history; timestamps are UTC.

use chrono::{DateTime, Utc};

use super::failure::TaskFailureDetails;
use super::instance::OrchestrationInstance;

/// Runtime status of an orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestrationStatus {
    Running,
    Completed,
    ContinuedAsNew,
    Failed,
    Canceled,
    Terminated,
    Pending,
    Suspended,
}

impl OrchestrationStatus {
    /// Whether the orchestration has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Canceled
                | OrchestrationStatus::Terminated
        )
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestrationStatus::Running => "Running",
            OrchestrationStatus::Completed => "Completed",
            OrchestrationStatus::ContinuedAsNew => "ContinuedAsNew",
            OrchestrationStatus::Failed => "Failed",
            OrchestrationStatus::Canceled => "Canceled",
            OrchestrationStatus::Terminated => "Terminated",
            OrchestrationStatus::Pending => "Pending",
            OrchestrationStatus::Suspended => "Suspended",
        };
        f.write_str(name)
    }
}

/// Distributed-trace context carried by several event kinds and by work
/// items dispatched to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceContext {
    pub trace_parent: String,
    pub trace_state: Option<String>,
    pub span_id: String,
    pub span_start: Option<DateTime<Utc>>,
}

/// Link back to the parent orchestration for sub-orchestrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentInstanceInfo {
    pub orchestration_instance: OrchestrationInstance,
    pub name: Option<String>,
    pub task_scheduled_id: i32,
}

/// One history record: a monotonically assigned id, a UTC timestamp, and the
/// kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEvent {
    pub event_id: i32,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl HistoryEvent {
    /// A new event stamped with the current time.
    pub fn new(event_id: i32, kind: EventKind) -> Self {
        Self {
            event_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn with_timestamp(event_id: i32, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            event_id,
            timestamp,
            kind,
        }
    }

    /// Stable name of the event kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Kind-specific payload of a history event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    ExecutionStarted {
        name: String,
        version: Option<String>,
        input: Option<String>,
        orchestration_instance: OrchestrationInstance,
        parent_instance: Option<ParentInstanceInfo>,
        scheduled_start_time: Option<DateTime<Utc>>,
        trace_context: Option<TraceContext>,
    },
    ExecutionCompleted {
        status: OrchestrationStatus,
        result: Option<String>,
        failure_details: Option<TaskFailureDetails>,
    },
    ExecutionTerminated {
        reason: Option<String>,
        recurse: bool,
    },
    ExecutionSuspended {
        reason: Option<String>,
    },
    ExecutionResumed {
        reason: Option<String>,
    },
    ContinueAsNew {
        input: Option<String>,
    },
    TaskScheduled {
        name: String,
        version: Option<String>,
        input: Option<String>,
        trace_context: Option<TraceContext>,
    },
    TaskCompleted {
        task_scheduled_id: i32,
        result: Option<String>,
    },
    TaskFailed {
        task_scheduled_id: i32,
        failure_details: TaskFailureDetails,
    },
    SubOrchestrationInstanceCreated {
        instance_id: String,
        name: String,
        version: Option<String>,
        input: Option<String>,
        trace_context: Option<TraceContext>,
    },
    SubOrchestrationInstanceCompleted {
        task_scheduled_id: i32,
        result: Option<String>,
    },
    SubOrchestrationInstanceFailed {
        task_scheduled_id: i32,
        failure_details: TaskFailureDetails,
    },
    TimerCreated {
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        timer_id: i32,
        fire_at: DateTime<Utc>,
    },
    EventRaised {
        name: String,
        input: Option<String>,
    },
    EventSent {
        instance_id: String,
        name: String,
        input: Option<String>,
    },
    OrchestratorStarted,
    OrchestratorCompleted,
    /// Opaque event payload, base-64 encoded.
    GenericEvent {
        data: String,
    },
    /// Serialized orchestration runtime state snapshot, base-64 encoded.
    HistoryState {
        runtime_state: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted { .. } => "ExecutionStarted",
            EventKind::ExecutionCompleted { .. } => "ExecutionCompleted",
            EventKind::ExecutionTerminated { .. } => "ExecutionTerminated",
            EventKind::ExecutionSuspended { .. } => "ExecutionSuspended",
            EventKind::ExecutionResumed { .. } => "ExecutionResumed",
            EventKind::ContinueAsNew { .. } => "ContinueAsNew",
            EventKind::TaskScheduled { .. } => "TaskScheduled",
            EventKind::TaskCompleted { .. } => "TaskCompleted",
            EventKind::TaskFailed { .. } => "TaskFailed",
            EventKind::SubOrchestrationInstanceCreated { .. } => "SubOrchestrationInstanceCreated",
            EventKind::SubOrchestrationInstanceCompleted { .. } => {
                "SubOrchestrationInstanceCompleted"
            }
            EventKind::SubOrchestrationInstanceFailed { .. } => "SubOrchestrationInstanceFailed",
            EventKind::TimerCreated { .. } => "TimerCreated",
            EventKind::TimerFired { .. } => "TimerFired",
            EventKind::EventRaised { .. } => "EventRaised",
            EventKind::EventSent { .. } => "EventSent",
            EventKind::OrchestratorStarted => "OrchestratorStarted",
            EventKind::OrchestratorCompleted => "OrchestratorCompleted",
            EventKind::GenericEvent { .. } => "GenericEvent",
            EventKind::HistoryState { .. } => "HistoryState",
        }
    }
}
