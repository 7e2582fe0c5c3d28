//! # Orchestrator Actions
//!
//! The actions an orchestrator episode produces, describing what the
//! orchestration should do next. The dispatcher collates these into the
//! completion bundle it commits back to the orchestration service.

use chrono::{DateTime, Utc};

use super::failure::TaskFailureDetails;
use super::history::{HistoryEvent, OrchestrationStatus};

/// One orchestrator action. `id` becomes the event id of the history event
/// the action gives rise to (e.g. the `TaskScheduled` id that the eventual
/// `TaskCompleted` refers back to).
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorAction {
    pub id: i32,
    pub kind: ActionKind,
}

/// Kind-specific payload of an orchestrator action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    ScheduleTask {
        name: String,
        version: Option<String>,
        input: Option<String>,
    },
    CreateSubOrchestration {
        instance_id: String,
        name: String,
        version: Option<String>,
        input: Option<String>,
    },
    CreateTimer {
        fire_at: DateTime<Utc>,
    },
    SendEvent {
        instance_id: String,
        name: String,
        data: Option<String>,
    },
    CompleteOrchestration {
        status: OrchestrationStatus,
        result: Option<String>,
        failure_details: Option<TaskFailureDetails>,
        new_version: Option<String>,
        /// Only raised-event carryovers are supported.
        carryover_events: Vec<HistoryEvent>,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ScheduleTask { .. } => "ScheduleTask",
            ActionKind::CreateSubOrchestration { .. } => "CreateSubOrchestration",
            ActionKind::CreateTimer { .. } => "CreateTimer",
            ActionKind::SendEvent { .. } => "SendEvent",
            ActionKind::CompleteOrchestration { .. } => "CompleteOrchestration",
        }
    }

    /// Whether this action ends the current execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::CompleteOrchestration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_action_classification() {
        let complete = ActionKind::CompleteOrchestration {
            status: OrchestrationStatus::Completed,
            result: None,
            failure_details: None,
            new_version: None,
            carryover_events: vec![],
        };
        assert!(complete.is_terminal());

        let schedule = ActionKind::ScheduleTask {
            name: "Add".into(),
            version: None,
            input: None,
        };
        assert!(!schedule.is_terminal());
        assert_eq!(schedule.name(), "ScheduleTask");
    }
}
