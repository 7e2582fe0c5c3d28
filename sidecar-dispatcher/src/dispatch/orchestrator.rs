//! # Orchestrator Dispatcher
//!
//! Concrete handler for orchestrator work items: runs the episode through
//! the task executor, collates the returned actions into the completion
//! bundle, and commits it to the orchestration service. Outbound messages
//! preserve action-list order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sidecar_shared::encoding::encode_message_base64;
use sidecar_shared::models::{
    ActionKind, EventKind, HistoryEvent, OrchestrationInstance, OrchestrationStatus,
    ParentInstanceInfo,
};
use sidecar_shared::proto::v1 as pb;
use sidecar_shared::{SidecarError, SidecarResult};

use crate::dispatch::WorkItemHandler;
use crate::executor::{OrchestratorExecutionResult, TaskExecutor};
use crate::grpc::conversions;
use crate::service::{
    OrchestrationService, OrchestratorCompletion, OrchestratorWorkItem, TaskMessage,
};

/// Dispatch handler for orchestrator work items.
pub struct OrchestratorDispatchHandler {
    service: Arc<dyn OrchestrationService>,
    executor: Arc<dyn TaskExecutor>,
}

impl OrchestratorDispatchHandler {
    pub fn new(service: Arc<dyn OrchestrationService>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { service, executor }
    }
}

impl std::fmt::Debug for OrchestratorDispatchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorDispatchHandler").finish()
    }
}

#[async_trait]
impl WorkItemHandler for OrchestratorDispatchHandler {
    type Item = OrchestratorWorkItem;

    fn name(&self) -> &'static str {
        "orchestrator"
    }

    fn max_concurrency(&self) -> usize {
        self.service.max_concurrent_orchestrator_work_items()
    }

    async fn fetch(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<OrchestratorWorkItem>> {
        self.service
            .lock_next_orchestrator_work_item(timeout, cancel)
            .await
    }

    async fn execute(&self, item: &OrchestratorWorkItem) -> SidecarResult<()> {
        debug!(
            instance_id = %item.instance.instance_id,
            past_events = item.past_events.len(),
            new_events = item.new_events.len(),
            "Executing orchestrator work item"
        );

        let result = self
            .executor
            .execute_orchestrator(&item.instance, &item.past_events, &item.new_events)
            .await?;

        let completion = collate_actions(item, result)?;
        self.service
            .complete_orchestrator_work_item(item, completion)
            .await
    }

    async fn abandon(&self, item: &OrchestratorWorkItem) -> SidecarResult<()> {
        self.service.abandon_orchestrator_work_item(item).await
    }

    async fn renew(&self, item: OrchestratorWorkItem) -> SidecarResult<OrchestratorWorkItem> {
        self.service.renew_orchestrator_work_item(item).await
    }

    fn work_item_id(&self, item: &OrchestratorWorkItem) -> String {
        item.instance.instance_id.clone()
    }

    fn backoff_after_fetch_error(&self, err: &SidecarError) -> Duration {
        self.service.delay_after_fetch_error(err)
    }
}

/// Collate an episode's actions into the completion bundle committed to the
/// orchestration service.
pub(crate) fn collate_actions(
    item: &OrchestratorWorkItem,
    result: OrchestratorExecutionResult,
) -> SidecarResult<OrchestratorCompletion> {
    let mut completion = OrchestratorCompletion {
        runtime_status: OrchestrationStatus::Running,
        new_history: Vec::new(),
        custom_status: result.custom_status,
        outbound_messages: Vec::new(),
        timer_messages: Vec::new(),
        continued_as_new: None,
    };

    for action in result.actions {
        match action.kind {
            ActionKind::ScheduleTask {
                name,
                version,
                input,
            } => {
                let event = HistoryEvent::new(
                    action.id,
                    EventKind::TaskScheduled {
                        name,
                        version,
                        input,
                        trace_context: None,
                    },
                );
                completion.outbound_messages.push(TaskMessage {
                    target: item.instance.clone(),
                    event: event.clone(),
                });
                completion.new_history.push(event);
            }
            ActionKind::CreateSubOrchestration {
                instance_id,
                name,
                version,
                input,
            } => {
                completion.new_history.push(HistoryEvent::new(
                    action.id,
                    EventKind::SubOrchestrationInstanceCreated {
                        instance_id: instance_id.clone(),
                        name: name.clone(),
                        version: version.clone(),
                        input: input.clone(),
                        trace_context: None,
                    },
                ));

                let child = OrchestrationInstance::started(instance_id);
                let parent = ParentInstanceInfo {
                    orchestration_instance: item.instance.clone(),
                    name: item.orchestration_name().map(str::to_owned),
                    task_scheduled_id: action.id,
                };
                completion.outbound_messages.push(TaskMessage {
                    target: child.clone(),
                    event: HistoryEvent::new(
                        -1,
                        EventKind::ExecutionStarted {
                            name,
                            version,
                            input,
                            orchestration_instance: child,
                            parent_instance: Some(parent),
                            scheduled_start_time: None,
                            trace_context: None,
                        },
                    ),
                });
            }
            ActionKind::CreateTimer { fire_at } => {
                completion.new_history.push(HistoryEvent::new(
                    action.id,
                    EventKind::TimerCreated { fire_at },
                ));
                completion.timer_messages.push(TaskMessage {
                    target: item.instance.clone(),
                    event: HistoryEvent::new(
                        -1,
                        EventKind::TimerFired {
                            timer_id: action.id,
                            fire_at,
                        },
                    ),
                });
            }
            ActionKind::SendEvent {
                instance_id,
                name,
                data,
            } => {
                completion.new_history.push(HistoryEvent::new(
                    action.id,
                    EventKind::EventSent {
                        instance_id: instance_id.clone(),
                        name: name.clone(),
                        input: data.clone(),
                    },
                ));
                completion.outbound_messages.push(TaskMessage {
                    target: OrchestrationInstance::new(instance_id, ""),
                    event: HistoryEvent::new(-1, EventKind::EventRaised { name, input: data }),
                });
            }
            ActionKind::CompleteOrchestration {
                status,
                result: output,
                failure_details,
                new_version,
                carryover_events,
            } => {
                if status == OrchestrationStatus::ContinuedAsNew {
                    let next = item.instance.next_execution();
                    let name = item.orchestration_name().unwrap_or_default().to_owned();

                    completion.runtime_status = OrchestrationStatus::ContinuedAsNew;
                    completion.new_history.push(HistoryEvent::new(
                        action.id,
                        EventKind::ContinueAsNew {
                            input: output.clone(),
                        },
                    ));
                    completion.continued_as_new = Some(TaskMessage {
                        target: next.clone(),
                        event: HistoryEvent::new(
                            -1,
                            EventKind::ExecutionStarted {
                                name,
                                version: new_version,
                                input: output,
                                orchestration_instance: next.clone(),
                                parent_instance: None,
                                scheduled_start_time: None,
                                trace_context: None,
                            },
                        ),
                    });

                    for carry in carryover_events {
                        if !matches!(carry.kind, EventKind::EventRaised { .. }) {
                            return Err(SidecarError::Unsupported(format!(
                                "carryover event kind {} is not supported",
                                carry.kind_name()
                            )));
                        }
                        completion.outbound_messages.push(TaskMessage {
                            target: next.clone(),
                            event: carry,
                        });
                    }

                    // Timers created this episode follow the new execution.
                    for timer in &mut completion.timer_messages {
                        timer.target = next.clone();
                    }
                } else {
                    completion.runtime_status = status;
                    completion.new_history.push(HistoryEvent::new(
                        action.id,
                        EventKind::ExecutionCompleted {
                            status,
                            result: output.clone(),
                            failure_details: failure_details.clone(),
                        },
                    ));

                    if status.is_terminal() {
                        completion
                            .new_history
                            .push(state_snapshot_event(item, status, output, failure_details, &completion.custom_status)?);
                    }
                }
            }
        }
    }

    Ok(completion)
}

/// Terminal episodes record a serialized state snapshot in history so the
/// final state survives independently of the metadata row.
fn state_snapshot_event(
    item: &OrchestratorWorkItem,
    status: OrchestrationStatus,
    output: Option<String>,
    failure_details: Option<sidecar_shared::models::TaskFailureDetails>,
    custom_status: &Option<String>,
) -> SidecarResult<HistoryEvent> {
    let snapshot = pb::OrchestrationState {
        instance_id: item.instance.instance_id.clone(),
        name: item.orchestration_name().unwrap_or_default().to_owned(),
        version: None,
        status: conversions::status_to_proto(status) as i32,
        created_at: None,
        last_updated_at: Some(conversions::datetime_to_timestamp(Utc::now())),
        input: None,
        output,
        custom_status: custom_status.clone(),
        failure_details: failure_details.as_ref().map(conversions::failure_to_proto),
    };
    let runtime_state = encode_message_base64(&snapshot)?;
    Ok(HistoryEvent::new(
        -1,
        EventKind::HistoryState { runtime_state },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_shared::models::OrchestratorAction;

    fn work_item(instance_id: &str) -> OrchestratorWorkItem {
        let instance = OrchestrationInstance::started(instance_id);
        OrchestratorWorkItem {
            instance: instance.clone(),
            past_events: vec![HistoryEvent::new(
                -1,
                EventKind::ExecutionStarted {
                    name: "X".into(),
                    version: None,
                    input: None,
                    orchestration_instance: instance,
                    parent_instance: None,
                    scheduled_start_time: None,
                    trace_context: None,
                },
            )],
            new_events: vec![],
        }
    }

    fn execution_result(actions: Vec<OrchestratorAction>) -> OrchestratorExecutionResult {
        OrchestratorExecutionResult {
            actions,
            custom_status: Some("s1".into()),
            trace_context: None,
        }
    }

    #[test]
    fn test_schedule_task_produces_history_and_message_in_order() {
        let item = work_item("abc");
        let actions = vec![
            OrchestratorAction {
                id: 8,
                kind: ActionKind::ScheduleTask {
                    name: "Y".into(),
                    version: None,
                    input: Some("p".into()),
                },
            },
            OrchestratorAction {
                id: 9,
                kind: ActionKind::ScheduleTask {
                    name: "Z".into(),
                    version: None,
                    input: None,
                },
            },
        ];
        let completion = collate_actions(&item, execution_result(actions)).unwrap();

        assert_eq!(completion.runtime_status, OrchestrationStatus::Running);
        assert_eq!(completion.custom_status.as_deref(), Some("s1"));
        assert_eq!(completion.new_history.len(), 2);
        assert_eq!(completion.outbound_messages.len(), 2);
        assert!(completion.timer_messages.is_empty());

        // Action-list order is preserved.
        assert_eq!(completion.outbound_messages[0].event.event_id, 8);
        assert_eq!(completion.outbound_messages[1].event.event_id, 9);
        assert!(matches!(
            &completion.outbound_messages[0].event.kind,
            EventKind::TaskScheduled { name, input, .. }
                if name == "Y" && input.as_deref() == Some("p")
        ));
    }

    #[test]
    fn test_create_timer_goes_to_timer_messages() {
        let item = work_item("abc");
        let fire_at = Utc::now();
        let completion = collate_actions(
            &item,
            execution_result(vec![OrchestratorAction {
                id: 3,
                kind: ActionKind::CreateTimer { fire_at },
            }]),
        )
        .unwrap();

        assert!(completion.outbound_messages.is_empty());
        assert_eq!(completion.timer_messages.len(), 1);
        assert!(matches!(
            completion.timer_messages[0].event.kind,
            EventKind::TimerFired { timer_id: 3, .. }
        ));
    }

    #[test]
    fn test_sub_orchestration_creates_child_execution_started() {
        let item = work_item("parent");
        let completion = collate_actions(
            &item,
            execution_result(vec![OrchestratorAction {
                id: 4,
                kind: ActionKind::CreateSubOrchestration {
                    instance_id: "child".into(),
                    name: "Sub".into(),
                    version: None,
                    input: Some("payload".into()),
                },
            }]),
        )
        .unwrap();

        assert_eq!(completion.outbound_messages.len(), 1);
        let message = &completion.outbound_messages[0];
        assert_eq!(message.target.instance_id, "child");
        let EventKind::ExecutionStarted {
            name,
            parent_instance,
            ..
        } = &message.event.kind
        else {
            panic!("expected ExecutionStarted");
        };
        assert_eq!(name, "Sub");
        let parent = parent_instance.as_ref().unwrap();
        assert_eq!(parent.orchestration_instance.instance_id, "parent");
        assert_eq!(parent.task_scheduled_id, 4);
        assert_eq!(parent.name.as_deref(), Some("X"));
    }

    #[test]
    fn test_completed_orchestration_is_terminal_with_snapshot() {
        let item = work_item("abc");
        let completion = collate_actions(
            &item,
            execution_result(vec![OrchestratorAction {
                id: 10,
                kind: ActionKind::CompleteOrchestration {
                    status: OrchestrationStatus::Completed,
                    result: Some("42".into()),
                    failure_details: None,
                    new_version: None,
                    carryover_events: vec![],
                },
            }]),
        )
        .unwrap();

        assert_eq!(completion.runtime_status, OrchestrationStatus::Completed);
        assert!(matches!(
            &completion.new_history[0].kind,
            EventKind::ExecutionCompleted {
                status: OrchestrationStatus::Completed,
                result,
                ..
            } if result.as_deref() == Some("42")
        ));
        // Terminal episodes append a serialized state snapshot.
        assert!(matches!(
            &completion.new_history[1].kind,
            EventKind::HistoryState { .. }
        ));
    }

    #[test]
    fn test_continue_as_new_spawns_fresh_execution_with_carryovers() {
        let item = work_item("abc");
        let carryover = HistoryEvent::new(
            -1,
            EventKind::EventRaised {
                name: "signal".into(),
                input: Some("v".into()),
            },
        );
        let completion = collate_actions(
            &item,
            execution_result(vec![
                OrchestratorAction {
                    id: 1,
                    kind: ActionKind::CreateTimer {
                        fire_at: Utc::now(),
                    },
                },
                OrchestratorAction {
                    id: 2,
                    kind: ActionKind::CompleteOrchestration {
                        status: OrchestrationStatus::ContinuedAsNew,
                        result: Some("state".into()),
                        failure_details: None,
                        new_version: Some("2.0".into()),
                        carryover_events: vec![carryover],
                    },
                },
            ]),
        )
        .unwrap();

        assert_eq!(
            completion.runtime_status,
            OrchestrationStatus::ContinuedAsNew
        );
        let restart = completion.continued_as_new.as_ref().unwrap();
        assert_eq!(restart.target.instance_id, "abc");
        assert_ne!(restart.target.execution_id, item.instance.execution_id);
        let EventKind::ExecutionStarted { name, version, input, .. } = &restart.event.kind else {
            panic!("expected ExecutionStarted");
        };
        assert_eq!(name, "X");
        assert_eq!(version.as_deref(), Some("2.0"));
        assert_eq!(input.as_deref(), Some("state"));

        // The carryover raised event is addressed to the new execution.
        assert_eq!(completion.outbound_messages.len(), 1);
        assert_eq!(
            completion.outbound_messages[0].target.execution_id,
            restart.target.execution_id
        );
        // Pending timers follow the new execution too.
        assert_eq!(
            completion.timer_messages[0].target.execution_id,
            restart.target.execution_id
        );
    }

    #[test]
    fn test_non_raised_carryover_is_unsupported() {
        let item = work_item("abc");
        let bad_carryover = HistoryEvent::new(
            -1,
            EventKind::TimerFired {
                timer_id: 1,
                fire_at: Utc::now(),
            },
        );
        let err = collate_actions(
            &item,
            execution_result(vec![OrchestratorAction {
                id: 1,
                kind: ActionKind::CompleteOrchestration {
                    status: OrchestrationStatus::ContinuedAsNew,
                    result: None,
                    failure_details: None,
                    new_version: None,
                    carryover_events: vec![bad_carryover],
                },
            }]),
        )
        .unwrap_err();
        assert!(matches!(err, SidecarError::Unsupported(_)));
    }
}
