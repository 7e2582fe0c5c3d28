//! # Wire Conversions
//!
//! Glue between the domain model and the generated protobuf types. The
//! to-proto direction is total; the from-proto direction fails with
//! `Unsupported` on unknown oneof kinds (an SDK newer than this sidecar)
//! and `Serialization` on structurally invalid messages.

use chrono::{DateTime, Utc};
use prost_types::Timestamp;

use sidecar_shared::models::{
    ActionKind, EventKind, HistoryEvent, OrchestrationInstance, OrchestrationStatus,
    OrchestratorAction, ParentInstanceInfo, PropertyValue, TaskFailureDetails, TraceContext,
};
use sidecar_shared::proto::v1 as pb;
use sidecar_shared::{SidecarError, SidecarResult};

use crate::service::OrchestrationMetadata;

// -- timestamps ---------------------------------------------------------

pub fn datetime_to_timestamp(datetime: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: datetime.timestamp(),
        nanos: datetime.timestamp_subsec_nanos() as i32,
    }
}

pub fn timestamp_to_datetime(timestamp: &Timestamp) -> SidecarResult<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.seconds, timestamp.nanos as u32).ok_or_else(|| {
        SidecarError::Serialization(format!(
            "timestamp out of range: {}s {}ns",
            timestamp.seconds, timestamp.nanos
        ))
    })
}

fn optional_datetime(timestamp: &Option<Timestamp>) -> SidecarResult<Option<DateTime<Utc>>> {
    timestamp.as_ref().map(timestamp_to_datetime).transpose()
}

fn required_datetime(
    timestamp: &Option<Timestamp>,
    context: &str,
) -> SidecarResult<DateTime<Utc>> {
    match timestamp {
        Some(ts) => timestamp_to_datetime(ts),
        None => Err(SidecarError::Serialization(format!(
            "{context} is missing its timestamp"
        ))),
    }
}

// -- orchestration status -----------------------------------------------

pub fn status_to_proto(status: OrchestrationStatus) -> pb::OrchestrationStatus {
    match status {
        OrchestrationStatus::Running => pb::OrchestrationStatus::Running,
        OrchestrationStatus::Completed => pb::OrchestrationStatus::Completed,
        OrchestrationStatus::ContinuedAsNew => pb::OrchestrationStatus::ContinuedAsNew,
        OrchestrationStatus::Failed => pb::OrchestrationStatus::Failed,
        OrchestrationStatus::Canceled => pb::OrchestrationStatus::Canceled,
        OrchestrationStatus::Terminated => pb::OrchestrationStatus::Terminated,
        OrchestrationStatus::Pending => pb::OrchestrationStatus::Pending,
        OrchestrationStatus::Suspended => pb::OrchestrationStatus::Suspended,
    }
}

pub fn status_from_proto(value: i32) -> SidecarResult<OrchestrationStatus> {
    let status = pb::OrchestrationStatus::try_from(value)
        .map_err(|_| SidecarError::Unsupported(format!("unknown orchestration status {value}")))?;
    match status {
        pb::OrchestrationStatus::Running => Ok(OrchestrationStatus::Running),
        pb::OrchestrationStatus::Completed => Ok(OrchestrationStatus::Completed),
        pb::OrchestrationStatus::ContinuedAsNew => Ok(OrchestrationStatus::ContinuedAsNew),
        pb::OrchestrationStatus::Failed => Ok(OrchestrationStatus::Failed),
        pb::OrchestrationStatus::Canceled => Ok(OrchestrationStatus::Canceled),
        pb::OrchestrationStatus::Terminated => Ok(OrchestrationStatus::Terminated),
        pb::OrchestrationStatus::Pending => Ok(OrchestrationStatus::Pending),
        pb::OrchestrationStatus::Suspended => Ok(OrchestrationStatus::Suspended),
        pb::OrchestrationStatus::Unspecified => Err(SidecarError::Unsupported(
            "orchestration status is unspecified".to_string(),
        )),
    }
}

// -- instances and trace context ----------------------------------------

pub fn instance_to_proto(instance: &OrchestrationInstance) -> pb::OrchestrationInstance {
    pb::OrchestrationInstance {
        instance_id: instance.instance_id.clone(),
        execution_id: instance.execution_id.clone(),
    }
}

pub fn instance_from_proto(instance: pb::OrchestrationInstance) -> OrchestrationInstance {
    OrchestrationInstance {
        instance_id: instance.instance_id,
        execution_id: instance.execution_id,
    }
}

pub fn trace_to_proto(trace: &TraceContext) -> pb::TraceContext {
    pb::TraceContext {
        trace_parent: trace.trace_parent.clone(),
        trace_state: trace.trace_state.clone(),
        span_id: trace.span_id.clone(),
        span_start: trace.span_start.map(datetime_to_timestamp),
    }
}

pub fn trace_from_proto(trace: pb::TraceContext) -> SidecarResult<TraceContext> {
    Ok(TraceContext {
        trace_parent: trace.trace_parent,
        trace_state: trace.trace_state,
        span_id: trace.span_id,
        span_start: optional_datetime(&trace.span_start)?,
    })
}

fn optional_trace_to_proto(trace: &Option<TraceContext>) -> Option<pb::TraceContext> {
    trace.as_ref().map(trace_to_proto)
}

fn optional_trace_from_proto(
    trace: Option<pb::TraceContext>,
) -> SidecarResult<Option<TraceContext>> {
    trace.map(trace_from_proto).transpose()
}

// -- typed property values ----------------------------------------------

pub fn property_to_proto(value: &PropertyValue) -> pb::TypedValue {
    let kind = match value {
        PropertyValue::Null => pb::typed_value::Kind::NullValue(true),
        PropertyValue::Bool(b) => pb::typed_value::Kind::BoolValue(*b),
        PropertyValue::Number(n) => pb::typed_value::Kind::NumberValue(*n),
        PropertyValue::String(s) => pb::typed_value::Kind::StringValue(s.clone()),
        // Dates ride as tagged strings; to_tagged_string is total for the
        // date variants.
        PropertyValue::DateTime(_) | PropertyValue::DateTimeOffset(_) => {
            pb::typed_value::Kind::StringValue(value.to_tagged_string().unwrap_or_default())
        }
        PropertyValue::Struct(fields) => pb::typed_value::Kind::StructValue(pb::TypedStruct {
            fields: fields
                .iter()
                .map(|(key, value)| (key.clone(), property_to_proto(value)))
                .collect(),
        }),
        PropertyValue::List(items) => pb::typed_value::Kind::ListValue(pb::TypedList {
            items: items.iter().map(property_to_proto).collect(),
        }),
    };
    pb::TypedValue { kind: Some(kind) }
}

pub fn property_from_proto(value: pb::TypedValue) -> SidecarResult<PropertyValue> {
    match value.kind {
        None => Err(SidecarError::Unsupported(
            "typed value with no kind".to_string(),
        )),
        Some(pb::typed_value::Kind::NullValue(_)) => Ok(PropertyValue::Null),
        Some(pb::typed_value::Kind::BoolValue(b)) => Ok(PropertyValue::Bool(b)),
        Some(pb::typed_value::Kind::NumberValue(n)) => Ok(PropertyValue::Number(n)),
        Some(pb::typed_value::Kind::StringValue(s)) => Ok(PropertyValue::from_wire_string(&s)),
        Some(pb::typed_value::Kind::StructValue(fields)) => Ok(PropertyValue::Struct(
            fields
                .fields
                .into_iter()
                .map(|(key, value)| Ok((key, property_from_proto(value)?)))
                .collect::<SidecarResult<_>>()?,
        )),
        Some(pb::typed_value::Kind::ListValue(items)) => Ok(PropertyValue::List(
            items
                .items
                .into_iter()
                .map(property_from_proto)
                .collect::<SidecarResult<_>>()?,
        )),
    }
}

// -- failure details ----------------------------------------------------

pub fn failure_to_proto(failure: &TaskFailureDetails) -> pb::TaskFailureDetails {
    pb::TaskFailureDetails {
        error_type: failure.error_type.clone(),
        error_message: failure.error_message.clone(),
        stack_trace: failure.stack_trace.clone(),
        inner_failure: failure
            .inner_failure
            .as_ref()
            .map(|inner| Box::new(failure_to_proto(inner))),
        is_non_retriable: failure.is_non_retriable,
        properties: failure
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), property_to_proto(value)))
            .collect(),
    }
}

pub fn failure_from_proto(failure: pb::TaskFailureDetails) -> SidecarResult<TaskFailureDetails> {
    Ok(TaskFailureDetails {
        error_type: failure.error_type,
        error_message: failure.error_message,
        stack_trace: failure.stack_trace,
        inner_failure: failure
            .inner_failure
            .map(|inner| failure_from_proto(*inner))
            .transpose()?
            .map(Box::new),
        is_non_retriable: failure.is_non_retriable,
        properties: failure
            .properties
            .into_iter()
            .map(|(key, value)| Ok((key, property_from_proto(value)?)))
            .collect::<SidecarResult<_>>()?,
    })
}

fn optional_failure_from_proto(
    failure: Option<pb::TaskFailureDetails>,
) -> SidecarResult<Option<TaskFailureDetails>> {
    failure.map(failure_from_proto).transpose()
}

// -- history events -----------------------------------------------------

pub fn event_to_proto(event: &HistoryEvent) -> pb::HistoryEvent {
    let wire_event = match &event.kind {
        EventKind::ExecutionStarted {
            name,
            version,
            input,
            orchestration_instance,
            parent_instance,
            scheduled_start_time,
            trace_context,
        } => pb::history_event::Event::ExecutionStarted(pb::ExecutionStartedEvent {
            name: name.clone(),
            version: version.clone(),
            input: input.clone(),
            orchestration_instance: Some(instance_to_proto(orchestration_instance)),
            parent_instance: parent_instance.as_ref().map(|parent| pb::ParentInstanceInfo {
                orchestration_instance: Some(instance_to_proto(&parent.orchestration_instance)),
                name: parent.name.clone(),
                task_scheduled_id: parent.task_scheduled_id,
            }),
            scheduled_start_time: scheduled_start_time.map(datetime_to_timestamp),
            trace_context: optional_trace_to_proto(trace_context),
        }),
        EventKind::ExecutionCompleted {
            status,
            result,
            failure_details,
        } => pb::history_event::Event::ExecutionCompleted(pb::ExecutionCompletedEvent {
            status: status_to_proto(*status) as i32,
            result: result.clone(),
            failure_details: failure_details.as_ref().map(failure_to_proto),
        }),
        EventKind::ExecutionTerminated { reason, recurse } => {
            pb::history_event::Event::ExecutionTerminated(pb::ExecutionTerminatedEvent {
                reason: reason.clone(),
                recurse: *recurse,
            })
        }
        EventKind::ExecutionSuspended { reason } => {
            pb::history_event::Event::ExecutionSuspended(pb::ExecutionSuspendedEvent {
                reason: reason.clone(),
            })
        }
        EventKind::ExecutionResumed { reason } => {
            pb::history_event::Event::ExecutionResumed(pb::ExecutionResumedEvent {
                reason: reason.clone(),
            })
        }
        EventKind::ContinueAsNew { input } => {
            pb::history_event::Event::ContinueAsNew(pb::ContinueAsNewEvent {
                input: input.clone(),
            })
        }
        EventKind::TaskScheduled {
            name,
            version,
            input,
            trace_context,
        } => pb::history_event::Event::TaskScheduled(pb::TaskScheduledEvent {
            name: name.clone(),
            version: version.clone(),
            input: input.clone(),
            trace_context: optional_trace_to_proto(trace_context),
        }),
        EventKind::TaskCompleted {
            task_scheduled_id,
            result,
        } => pb::history_event::Event::TaskCompleted(pb::TaskCompletedEvent {
            task_scheduled_id: *task_scheduled_id,
            result: result.clone(),
        }),
        EventKind::TaskFailed {
            task_scheduled_id,
            failure_details,
        } => pb::history_event::Event::TaskFailed(pb::TaskFailedEvent {
            task_scheduled_id: *task_scheduled_id,
            failure_details: Some(failure_to_proto(failure_details)),
        }),
        EventKind::SubOrchestrationInstanceCreated {
            instance_id,
            name,
            version,
            input,
            trace_context,
        } => pb::history_event::Event::SubOrchestrationInstanceCreated(
            pb::SubOrchestrationInstanceCreatedEvent {
                instance_id: instance_id.clone(),
                name: name.clone(),
                version: version.clone(),
                input: input.clone(),
                trace_context: optional_trace_to_proto(trace_context),
            },
        ),
        EventKind::SubOrchestrationInstanceCompleted {
            task_scheduled_id,
            result,
        } => pb::history_event::Event::SubOrchestrationInstanceCompleted(
            pb::SubOrchestrationInstanceCompletedEvent {
                task_scheduled_id: *task_scheduled_id,
                result: result.clone(),
            },
        ),
        EventKind::SubOrchestrationInstanceFailed {
            task_scheduled_id,
            failure_details,
        } => pb::history_event::Event::SubOrchestrationInstanceFailed(
            pb::SubOrchestrationInstanceFailedEvent {
                task_scheduled_id: *task_scheduled_id,
                failure_details: Some(failure_to_proto(failure_details)),
            },
        ),
        EventKind::TimerCreated { fire_at } => {
            pb::history_event::Event::TimerCreated(pb::TimerCreatedEvent {
                fire_at: Some(datetime_to_timestamp(*fire_at)),
            })
        }
        EventKind::TimerFired { timer_id, fire_at } => {
            pb::history_event::Event::TimerFired(pb::TimerFiredEvent {
                timer_id: *timer_id,
                fire_at: Some(datetime_to_timestamp(*fire_at)),
            })
        }
        EventKind::EventRaised { name, input } => {
            pb::history_event::Event::EventRaised(pb::EventRaisedEvent {
                name: name.clone(),
                input: input.clone(),
            })
        }
        EventKind::EventSent {
            instance_id,
            name,
            input,
        } => pb::history_event::Event::EventSent(pb::EventSentEvent {
            instance_id: instance_id.clone(),
            name: name.clone(),
            input: input.clone(),
        }),
        EventKind::OrchestratorStarted => {
            pb::history_event::Event::OrchestratorStarted(pb::OrchestratorStartedEvent {})
        }
        EventKind::OrchestratorCompleted => {
            pb::history_event::Event::OrchestratorCompleted(pb::OrchestratorCompletedEvent {})
        }
        EventKind::GenericEvent { data } => {
            pb::history_event::Event::GenericEvent(pb::GenericEvent { data: data.clone() })
        }
        EventKind::HistoryState { runtime_state } => {
            pb::history_event::Event::HistoryState(pb::HistoryStateEvent {
                runtime_state: runtime_state.clone(),
            })
        }
    };

    pb::HistoryEvent {
        event_id: event.event_id,
        timestamp: Some(datetime_to_timestamp(event.timestamp)),
        event: Some(wire_event),
    }
}

pub fn event_from_proto(event: pb::HistoryEvent) -> SidecarResult<HistoryEvent> {
    let timestamp = required_datetime(&event.timestamp, "history event")?;
    let wire_event = event.event.ok_or_else(|| {
        SidecarError::Unsupported(format!(
            "history event {} has an unknown or missing kind",
            event.event_id
        ))
    })?;

    let kind = match wire_event {
        pb::history_event::Event::ExecutionStarted(started) => {
            let orchestration_instance = started
                .orchestration_instance
                .map(instance_from_proto)
                .ok_or_else(|| {
                    SidecarError::Serialization(
                        "ExecutionStarted is missing its orchestration instance".to_string(),
                    )
                })?;
            let parent_instance = started
                .parent_instance
                .map(|parent| {
                    Ok::<_, SidecarError>(ParentInstanceInfo {
                        orchestration_instance: parent
                            .orchestration_instance
                            .map(instance_from_proto)
                            .ok_or_else(|| {
                                SidecarError::Serialization(
                                    "parent instance info is missing its instance".to_string(),
                                )
                            })?,
                        name: parent.name,
                        task_scheduled_id: parent.task_scheduled_id,
                    })
                })
                .transpose()?;
            EventKind::ExecutionStarted {
                name: started.name,
                version: started.version,
                input: started.input,
                orchestration_instance,
                parent_instance,
                scheduled_start_time: optional_datetime(&started.scheduled_start_time)?,
                trace_context: optional_trace_from_proto(started.trace_context)?,
            }
        }
        pb::history_event::Event::ExecutionCompleted(completed) => EventKind::ExecutionCompleted {
            status: status_from_proto(completed.status)?,
            result: completed.result,
            failure_details: optional_failure_from_proto(completed.failure_details)?,
        },
        pb::history_event::Event::ExecutionTerminated(terminated) => {
            EventKind::ExecutionTerminated {
                reason: terminated.reason,
                recurse: terminated.recurse,
            }
        }
        pb::history_event::Event::ExecutionSuspended(suspended) => EventKind::ExecutionSuspended {
            reason: suspended.reason,
        },
        pb::history_event::Event::ExecutionResumed(resumed) => EventKind::ExecutionResumed {
            reason: resumed.reason,
        },
        pb::history_event::Event::ContinueAsNew(continued) => EventKind::ContinueAsNew {
            input: continued.input,
        },
        pb::history_event::Event::TaskScheduled(scheduled) => EventKind::TaskScheduled {
            name: scheduled.name,
            version: scheduled.version,
            input: scheduled.input,
            trace_context: optional_trace_from_proto(scheduled.trace_context)?,
        },
        pb::history_event::Event::TaskCompleted(completed) => EventKind::TaskCompleted {
            task_scheduled_id: completed.task_scheduled_id,
            result: completed.result,
        },
        pb::history_event::Event::TaskFailed(failed) => EventKind::TaskFailed {
            task_scheduled_id: failed.task_scheduled_id,
            failure_details: failed
                .failure_details
                .map(failure_from_proto)
                .transpose()?
                .unwrap_or_default(),
        },
        pb::history_event::Event::SubOrchestrationInstanceCreated(created) => {
            EventKind::SubOrchestrationInstanceCreated {
                instance_id: created.instance_id,
                name: created.name,
                version: created.version,
                input: created.input,
                trace_context: optional_trace_from_proto(created.trace_context)?,
            }
        }
        pb::history_event::Event::SubOrchestrationInstanceCompleted(completed) => {
            EventKind::SubOrchestrationInstanceCompleted {
                task_scheduled_id: completed.task_scheduled_id,
                result: completed.result,
            }
        }
        pb::history_event::Event::SubOrchestrationInstanceFailed(failed) => {
            EventKind::SubOrchestrationInstanceFailed {
                task_scheduled_id: failed.task_scheduled_id,
                failure_details: failed
                    .failure_details
                    .map(failure_from_proto)
                    .transpose()?
                    .unwrap_or_default(),
            }
        }
        pb::history_event::Event::TimerCreated(created) => EventKind::TimerCreated {
            fire_at: required_datetime(&created.fire_at, "TimerCreated")?,
        },
        pb::history_event::Event::TimerFired(fired) => EventKind::TimerFired {
            timer_id: fired.timer_id,
            fire_at: required_datetime(&fired.fire_at, "TimerFired")?,
        },
        pb::history_event::Event::EventRaised(raised) => EventKind::EventRaised {
            name: raised.name,
            input: raised.input,
        },
        pb::history_event::Event::EventSent(sent) => EventKind::EventSent {
            instance_id: sent.instance_id,
            name: sent.name,
            input: sent.input,
        },
        pb::history_event::Event::OrchestratorStarted(_) => EventKind::OrchestratorStarted,
        pb::history_event::Event::OrchestratorCompleted(_) => EventKind::OrchestratorCompleted,
        pb::history_event::Event::GenericEvent(generic) => EventKind::GenericEvent {
            data: generic.data,
        },
        pb::history_event::Event::HistoryState(state) => EventKind::HistoryState {
            runtime_state: state.runtime_state,
        },
    };

    Ok(HistoryEvent {
        event_id: event.event_id,
        timestamp,
        kind,
    })
}

// -- orchestrator actions -----------------------------------------------

pub fn action_to_proto(action: &OrchestratorAction) -> pb::OrchestratorAction {
    let wire_action = match &action.kind {
        ActionKind::ScheduleTask {
            name,
            version,
            input,
        } => pb::orchestrator_action::Action::ScheduleTask(pb::ScheduleTaskAction {
            name: name.clone(),
            version: version.clone(),
            input: input.clone(),
        }),
        ActionKind::CreateSubOrchestration {
            instance_id,
            name,
            version,
            input,
        } => pb::orchestrator_action::Action::CreateSubOrchestration(
            pb::CreateSubOrchestrationAction {
                instance_id: instance_id.clone(),
                name: name.clone(),
                version: version.clone(),
                input: input.clone(),
            },
        ),
        ActionKind::CreateTimer { fire_at } => {
            pb::orchestrator_action::Action::CreateTimer(pb::CreateTimerAction {
                fire_at: Some(datetime_to_timestamp(*fire_at)),
            })
        }
        ActionKind::SendEvent {
            instance_id,
            name,
            data,
        } => pb::orchestrator_action::Action::SendEvent(pb::SendEventAction {
            instance_id: instance_id.clone(),
            name: name.clone(),
            data: data.clone(),
        }),
        ActionKind::CompleteOrchestration {
            status,
            result,
            failure_details,
            new_version,
            carryover_events,
        } => pb::orchestrator_action::Action::CompleteOrchestration(
            pb::CompleteOrchestrationAction {
                orchestration_status: status_to_proto(*status) as i32,
                result: result.clone(),
                failure_details: failure_details.as_ref().map(failure_to_proto),
                new_version: new_version.clone(),
                carryover_events: carryover_events.iter().map(event_to_proto).collect(),
            },
        ),
    };

    pb::OrchestratorAction {
        id: action.id,
        action: Some(wire_action),
    }
}

pub fn action_from_proto(action: pb::OrchestratorAction) -> SidecarResult<OrchestratorAction> {
    let wire_action = action.action.ok_or_else(|| {
        SidecarError::Unsupported(format!(
            "orchestrator action {} has an unknown or missing kind",
            action.id
        ))
    })?;

    let kind = match wire_action {
        pb::orchestrator_action::Action::ScheduleTask(schedule) => ActionKind::ScheduleTask {
            name: schedule.name,
            version: schedule.version,
            input: schedule.input,
        },
        pb::orchestrator_action::Action::CreateSubOrchestration(create) => {
            ActionKind::CreateSubOrchestration {
                instance_id: create.instance_id,
                name: create.name,
                version: create.version,
                input: create.input,
            }
        }
        pb::orchestrator_action::Action::CreateTimer(timer) => ActionKind::CreateTimer {
            fire_at: required_datetime(&timer.fire_at, "CreateTimer")?,
        },
        pb::orchestrator_action::Action::SendEvent(send) => ActionKind::SendEvent {
            instance_id: send.instance_id,
            name: send.name,
            data: send.data,
        },
        pb::orchestrator_action::Action::CompleteOrchestration(complete) => {
            ActionKind::CompleteOrchestration {
                status: status_from_proto(complete.orchestration_status)?,
                result: complete.result,
                failure_details: optional_failure_from_proto(complete.failure_details)?,
                new_version: complete.new_version,
                carryover_events: complete
                    .carryover_events
                    .into_iter()
                    .map(event_from_proto)
                    .collect::<SidecarResult<_>>()?,
            }
        }
    };

    Ok(OrchestratorAction {
        id: action.id,
        kind,
    })
}

// -- management metadata ------------------------------------------------

pub fn metadata_to_proto(metadata: &OrchestrationMetadata) -> pb::OrchestrationState {
    pb::OrchestrationState {
        instance_id: metadata.instance_id.clone(),
        name: metadata.name.clone(),
        version: metadata.version.clone(),
        status: status_to_proto(metadata.status) as i32,
        created_at: Some(datetime_to_timestamp(metadata.created_at)),
        last_updated_at: Some(datetime_to_timestamp(metadata.last_updated_at)),
        input: metadata.input.clone(),
        output: metadata.output.clone(),
        custom_status: metadata.custom_status.clone(),
        failure_details: metadata.failure_details.as_ref().map(failure_to_proto),
    }
}
