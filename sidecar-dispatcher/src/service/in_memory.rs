//! # In-Memory Orchestration Service
//!
//! A complete in-process implementation of [`OrchestrationService`] backing
//! the integration tests and local single-process runs. History lives in a
//! concurrent map, pending events in a FIFO; fetches long-poll on a
//! `Notify`. There are no real leases: one dispatcher per work-item type is
//! the single owner, which matches how the sidecar drives it.
//!
//! Timer messages fire immediately here. Anything that needs real delivery
//! timing belongs to a durable backend, not this crate.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sidecar_shared::models::{
    EventKind, HistoryEvent, OrchestrationInstance, OrchestrationStatus,
};
use sidecar_shared::{SidecarError, SidecarResult};

use super::{
    ActivityWorkItem, InstanceQuery, NewInstanceRequest, OrchestrationMetadata,
    OrchestrationService, OrchestratorCompletion, OrchestratorWorkItem, PurgeFilter, TaskMessage,
};

const DEFAULT_MAX_CONCURRENT_ORCHESTRATORS: usize = 100;
const DEFAULT_MAX_CONCURRENT_ACTIVITIES: usize = 100;
const DEFAULT_FETCH_ERROR_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct InstanceRecord {
    instance: OrchestrationInstance,
    metadata: OrchestrationMetadata,
    history: Vec<HistoryEvent>,
}

/// In-process orchestration service.
#[derive(Debug)]
pub struct InMemoryOrchestrationService {
    /// Events awaiting an orchestrator episode, FIFO across instances.
    pending_events: Mutex<VecDeque<(String, HistoryEvent)>>,
    /// Instances with an outstanding orchestrator work item. At most one
    /// episode per instance is in flight, the in-process stand-in for the
    /// lease discipline of a durable backend.
    locked_instances: Mutex<HashSet<String>>,
    activity_queue: Mutex<VecDeque<ActivityWorkItem>>,
    orchestrator_notify: Notify,
    activity_notify: Notify,
    instances: DashMap<String, InstanceRecord>,
    /// Wakes `wait_for_instance_*` pollers on any state change.
    state_notify: Notify,
    max_orchestrators: usize,
    max_activities: usize,
    fetch_error_delay: Duration,
}

impl Default for InMemoryOrchestrationService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrchestrationService {
    pub fn new() -> Self {
        Self {
            pending_events: Mutex::new(VecDeque::new()),
            locked_instances: Mutex::new(HashSet::new()),
            activity_queue: Mutex::new(VecDeque::new()),
            orchestrator_notify: Notify::new(),
            activity_notify: Notify::new(),
            instances: DashMap::new(),
            state_notify: Notify::new(),
            max_orchestrators: DEFAULT_MAX_CONCURRENT_ORCHESTRATORS,
            max_activities: DEFAULT_MAX_CONCURRENT_ACTIVITIES,
            fetch_error_delay: DEFAULT_FETCH_ERROR_DELAY,
        }
    }

    pub fn with_concurrency_limits(mut self, orchestrators: usize, activities: usize) -> Self {
        self.max_orchestrators = orchestrators;
        self.max_activities = activities;
        self
    }

    pub fn with_fetch_error_delay(mut self, delay: Duration) -> Self {
        self.fetch_error_delay = delay;
        self
    }

    /// Number of events waiting for an orchestrator episode.
    pub fn pending_event_count(&self) -> usize {
        self.pending_events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of queued activity work items.
    pub fn queued_activity_count(&self) -> usize {
        self.activity_queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn enqueue_orchestrator_event(&self, instance_id: &str, event: HistoryEvent) {
        self.pending_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((instance_id.to_owned(), event));
        self.orchestrator_notify.notify_one();
    }

    /// Pop the next episode: the oldest pending event for an instance with
    /// no outstanding work item, plus every other pending event for the
    /// same instance, batched in arrival order. The instance stays locked
    /// until its work item is completed or abandoned.
    fn pop_orchestrator_work_item(&self) -> Option<OrchestratorWorkItem> {
        loop {
            let (instance_id, new_events) = {
                let mut locked = self
                    .locked_instances
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let mut queue = self.pending_events.lock().unwrap_or_else(|e| e.into_inner());

                let position = queue.iter().position(|(id, _)| !locked.contains(id))?;
                let instance_id = queue[position].0.clone();

                let mut new_events = Vec::new();
                let mut rest = VecDeque::with_capacity(queue.len());
                while let Some((id, event)) = queue.pop_front() {
                    if id == instance_id {
                        new_events.push(event);
                    } else {
                        rest.push_back((id, event));
                    }
                }
                *queue = rest;
                locked.insert(instance_id.clone());
                (instance_id, new_events)
            };

            match self.instances.get(&instance_id) {
                Some(record) => {
                    return Some(OrchestratorWorkItem {
                        instance: record.instance.clone(),
                        past_events: record.history.clone(),
                        new_events,
                    });
                }
                None => {
                    // Instance purged while its events were queued.
                    debug!(instance_id, "Dropping events for unknown instance");
                    self.unlock_instance(&instance_id);
                    continue;
                }
            }
        }
    }

    /// Release the episode lock and wake the fetcher: pending events for
    /// the instance may have queued up while it was locked.
    fn unlock_instance(&self, instance_id: &str) {
        self.locked_instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(instance_id);
        self.orchestrator_notify.notify_one();
    }

    fn pop_activity_work_item(&self) -> Option<ActivityWorkItem> {
        self.activity_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Deliver one task message to its destination queue, creating instance
    /// records for `ExecutionStarted` messages.
    fn route_message(&self, message: TaskMessage) -> SidecarResult<()> {
        match &message.event.kind {
            EventKind::TaskScheduled { .. } => {
                self.activity_queue
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(ActivityWorkItem {
                        instance: message.target,
                        scheduled_event: message.event,
                    });
                self.activity_notify.notify_one();
            }
            EventKind::ExecutionStarted {
                name,
                version,
                input,
                orchestration_instance,
                ..
            } => {
                let now = Utc::now();
                let record = InstanceRecord {
                    instance: orchestration_instance.clone(),
                    metadata: OrchestrationMetadata {
                        instance_id: orchestration_instance.instance_id.clone(),
                        name: name.clone(),
                        version: version.clone(),
                        status: OrchestrationStatus::Pending,
                        created_at: now,
                        last_updated_at: now,
                        input: input.clone(),
                        output: None,
                        custom_status: None,
                        failure_details: None,
                    },
                    // A new execution starts from an empty history.
                    history: Vec::new(),
                };
                let instance_id = orchestration_instance.instance_id.clone();
                self.instances.insert(instance_id.clone(), record);
                self.enqueue_orchestrator_event(&instance_id, message.event);
                self.state_notify.notify_waiters();
            }
            _ => {
                if !self.instances.contains_key(&message.target.instance_id) {
                    return Err(SidecarError::NotFound(format!(
                        "instance {} does not exist",
                        message.target.instance_id
                    )));
                }
                self.enqueue_orchestrator_event(&message.target.instance_id, message.event);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrchestrationService for InMemoryOrchestrationService {
    async fn lock_next_orchestrator_work_item(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<OrchestratorWorkItem>> {
        let poll = async {
            loop {
                let notified = self.orchestrator_notify.notified();
                if let Some(item) = self.pop_orchestrator_work_item() {
                    return item;
                }
                notified.await;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, poll) => Ok(result.ok()),
            _ = cancel.cancelled() => Err(SidecarError::Shutdown),
        }
    }

    async fn lock_next_activity_work_item(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<ActivityWorkItem>> {
        let poll = async {
            loop {
                let notified = self.activity_notify.notified();
                if let Some(item) = self.pop_activity_work_item() {
                    return item;
                }
                notified.await;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, poll) => Ok(result.ok()),
            _ = cancel.cancelled() => Err(SidecarError::Shutdown),
        }
    }

    async fn renew_orchestrator_work_item(
        &self,
        item: OrchestratorWorkItem,
    ) -> SidecarResult<OrchestratorWorkItem> {
        // No leases to extend in process.
        Ok(item)
    }

    async fn renew_activity_work_item(
        &self,
        item: ActivityWorkItem,
    ) -> SidecarResult<ActivityWorkItem> {
        Ok(item)
    }

    async fn abandon_orchestrator_work_item(
        &self,
        item: &OrchestratorWorkItem,
    ) -> SidecarResult<()> {
        // Requeue the undelivered events at the front, preserving order.
        let mut queue = self.pending_events.lock().unwrap_or_else(|e| e.into_inner());
        for event in item.new_events.iter().rev() {
            queue.push_front((item.instance.instance_id.clone(), event.clone()));
        }
        drop(queue);
        self.unlock_instance(&item.instance.instance_id);
        Ok(())
    }

    async fn abandon_activity_work_item(&self, item: &ActivityWorkItem) -> SidecarResult<()> {
        self.activity_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_front(item.clone());
        self.activity_notify.notify_one();
        Ok(())
    }

    async fn complete_orchestrator_work_item(
        &self,
        item: &OrchestratorWorkItem,
        completion: OrchestratorCompletion,
    ) -> SidecarResult<()> {
        {
            let mut record = self.instances.get_mut(&item.instance.instance_id).ok_or_else(
                || {
                    SidecarError::NotFound(format!(
                        "instance {} does not exist",
                        item.instance.instance_id
                    ))
                },
            )?;

            record.history.extend(item.new_events.iter().cloned());
            record.history.extend(completion.new_history.iter().cloned());
            record.metadata.status = completion.runtime_status;
            record.metadata.custom_status = completion.custom_status.clone();
            record.metadata.last_updated_at = Utc::now();

            for event in &completion.new_history {
                if let EventKind::ExecutionCompleted {
                    result,
                    failure_details,
                    ..
                } = &event.kind
                {
                    record.metadata.output = result.clone();
                    record.metadata.failure_details = failure_details.clone();
                }
            }
        }

        for message in completion.outbound_messages {
            self.route_message(message)?;
        }
        // Timers fire immediately in process.
        for message in completion.timer_messages {
            self.route_message(message)?;
        }
        if let Some(message) = completion.continued_as_new {
            self.route_message(message)?;
        }

        self.unlock_instance(&item.instance.instance_id);
        self.state_notify.notify_waiters();
        Ok(())
    }

    async fn complete_activity_work_item(
        &self,
        _item: &ActivityWorkItem,
        response: TaskMessage,
    ) -> SidecarResult<()> {
        self.route_message(response)?;
        self.state_notify.notify_waiters();
        Ok(())
    }

    fn max_concurrent_orchestrator_work_items(&self) -> usize {
        self.max_orchestrators
    }

    fn max_concurrent_activity_work_items(&self) -> usize {
        self.max_activities
    }

    fn delay_after_fetch_error(&self, _err: &SidecarError) -> Duration {
        self.fetch_error_delay
    }

    async fn create_task_hub(&self, recreate_if_exists: bool) -> SidecarResult<()> {
        if recreate_if_exists {
            self.delete_task_hub().await?;
        }
        Ok(())
    }

    async fn delete_task_hub(&self) -> SidecarResult<()> {
        self.instances.clear();
        self.pending_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.locked_instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.activity_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.state_notify.notify_waiters();
        Ok(())
    }

    async fn create_instance(&self, request: NewInstanceRequest) -> SidecarResult<()> {
        if let Some(existing) = self.instances.get(&request.instance.instance_id) {
            if !existing.metadata.status.is_terminal() {
                return Err(SidecarError::Service(format!(
                    "instance {} already exists with status {}",
                    request.instance.instance_id, existing.metadata.status
                )));
            }
        }

        let event = HistoryEvent::new(
            -1,
            EventKind::ExecutionStarted {
                name: request.name,
                version: request.version,
                input: request.input,
                orchestration_instance: request.instance.clone(),
                parent_instance: None,
                scheduled_start_time: request.scheduled_start_time,
                trace_context: None,
            },
        );
        self.route_message(TaskMessage {
            target: request.instance,
            event,
        })
    }

    async fn send_task_message(&self, message: TaskMessage) -> SidecarResult<()> {
        self.route_message(message)
    }

    async fn force_terminate(
        &self,
        instance_id: &str,
        reason: Option<String>,
        recurse: bool,
    ) -> SidecarResult<()> {
        if recurse {
            // Parent/child links are not tracked in process.
            warn!(instance_id, "Recursive terminate requested; terminating the root only");
        }

        let mut record = self.instances.get_mut(instance_id).ok_or_else(|| {
            SidecarError::NotFound(format!("instance {instance_id} does not exist"))
        })?;

        let event_id = record.history.len() as i32;
        record.history.push(HistoryEvent::new(
            event_id,
            EventKind::ExecutionTerminated {
                reason: reason.clone(),
                recurse,
            },
        ));
        record.metadata.status = OrchestrationStatus::Terminated;
        record.metadata.output = reason;
        record.metadata.last_updated_at = Utc::now();
        drop(record);

        // Drop undelivered events for the terminated instance.
        self.pending_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _)| id != instance_id);

        self.state_notify.notify_waiters();
        Ok(())
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> SidecarResult<Option<OrchestrationMetadata>> {
        Ok(self
            .instances
            .get(instance_id)
            .map(|record| record.metadata.clone()))
    }

    async fn wait_for_instance_start(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> SidecarResult<OrchestrationMetadata> {
        loop {
            let notified = self.state_notify.notified();
            if let Some(record) = self.instances.get(instance_id) {
                if record.metadata.status != OrchestrationStatus::Pending {
                    return Ok(record.metadata.clone());
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(SidecarError::Shutdown),
            }
        }
    }

    async fn wait_for_instance_completion(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> SidecarResult<OrchestrationMetadata> {
        loop {
            let notified = self.state_notify.notified();
            if let Some(record) = self.instances.get(instance_id) {
                if record.metadata.status.is_terminal() {
                    return Ok(record.metadata.clone());
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(SidecarError::Shutdown),
            }
        }
    }

    async fn query_instances(
        &self,
        query: InstanceQuery,
    ) -> SidecarResult<Vec<OrchestrationMetadata>> {
        let mut matches: Vec<OrchestrationMetadata> = self
            .instances
            .iter()
            .filter(|record| {
                let meta = &record.metadata;
                (query.statuses.is_empty() || query.statuses.contains(&meta.status))
                    && query.created_from.is_none_or(|from| meta.created_at >= from)
                    && query.created_to.is_none_or(|to| meta.created_at <= to)
                    && query
                        .name_prefix
                        .as_deref()
                        .is_none_or(|prefix| meta.name.starts_with(prefix))
            })
            .map(|record| record.metadata.clone())
            .collect();

        matches.sort_by_key(|meta| meta.created_at);
        if let Some(page_size) = query.page_size {
            matches.truncate(page_size as usize);
        }
        Ok(matches)
    }

    async fn purge_instances(&self, filter: PurgeFilter) -> SidecarResult<u32> {
        let to_purge: Vec<String> = self
            .instances
            .iter()
            .filter(|record| {
                let meta = &record.metadata;
                meta.status.is_terminal()
                    && (filter.statuses.is_empty() || filter.statuses.contains(&meta.status))
                    && filter.created_from.is_none_or(|from| meta.created_at >= from)
                    && filter.created_to.is_none_or(|to| meta.created_at <= to)
            })
            .map(|record| record.key().clone())
            .collect();

        let mut purged = 0;
        for instance_id in to_purge {
            if self.instances.remove(&instance_id).is_some() {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_request(instance_id: &str, name: &str) -> NewInstanceRequest {
        NewInstanceRequest {
            instance: OrchestrationInstance::started(instance_id),
            name: name.into(),
            version: None,
            input: Some("in".into()),
            scheduled_start_time: None,
        }
    }

    #[tokio::test]
    async fn test_create_instance_enqueues_execution_started() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("abc", "X")).await.unwrap();

        let cancel = CancellationToken::new();
        let item = service
            .lock_next_orchestrator_work_item(Duration::from_millis(100), &cancel)
            .await
            .unwrap()
            .expect("work item");
        assert_eq!(item.instance.instance_id, "abc");
        assert!(item.past_events.is_empty());
        assert_eq!(item.new_events.len(), 1);
        assert!(matches!(
            item.new_events[0].kind,
            EventKind::ExecutionStarted { .. }
        ));
        assert_eq!(item.orchestration_name(), Some("X"));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected_while_running() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("abc", "X")).await.unwrap();
        let err = service
            .create_instance(start_request("abc", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, SidecarError::Service(_)));
    }

    #[tokio::test]
    async fn test_completion_routes_task_scheduled_to_activity_queue() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("abc", "X")).await.unwrap();
        let cancel = CancellationToken::new();
        let item = service
            .lock_next_orchestrator_work_item(Duration::from_millis(100), &cancel)
            .await
            .unwrap()
            .unwrap();

        let scheduled = HistoryEvent::new(
            8,
            EventKind::TaskScheduled {
                name: "Y".into(),
                version: None,
                input: Some("p".into()),
                trace_context: None,
            },
        );
        let completion = OrchestratorCompletion {
            runtime_status: OrchestrationStatus::Running,
            new_history: vec![scheduled.clone()],
            custom_status: Some("s1".into()),
            outbound_messages: vec![TaskMessage {
                target: item.instance.clone(),
                event: scheduled,
            }],
            timer_messages: vec![],
            continued_as_new: None,
        };
        service
            .complete_orchestrator_work_item(&item, completion)
            .await
            .unwrap();

        let activity = service
            .lock_next_activity_work_item(Duration::from_millis(100), &cancel)
            .await
            .unwrap()
            .expect("activity work item");
        assert_eq!(activity.instance.instance_id, "abc");
        assert!(matches!(
            activity.scheduled_event.kind,
            EventKind::TaskScheduled { .. }
        ));

        let meta = service.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(meta.status, OrchestrationStatus::Running);
        assert_eq!(meta.custom_status.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_activity_completion_feeds_next_episode() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("xyz", "X")).await.unwrap();
        let cancel = CancellationToken::new();
        let item = service
            .lock_next_orchestrator_work_item(Duration::from_millis(100), &cancel)
            .await
            .unwrap()
            .unwrap();
        // Commit the first episode so history is persisted.
        service
            .complete_orchestrator_work_item(
                &item,
                OrchestratorCompletion {
                    runtime_status: OrchestrationStatus::Running,
                    new_history: vec![],
                    custom_status: None,
                    outbound_messages: vec![],
                    timer_messages: vec![],
                    continued_as_new: None,
                },
            )
            .await
            .unwrap();

        let activity_item = ActivityWorkItem {
            instance: item.instance.clone(),
            scheduled_event: HistoryEvent::new(
                12,
                EventKind::TaskScheduled {
                    name: "Add".into(),
                    version: None,
                    input: Some("1,2".into()),
                    trace_context: None,
                },
            ),
        };
        let response = TaskMessage {
            target: item.instance.clone(),
            event: HistoryEvent::new(
                -1,
                EventKind::TaskCompleted {
                    task_scheduled_id: 12,
                    result: Some("3".into()),
                },
            ),
        };
        service
            .complete_activity_work_item(&activity_item, response)
            .await
            .unwrap();

        let next = service
            .lock_next_orchestrator_work_item(Duration::from_millis(100), &cancel)
            .await
            .unwrap()
            .expect("follow-on episode");
        assert_eq!(next.new_events.len(), 1);
        assert!(matches!(
            next.new_events[0].kind,
            EventKind::TaskCompleted {
                task_scheduled_id: 12,
                ..
            }
        ));
        // The first episode's new events are now past events.
        assert_eq!(next.past_events.len(), 1);
    }

    #[tokio::test]
    async fn test_renew_is_a_passthrough() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("abc", "X")).await.unwrap();
        let cancel = CancellationToken::new();
        let item = service
            .lock_next_orchestrator_work_item(Duration::from_millis(100), &cancel)
            .await
            .unwrap()
            .unwrap();
        let renewed = service.renew_orchestrator_work_item(item.clone()).await.unwrap();
        assert_eq!(renewed, item);
    }

    #[tokio::test]
    async fn test_fetch_cancel_returns_shutdown() {
        let service = InMemoryOrchestrationService::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service
            .lock_next_orchestrator_work_item(Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SidecarError::Shutdown));
    }

    #[tokio::test]
    async fn test_fetch_timeout_returns_none() {
        let service = InMemoryOrchestrationService::new();
        let cancel = CancellationToken::new();
        let item = service
            .lock_next_activity_work_item(Duration::from_millis(20), &cancel)
            .await
            .unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_terminate_and_purge() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("abc", "X")).await.unwrap();
        service
            .force_terminate("abc", Some("operator".into()), false)
            .await
            .unwrap();

        let meta = service.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(meta.status, OrchestrationStatus::Terminated);
        assert_eq!(meta.output.as_deref(), Some("operator"));
        // Terminated instances leave no queued events behind.
        assert_eq!(service.pending_event_count(), 0);

        let purged = service.purge_instances(PurgeFilter::default()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(service.get_instance("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_completion_observes_terminal_state() {
        let service = std::sync::Arc::new(InMemoryOrchestrationService::new());
        service.create_instance(start_request("abc", "X")).await.unwrap();

        let waiter = service.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_instance_completion("abc", &CancellationToken::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        service
            .force_terminate("abc", Some("done".into()), false)
            .await
            .unwrap();

        let meta = handle.await.unwrap().unwrap();
        assert_eq!(meta.status, OrchestrationStatus::Terminated);
    }

    #[tokio::test]
    async fn test_query_filters_by_status_and_prefix() {
        let service = InMemoryOrchestrationService::new();
        service.create_instance(start_request("a1", "OrderFlow")).await.unwrap();
        service.create_instance(start_request("a2", "Billing")).await.unwrap();
        service.force_terminate("a2", None, false).await.unwrap();

        let running = service
            .query_instances(InstanceQuery {
                statuses: vec![OrchestrationStatus::Pending],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].instance_id, "a1");

        let by_prefix = service
            .query_instances(InstanceQuery {
                name_prefix: Some("Bill".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_prefix.len(), 1);
        assert_eq!(by_prefix[0].name, "Billing");
    }
}
