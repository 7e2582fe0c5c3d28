//! # Activity Dispatcher
//!
//! Concrete handler for activity work items: runs the activity through the
//! task executor and submits the resulting `TaskCompleted` / `TaskFailed`
//! response message to the source orchestration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sidecar_shared::{SidecarError, SidecarResult};

use crate::dispatch::WorkItemHandler;
use crate::executor::TaskExecutor;
use crate::service::{ActivityWorkItem, OrchestrationService, TaskMessage};

/// Dispatch handler for activity work items.
pub struct ActivityDispatchHandler {
    service: Arc<dyn OrchestrationService>,
    executor: Arc<dyn TaskExecutor>,
}

impl ActivityDispatchHandler {
    pub fn new(service: Arc<dyn OrchestrationService>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { service, executor }
    }
}

impl std::fmt::Debug for ActivityDispatchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityDispatchHandler").finish()
    }
}

#[async_trait]
impl WorkItemHandler for ActivityDispatchHandler {
    type Item = ActivityWorkItem;

    fn name(&self) -> &'static str {
        "activity"
    }

    fn max_concurrency(&self) -> usize {
        self.service.max_concurrent_activity_work_items()
    }

    async fn fetch(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<ActivityWorkItem>> {
        self.service
            .lock_next_activity_work_item(timeout, cancel)
            .await
    }

    async fn execute(&self, item: &ActivityWorkItem) -> SidecarResult<()> {
        debug!(
            instance_id = %item.instance.instance_id,
            task_id = item.scheduled_event.event_id,
            "Executing activity work item"
        );

        let result = self
            .executor
            .execute_activity(&item.instance, &item.scheduled_event)
            .await?;

        let response = TaskMessage {
            target: item.instance.clone(),
            event: result.response_event,
        };
        self.service.complete_activity_work_item(item, response).await
    }

    async fn abandon(&self, item: &ActivityWorkItem) -> SidecarResult<()> {
        self.service.abandon_activity_work_item(item).await
    }

    async fn renew(&self, item: ActivityWorkItem) -> SidecarResult<ActivityWorkItem> {
        self.service.renew_activity_work_item(item).await
    }

    fn work_item_id(&self, item: &ActivityWorkItem) -> String {
        format!(
            "{}_{}",
            item.instance.instance_id, item.scheduled_event.event_id
        )
    }

    fn backoff_after_fetch_error(&self, err: &SidecarError) -> Duration {
        self.service.delay_after_fetch_error(err)
    }
}
