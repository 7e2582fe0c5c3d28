//! # Dispatcher Host
//!
//! Owns the orchestrator and activity dispatchers. Start is gated on a
//! worker connecting (the traffic signal); stop drains both dispatchers
//! bounded by the configured grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sidecar_shared::config::DispatcherConfig;

use crate::dispatch::{
    ActivityDispatchHandler, OrchestratorDispatchHandler, WorkDispatcher,
};
use crate::executor::TaskExecutor;
use crate::service::OrchestrationService;
use crate::signal::TrafficSignal;

/// Cadence of the "waiting for a worker" log while no worker is connected.
const CONNECT_WAIT_INTERVAL: Duration = Duration::from_secs(60);

/// Owns both dispatchers' lifecycles.
#[derive(Debug)]
pub struct DispatcherHost {
    orchestrators: WorkDispatcher<OrchestratorDispatchHandler>,
    activities: WorkDispatcher<ActivityDispatchHandler>,
    signal: TrafficSignal,
    grace_period: Duration,
}

impl DispatcherHost {
    pub fn new(
        service: Arc<dyn OrchestrationService>,
        executor: Arc<dyn TaskExecutor>,
        signal: TrafficSignal,
        config: &DispatcherConfig,
    ) -> Self {
        let orchestrators = WorkDispatcher::new(
            Arc::new(OrchestratorDispatchHandler::new(
                service.clone(),
                executor.clone(),
            )),
            signal.clone(),
        );
        let activities = WorkDispatcher::new(
            Arc::new(ActivityDispatchHandler::new(service, executor)),
            signal.clone(),
        );
        Self {
            orchestrators,
            activities,
            signal,
            grace_period: config.shutdown_grace_period(),
        }
    }

    /// Wait for a worker to connect, then start both dispatchers. Returns
    /// without starting anything if `cancel` fires first.
    pub async fn start(&self, cancel: &CancellationToken) {
        info!("Waiting for a worker to connect before starting dispatchers");
        while !self.signal.wait(CONNECT_WAIT_INTERVAL, cancel).await {
            if cancel.is_cancelled() {
                return;
            }
            info!("Still waiting for a worker to connect");
        }

        self.orchestrators.start(cancel);
        self.activities.start(cancel);
        info!("Dispatcher host started");
    }

    /// Stop both dispatchers, bounded by the configured grace period.
    pub async fn stop(&self, cancel: &CancellationToken) {
        info!(
            grace_period_secs = self.grace_period.as_secs(),
            "Stopping dispatcher host"
        );

        let drained = tokio::time::timeout(self.grace_period, async {
            tokio::join!(self.orchestrators.stop(cancel), self.activities.stop(cancel));
        })
        .await;

        match drained {
            Ok(()) => info!("Dispatcher host stopped"),
            Err(_) => warn!(
                orchestrators_in_flight = self.orchestrators.in_flight(),
                activities_in_flight = self.activities.in_flight(),
                "Shutdown grace period expired with work still in flight"
            ),
        }
    }

    /// In-flight work item counts `(orchestrators, activities)`.
    pub fn in_flight(&self) -> (usize, usize) {
        (self.orchestrators.in_flight(), self.activities.in_flight())
    }

    pub fn is_running(&self) -> bool {
        self.orchestrators.is_running() || self.activities.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sidecar_shared::models::{HistoryEvent, OrchestrationInstance};
    use sidecar_shared::SidecarResult;

    use crate::executor::{ActivityExecutionResult, OrchestratorExecutionResult};
    use crate::service::InMemoryOrchestrationService;

    #[derive(Debug)]
    struct IdleExecutor;

    #[async_trait]
    impl TaskExecutor for IdleExecutor {
        async fn execute_orchestrator(
            &self,
            _instance: &OrchestrationInstance,
            _past_events: &[HistoryEvent],
            _new_events: &[HistoryEvent],
        ) -> SidecarResult<OrchestratorExecutionResult> {
            Ok(OrchestratorExecutionResult::default())
        }

        async fn execute_activity(
            &self,
            _instance: &OrchestrationInstance,
            _scheduled_event: &HistoryEvent,
        ) -> SidecarResult<ActivityExecutionResult> {
            unimplemented!("no activities in this test")
        }
    }

    fn host_with_signal(signal: TrafficSignal) -> DispatcherHost {
        DispatcherHost::new(
            Arc::new(InMemoryOrchestrationService::new()),
            Arc::new(IdleExecutor),
            signal,
            &DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_start_blocks_until_worker_connects() {
        let signal = TrafficSignal::new();
        let host = Arc::new(host_with_signal(signal.clone()));

        let starter = host.clone();
        let cancel = CancellationToken::new();
        let start_cancel = cancel.clone();
        let handle = tokio::spawn(async move { starter.start(&start_cancel).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!host.is_running());

        signal.set();
        handle.await.unwrap();
        assert!(host.is_running());

        host.stop(&CancellationToken::new()).await;
        assert!(!host.is_running());
    }

    #[tokio::test]
    async fn test_start_aborts_on_cancel() {
        let signal = TrafficSignal::new();
        let host = host_with_signal(signal);
        let cancel = CancellationToken::new();
        cancel.cancel();

        host.start(&cancel).await;
        assert!(!host.is_running());
    }
}
