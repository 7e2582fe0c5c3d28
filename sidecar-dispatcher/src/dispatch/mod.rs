//! # Work-Item Dispatcher
//!
//! The generic fetch-and-execute loop shared by the orchestrator and
//! activity dispatchers. One logical fetch task per dispatcher:
//!
//! 1. Block while in-flight work saturates the concurrency bound or while
//!    no worker is connected (throttle reasons logged at most once per
//!    minute).
//! 2. Long-poll one work item from the orchestration service.
//! 3. Spawn its execution on a background task that is never cancelled;
//!    failures abandon the item back to the service.
//! 4. Continue immediately to the next fetch.
//!
//! `stop` cancels the fetch loop and then polls until in-flight work has
//! drained, bounded by the caller's cancellation.

pub mod activity;
pub mod host;
pub mod orchestrator;

pub use activity::ActivityDispatchHandler;
pub use host::DispatcherHost;
pub use orchestrator::OrchestratorDispatchHandler;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sidecar_shared::{SidecarError, SidecarResult};

use crate::signal::TrafficSignal;

/// How often blocked-fetch reasons may be logged.
const THROTTLE_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Poll cadence while waiting for in-flight work to drain during stop.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll cadence while blocked on concurrency or the traffic signal.
const ALL_CLEAR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Work-item-type specific behavior plugged into [`WorkDispatcher`].
#[async_trait]
pub trait WorkItemHandler: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Dispatcher name for logs.
    fn name(&self) -> &'static str;

    /// Concurrency bound, sourced from the orchestration service.
    fn max_concurrency(&self) -> usize;

    /// Long-poll the next work item. `Err(Shutdown)` exits the loop.
    async fn fetch(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SidecarResult<Option<Self::Item>>;

    /// Execute one work item end to end, committing its result to the
    /// service.
    async fn execute(&self, item: &Self::Item) -> SidecarResult<()>;

    /// Return the work item unprocessed after an execution failure.
    async fn abandon(&self, item: &Self::Item) -> SidecarResult<()>;

    /// Release any held resources. Invoked after both success and failure.
    async fn release(&self, _item: &Self::Item) -> SidecarResult<()> {
        Ok(())
    }

    /// Extend the lease on a held work item. The default is a passthrough
    /// for services without leases to renew.
    async fn renew(&self, item: Self::Item) -> SidecarResult<Self::Item> {
        Ok(item)
    }

    /// Identifier of the work item, for logs.
    fn work_item_id(&self, item: &Self::Item) -> String;

    /// Backoff after a fetch error, sourced from the orchestration service.
    fn backoff_after_fetch_error(&self, err: &SidecarError) -> Duration;
}

struct RunState {
    cancel: CancellationToken,
    fetch_loop: JoinHandle<()>,
}

/// Generic long-running dispatcher over one work-item type.
pub struct WorkDispatcher<H: WorkItemHandler> {
    handler: Arc<H>,
    signal: TrafficSignal,
    in_flight: Arc<AtomicUsize>,
    run: Mutex<Option<RunState>>,
}

impl<H: WorkItemHandler> std::fmt::Debug for WorkDispatcher<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDispatcher")
            .field("name", &self.handler.name())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<H: WorkItemHandler> WorkDispatcher<H> {
    pub fn new(handler: Arc<H>, signal: TrafficSignal) -> Self {
        Self {
            handler,
            signal,
            in_flight: Arc::new(AtomicUsize::new(0)),
            run: Mutex::new(None),
        }
    }

    /// Number of currently executing work items.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Start the fetch loop under a child of `parent`. Re-entrant after
    /// [`stop`](Self::stop); a no-op while already running.
    pub fn start(&self, parent: &CancellationToken) {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        if run.is_some() {
            warn!(dispatcher = self.handler.name(), "Dispatcher already running");
            return;
        }

        let cancel = parent.child_token();
        let fetch_loop = tokio::spawn(fetch_loop(
            self.handler.clone(),
            self.signal.clone(),
            self.in_flight.clone(),
            cancel.clone(),
        ));
        *run = Some(RunState { cancel, fetch_loop });
        info!(dispatcher = self.handler.name(), "Dispatcher started");
    }

    /// Cancel the fetch loop, await it, then poll until in-flight work has
    /// drained or `outer` fires. In-flight executions are never cancelled.
    pub async fn stop(&self, outer: &CancellationToken) {
        let run = self.run.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(run) = run else {
            return;
        };

        run.cancel.cancel();
        if let Err(join_err) = run.fetch_loop.await {
            warn!(
                dispatcher = self.handler.name(),
                error = %join_err,
                "Fetch loop task did not shut down cleanly"
            );
        }

        loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                break;
            }
            if outer.is_cancelled() {
                warn!(
                    dispatcher = self.handler.name(),
                    in_flight, "Stop cancelled before in-flight work drained"
                );
                break;
            }
            debug!(
                dispatcher = self.handler.name(),
                in_flight, "Waiting for in-flight work items to drain"
            );
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!(dispatcher = self.handler.name(), "Dispatcher stopped");
    }
}

/// Rate-limited throttle logging.
struct ThrottleLog {
    last: Option<Instant>,
}

impl ThrottleLog {
    fn new() -> Self {
        Self { last: None }
    }

    fn log(&mut self, dispatcher: &str, reason: &str) {
        let due = self
            .last
            .is_none_or(|last| last.elapsed() >= THROTTLE_LOG_INTERVAL);
        if due {
            info!(dispatcher, reason, "Dispatcher fetch is throttled");
            self.last = Some(Instant::now());
        }
    }
}

/// Block until fetching is permitted: in-flight below the concurrency bound
/// and a worker connected. Returns early when cancelled.
async fn wait_for_all_clear<H: WorkItemHandler>(
    handler: &H,
    signal: &TrafficSignal,
    in_flight: &AtomicUsize,
    cancel: &CancellationToken,
    throttle: &mut ThrottleLog,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let current = in_flight.load(Ordering::SeqCst);
        let max = handler.max_concurrency();
        if current >= max {
            throttle.log(handler.name(), "concurrency limit reached");
            tokio::select! {
                _ = tokio::time::sleep(ALL_CLEAR_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return,
            }
            continue;
        }

        if !signal.is_set() {
            throttle.log(handler.name(), "no worker connected");
            signal.wait(ALL_CLEAR_POLL_INTERVAL, cancel).await;
            continue;
        }

        return;
    }
}

async fn fetch_loop<H: WorkItemHandler>(
    handler: Arc<H>,
    signal: TrafficSignal,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let mut throttle = ThrottleLog::new();

    loop {
        wait_for_all_clear(handler.as_ref(), &signal, &in_flight, &cancel, &mut throttle).await;
        if cancel.is_cancelled() {
            break;
        }

        match handler.fetch(Duration::MAX, &cancel).await {
            Err(SidecarError::Shutdown) => break,
            Err(err) => {
                if cancel.is_cancelled() {
                    break;
                }
                let backoff = handler.backoff_after_fetch_error(&err);
                warn!(
                    dispatcher = handler.name(),
                    error = %err,
                    backoff_secs = backoff.as_secs(),
                    "Failed to fetch next work item; backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            Ok(None) => continue,
            Ok(Some(item)) => {
                in_flight.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                let in_flight = in_flight.clone();
                // Execution is deliberately outside the cancellation scope:
                // a leased work item either completes or is abandoned.
                tokio::spawn(async move {
                    execute_one(handler, in_flight, item).await;
                });
            }
        }
    }

    debug!(dispatcher = handler.name(), "Fetch loop exited");
}

/// Decrements the in-flight counter even if execution panics.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn execute_one<H: WorkItemHandler>(
    handler: Arc<H>,
    in_flight: Arc<AtomicUsize>,
    item: H::Item,
) {
    let _guard = InFlightGuard { in_flight };
    let work_item_id = handler.work_item_id(&item);

    if let Err(err) = handler.execute(&item).await {
        error!(
            dispatcher = handler.name(),
            work_item = %work_item_id,
            error = %err,
            "Work item execution failed; abandoning"
        );
        if let Err(abandon_err) = handler.abandon(&item).await {
            warn!(
                dispatcher = handler.name(),
                work_item = %work_item_id,
                error = %abandon_err,
                "Failed to abandon work item; its lease will expire on the service side"
            );
        }
    }

    if let Err(release_err) = handler.release(&item).await {
        warn!(
            dispatcher = handler.name(),
            work_item = %work_item_id,
            error = %release_err,
            "Failed to release work item"
        );
    }
}
