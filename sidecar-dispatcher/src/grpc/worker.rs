//! # Worker Bridge
//!
//! The worker-facing gRPC surface and the dispatch side behind it. One
//! worker at a time holds the `GetWorkItems` server stream; dispatch paths
//! borrow its writer to ship work items and await replies through the
//! pending-correlation tables. Replies arrive as unary calls
//! (`CompleteOrchestratorTask` / `CompleteActivityTask`), possibly chunked
//! for oversize orchestrator results.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use prost::Message;
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use sidecar_shared::models::{
    EventKind, HistoryEvent, OrchestrationInstance, TraceContext,
};
use sidecar_shared::proto::v1 as pb;
use sidecar_shared::proto::v1::task_worker_service_server::TaskWorkerService;
use sidecar_shared::{SidecarError, SidecarResult};

use crate::correlation::{activity_key, orchestrator_key};
use crate::executor::{ActivityExecutionResult, OrchestratorExecutionResult, TaskExecutor};
use crate::grpc::conversions;
use crate::grpc::state::BridgeState;

/// Attempts to claim the work-item stream before rejecting a caller.
const STREAM_CLAIM_ATTEMPTS: usize = 5;

/// Delay between claim attempts.
const STREAM_CLAIM_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Cadence of the "waiting for a worker" log after a disconnect.
const RECONNECT_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// The worker-facing gRPC service. Cheap to clone; all state is shared.
#[derive(Debug, Clone)]
pub struct WorkerBridge {
    state: Arc<BridgeState>,
}

impl WorkerBridge {
    pub fn new(state: Arc<BridgeState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    /// Await an orchestrator reply, bounded by the configured dispatch
    /// timeout. Cleans up the correlation and chunk state on timeout.
    async fn await_orchestrator_reply(
        &self,
        receiver: oneshot::Receiver<OrchestratorExecutionResult>,
        key: &str,
    ) -> SidecarResult<OrchestratorExecutionResult> {
        let recv = async {
            receiver.await.map_err(|_| {
                SidecarError::Dispatch(format!("reply channel closed for {key}"))
            })
        };

        match self.state.dispatch_timeout {
            None => recv.await,
            Some(timeout) => match tokio::time::timeout(timeout, recv).await {
                Ok(result) => result,
                Err(_) => {
                    self.state.orchestrator_pending.remove(key);
                    self.state.partial_chunks.discard(key);
                    Err(SidecarError::Dispatch(format!(
                        "timed out waiting for the orchestrator reply for {key}"
                    )))
                }
            },
        }
    }

    async fn await_activity_reply(
        &self,
        receiver: oneshot::Receiver<ActivityExecutionResult>,
        key: &str,
    ) -> SidecarResult<ActivityExecutionResult> {
        let recv = async {
            receiver.await.map_err(|_| {
                SidecarError::Dispatch(format!("reply channel closed for {key}"))
            })
        };

        match self.state.dispatch_timeout {
            None => recv.await,
            Some(timeout) => match tokio::time::timeout(timeout, recv).await {
                Ok(result) => result,
                Err(_) => {
                    self.state.activity_pending.remove(key);
                    Err(SidecarError::Dispatch(format!(
                        "timed out waiting for the activity reply for {key}"
                    )))
                }
            },
        }
    }

    /// Build and write the orchestrator work item, deciding embedded vs
    /// streamed history.
    async fn dispatch_orchestrator(
        &self,
        instance: &OrchestrationInstance,
        past_events: &[HistoryEvent],
        new_events: &[HistoryEvent],
        key: &str,
    ) -> SidecarResult<()> {
        let past_wire: Vec<pb::HistoryEvent> =
            past_events.iter().map(conversions::event_to_proto).collect();
        let new_wire: Vec<pb::HistoryEvent> =
            new_events.iter().map(conversions::event_to_proto).collect();

        let past_size: usize = past_wire.iter().map(Message::encoded_len).sum();
        let history_streaming = self
            .state
            .stream_handle()
            .map(|handle| handle.history_streaming)
            .unwrap_or(false);
        // Strictly greater-than: a payload exactly at the threshold embeds.
        let stream_history =
            history_streaming && past_size > self.state.embed_threshold_bytes;

        debug!(
            instance_id = %instance.instance_id,
            past_size,
            stream_history,
            "Dispatching orchestrator work item"
        );

        let (embedded, parked) = if stream_history {
            (Vec::new(), Some(past_wire))
        } else {
            (past_wire, None)
        };

        let request = pb::OrchestratorRequest {
            instance_id: instance.instance_id.clone(),
            execution_id: instance.execution_id.clone(),
            past_events: embedded,
            new_events: new_wire,
            requires_history_streaming: stream_history,
            trace_context: find_trace_context(past_events, new_events)
                .map(conversions::trace_to_proto),
        };

        if let Some(events) = parked {
            self.state.history_buffer.park(key, events);
        }

        self.state
            .write_work_item(pb::WorkItem {
                request: Some(pb::work_item::Request::OrchestratorRequest(request)),
            })
            .await
    }
}

/// The orchestration's trace context, taken from its `ExecutionStarted`
/// event. New events are checked first: a fresh execution carries the
/// current span.
fn find_trace_context<'a>(
    past_events: &'a [HistoryEvent],
    new_events: &'a [HistoryEvent],
) -> Option<&'a TraceContext> {
    new_events
        .iter()
        .chain(past_events.iter())
        .find_map(|event| match &event.kind {
            EventKind::ExecutionStarted { trace_context, .. } => trace_context.as_ref(),
            _ => None,
        })
}

/// Server stream of work items whose drop marks the worker disconnected.
pub struct WorkItemStream {
    inner: ReceiverStream<Result<pb::WorkItem, Status>>,
    state: Arc<BridgeState>,
}

impl std::fmt::Debug for WorkItemStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemStream").finish()
    }
}

impl Stream for WorkItemStream {
    type Item = Result<pb::WorkItem, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for WorkItemStream {
    fn drop(&mut self) {
        self.state.release_stream();
        info!("Worker disconnected; work item stream closed");

        // Resume the waiting-for-connection log cadence until a worker
        // returns. Pending correlations are left to resolve via reconnect
        // or lease expiry on the service side.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let signal = self.state.signal.clone();
            handle.spawn(async move {
                let never = CancellationToken::new();
                while !signal.wait(RECONNECT_LOG_INTERVAL, &never).await {
                    info!("Waiting for a worker to connect");
                }
            });
        }
    }
}

#[tonic::async_trait]
impl TaskWorkerService for WorkerBridge {
    type GetWorkItemsStream = WorkItemStream;

    async fn get_work_items(
        &self,
        request: Request<pb::GetWorkItemsRequest>,
    ) -> Result<Response<Self::GetWorkItemsStream>, Status> {
        let request = request.into_inner();
        let history_streaming = request
            .capabilities
            .iter()
            .any(|capability| *capability == pb::WorkerCapability::HistoryStreaming as i32);

        let mut receiver = None;
        for attempt in 0..STREAM_CLAIM_ATTEMPTS {
            if let Some(claimed) = self.state.try_claim_stream(history_streaming) {
                receiver = Some(claimed);
                break;
            }
            if attempt + 1 < STREAM_CLAIM_ATTEMPTS {
                tokio::time::sleep(STREAM_CLAIM_RETRY_DELAY).await;
            }
        }

        let Some(receiver) = receiver else {
            warn!("Rejecting work item stream request: a worker is already connected");
            return Err(Status::resource_exhausted(
                "a worker is already connected to this sidecar",
            ));
        };

        info!(history_streaming, "Worker connected; streaming work items");
        Ok(Response::new(WorkItemStream {
            inner: ReceiverStream::new(receiver),
            state: self.state.clone(),
        }))
    }

    async fn complete_orchestrator_task(
        &self,
        request: Request<pb::OrchestratorResponse>,
    ) -> Result<Response<pb::CompleteTaskResponse>, Status> {
        let response = request.into_inner();
        let key = orchestrator_key(&response.instance_id);
        let actions = response
            .actions
            .into_iter()
            .map(conversions::action_from_proto)
            .collect::<SidecarResult<Vec<_>>>()
            .map_err(Status::from)?;

        if response.is_partial {
            debug!(
                instance_id = %response.instance_id,
                actions = actions.len(),
                "Received partial orchestrator reply chunk"
            );
            self.state
                .partial_chunks
                .append(&key, actions, self.state.orchestrator_pending.contains(&key))
                .map_err(Status::from)?;
        } else {
            let (all_actions, had_partials) = self.state.partial_chunks.finish(&key, actions);
            // Trace context is authoritative on single-chunk replies only.
            let trace_context = if had_partials {
                None
            } else {
                response
                    .orchestration_trace
                    .map(conversions::trace_from_proto)
                    .transpose()
                    .map_err(Status::from)?
            };

            debug!(
                instance_id = %response.instance_id,
                actions = all_actions.len(),
                had_partials,
                "Resolving orchestrator reply"
            );
            self.state
                .orchestrator_pending
                .resolve(
                    &key,
                    OrchestratorExecutionResult {
                        actions: all_actions,
                        custom_status: response.custom_status,
                        trace_context,
                    },
                )
                .map_err(Status::from)?;
        }

        Ok(Response::new(pb::CompleteTaskResponse {}))
    }

    async fn complete_activity_task(
        &self,
        request: Request<pb::ActivityResponse>,
    ) -> Result<Response<pb::CompleteTaskResponse>, Status> {
        let response = request.into_inner();
        let key = activity_key(&response.instance_id, response.task_id);

        let kind = match response.failure_details {
            Some(failure) => EventKind::TaskFailed {
                task_scheduled_id: response.task_id,
                failure_details: conversions::failure_from_proto(failure)
                    .map_err(Status::from)?,
            },
            None => EventKind::TaskCompleted {
                task_scheduled_id: response.task_id,
                result: response.result,
            },
        };

        debug!(
            instance_id = %response.instance_id,
            task_id = response.task_id,
            "Resolving activity reply"
        );
        self.state
            .activity_pending
            .resolve(
                &key,
                ActivityExecutionResult {
                    response_event: HistoryEvent::new(-1, kind),
                },
            )
            .map_err(Status::from)?;

        Ok(Response::new(pb::CompleteTaskResponse {}))
    }

    async fn abandon_orchestrator_task(
        &self,
        request: Request<pb::AbandonOrchestratorTaskRequest>,
    ) -> Result<Response<pb::AbandonTaskResponse>, Status> {
        // The sidecar abandons through the orchestration service directly.
        debug!(
            instance_id = %request.into_inner().instance_id,
            "Abandon orchestrator task acknowledged"
        );
        Ok(Response::new(pb::AbandonTaskResponse {}))
    }

    async fn abandon_activity_task(
        &self,
        request: Request<pb::AbandonActivityTaskRequest>,
    ) -> Result<Response<pb::AbandonTaskResponse>, Status> {
        let request = request.into_inner();
        debug!(
            instance_id = %request.instance_id,
            task_id = request.task_id,
            "Abandon activity task acknowledged"
        );
        Ok(Response::new(pb::AbandonTaskResponse {}))
    }

    type StreamInstanceHistoryStream =
        Pin<Box<dyn Stream<Item = Result<pb::HistoryChunk, Status>> + Send>>;

    async fn stream_instance_history(
        &self,
        request: Request<pb::StreamInstanceHistoryRequest>,
    ) -> Result<Response<Self::StreamInstanceHistoryStream>, Status> {
        let request = request.into_inner();
        let key = orchestrator_key(&request.instance_id);

        let events = self.state.history_buffer.take(&key).ok_or_else(|| {
            Status::not_found(format!(
                "no streamable history for instance {}",
                request.instance_id
            ))
        })?;

        let chunks = self.state.history_buffer.chunk_events(events);
        info!(
            instance_id = %request.instance_id,
            chunks = chunks.len(),
            "Streaming instance history"
        );

        Ok(Response::new(Box::pin(tokio_stream::iter(
            chunks.into_iter().map(Ok),
        ))))
    }
}

#[async_trait]
impl TaskExecutor for WorkerBridge {
    async fn execute_orchestrator(
        &self,
        instance: &OrchestrationInstance,
        past_events: &[HistoryEvent],
        new_events: &[HistoryEvent],
    ) -> SidecarResult<OrchestratorExecutionResult> {
        let key = orchestrator_key(&instance.instance_id);
        // Register before writing: the reply can arrive before the write
        // call returns.
        let receiver = self.state.orchestrator_pending.register(key.clone())?;

        if let Err(err) = self
            .dispatch_orchestrator(instance, past_events, new_events, &key)
            .await
        {
            self.state.orchestrator_pending.remove(&key);
            self.state.partial_chunks.discard(&key);
            self.state.history_buffer.discard(&key);
            return Err(err);
        }

        let result = self.await_orchestrator_reply(receiver, &key).await;
        self.state.history_buffer.discard(&key);
        result
    }

    async fn execute_activity(
        &self,
        instance: &OrchestrationInstance,
        scheduled_event: &HistoryEvent,
    ) -> SidecarResult<ActivityExecutionResult> {
        let EventKind::TaskScheduled {
            name,
            version,
            input,
            trace_context,
        } = &scheduled_event.kind
        else {
            return Err(SidecarError::Unsupported(format!(
                "activity work item carries a {} event instead of TaskScheduled",
                scheduled_event.kind_name()
            )));
        };

        let task_id = scheduled_event.event_id;
        let key = activity_key(&instance.instance_id, task_id);
        let receiver = self.state.activity_pending.register(key.clone())?;

        let request = pb::ActivityRequest {
            task_id,
            name: name.clone(),
            version: version.clone(),
            input: input.clone(),
            orchestration_instance: Some(conversions::instance_to_proto(instance)),
            trace_context: trace_context.as_ref().map(conversions::trace_to_proto),
        };

        debug!(
            instance_id = %instance.instance_id,
            task_id,
            activity = %name,
            "Dispatching activity work item"
        );

        let written = self
            .state
            .write_work_item(pb::WorkItem {
                request: Some(pb::work_item::Request::ActivityRequest(request)),
            })
            .await;
        if let Err(err) = written {
            self.state.activity_pending.remove(&key);
            return Err(err);
        }

        self.await_activity_reply(receiver, &key).await
    }
}
