//! # Bridge State
//!
//! Process-wide state shared between the worker-facing gRPC endpoints and
//! the dispatch paths: the traffic signal, the work-item stream writer, the
//! pending-correlation tables, the partial-chunk accumulator, and the
//! history-stream buffer.
//!
//! The stream writer is owned by the `GetWorkItems` handler and borrowed by
//! every dispatch path. Handover (signal transition + writer assignment)
//! happens under one short mutex section; actual writes are serialized
//! through a 1-permit semaphore because the stream tolerates only one
//! writer at a time.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tonic::Status;

use sidecar_shared::config::SidecarConfig;
use sidecar_shared::proto::v1 as pb;
use sidecar_shared::{SidecarError, SidecarResult};

use crate::chunks::PartialChunks;
use crate::correlation::PendingCorrelations;
use crate::executor::{ActivityExecutionResult, OrchestratorExecutionResult};
use crate::history_stream::HistoryStreamBuffer;
use crate::signal::TrafficSignal;

/// The connected worker's stream writer and advertised capabilities.
#[derive(Debug, Clone)]
pub(crate) struct StreamHandle {
    pub sender: mpsc::Sender<Result<pb::WorkItem, Status>>,
    pub history_streaming: bool,
}

/// Shared state of the worker bridge.
///
/// Lifecycle is init-once, reset-on-disconnect: a worker disconnect clears
/// the stream handle and resets the signal but leaves pending correlations
/// untouched. Their recovery path is lease expiry on the orchestration
/// service side, or the worker reconnecting and replying.
#[derive(Debug)]
pub struct BridgeState {
    pub(crate) signal: TrafficSignal,
    stream: Mutex<Option<StreamHandle>>,
    write_gate: Semaphore,
    pub(crate) orchestrator_pending: PendingCorrelations<OrchestratorExecutionResult>,
    pub(crate) activity_pending: PendingCorrelations<ActivityExecutionResult>,
    pub(crate) partial_chunks: PartialChunks,
    pub(crate) history_buffer: HistoryStreamBuffer,
    pub(crate) embed_threshold_bytes: usize,
    pub(crate) dispatch_timeout: Option<Duration>,
    channel_capacity: usize,
}

impl BridgeState {
    pub fn new(signal: TrafficSignal, config: &SidecarConfig) -> Self {
        Self {
            signal,
            stream: Mutex::new(None),
            write_gate: Semaphore::new(1),
            orchestrator_pending: PendingCorrelations::new(),
            activity_pending: PendingCorrelations::new(),
            partial_chunks: PartialChunks::new(),
            history_buffer: HistoryStreamBuffer::new(config.dispatcher.history_chunk_max_bytes),
            embed_threshold_bytes: config.dispatcher.history_embed_threshold_bytes,
            dispatch_timeout: config.dispatcher.dispatch_timeout(),
            channel_capacity: config.grpc.work_item_channel_capacity,
        }
    }

    /// Claim the work-item stream for a connecting worker: transition the
    /// signal and install the writer under one critical section. Returns
    /// `None` when another worker already holds the stream.
    pub(crate) fn try_claim_stream(
        &self,
        history_streaming: bool,
    ) -> Option<mpsc::Receiver<Result<pb::WorkItem, Status>>> {
        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if !self.signal.set() {
            return None;
        }
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        *slot = Some(StreamHandle {
            sender,
            history_streaming,
        });
        Some(receiver)
    }

    /// Worker disconnect: clear the writer and reset the signal under the
    /// same critical section as the claim.
    pub(crate) fn release_stream(&self) {
        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        self.signal.reset();
    }

    /// Whether a worker currently holds the work-item stream.
    pub fn is_worker_connected(&self) -> bool {
        self.signal.is_set()
    }

    /// Number of orchestrator dispatches awaiting a worker reply.
    pub fn pending_orchestrator_replies(&self) -> usize {
        self.orchestrator_pending.len()
    }

    /// Number of activity dispatches awaiting a worker reply.
    pub fn pending_activity_replies(&self) -> usize {
        self.activity_pending.len()
    }

    /// Snapshot of the current stream handle, if a worker is connected.
    pub(crate) fn stream_handle(&self) -> Option<StreamHandle> {
        self.stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Write one work item to the connected worker. The 1-permit gate
    /// serializes frames from concurrent dispatch paths.
    pub(crate) async fn write_work_item(&self, item: pb::WorkItem) -> SidecarResult<()> {
        let handle = self.stream_handle().ok_or_else(|| {
            SidecarError::WorkerUnavailable("no worker is connected".to_string())
        })?;

        let _permit = self.write_gate.acquire().await.map_err(|_| {
            SidecarError::WorkerUnavailable("work item write gate closed".to_string())
        })?;

        handle.sender.send(Ok(item)).await.map_err(|_| {
            SidecarError::WorkerUnavailable("work item stream closed".to_string())
        })
    }
}
