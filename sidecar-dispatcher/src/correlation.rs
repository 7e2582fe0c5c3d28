//! # Pending Correlations
//!
//! Maps an in-flight work item to the one-shot channel awaiting the worker's
//! reply. A key is present for exactly the window between dispatch and reply
//! (or dispatch and error). Orchestrator keys are the lower-cased instance
//! id; activity keys combine instance id and task id.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use sidecar_shared::{SidecarError, SidecarResult};

/// Correlation key for an orchestrator work item. Case-insensitive on the
/// instance id.
pub fn orchestrator_key(instance_id: &str) -> String {
    instance_id.to_lowercase()
}

/// Correlation key for an activity work item.
pub fn activity_key(instance_id: &str, task_id: i32) -> String {
    format!("{}_{}", instance_id.to_lowercase(), task_id)
}

/// A concurrency-safe table of pending one-shot replies.
#[derive(Debug)]
pub struct PendingCorrelations<R> {
    table: DashMap<String, oneshot::Sender<R>>,
}

impl<R> Default for PendingCorrelations<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> PendingCorrelations<R> {
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Register a pending reply for `key` and return the receiving half.
    ///
    /// A duplicate key means the lease discipline upstream was violated
    /// (two in-flight dispatches for one work item); it is rejected.
    pub fn register(&self, key: String) -> SidecarResult<oneshot::Receiver<R>> {
        match self.table.entry(key) {
            Entry::Occupied(entry) => Err(SidecarError::Service(format!(
                "a dispatch is already pending for {}",
                entry.key()
            ))),
            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                slot.insert(sender);
                Ok(receiver)
            }
        }
    }

    /// Whether a reply is pending for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Remove the pending entry without resolving it. Used on dispatch
    /// failure so a late reply yields not-found instead of resolving a
    /// future nobody awaits.
    pub fn remove(&self, key: &str) -> Option<oneshot::Sender<R>> {
        self.table.remove(key).map(|(_, sender)| sender)
    }

    /// Remove the pending entry and resolve its future with `result`.
    ///
    /// Returns `NotFound` when no correlation exists for `key`.
    pub fn resolve(&self, key: &str, result: R) -> SidecarResult<()> {
        let sender = self.remove(key).ok_or_else(|| {
            SidecarError::NotFound(format!("no pending work item for {key}"))
        })?;
        sender.send(result).map_err(|_| {
            SidecarError::Dispatch(format!("dispatcher stopped awaiting reply for {key}"))
        })
    }

    /// Number of in-flight correlations.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let pending: PendingCorrelations<u32> = PendingCorrelations::new();
        let receiver = pending.register(orchestrator_key("ABC")).unwrap();
        assert_eq!(pending.len(), 1);

        // Replies key case-insensitively.
        pending.resolve(&orchestrator_key("abc"), 7).unwrap();
        assert_eq!(receiver.await.unwrap(), 7);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_future_stays_pending_until_reply() {
        let pending: PendingCorrelations<u32> = PendingCorrelations::new();
        let receiver = pending.register("abc".into()).unwrap();

        let mut future = tokio_test::task::spawn(receiver);
        tokio_test::assert_pending!(future.poll());

        pending.resolve("abc", 5).unwrap();
        assert!(future.is_woken());
        let value = tokio_test::assert_ready!(future.poll()).unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_resolve_unknown_key_is_not_found() {
        let pending: PendingCorrelations<u32> = PendingCorrelations::new();
        let err = pending.resolve("missing", 1).unwrap_err();
        assert!(matches!(err, SidecarError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let pending: PendingCorrelations<u32> = PendingCorrelations::new();
        let _receiver = pending.register("abc".into()).unwrap();
        let err = pending.register("abc".into()).unwrap_err();
        assert!(matches!(err, SidecarError::Service(_)));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_makes_late_reply_not_found() {
        let pending: PendingCorrelations<u32> = PendingCorrelations::new();
        let _receiver = pending.register("abc".into()).unwrap();
        assert!(pending.remove("abc").is_some());
        let err = pending.resolve("abc", 1).unwrap_err();
        assert!(matches!(err, SidecarError::NotFound(_)));
    }

    #[test]
    fn test_activity_key_combines_instance_and_task() {
        assert_eq!(activity_key("Order-1", 12), "order-1_12");
    }
}
