//! # Partial-Chunk Accumulator
//!
//! Orchestrator replies may arrive as a sequence of partial chunks followed
//! by one terminal (non-partial) chunk. This accumulator holds the actions
//! gathered so far per instance id; the pending-correlation entry stays in
//! its own table until the terminal chunk resolves it. An entry exists here
//! iff at least one partial chunk has arrived and the terminal chunk has
//! not.
//!
//! The worker serializes its partial/terminal replies per instance, so the
//! per-key operations below never race for one instance.

use dashmap::DashMap;

use sidecar_shared::models::OrchestratorAction;
use sidecar_shared::{SidecarError, SidecarResult};

/// Accumulated partial-reply actions, keyed by the orchestrator correlation
/// key.
#[derive(Debug, Default)]
pub struct PartialChunks {
    entries: DashMap<String, Vec<OrchestratorAction>>,
}

impl PartialChunks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a partial chunk's actions.
    ///
    /// `pending_exists` is the caller's lookup of the pending-correlation
    /// table; a partial chunk with no pending dispatch is `NotFound`.
    pub fn append(
        &self,
        key: &str,
        actions: Vec<OrchestratorAction>,
        pending_exists: bool,
    ) -> SidecarResult<()> {
        if !pending_exists {
            return Err(SidecarError::NotFound(format!(
                "no pending orchestrator work item for {key}"
            )));
        }
        self.entries.entry(key.to_owned()).or_default().extend(actions);
        Ok(())
    }

    /// Observe the terminal chunk: drain any accumulated actions and append
    /// the terminal chunk's own. Returns the full action list and whether
    /// partial chunks had arrived (in which case the reply's trace context
    /// is not authoritative).
    pub fn finish(
        &self,
        key: &str,
        final_actions: Vec<OrchestratorAction>,
    ) -> (Vec<OrchestratorAction>, bool) {
        match self.entries.remove(key) {
            Some((_, mut accumulated)) => {
                accumulated.extend(final_actions);
                (accumulated, true)
            }
            None => (final_actions, false),
        }
    }

    /// Drop any accumulated state for `key` (dispatch failure or timeout).
    pub fn discard(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Number of instances currently mid-accumulation.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_shared::models::ActionKind;

    fn schedule(id: i32, name: &str) -> OrchestratorAction {
        OrchestratorAction {
            id,
            kind: ActionKind::ScheduleTask {
                name: name.into(),
                version: None,
                input: None,
            },
        }
    }

    #[test]
    fn test_accumulation_preserves_arrival_order() {
        let chunks = PartialChunks::new();
        chunks
            .append("abc", vec![schedule(1, "a1"), schedule(2, "a2")], true)
            .unwrap();
        chunks.append("abc", vec![schedule(3, "a3")], true).unwrap();
        assert_eq!(chunks.len(), 1);

        let (actions, had_partials) = chunks.finish("abc", vec![schedule(4, "a4")]);
        assert!(had_partials);
        assert_eq!(
            actions.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_partial_without_pending_is_not_found() {
        let chunks = PartialChunks::new();
        let err = chunks.append("abc", vec![schedule(1, "a1")], false).unwrap_err();
        assert!(matches!(err, SidecarError::NotFound(_)));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_single_chunk_reply_has_no_partials() {
        let chunks = PartialChunks::new();
        let (actions, had_partials) = chunks.finish("abc", vec![schedule(8, "y")]);
        assert!(!had_partials);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_discard_clears_entry() {
        let chunks = PartialChunks::new();
        chunks.append("abc", vec![schedule(1, "a1")], true).unwrap();
        chunks.discard("abc");
        let (actions, had_partials) = chunks.finish("abc", vec![]);
        assert!(!had_partials);
        assert!(actions.is_empty());
    }
}
