//! # History-Stream Buffer
//!
//! When the worker supports streamed history and an orchestration's past
//! events exceed the embed threshold, the dispatch path parks the serialized
//! events here and flags the work item `requires_history_streaming`. The
//! worker then fetches them through `StreamInstanceHistory`, which frames
//! them into chunks at event granularity.
//!
//! Entries are cleared when the correlation resolves or the dispatch fails,
//! so the buffer cannot grow past the set of in-flight orchestrator work
//! items.

use dashmap::DashMap;
use prost::Message;

use sidecar_shared::proto::v1 as pb;

/// Parked past-event histories keyed by the orchestrator correlation key.
#[derive(Debug)]
pub struct HistoryStreamBuffer {
    entries: DashMap<String, Vec<pb::HistoryEvent>>,
    chunk_max_bytes: usize,
}

impl HistoryStreamBuffer {
    pub fn new(chunk_max_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            chunk_max_bytes,
        }
    }

    /// Park the past events for an in-flight work item. A re-dispatch of the
    /// same instance replaces the previous entry.
    pub fn park(&self, key: &str, events: Vec<pb::HistoryEvent>) {
        self.entries.insert(key.to_owned(), events);
    }

    /// Take the parked events for `key`, leaving no entry behind.
    pub fn take(&self, key: &str) -> Option<Vec<pb::HistoryEvent>> {
        self.entries.remove(key).map(|(_, events)| events)
    }

    /// Drop the entry for `key`, if any.
    pub fn discard(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frame events into chunks of at most `chunk_max_bytes`, never
    /// splitting an event. An event larger than the bound on its own is
    /// still emitted, in its own chunk; the bound applies only across event
    /// boundaries.
    pub fn chunk_events(&self, events: Vec<pb::HistoryEvent>) -> Vec<pb::HistoryChunk> {
        let mut chunks = Vec::new();
        let mut current = Vec::new();
        let mut current_size = 0usize;

        for event in events {
            let size = event.encoded_len();
            if !current.is_empty() && current_size + size > self.chunk_max_bytes {
                chunks.push(pb::HistoryChunk {
                    events: std::mem::take(&mut current),
                });
                current_size = 0;
            }
            current_size += size;
            current.push(event);
        }

        if !current.is_empty() {
            chunks.push(pb::HistoryChunk { events: current });
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An event whose encoded size is roughly `payload` bytes.
    fn event_with_payload(event_id: i32, payload: usize) -> pb::HistoryEvent {
        pb::HistoryEvent {
            event_id,
            timestamp: None,
            event: Some(pb::history_event::Event::GenericEvent(pb::GenericEvent {
                data: "x".repeat(payload),
            })),
        }
    }

    #[test]
    fn test_events_fit_in_one_chunk() {
        let buffer = HistoryStreamBuffer::new(1024);
        let events = vec![event_with_payload(1, 100), event_with_payload(2, 100)];
        let chunks = buffer.chunk_events(events);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].events.len(), 2);
    }

    #[test]
    fn test_flush_before_crossing_bound() {
        let buffer = HistoryStreamBuffer::new(250);
        let events = vec![
            event_with_payload(1, 100),
            event_with_payload(2, 100),
            event_with_payload(3, 100),
        ];
        let chunks = buffer.chunk_events(events);
        // Two ~100-byte events fit under 250; the third starts a new chunk.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].events.len(), 2);
        assert_eq!(chunks[1].events.len(), 1);
        assert_eq!(chunks[1].events[0].event_id, 3);
    }

    #[test]
    fn test_oversize_event_goes_out_alone() {
        let buffer = HistoryStreamBuffer::new(64);
        let events = vec![
            event_with_payload(1, 10),
            event_with_payload(2, 500),
            event_with_payload(3, 10),
        ];
        let chunks = buffer.chunk_events(events);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].events.len(), 1);
        assert_eq!(chunks[1].events[0].event_id, 2);
    }

    #[test]
    fn test_no_events_no_chunks() {
        let buffer = HistoryStreamBuffer::new(1024);
        assert!(buffer.chunk_events(vec![]).is_empty());
    }

    #[test]
    fn test_park_take_discard() {
        let buffer = HistoryStreamBuffer::new(1024);
        buffer.park("abc", vec![event_with_payload(1, 10)]);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.take("abc").is_some());
        assert!(buffer.take("abc").is_none());

        buffer.park("def", vec![event_with_payload(2, 10)]);
        buffer.discard("def");
        assert!(buffer.is_empty());
    }
}
