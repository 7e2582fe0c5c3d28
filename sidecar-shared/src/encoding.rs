//! # Pooled Base-64 Payload Encoding
//!
//! Some channels carry serialized messages as base-64 strings: opaque
//! `GenericEvent` payloads and the `HistoryState` runtime-state snapshot.
//! Encoding goes through a shared pool of size-bounded buffers so hot dispatch
//! paths don't allocate a scratch buffer per call.

use std::sync::{Mutex, OnceLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use prost::Message;

use crate::error::{SidecarError, SidecarResult};

/// Buffers above this capacity are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 1024 * 1024;

/// Upper bound on idle pooled buffers.
const MAX_POOLED_BUFFERS: usize = 16;

/// A thread-safe pool of reusable byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    /// Take a cleared buffer with at least `min_capacity` bytes reserved.
    pub fn acquire(&self, min_capacity: usize) -> BytesMut {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        match buffers.pop() {
            Some(mut buf) => {
                if buf.capacity() < min_capacity {
                    buf.reserve(min_capacity - buf.capacity());
                }
                buf
            }
            None => BytesMut::with_capacity(min_capacity),
        }
    }

    /// Return a buffer to the pool. Oversize buffers are dropped so one
    /// large payload doesn't pin its allocation forever.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if buffers.len() < MAX_POOLED_BUFFERS {
            buffers.push(buf);
        }
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn shared_pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(BufferPool::default)
}

/// Serialize a protobuf message and base-64 encode it, using the shared
/// buffer pool for the intermediate bytes.
pub fn encode_message_base64<M: Message>(message: &M) -> SidecarResult<String> {
    let mut buf = shared_pool().acquire(message.encoded_len());
    let result = message.encode(&mut buf);
    let encoded = match result {
        Ok(()) => Ok(BASE64.encode(&buf)),
        Err(e) => Err(SidecarError::from(e)),
    };
    shared_pool().release(buf);
    encoded
}

/// Decode a base-64 string back into a protobuf message.
pub fn decode_message_base64<M: Message + Default>(data: &str) -> SidecarResult<M> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| SidecarError::Serialization(format!("invalid base64 payload: {e}")))?;
    M::decode(bytes.as_slice()).map_err(SidecarError::from)
}

/// Base-64 encode raw bytes (opaque event payloads).
pub fn encode_bytes_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode a base-64 string into raw bytes.
pub fn decode_bytes_base64(data: &str) -> SidecarResult<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| SidecarError::Serialization(format!("invalid base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::Timestamp;

    #[test]
    fn test_message_round_trip() {
        let message = Timestamp {
            seconds: 1_709_812_496,
            nanos: 789_012_000,
        };
        let encoded = encode_message_base64(&message).unwrap();
        let decoded: Timestamp = decode_message_base64(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_bytes_round_trip() {
        let data = b"opaque payload";
        let encoded = encode_bytes_base64(data);
        assert_eq!(decode_bytes_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_invalid_base64_is_serialization_error() {
        let err = decode_bytes_base64("not base64!!!").unwrap_err();
        assert!(matches!(err, SidecarError::Serialization(_)));
    }

    #[test]
    fn test_pool_reuses_buffers() {
        let pool = BufferPool::default();
        let buf = pool.acquire(128);
        pool.release(buf);
        assert_eq!(pool.idle_count(), 1);
        let buf = pool.acquire(64);
        assert_eq!(pool.idle_count(), 0);
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn test_pool_drops_oversize_buffers() {
        let pool = BufferPool::default();
        let buf = pool.acquire(MAX_POOLED_CAPACITY + 1);
        pool.release(buf);
        assert_eq!(pool.idle_count(), 0);
    }
}
