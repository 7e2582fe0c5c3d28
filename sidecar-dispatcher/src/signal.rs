//! # Traffic Signal
//!
//! A one-bit manual-reset latch indicating whether a worker is connected.
//! Dispatchers block on it before fetching; the gRPC bridge sets it when the
//! worker opens the work-item stream and resets it when the stream closes.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Manual-reset event gating dispatcher fetching on worker connectedness.
///
/// Clones share the same underlying state. Safe under concurrent `wait` and
/// `set`/`reset`.
#[derive(Debug, Clone)]
pub struct TrafficSignal {
    state: watch::Sender<bool>,
}

impl Default for TrafficSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficSignal {
    /// A new signal in the reset state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Transition to the set state. Idempotent; returns `true` iff this
    /// caller performed the reset → set transition.
    pub fn set(&self) -> bool {
        self.state.send_if_modified(|connected| {
            if *connected {
                false
            } else {
                *connected = true;
                true
            }
        })
    }

    /// Transition to the reset state. Idempotent.
    pub fn reset(&self) {
        self.state.send_if_modified(|connected| {
            if *connected {
                *connected = false;
                true
            } else {
                false
            }
        });
    }

    /// Current state without waiting.
    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Block until the signal is set, the timeout elapses, or `cancel`
    /// fires. Returns `true` iff the signal was observed set.
    pub async fn wait(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let mut rx = self.state.subscribe();
        tokio::select! {
            result = tokio::time::timeout(timeout, rx.wait_for(|connected| *connected)) => {
                matches!(result, Ok(Ok(_)))
            }
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_reports_transition() {
        let signal = TrafficSignal::new();
        assert!(!signal.is_set());
        assert!(signal.set());
        assert!(signal.is_set());
        // Already set: no transition.
        assert!(!signal.set());
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let signal = TrafficSignal::new();
        signal.reset();
        assert!(!signal.is_set());
        signal.set();
        signal.reset();
        assert!(!signal.is_set());
        signal.reset();
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_set() {
        let signal = TrafficSignal::new();
        signal.set();
        let cancel = CancellationToken::new();
        assert!(signal.wait(Duration::from_millis(10), &cancel).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_when_reset() {
        let signal = TrafficSignal::new();
        let cancel = CancellationToken::new();
        assert!(!signal.wait(Duration::from_millis(20), &cancel).await);
    }

    #[tokio::test]
    async fn test_wait_observes_concurrent_set() {
        let signal = TrafficSignal::new();
        let waiter = signal.clone();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(async move {
            waiter.wait(Duration::from_secs(5), &CancellationToken::new()).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set();
        assert!(handle.await.unwrap());
        drop(cancel);
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let signal = TrafficSignal::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!signal.wait(Duration::from_secs(5), &cancel).await);
    }

    #[tokio::test]
    async fn test_only_one_concurrent_setter_wins() {
        let signal = TrafficSignal::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.set() }));
        }
        let mut transitions = 0;
        for handle in handles {
            if handle.await.unwrap() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
        assert!(signal.is_set());
    }
}
