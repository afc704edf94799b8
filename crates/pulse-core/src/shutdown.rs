use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Broadcast-based shutdown coordinator for the background loops.
///
/// Each loop subscribes and `select!`s the returned receiver alongside its
/// tick timer. The daemon triggers shutdown once, then waits for the loops
/// to confirm they drained their in-flight work within a deadline.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    trigger: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    drain_tx: Arc<watch::Sender<usize>>,
    drain_rx: watch::Receiver<usize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        let (drain_tx, drain_rx) = watch::channel(0);
        Self {
            trigger,
            shutting_down: Arc::new(AtomicBool::new(false)),
            drain_tx: Arc::new(drain_tx),
            drain_rx,
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Trigger shutdown for all subscribers. Idempotent.
    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("shutdown signal triggered");
            let _ = self.trigger.send(());
        }
    }

    /// Notify that one loop has finished draining.
    pub fn confirm_drained(&self) {
        self.drain_tx.send_modify(|count| *count += 1);
    }

    /// Wait for `expected` loops to confirm drain, bounded by `timeout`.
    pub async fn wait_for_drain(&mut self, expected: usize, timeout: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let current = *self.drain_rx.borrow();
            if current >= expected {
                info!(count = current, "all loops drained");
                return DrainResult::Complete(current);
            }

            match tokio::time::timeout_at(deadline, self.drain_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    let current = *self.drain_rx.borrow();
                    return DrainResult::Complete(current);
                }
                Err(_) => {
                    let current = *self.drain_rx.borrow();
                    warn!(current, expected, "drain deadline passed");
                    return DrainResult::Timeout {
                        confirmed: current,
                        expected,
                    };
                }
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete(usize),
    Timeout { confirmed: usize, expected: usize },
}

impl DrainResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, DrainResult::Complete(_))
    }
}

/// RAII guard that confirms drain when dropped. Each background loop holds
/// one; dropping it on exit signals completion even on a panic path.
pub struct ShutdownGuard {
    signal: ShutdownSignal,
}

impl ShutdownGuard {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.signal.confirm_drained();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_sets_flag_and_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutting_down());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_shutting_down());
    }

    #[test]
    fn clone_shares_state() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        signal.trigger();
        assert!(clone.is_shutting_down());
    }

    #[tokio::test]
    async fn subscriber_receives_trigger() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        signal.trigger();
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn drain_completes_when_all_guards_drop() {
        let mut signal = ShutdownSignal::new();
        let guard1 = ShutdownGuard::new(signal.clone());
        let guard2 = ShutdownGuard::new(signal.clone());
        signal.trigger();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(guard1);
            drop(guard2);
        });

        let result = signal.wait_for_drain(2, Duration::from_secs(1)).await;
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn drain_times_out_when_a_loop_hangs() {
        let mut signal = ShutdownSignal::new();
        let _held = ShutdownGuard::new(signal.clone());
        signal.trigger();

        let result = signal.wait_for_drain(2, Duration::from_millis(50)).await;
        assert_eq!(
            result,
            DrainResult::Timeout {
                confirmed: 0,
                expected: 2
            }
        );
    }
}
