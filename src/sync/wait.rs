//! Async Wait Group
//!
//! A counter that tasks can await draining to zero, with an optional
//! timeout. Sessions use it to let `close()` drain in-flight writes; the
//! client uses it to finish outstanding requests before tearing down.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Counts in-flight work items; `wait` resolves once the count is zero.
#[derive(Debug, Default)]
pub struct Wait {
    count: AtomicI64,
    drained: Notify,
}

impl Wait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `n` in-flight items.
    pub fn add(&self, n: i64) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    /// Marks one item finished.
    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves when the count reaches zero (immediately if already there).
    pub async fn wait(&self) {
        loop {
            // register interest before the check to avoid losing a wakeup
            let notified = self.drained.notified();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }

    /// Waits up to `timeout`. Returns `true` when the wait timed out with
    /// items still in flight.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let wait = Wait::new();
        assert!(!wait.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_blocks_until_done() {
        let wait = Arc::new(Wait::new());
        wait.add(2);

        let background = Arc::clone(&wait);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.done();
            background.done();
        });

        assert!(!wait.wait_timeout(Duration::from_secs(1)).await);
        assert_eq!(wait.count(), 0);
    }

    #[tokio::test]
    async fn wait_times_out_with_items_in_flight() {
        let wait = Wait::new();
        wait.add(1);
        assert!(wait.wait_timeout(Duration::from_millis(20)).await);
        assert_eq!(wait.count(), 1);
    }
}
