//! Restart barrier between the Host and the external MCP server.
//!
//! While a server-side restart is pending, status callers block until the
//! new process identifies itself via `mcpReady`. Only one restart can be
//! pending; arming again overwrites.

use std::time::Duration;
use tokio::sync::watch;

pub struct StatusBarrier {
    pending: watch::Sender<bool>,
}

impl StatusBarrier {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(false);
        Self { pending }
    }

    /// Close the barrier: a restart is now pending.
    pub fn expect_restart(&self) {
        self.pending.send_replace(true);
    }

    /// Open the barrier: the new server is up. Waiters are released and
    /// future waiters pass through immediately.
    pub fn signal_ready(&self) {
        self.pending.send_replace(false);
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.borrow()
    }

    /// `true` when no restart is pending or one completed within `timeout`;
    /// `false` on timeout. Callers may poll repeatedly.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.pending.subscribe();
        if !*rx.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, rx.wait_for(|pending| !pending))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }
}

impl Default for StatusBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_barrier_passes_immediately() {
        let barrier = StatusBarrier::new();
        assert!(barrier.wait_for_ready(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_pending_barrier_times_out() {
        let barrier = StatusBarrier::new();
        barrier.expect_restart();
        assert!(barrier.is_pending());
        assert!(!barrier.wait_for_ready(Duration::from_millis(20)).await);
        // Still pending after a timed-out wait; callers may poll again.
        assert!(barrier.is_pending());
    }

    #[tokio::test]
    async fn test_signal_releases_waiter() {
        let barrier = Arc::new(StatusBarrier::new());
        barrier.expect_restart();

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_for_ready(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.signal_ready();

        assert!(waiter.await.unwrap());
        assert!(!barrier.is_pending());
    }

    #[tokio::test]
    async fn test_latest_restart_wins() {
        let barrier = StatusBarrier::new();
        barrier.expect_restart();
        barrier.expect_restart();
        barrier.signal_ready();
        // One signal opens the barrier no matter how many times it was armed.
        assert!(barrier.wait_for_ready(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_signal_without_pending_is_noop() {
        let barrier = StatusBarrier::new();
        barrier.signal_ready();
        assert!(!barrier.is_pending());
        assert!(barrier.wait_for_ready(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_multiple_waiters_all_release() {
        let barrier = Arc::new(StatusBarrier::new());
        barrier.expect_restart();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                tokio::spawn(async move { barrier.wait_for_ready(Duration::from_secs(5)).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.signal_ready();

        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
    }
}
