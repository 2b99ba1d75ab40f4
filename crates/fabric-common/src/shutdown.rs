//! Single-use, broadcast-style shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;

/// A shutdown signal that fires at most once.
///
/// Clones share the same underlying state: triggering any clone is observed
/// by every task waiting on any other clone, including tasks that start
/// waiting after the signal has fired.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl ShutdownSignal {
    /// Create a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    ///
    /// Returns `true` for the call that actually fired it and `false` for
    /// every later call.
    pub fn trigger(&self) -> bool {
        let fired = !self.tx.send_replace(true);
        if fired {
            tracing::debug!("Shutdown signal triggered");
        }
        fired
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_is_single_use() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn all_waiters_observe_trigger() {
        let signal = ShutdownSignal::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        signal.trigger();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter timed out")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn late_waiter_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("late waiter should not block");
    }
}
