//! Cooperative cancellation shared by the cycle loop and retry backoffs.
//!
//! A single watch channel carries the stop request. Every sleep in the
//! pipeline goes through [`Shutdown::sleep`], so `stop()` interrupts the
//! inter-cycle wait, retry delays and error backoffs immediately instead of
//! waiting out the remaining interval.

use std::time::Duration;
use tokio::sync::watch;

/// Sender half; owned by the scheduler.
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    /// Create a fresh, un-cancelled signal and a receiver for it.
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Another receiver observing the same signal.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver half; cloned into every task that must observe cancellation.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`, returning `true` when interrupted by
    /// cancellation and `false` when the full duration elapsed.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = self.rx.changed() => match changed {
                    Ok(()) if *self.rx.borrow() => return true,
                    Ok(()) => continue,
                    // Sender dropped: treat as cancelled rather than hang.
                    Err(_) => return true,
                },
            }
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_runs_to_completion_without_cancel() {
        let (_signal, mut shutdown) = ShutdownSignal::new();
        let interrupted = shutdown.sleep(Duration::from_millis(10)).await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep_early() {
        let (signal, mut shutdown) = ShutdownSignal::new();
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signal.cancel();
        });

        let interrupted = shutdown.sleep(Duration::from_secs(30)).await;
        assert!(interrupted);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sleep_after_cancel_returns_immediately() {
        let (signal, mut shutdown) = ShutdownSignal::new();
        signal.cancel();
        assert!(shutdown.sleep(Duration::from_secs(60)).await);
        assert!(shutdown.is_cancelled());
    }
}
