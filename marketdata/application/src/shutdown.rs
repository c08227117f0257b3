use std::time::Duration;
use tokio::sync::watch;

/// Create a linked trigger/observer pair for process shutdown.
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Owned by the process entry point; flips every observer at once.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellable-delay primitive handed to every suspension point
/// (retry backoff, rate-limiter wait, inter-symbol pacing, the
/// scheduler's wait for the next fire time).
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered. A dropped handle counts as
    /// triggered so loops cannot outlive the entry point.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Sleep for `duration` unless shutdown wins the race.
    /// Returns `false` when interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.triggered() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_completes_when_not_triggered() {
        let (_handle, shutdown) = channel();

        assert!(shutdown.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_trigger_interrupts_sleep_promptly() {
        let (handle, shutdown) = channel();

        let started = Instant::now();
        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.trigger();

        assert!(!sleeper.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_triggered_state_is_observable() {
        let (handle, shutdown) = channel();

        assert!(!shutdown.is_triggered());
        handle.trigger();
        assert!(shutdown.is_triggered());
        assert!(!shutdown.sleep(Duration::from_millis(1)).await);
    }
}
