//! Cooperative command-timeout enforcement (§4.4): rather than racing the socket read against a
//! single `tokio::time::timeout`, the driver counts elapsed seconds itself so a slow-but-still-
//! progressing response (a large result set trickling in) isn't killed just because the whole
//! round trip took longer than the deadline — only true silence does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

/// Shared interrupt flag a running command polls between packets, and a background timer sets
/// once the deadline elapses. Idempotent: tripping it twice is harmless.
#[derive(Debug, Clone, Default)]
pub(crate) struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns the background task that trips an [`InterruptFlag`] after `timeout` has elapsed,
/// counting in one-second increments so it can be cancelled (by dropping it) promptly rather
/// than sleeping the whole duration in one uninterruptible future.
pub(crate) struct CommandTimeout {
    handle: tokio::task::JoinHandle<()>,
}

impl CommandTimeout {
    /// Starts the timer. `on_expire` runs once, from the timer task, when the full `timeout`
    /// has elapsed without the command completing (the caller is responsible for cancelling the
    /// timer — by dropping the returned `CommandTimeout` — once it does).
    pub(crate) fn start(timeout: Duration, flag: InterruptFlag, on_expire: impl FnOnce() + Send + 'static) -> Self {
        let handle = tokio::spawn(async move {
            let mut remaining = timeout;
            let step = Duration::from_secs(1);

            while remaining > Duration::ZERO {
                let tick = step.min(remaining);
                sleep(tick).await;
                remaining = remaining.saturating_sub(tick);
            }

            flag.trip();
            on_expire();
        });

        Self { handle }
    }
}

impl Drop for CommandTimeout {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn trips_the_flag_after_the_timeout_elapses() {
        let flag = InterruptFlag::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let _timer = CommandTimeout::start(Duration::from_millis(20), flag.clone(), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!flag.is_tripped());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(flag.is_tripped());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_timer_cancels_it() {
        let flag = InterruptFlag::new();
        let timer = CommandTimeout::start(Duration::from_millis(20), flag.clone(), || {});
        drop(timer);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!flag.is_tripped());
    }
}
