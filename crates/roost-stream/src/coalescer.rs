//! Interval-based flush coalescing.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default flush interval, roughly one display frame.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// Coalesces bursts of notifications into at most one flush per interval.
///
/// `notify` marks work pending and schedules a flush one interval out;
/// further notifications inside that window collapse into the already
/// scheduled flush. The flush closure runs on a spawned task, so it reads
/// whatever state is current at flush time rather than at notify time.
///
/// Cancelling discards any pending flush instead of running it, and turns
/// every later `notify` into a no-op. The primitive is independent of any
/// display machinery; the interval is whatever the caller passes.
pub struct Coalescer {
    interval: Duration,
    pending: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Coalescer {
    /// Creates a coalescer with its own cancellation token.
    pub fn new(interval: Duration) -> Self {
        Self::with_cancel(interval, CancellationToken::new())
    }

    /// Creates a coalescer discarding pending flushes when `cancel` fires.
    ///
    /// Callers that stop the owning stream keep a clone of the token so a
    /// flush scheduled before the stop never lands after it.
    pub fn with_cancel(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            pending: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    /// Requests a flush, collapsing with any flush already scheduled.
    ///
    /// The first call in an interval spawns a task that sleeps out the
    /// interval and then runs `flush`; calls made while that task is
    /// sleeping are dropped. After cancellation this does nothing.
    pub fn notify<F, Fut>(&self, flush: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.pending.clone();
        let cancel = self.cancel.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    pending.store(false, Ordering::SeqCst);
                }
                _ = tokio::time::sleep(interval) => {
                    // Clear before flushing so a notify that arrives during
                    // the flush opens the next window.
                    pending.store(false, Ordering::SeqCst);
                    if cancel.is_cancelled() {
                        return;
                    }
                    flush().await;
                }
            }
        });
    }

    /// Discards any pending flush and disables future notifications.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether a flush is currently scheduled.
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// The configured flush interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_flush(counter: Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_burst_collapses_to_one_flush() {
        let coalescer = Coalescer::new(Duration::from_millis(20));
        let flushes = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            coalescer.notify(counting_flush(flushes.clone()));
        }
        assert!(coalescer.has_pending());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test]
    async fn test_separate_windows_flush_separately() {
        let coalescer = Coalescer::new(Duration::from_millis(10));
        let flushes = Arc::new(AtomicUsize::new(0));

        coalescer.notify(counting_flush(flushes.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        coalescer.notify(counting_flush(flushes.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_discards_pending_flush() {
        let coalescer = Coalescer::new(Duration::from_millis(20));
        let flushes = Arc::new(AtomicUsize::new(0));

        coalescer.notify(counting_flush(flushes.clone()));
        coalescer.cancel();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(flushes.load(Ordering::SeqCst), 0);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test]
    async fn test_notify_after_cancel_is_noop() {
        let coalescer = Coalescer::new(Duration::from_millis(5));
        let flushes = Arc::new(AtomicUsize::new(0));

        coalescer.cancel();
        coalescer.notify(counting_flush(flushes.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(flushes.load(Ordering::SeqCst), 0);
    }
}
