//! Deferred-flush scheduling.
//!
//! Requests issued close together in time are batched by deferring the
//! queue flush a few milliseconds. Each new schedule cancels the
//! previously pending flush and arms a fresh one, so a burst of requests
//! produces exactly one flush after the burst quiets down for a tick.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Delay between the last scheduled request and the flush it triggers.
pub const DEFAULT_TICK: Duration = Duration::from_millis(4);

/// Coalesces schedule calls into a single deferred flush.
pub(crate) struct FlushScheduler {
    tick: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl FlushScheduler {
    pub(crate) fn new(tick: Duration) -> Self {
        Self {
            tick,
            pending: Mutex::new(None),
        }
    }

    /// Arms a deferred callback, cancelling any previously pending one.
    pub(crate) fn schedule<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(previous) = pending.replace(token.clone()) {
                previous.cancel();
            }
        }

        let tick = self.tick;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!("deferred flush superseded");
                }
                _ = sleep(tick) => {
                    callback();
                }
            }
        });
    }

    /// Cancels the pending deferred callback, if any.
    pub(crate) fn cancel(&self) {
        if let Some(token) = self.pending.lock().unwrap().take() {
            token.cancel();
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_tick() {
        let scheduler = FlushScheduler::new(DEFAULT_TICK);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_supersedes_pending_flush() {
        let scheduler = FlushScheduler::new(DEFAULT_TICK);
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&fired);
            scheduler.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            // Within the tick, so every earlier schedule is superseded.
            sleep(Duration::from_millis(1)).await;
        }

        sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_gap_yields_separate_flushes() {
        let scheduler = FlushScheduler::new(DEFAULT_TICK);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sleep(Duration::from_millis(10)).await;

        let counter = Arc::clone(&fired);
        scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sleep(Duration::from_millis(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_flush() {
        let scheduler = FlushScheduler::new(DEFAULT_TICK);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
