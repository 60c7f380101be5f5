//! Backs off while the account is in use elsewhere.
//!
//! The gateway session raises a signal whenever it sees a message authored by
//! the account. Signals land in a single slot: a burst collapses into one
//! pending signal, observed at the next checkpoint of the purge loop. Once
//! observed, the loop sits out a quiet window that restarts on every further
//! signal and only ends after a full window without one.

use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(30);

/// Result of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// No signal was pending.
    Clear,
    /// A quiet window was sat out; carries its total length.
    Resumed(Duration),
    Cancelled,
}

/// Producer side, owned by the event context. Never blocks.
#[derive(Clone)]
pub struct PauseHandle {
    tx: mpsc::Sender<()>,
}

impl PauseHandle {
    pub fn signal(&self) {
        match self.tx.try_send(()) {
            // A full slot already means "pause"; nothing to add.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => debug!("Pause: controller gone, dropping signal"),
        }
    }
}

/// Consumer side, owned by the purge loop.
pub struct PauseController {
    rx: mpsc::Receiver<()>,
    quiet_window: Duration,
}

impl PauseController {
    pub fn new(quiet_window: Duration) -> (Self, PauseHandle) {
        let (tx, rx) = mpsc::channel(1);
        (Self { rx, quiet_window }, PauseHandle { tx })
    }

    fn take_pending(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Non-blocking unless a signal is pending, in which case this waits out
    /// the quiet window. Cancellation cuts the wait short.
    pub async fn checkpoint(&mut self, cancel: &CancellationToken) -> Checkpoint {
        if cancel.is_cancelled() {
            return Checkpoint::Cancelled;
        }
        if !self.take_pending() {
            return Checkpoint::Clear;
        }

        let started = Instant::now();
        info!(
            "Self activity detected, pausing for {}",
            humantime::format_duration(self.quiet_window)
        );
        let mut deadline = started + self.quiet_window;
        let mut producer_alive = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Checkpoint::Cancelled,
                _ = sleep_until(deadline) => break,
                signal = self.rx.recv(), if producer_alive => match signal {
                    Some(()) => {
                        debug!("Pause: further self activity, restarting quiet window");
                        deadline = Instant::now() + self.quiet_window;
                    }
                    None => producer_alive = false,
                },
            }
        }

        let paused = started.elapsed();
        info!("Resuming after {}", humantime::format_duration(paused));
        Checkpoint::Resumed(paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clear_without_signal() {
        let (mut pause, _handle) = PauseController::new(DEFAULT_QUIET_WINDOW);
        let cancel = CancellationToken::new();
        assert_eq!(pause.checkpoint(&cancel).await, Checkpoint::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_signal_waits_one_window() {
        let (mut pause, handle) = PauseController::new(DEFAULT_QUIET_WINDOW);
        let cancel = CancellationToken::new();

        handle.signal();
        assert_eq!(
            pause.checkpoint(&cancel).await,
            Checkpoint::Resumed(DEFAULT_QUIET_WINDOW)
        );
        // The signal was consumed.
        assert_eq!(pause.checkpoint(&cancel).await, Checkpoint::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_before_checkpoint_coalesces() {
        let (mut pause, handle) = PauseController::new(DEFAULT_QUIET_WINDOW);
        let cancel = CancellationToken::new();

        for _ in 0..10 {
            handle.signal();
        }
        assert_eq!(
            pause.checkpoint(&cancel).await,
            Checkpoint::Resumed(DEFAULT_QUIET_WINDOW)
        );
        assert_eq!(pause.checkpoint(&cancel).await, Checkpoint::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_during_window_extend_one_pause() {
        let (mut pause, handle) = PauseController::new(DEFAULT_QUIET_WINDOW);
        let cancel = CancellationToken::new();

        handle.signal();
        let producer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(9)).await;
                handle.signal();
            }
            handle
        });

        // Signals at 0s, 9s, 18s and 27s: last signal + one window.
        assert_eq!(
            pause.checkpoint(&cancel).await,
            Checkpoint::Resumed(Duration::from_secs(27) + DEFAULT_QUIET_WINDOW)
        );
        let _handle = producer.await.unwrap();
        assert_eq!(pause.checkpoint(&cancel).await, Checkpoint::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_preempts_window() {
        let (mut pause, handle) = PauseController::new(DEFAULT_QUIET_WINDOW);
        let cancel = CancellationToken::new();

        handle.signal();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        assert_eq!(pause.checkpoint(&cancel).await, Checkpoint::Cancelled);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_producer_still_finishes_window() {
        let (mut pause, handle) = PauseController::new(DEFAULT_QUIET_WINDOW);
        let cancel = CancellationToken::new();

        handle.signal();
        drop(handle);
        assert_eq!(
            pause.checkpoint(&cancel).await,
            Checkpoint::Resumed(DEFAULT_QUIET_WINDOW)
        );
    }
}
