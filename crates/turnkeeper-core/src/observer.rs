//! Debounced change observer.
//!
//! The host reports environment mutations through a cloneable
//! [`ChangeNotifier`]. [`SignalObserver::next_tick`] coalesces bursts of
//! notifications into a single tick that fires once no notification has
//! arrived for the configured quiet period.
//!
//! A host that changes continuously starves the tick. Callers pair the
//! observer with a coarse periodic poll so the staleness window stays bounded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// Handle the host uses to report environment changes.
///
/// Cheap to clone and safe to call from any thread.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: mpsc::UnboundedSender<()>,
}

impl ChangeNotifier {
    /// Record that something in the environment changed.
    ///
    /// Never blocks. Notifications after the observer is dropped are ignored.
    pub fn on_environment_changed(&self) {
        let _ = self.tx.send(());
    }
}

/// Coalesces change notifications into debounced ticks.
#[derive(Debug)]
pub struct SignalObserver {
    rx: mpsc::UnboundedReceiver<()>,
    window: Duration,
    /// When the pending tick fires, if a burst is in progress.
    deadline: Option<Instant>,
}

impl SignalObserver {
    /// Create an observer with the given quiet period and its notifier.
    pub fn new(window: Duration) -> (Self, ChangeNotifier) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                window,
                deadline: None,
            },
            ChangeNotifier { tx },
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a burst is in progress and a tick is pending.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Wait for the next debounced tick.
    ///
    /// Returns `None` once every notifier is dropped and no tick is pending.
    /// A tick already pending when the last notifier goes away is still
    /// delivered first.
    ///
    /// Cancel-safe: the pending deadline lives in `self`, so dropping this
    /// future inside `tokio::select!` loses no notifications.
    pub async fn next_tick(&mut self) -> Option<()> {
        loop {
            match self.deadline {
                None => {
                    self.rx.recv().await?;
                    self.deadline = Some(Instant::now() + self.window);
                }
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            self.deadline = None;
                            return Some(());
                        }
                        msg = self.rx.recv() => match msg {
                            Some(()) => self.deadline = Some(Instant::now() + self.window),
                            None => {
                                self.deadline = None;
                                return Some(());
                            }
                        },
                    }
                }
            }
        }
    }
}
