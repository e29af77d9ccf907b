//! Busy/idle classification of the remote agent.
//!
//! The agent's activity is never reported directly. [`BusyDetector`] infers
//! it from an ordered set of independently checkable [`BusySignal`]s: any
//! signal present means [`BusyState::Busy`], none means
//! [`BusyState::Idle`]. A missing or renamed signal degrades one check, not
//! the whole classification.
//!
//! Reporting busy for a tick too long is harmless; reporting idle too early
//! lets the queue send on top of a running turn. The detector therefore
//! leans towards busy, most visibly through the post-send settle window
//! (see [`BusyDetector::expect_busy_until`]).

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::host::{Element, Environment, EnvironmentSnapshot};

/// Inferred activity state of the remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyState {
    Idle,
    Busy,
}

/// Edge between two consecutive classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BusyState,
    pub to: BusyState,
}

impl Transition {
    /// The only edge that drains the outbound queue.
    pub fn is_busy_to_idle(&self) -> bool {
        self.from == BusyState::Busy && self.to == BusyState::Idle
    }
}

/// One heuristic busy indicator.
pub trait BusySignal: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn is_present(&self, snapshot: &EnvironmentSnapshot) -> bool;
}

/// A busy signal that is present when one element is visible.
#[derive(Debug, Clone, Copy)]
pub struct ElementSignal {
    name: &'static str,
    element: Element,
}

impl ElementSignal {
    pub const fn new(name: &'static str, element: Element) -> Self {
        Self { name, element }
    }
}

impl BusySignal for ElementSignal {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_present(&self, snapshot: &EnvironmentSnapshot) -> bool {
        snapshot.is_visible(self.element)
    }
}

/// The stock signal set, in evaluation order.
///
/// [`Element::DimmedSendButton`] is intentionally absent: it is purely
/// cosmetic and hosts leave it set after error recovery.
pub fn default_signals() -> Vec<Box<dyn BusySignal>> {
    vec![
        Box::new(ElementSignal::new(
            "progress_indicator",
            Element::ProgressIndicator,
        )),
        Box::new(ElementSignal::new("cancel_control", Element::StopControl)),
        Box::new(ElementSignal::new(
            "generating_indicator",
            Element::GeneratingIndicator,
        )),
        Box::new(ElementSignal::new(
            "streaming_cursor",
            Element::StreamingCursor,
        )),
    ]
}

/// Result of one [`BusyDetector::observe`] call.
#[derive(Debug, Clone)]
pub struct Observation {
    pub snapshot: EnvironmentSnapshot,
    pub transition: Transition,
    /// Whether the input unlock side effect changed anything.
    pub unlocked_input: bool,
}

/// Stateful wrapper that turns classifications into edges.
pub struct BusyDetector {
    signals: Vec<Box<dyn BusySignal>>,
    previous: BusyState,
    /// Post-send settle deadline; raw idle reads as busy until then.
    expect_busy_until: Option<Instant>,
}

impl std::fmt::Debug for BusyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.signals.iter().map(|s| s.name()).collect();
        f.debug_struct("BusyDetector")
            .field("signals", &names)
            .field("previous", &self.previous)
            .field("expect_busy_until", &self.expect_busy_until)
            .finish()
    }
}

impl Default for BusyDetector {
    fn default() -> Self {
        Self::new(default_signals())
    }
}

impl BusyDetector {
    /// Create a detector with a custom signal set. Starts idle.
    pub fn new(signals: Vec<Box<dyn BusySignal>>) -> Self {
        Self {
            signals,
            previous: BusyState::Idle,
            expect_busy_until: None,
        }
    }

    /// Append a signal to the end of the evaluation order.
    pub fn push_signal(&mut self, signal: Box<dyn BusySignal>) {
        self.signals.push(signal);
    }

    /// Pure classification of one snapshot.
    pub fn classify(&self, snapshot: &EnvironmentSnapshot) -> BusyState {
        match self.signals.iter().find(|s| s.is_present(snapshot)) {
            Some(signal) => {
                tracing::trace!(signal = signal.name(), "busy signal present");
                BusyState::Busy
            }
            None => BusyState::Idle,
        }
    }

    /// The state reported by the last transition.
    pub fn current(&self) -> BusyState {
        self.previous
    }

    /// Treat the agent as busy until `deadline` unless a real busy signal
    /// shows up first. Called right after a message is handed to the sender.
    pub fn expect_busy_until(&mut self, deadline: Instant) {
        self.expect_busy_until = Some(deadline);
        self.previous = BusyState::Busy;
    }

    /// Whether a post-send settle window is open.
    pub fn is_settling(&self) -> bool {
        self.expect_busy_until.is_some()
    }

    /// Classify `snapshot` against the previous value and record the result.
    pub fn update_and_get_transition(
        &mut self,
        snapshot: &EnvironmentSnapshot,
        now: Instant,
    ) -> Transition {
        let raw = self.classify(snapshot);
        let effective = match (raw, self.expect_busy_until) {
            (BusyState::Busy, _) => {
                self.expect_busy_until = None;
                BusyState::Busy
            }
            (BusyState::Idle, Some(deadline)) if now < deadline => BusyState::Busy,
            (BusyState::Idle, _) => {
                self.expect_busy_until = None;
                BusyState::Idle
            }
        };
        let transition = Transition {
            from: self.previous,
            to: effective,
        };
        self.previous = effective;
        transition
    }

    /// Snapshot the environment, undo stale input locks, and classify.
    pub fn observe(&mut self, env: &dyn Environment, now: Instant) -> Observation {
        let mut snapshot = env.snapshot();
        let unlocked_input = snapshot.input.is_locked() && env.unlock_input();
        if unlocked_input {
            tracing::debug!(
                disabled = snapshot.input.disabled,
                read_only = snapshot.input.read_only,
                "cleared stale input lock"
            );
            snapshot.input = Default::default();
        }
        let transition = self.update_and_get_transition(&snapshot, now);
        Observation {
            snapshot,
            transition,
            unlocked_input,
        }
    }

    /// Forget edge history, e.g. when the conversation view changes.
    pub fn reset(&mut self) {
        self.previous = BusyState::Idle;
        self.expect_busy_until = None;
    }
}
