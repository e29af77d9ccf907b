//! User-facing events produced for the presentation layer.

use serde::{Deserialize, Serialize};

use crate::queue::Message;
use crate::recovery::RecoveryAttemptResult;

/// Something the presentation layer should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// The queue's contents or paused flag changed.
    QueueChanged {
        messages: Vec<Message>,
        paused: bool,
    },
    /// An enqueue was rejected because the queue is full.
    CapacityExceeded { capacity: usize, rejected: String },
    /// Automatic recovery failed; the user has to act.
    AdvisoryShown { text: String },
    /// The error state cleared and the advisory was retracted.
    AdvisoryHidden,
    /// A message was handed to the sender.
    MessageSent { index: u64, text: String },
    /// A recovery pass finished.
    RecoveryAttempted { result: RecoveryAttemptResult },
}

impl ControllerEvent {
    /// Stable short name, used as the structured log action.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QueueChanged { .. } => "queue_changed",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::AdvisoryShown { .. } => "advisory_shown",
            Self::AdvisoryHidden => "advisory_hidden",
            Self::MessageSent { .. } => "message_sent",
            Self::RecoveryAttempted { .. } => "recovery_attempted",
        }
    }
}
