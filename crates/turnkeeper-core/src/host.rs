//! Collaborator seams between the controller and the host it runs inside.
//!
//! The controller never touches the host UI or the remote conversation
//! directly. Everything it needs is expressed through three traits:
//!
//! - [`Environment`]: snapshots of what is currently visible, the input
//!   unlock side effect, and the native control locators.
//! - [`SessionAccessor`]: read-only [`SessionContext`] snapshots plus the
//!   enumerated stale-marker clears used by recovery.
//! - [`MessageSender`]: the fire-and-forget send path.
//!
//! All three take `&self` and are `Send + Sync` so one host object can be
//! shared as `Arc<dyn Trait>` between the controller task and whatever
//! delivers change notifications. Implementations use interior mutability.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An element the host can report as visible in an [`EnvironmentSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    /// Spinner or progress bar attached to the pending response.
    ProgressIndicator,
    /// Cancel / stop-generating control.
    StopControl,
    /// Textual "generating…" indicator.
    GeneratingIndicator,
    /// Blinking cursor at the tail of a streaming response.
    StreamingCursor,
    /// Inline error banner on the last exchange.
    ErrorBanner,
    /// Dimmed send button. Style-only and known to stick after recovery, so
    /// it never counts as a busy signal.
    DimmedSendButton,
}

/// Disabled/read-only state of the primary input control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputState {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub read_only: bool,
}

impl InputState {
    /// Whether the user is currently prevented from typing.
    pub fn is_locked(&self) -> bool {
        self.disabled || self.read_only
    }
}

/// Point-in-time view of the host environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Elements currently visible.
    #[serde(default)]
    pub visible: BTreeSet<Element>,
    /// Primary input control state.
    #[serde(default)]
    pub input: InputState,
}

impl EnvironmentSnapshot {
    /// Build a snapshot with the given visible elements and an unlocked input.
    pub fn with_visible(elements: impl IntoIterator<Item = Element>) -> Self {
        Self {
            visible: elements.into_iter().collect(),
            input: InputState::default(),
        }
    }

    pub fn is_visible(&self, element: Element) -> bool {
        self.visible.contains(&element)
    }
}

/// Native host controls the recovery engine knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeControl {
    /// Retry / regenerate control shown after a failed exchange.
    Resend,
    /// Edit control on the last user-authored message.
    EditLastMessage,
    /// Editable text field shown in edit mode.
    EditField,
    /// Save-and-resubmit control shown in edit mode.
    SaveAndResend,
}

impl NativeControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resend => "resend",
            Self::EditLastMessage => "edit_last_message",
            Self::EditField => "edit_field",
            Self::SaveAndResend => "save_and_resend",
        }
    }
}

/// A located, currently visible native control.
///
/// `id` is whatever the host needs to address the control again; the
/// controller treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    pub control: NativeControl,
    pub id: String,
}

/// Stale session markers the state-clear strategy is allowed to reset.
///
/// This is the complete, fixed set of fields the controller ever writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleMarker {
    /// A request is recorded as in flight.
    InFlight,
    /// A response is recorded as streaming.
    Streaming,
    /// A placeholder assistant entry left behind by an aborted stream.
    OrphanedStreamEntry,
    /// A stored error from the last exchange.
    StoredError,
    /// The conversation is flagged as failed.
    Failed,
}

impl StaleMarker {
    /// Every marker, in the order state-clear visits them.
    pub const ALL: [StaleMarker; 5] = [
        StaleMarker::InFlight,
        StaleMarker::Streaming,
        StaleMarker::OrphanedStreamEntry,
        StaleMarker::StoredError,
        StaleMarker::Failed,
    ];

    /// Markers that describe work in progress. Only an error when the agent
    /// reads idle (orphaned).
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::InFlight | Self::Streaming | Self::OrphanedStreamEntry
        )
    }

    /// Markers that flag the conversation as failed outright.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::StoredError | Self::Failed)
    }
}

/// Read-only snapshot of the externally owned conversation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub last_user_message_id: Option<String>,
    /// Text of the last user-authored message; the edit-and-resend strategy
    /// re-submits it.
    #[serde(default)]
    pub last_user_message_text: Option<String>,
    /// Stale markers currently set.
    #[serde(default)]
    pub markers: BTreeSet<StaleMarker>,
}

impl SessionContext {
    pub fn has_failure_marker(&self) -> bool {
        self.markers.iter().any(StaleMarker::is_failure)
    }

    pub fn has_in_flight_marker(&self) -> bool {
        self.markers.iter().any(StaleMarker::is_in_flight)
    }
}

/// Host environment queries and native actions.
pub trait Environment: Send + Sync {
    /// Capture what is visible right now.
    fn snapshot(&self) -> EnvironmentSnapshot;

    /// Clear stale disabled/read-only flags on the primary input.
    ///
    /// Returns `true` if anything changed.
    fn unlock_input(&self) -> bool;

    /// Locate a visible native control.
    fn find(&self, control: NativeControl) -> Option<ControlHandle>;

    /// Invoke a previously located control. Returns `false` if the control
    /// vanished or refused the action.
    fn invoke(&self, handle: &ControlHandle) -> bool;

    /// Replace the contents of an editable field.
    fn inject_text(&self, handle: &ControlHandle, text: &str) -> bool;
}

/// Access to the externally owned session state.
pub trait SessionAccessor: Send + Sync {
    /// Fresh read-only snapshot.
    fn context(&self) -> SessionContext;

    /// Reset one stale marker to its default.
    ///
    /// Returns `true` if the marker was set before the call.
    fn clear_marker(&self, marker: StaleMarker) -> bool;
}

/// Fire-and-forget delivery of a user message to the remote agent.
pub trait MessageSender: Send + Sync {
    fn send(&self, text: &str, context: &SessionContext);
}
