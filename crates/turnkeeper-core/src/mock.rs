//! In-memory host for tests and scenario replay.
//!
//! [`MockHost`] implements [`Environment`], [`SessionAccessor`] and
//! [`MessageSender`] over one shared state, records every send, control
//! invocation and text injection, and can script what a control invocation
//! changes (for example, pressing edit revealing the edit field).
//!
//! Cloning a `MockHost` yields another handle to the same state.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::host::{
    ControlHandle, Element, Environment, EnvironmentSnapshot, InputState, MessageSender,
    NativeControl, SessionAccessor, SessionContext, StaleMarker,
};
use crate::observer::ChangeNotifier;

/// What invoking a control does to the mock environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeEffect {
    /// Controls that become visible.
    pub reveal: Vec<NativeControl>,
    /// Controls that disappear.
    pub conceal: Vec<NativeControl>,
    /// Elements that become visible.
    pub show: Vec<Element>,
    /// Elements that disappear.
    pub hide: Vec<Element>,
    /// Markers reset as a side effect.
    pub clear_markers: Vec<StaleMarker>,
}

/// A message recorded by the mock sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub text: String,
    pub context: SessionContext,
}

#[derive(Debug, Default)]
struct MockState {
    snapshot: EnvironmentSnapshot,
    controls: BTreeSet<NativeControl>,
    effects: HashMap<NativeControl, InvokeEffect>,
    context: SessionContext,
    invoked: Vec<NativeControl>,
    injected: Vec<String>,
    sent: Vec<SentMessage>,
    unlock_calls: usize,
}

/// Shared, scriptable host.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
    notifier: Arc<Mutex<Option<ChangeNotifier>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every scripted mutation through `notifier`.
    pub fn attach_notifier(&self, notifier: ChangeNotifier) {
        *self
            .notifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(notifier);
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state());
        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(notifier) = notifier {
            notifier.on_environment_changed();
        }
    }

    // ─── Environment scripting ───────────────────────────────────────────────

    /// Replace the set of visible elements.
    pub fn set_visible(&self, elements: impl IntoIterator<Item = Element>) {
        let elements: BTreeSet<Element> = elements.into_iter().collect();
        self.mutate(|s| s.snapshot.visible = elements);
    }

    pub fn show(&self, element: Element) {
        self.mutate(|s| {
            s.snapshot.visible.insert(element);
        });
    }

    pub fn hide(&self, element: Element) {
        self.mutate(|s| {
            s.snapshot.visible.remove(&element);
        });
    }

    pub fn set_input(&self, input: InputState) {
        self.mutate(|s| s.snapshot.input = input);
    }

    /// Make controls locatable.
    pub fn show_controls(&self, controls: impl IntoIterator<Item = NativeControl>) {
        let controls: Vec<NativeControl> = controls.into_iter().collect();
        self.mutate(|s| s.controls.extend(controls));
    }

    pub fn hide_controls(&self, controls: impl IntoIterator<Item = NativeControl>) {
        let controls: Vec<NativeControl> = controls.into_iter().collect();
        self.mutate(|s| {
            for c in controls {
                s.controls.remove(&c);
            }
        });
    }

    /// Script the effect of invoking `control`.
    pub fn on_invoke(&self, control: NativeControl, effect: InvokeEffect) {
        self.state().effects.insert(control, effect);
    }

    /// Shorthand for an effect that only reveals controls.
    pub fn reveal_on_invoke(
        &self,
        control: NativeControl,
        revealed: impl IntoIterator<Item = NativeControl>,
    ) {
        self.on_invoke(
            control,
            InvokeEffect {
                reveal: revealed.into_iter().collect(),
                ..Default::default()
            },
        );
    }

    // ─── Session scripting ───────────────────────────────────────────────────

    pub fn set_conversation(&self, conversation_id: &str, agent_id: &str) {
        let (conversation_id, agent_id) = (conversation_id.to_string(), agent_id.to_string());
        self.mutate(|s| {
            s.context.conversation_id = Some(conversation_id);
            s.context.agent_id = Some(agent_id);
        });
    }

    pub fn set_last_user_message(&self, id: &str, text: &str) {
        let (id, text) = (id.to_string(), text.to_string());
        self.mutate(|s| {
            s.context.last_user_message_id = Some(id);
            s.context.last_user_message_text = Some(text);
        });
    }

    pub fn set_markers(&self, markers: impl IntoIterator<Item = StaleMarker>) {
        let markers: BTreeSet<StaleMarker> = markers.into_iter().collect();
        self.mutate(|s| s.context.markers = markers);
    }

    // ─── Recordings ──────────────────────────────────────────────────────────

    /// Controls invoked so far, in order.
    pub fn invoked(&self) -> Vec<NativeControl> {
        self.state().invoked.clone()
    }

    /// Text injected into edit fields so far.
    pub fn injected(&self) -> Vec<String> {
        self.state().injected.clone()
    }

    /// Messages handed to the sender so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    /// Texts handed to the sender so far.
    pub fn sent_texts(&self) -> Vec<String> {
        self.state().sent.iter().map(|m| m.text.clone()).collect()
    }

    /// How many times the input unlock was requested.
    pub fn unlock_calls(&self) -> usize {
        self.state().unlock_calls
    }
}

impl Environment for MockHost {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.state().snapshot.clone()
    }

    fn unlock_input(&self) -> bool {
        let mut state = self.state();
        state.unlock_calls += 1;
        let was_locked = state.snapshot.input.is_locked();
        state.snapshot.input = InputState::default();
        was_locked
    }

    fn find(&self, control: NativeControl) -> Option<ControlHandle> {
        self.state()
            .controls
            .contains(&control)
            .then(|| ControlHandle {
                control,
                id: format!("mock:{}", control.as_str()),
            })
    }

    fn invoke(&self, handle: &ControlHandle) -> bool {
        let mut state = self.state();
        if !state.controls.contains(&handle.control) {
            return false;
        }
        state.invoked.push(handle.control);
        if let Some(effect) = state.effects.get(&handle.control).cloned() {
            state.controls.extend(effect.reveal);
            for c in effect.conceal {
                state.controls.remove(&c);
            }
            state.snapshot.visible.extend(effect.show);
            for e in effect.hide {
                state.snapshot.visible.remove(&e);
            }
            for m in effect.clear_markers {
                state.context.markers.remove(&m);
            }
        }
        true
    }

    fn inject_text(&self, handle: &ControlHandle, text: &str) -> bool {
        let mut state = self.state();
        if handle.control != NativeControl::EditField
            || !state.controls.contains(&NativeControl::EditField)
        {
            return false;
        }
        state.injected.push(text.to_string());
        true
    }
}

impl SessionAccessor for MockHost {
    fn context(&self) -> SessionContext {
        self.state().context.clone()
    }

    fn clear_marker(&self, marker: StaleMarker) -> bool {
        self.state().context.markers.remove(&marker)
    }
}

impl MessageSender for MockHost {
    fn send(&self, text: &str, context: &SessionContext) {
        self.state().sent.push(SentMessage {
            text: text.to_string(),
            context: context.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let host = MockHost::new();
        let other = host.clone();
        other.show(Element::StopControl);
        assert!(host.snapshot().is_visible(Element::StopControl));
    }

    #[test]
    fn invoke_applies_scripted_effect() {
        let host = MockHost::new();
        host.show_controls([NativeControl::Resend]);
        host.show(Element::ErrorBanner);
        host.on_invoke(
            NativeControl::Resend,
            InvokeEffect {
                hide: vec![Element::ErrorBanner],
                show: vec![Element::StopControl],
                conceal: vec![NativeControl::Resend],
                ..Default::default()
            },
        );

        let handle = host.find(NativeControl::Resend).unwrap();
        assert!(host.invoke(&handle));
        let snap = host.snapshot();
        assert!(!snap.is_visible(Element::ErrorBanner));
        assert!(snap.is_visible(Element::StopControl));
        assert!(host.find(NativeControl::Resend).is_none());
        assert!(!host.invoke(&handle), "concealed control cannot be invoked again");
    }

    #[test]
    fn clear_marker_reports_prior_state() {
        let host = MockHost::new();
        host.set_markers([StaleMarker::Streaming]);
        assert!(host.clear_marker(StaleMarker::Streaming));
        assert!(!host.clear_marker(StaleMarker::Streaming));
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_notify_attached_observer() {
        let (mut observer, notifier) =
            crate::observer::SignalObserver::new(std::time::Duration::from_millis(100));
        let host = MockHost::new();
        host.attach_notifier(notifier);
        host.show(Element::ProgressIndicator);
        assert_eq!(observer.next_tick().await, Some(()));
    }
}
