//! Per-conversation interaction controller.
//!
//! [`Controller`] owns the outbound queue, the busy detector and the recovery
//! engine for one conversation view. Every re-evaluation goes through
//! [`Controller::tick`]:
//!
//! 1. Fetch a fresh [`SessionContext`]; a changed conversation id resets the
//!    view state.
//! 2. Observe the environment (input unlock + classification + edge).
//! 3. If the conversation is in an error state, run recovery (rate-limited
//!    by the cooldown) and stop. Any drain owed is deferred until the error
//!    clears.
//! 4. Otherwise retract a shown advisory and, on a busy→idle edge (or an
//!    owed drain while idle), send exactly one queued message.
//!
//! [`Controller::run`] drives ticks from debounced observer signals and a
//! coarse periodic poll, and applies [`UserCommand`]s in between, all on one
//! task so ticks never overlap.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ControllerConfig;
use crate::detector::{BusyDetector, BusyState, Transition};
use crate::event_log::{EventFields, emit_event_best_effort};
use crate::events::ControllerEvent;
use crate::host::{
    Element, Environment, EnvironmentSnapshot, MessageSender, SessionAccessor, SessionContext,
};
use crate::observer::SignalObserver;
use crate::queue::{OutboundQueue, QueueError};
use crate::recovery::{RecoveryAttemptResult, RecoveryEngine};

const LOG_SOURCE: &str = "turnkeeper";

/// Whether the remote conversation needs recovery.
///
/// True when the host shows an error indicator, when a failure marker is
/// set, or when in-flight markers are set while the agent reads idle
/// (nothing is actually running, so they are orphaned).
pub fn error_state(
    snapshot: &EnvironmentSnapshot,
    context: &SessionContext,
    busy: BusyState,
) -> bool {
    snapshot.is_visible(Element::ErrorBanner)
        || context.has_failure_marker()
        || (busy == BusyState::Idle && context.has_in_flight_marker())
}

/// A user action delivered to [`Controller::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Send now if the agent is idle, otherwise queue.
    Submit(String),
    /// Always queue.
    Enqueue(String),
    Remove(usize),
    Edit { position: usize, text: String },
    Pause,
    Resume,
    /// Discard queue and edge history, as on navigation.
    Reset,
}

/// What [`Controller::submit`] did with the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed straight to the sender.
    Sent { index: u64 },
    /// Queued at this position.
    Queued { position: usize },
}

/// Summary of one [`Controller::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub transition: Transition,
    pub error_state: bool,
    /// Set when recovery ran this tick.
    pub recovery: Option<RecoveryAttemptResult>,
    /// Insertion index of the message sent this tick.
    pub sent: Option<u64>,
}

/// Interaction controller for one conversation view.
pub struct Controller {
    config: ControllerConfig,
    env: Arc<dyn Environment>,
    session: Arc<dyn SessionAccessor>,
    sender: Arc<dyn MessageSender>,
    detector: BusyDetector,
    queue: OutboundQueue,
    recovery: RecoveryEngine,
    events: mpsc::UnboundedSender<ControllerEvent>,
    /// Error predicate from the last tick.
    error_state: bool,
    advisory_shown: bool,
    /// A drain is owed from an edge or error episode that could not send.
    deferred_drain: bool,
    last_recovery_at: Option<Instant>,
    /// Conversation seen on the last tick; `None` until the first tick.
    conversation: Option<Option<String>>,
    agent_id: Option<String>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("detector", &self.detector)
            .field("queue", &self.queue)
            .field("error_state", &self.error_state)
            .field("advisory_shown", &self.advisory_shown)
            .field("deferred_drain", &self.deferred_drain)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller and the stream of events it produces.
    pub fn new(
        config: ControllerConfig,
        env: Arc<dyn Environment>,
        session: Arc<dyn SessionAccessor>,
        sender: Arc<dyn MessageSender>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let config = config.normalized();
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            queue: OutboundQueue::new(config.queue_capacity),
            recovery: RecoveryEngine::new(config.poll_bound()),
            detector: BusyDetector::default(),
            config,
            env,
            session,
            sender,
            events,
            error_state: false,
            advisory_shown: false,
            deferred_drain: false,
            last_recovery_at: None,
            conversation: None,
            agent_id: None,
        };
        (controller, rx)
    }

    /// Replace the stock busy detector.
    pub fn with_detector(mut self, detector: BusyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn busy_state(&self) -> BusyState {
        self.detector.current()
    }

    pub fn error_state(&self) -> bool {
        self.error_state
    }

    pub fn advisory_shown(&self) -> bool {
        self.advisory_shown
    }

    // ─── User actions ────────────────────────────────────────────────────────

    /// Send `text` immediately when the agent is idle and nothing is queued
    /// ahead of it; queue it otherwise.
    pub fn submit(&mut self, text: String) -> Result<SubmitOutcome, QueueError> {
        let ready = self.queue.is_empty() && !self.queue.is_paused() && self.agent_ready();
        let position = self.enqueue(text)?;
        if ready {
            if let Some(index) = self.drain_one() {
                return Ok(SubmitOutcome::Sent { index });
            }
        }
        Ok(SubmitOutcome::Queued { position })
    }

    /// Queue `text` without trying to send it.
    pub fn enqueue(&mut self, text: String) -> Result<usize, QueueError> {
        match self.queue.enqueue(text.clone()) {
            Ok(position) => {
                self.emit_queue_changed();
                Ok(position)
            }
            Err(err) => {
                tracing::info!(capacity = self.queue.capacity(), "outbound queue full");
                self.emit(ControllerEvent::CapacityExceeded {
                    capacity: self.queue.capacity(),
                    rejected: text,
                });
                Err(err)
            }
        }
    }

    pub fn remove(&mut self, position: usize) -> Result<(), QueueError> {
        self.queue.remove(position)?;
        self.emit_queue_changed();
        Ok(())
    }

    pub fn edit(&mut self, position: usize, text: String) -> Result<(), QueueError> {
        self.queue.edit(position, text)?;
        self.emit_queue_changed();
        Ok(())
    }

    pub fn pause(&mut self) {
        self.queue.pause();
        self.emit_queue_changed();
    }

    /// Unpause and, if the agent is idle right now, send one message without
    /// waiting for the next edge.
    ///
    /// Returns the insertion index of the message sent, if any.
    pub fn resume(&mut self) -> Option<u64> {
        self.queue.resume();
        self.emit_queue_changed();
        if self.agent_ready() {
            self.drain_one()
        } else {
            None
        }
    }

    /// Discard queue contents, pause state and edge history.
    pub fn reset(&mut self) {
        self.queue.reset();
        self.detector.reset();
        self.deferred_drain = false;
        self.error_state = false;
        self.last_recovery_at = None;
        self.retract_advisory();
        self.emit_queue_changed();
    }

    /// Apply one user command.
    pub fn handle_command(&mut self, command: UserCommand) {
        let result = match command {
            UserCommand::Submit(text) => self.submit(text).map(|_| ()),
            UserCommand::Enqueue(text) => self.enqueue(text).map(|_| ()),
            UserCommand::Remove(position) => self.remove(position),
            UserCommand::Edit { position, text } => self.edit(position, text),
            UserCommand::Pause => {
                self.pause();
                Ok(())
            }
            UserCommand::Resume => {
                self.resume();
                Ok(())
            }
            UserCommand::Reset => {
                self.reset();
                Ok(())
            }
        };
        if let Err(err) = result {
            // Capacity errors already produced an event.
            tracing::debug!(error = %err, "user command rejected");
        }
    }

    // ─── Automatic behaviour ─────────────────────────────────────────────────

    /// Send the head of the queue. Called only on a busy→idle edge.
    ///
    /// Returns the insertion index of the message sent, if any.
    pub fn on_busy_to_idle_edge(&mut self) -> Option<u64> {
        self.drain_one()
    }

    /// Re-evaluate the environment once.
    pub async fn tick(&mut self) -> TickReport {
        let now = Instant::now();
        let context = self.session.context();
        self.track_conversation(&context);

        let observation = self.detector.observe(self.env.as_ref(), now);
        let transition = observation.transition;
        let error = error_state(&observation.snapshot, &context, transition.to);
        self.error_state = error;

        let mut report = TickReport {
            transition,
            error_state: error,
            recovery: None,
            sent: None,
        };

        if error {
            self.deferred_drain = true;
            if self.recovery_due(now) {
                report.recovery = self.run_recovery().await;
            }
            return report;
        }

        self.last_recovery_at = None;
        self.retract_advisory();

        match transition.to {
            BusyState::Busy => self.deferred_drain = false,
            BusyState::Idle => {
                let owed = std::mem::take(&mut self.deferred_drain);
                if transition.is_busy_to_idle() || owed {
                    report.sent = self.on_busy_to_idle_edge();
                }
            }
        }
        report
    }

    /// Run recovery now if the conversation is in an error state, ignoring
    /// the cooldown.
    ///
    /// Returns `None` when there is nothing to recover.
    pub async fn attempt_recovery(&mut self) -> Option<RecoveryAttemptResult> {
        let context = self.session.context();
        let snapshot = self.env.snapshot();
        let busy = self.detector.classify(&snapshot);
        if !error_state(&snapshot, &context, busy) {
            return None;
        }
        self.run_recovery().await
    }

    /// Drive the controller until the command channel closes.
    ///
    /// Ticks come from the debounced `observer` and a periodic poll; commands
    /// are applied between ticks.
    pub async fn run(
        mut self,
        mut observer: SignalObserver,
        mut commands: mpsc::Receiver<UserCommand>,
    ) {
        let mut poll = tokio::time::interval(self.config.environment_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut observer_open = true;

        loop {
            tokio::select! {
                tick = observer.next_tick(), if observer_open => {
                    match tick {
                        Some(()) => {
                            self.tick().await;
                        }
                        None => {
                            tracing::debug!("change notifiers dropped; polling only");
                            observer_open = false;
                        }
                    }
                }
                _ = poll.tick() => {
                    self.tick().await;
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            tracing::info!("command channel closed, controller stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    /// Idle by both the last edge and a fresh look, with no error showing.
    fn agent_ready(&self) -> bool {
        if self.error_state || self.detector.current() != BusyState::Idle {
            return false;
        }
        let snapshot = self.env.snapshot();
        if self.detector.classify(&snapshot) != BusyState::Idle {
            return false;
        }
        let context = self.session.context();
        !error_state(&snapshot, &context, BusyState::Idle)
    }

    fn drain_one(&mut self) -> Option<u64> {
        let message = self.queue.dequeue_next()?;
        // Fresh context per send.
        let context = self.session.context();
        self.sender.send(&message.text, &context);
        self.detector
            .expect_busy_until(Instant::now() + self.config.send_settle());

        tracing::info!(
            index = message.index,
            remaining = self.queue.len(),
            "sent queued message"
        );
        self.emit(ControllerEvent::MessageSent {
            index: message.index,
            text: message.text,
        });
        self.emit_queue_changed();
        Some(message.index)
    }

    fn recovery_due(&self, now: Instant) -> bool {
        match self.last_recovery_at {
            None => true,
            Some(at) => now.duration_since(at) >= self.config.recovery_cooldown(),
        }
    }

    async fn run_recovery(&mut self) -> Option<RecoveryAttemptResult> {
        let report = self
            .recovery
            .attempt_recovery(self.env.as_ref(), self.session.as_ref())
            .await?;
        let now = Instant::now();
        self.last_recovery_at = Some(now);

        let result = report.result;
        if let RecoveryAttemptResult::UiActionPerformed(action) = result {
            // The host just resubmitted a turn; the next idle read is not an
            // edge until it has had time to show busy.
            tracing::debug!(?action, "recovery resubmitted; awaiting busy");
            self.detector.expect_busy_until(now + self.config.send_settle());
            self.deferred_drain = false;
        }

        let event = ControllerEvent::RecoveryAttempted { result };
        let mut fields = self.event_fields(&event);
        fields.strategy = report
            .attempted
            .iter()
            .find(|(_, failure)| failure.is_none())
            .map(|(strategy, _)| strategy.as_str().to_string());
        if result == RecoveryAttemptResult::NoStrategySucceeded {
            fields.level = "warn";
            let reasons: Vec<String> = report
                .attempted
                .iter()
                .filter_map(|(strategy, failure)| {
                    failure
                        .as_ref()
                        .map(|f| format!("{}: {f}", strategy.as_str()))
                })
                .collect();
            fields.error = Some(reasons.join("; "));
        }
        self.publish(event, fields);

        if result == RecoveryAttemptResult::NoStrategySucceeded && !self.advisory_shown {
            tracing::warn!(
                strategies = report.attempted.len(),
                "automatic recovery exhausted; showing advisory"
            );
            self.advisory_shown = true;
            self.emit(ControllerEvent::AdvisoryShown {
                text: self.config.advisory_text.clone(),
            });
        }
        Some(result)
    }

    fn retract_advisory(&mut self) {
        if self.advisory_shown {
            self.advisory_shown = false;
            self.emit(ControllerEvent::AdvisoryHidden);
        }
    }

    fn track_conversation(&mut self, context: &SessionContext) {
        let current = context.conversation_id.clone();
        match &self.conversation {
            Some(previous) if *previous != current => {
                tracing::info!(
                    from = previous.as_deref().unwrap_or("<none>"),
                    to = current.as_deref().unwrap_or("<none>"),
                    "conversation changed; resetting controller state"
                );
                self.reset();
            }
            _ => {}
        }
        self.conversation = Some(current);
        self.agent_id = context.agent_id.clone();
    }

    fn emit_queue_changed(&self) {
        self.emit(ControllerEvent::QueueChanged {
            messages: self.queue.iter().cloned().collect(),
            paused: self.queue.is_paused(),
        });
    }

    fn emit(&self, event: ControllerEvent) {
        let fields = self.event_fields(&event);
        self.publish(event, fields);
    }

    fn publish(&self, event: ControllerEvent, fields: EventFields) {
        emit_event_best_effort(fields);
        // A dropped receiver means nobody renders; the controller carries on.
        let _ = self.events.send(event);
    }

    fn event_fields(&self, event: &ControllerEvent) -> EventFields {
        let mut fields = EventFields {
            level: "info",
            source: LOG_SOURCE,
            action: event.kind(),
            conversation_id: self.conversation.clone().flatten(),
            agent_id: self.agent_id.clone(),
            ..Default::default()
        };
        match event {
            ControllerEvent::QueueChanged { messages, .. } => {
                fields.level = "debug";
                fields.count = Some(messages.len() as u64);
            }
            ControllerEvent::CapacityExceeded { capacity, rejected } => {
                fields.level = "warn";
                fields.count = Some(*capacity as u64);
                fields.message_text = Some(rejected.clone());
            }
            ControllerEvent::MessageSent { index, text } => {
                fields.message_index = Some(*index);
                fields.message_text = Some(text.clone());
            }
            ControllerEvent::RecoveryAttempted { result } => {
                fields.result = serde_json::to_string(result).ok();
            }
            ControllerEvent::AdvisoryShown { .. } => fields.level = "warn",
            ControllerEvent::AdvisoryHidden => {}
        }
        fields
    }
}
