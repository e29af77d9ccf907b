//! Error-state recovery.
//!
//! When the conversation is stuck in an error state, [`RecoveryEngine`] tries
//! the strategies in [`STRATEGY_ORDER`], least invasive first, and stops at
//! the first one that advances the session:
//!
//! 1. [`Strategy::StateClear`]: reset the fixed set of stale session markers.
//! 2. [`Strategy::NativeResend`]: press the host's own resend control.
//! 3. [`Strategy::EditAndResend`]: open the last user message for editing,
//!    wait (bounded) for the edit field and save control, re-inject the text
//!    and save.
//!
//! A strategy that does not apply to the current error shape simply fails;
//! none of the failure reasons are errors in the logging sense.
//!
//! [`RecoveryEngine::attempt_recovery`] carries a reentrancy guard: a call
//! made while another is still inside its poll loop returns `None`
//! immediately instead of starting a second loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::{ControlHandle, Environment, NativeControl, SessionAccessor, StaleMarker};

/// Native action that recovered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiAction {
    Resend,
    EditAndResend,
}

/// Outcome of one [`RecoveryEngine::attempt_recovery`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "action", rename_all = "snake_case")]
pub enum RecoveryAttemptResult {
    /// At least one stale marker was reset.
    StateCleared,
    /// A native host control was driven successfully.
    UiActionPerformed(UiAction),
    /// Every strategy failed; the user has to act.
    NoStrategySucceeded,
}

/// Recovery strategies in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StateClear,
    NativeResend,
    EditAndResend,
}

/// The order strategies are tried in.
pub const STRATEGY_ORDER: [Strategy; 3] = [
    Strategy::StateClear,
    Strategy::NativeResend,
    Strategy::EditAndResend,
];

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateClear => "state_clear",
            Self::NativeResend => "native_resend",
            Self::EditAndResend => "edit_and_resend",
        }
    }
}

/// Why a single strategy did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyFailure {
    #[error("no stale markers were set")]
    NothingToClear,
    #[error("{} control not found", .0.as_str())]
    LocatorNotFound(NativeControl),
    #[error("{} control did not accept the action", .0.as_str())]
    InvokeFailed(NativeControl),
    #[error("edit mode did not appear after {attempts} polls")]
    PollTimeout { attempts: u32 },
    #[error("no last user message text to re-submit")]
    NoReplacementText,
}

/// Bound on the edit-mode wait in [`Strategy::EditAndResend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBound {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollBound {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(100),
        }
    }
}

impl PollBound {
    /// Upper bound on the time spent polling.
    pub fn total(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Result and trace of one recovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub result: RecoveryAttemptResult,
    /// Strategies that ran, in order, with their failure reason if any.
    pub attempted: Vec<(Strategy, Option<StrategyFailure>)>,
}

impl RecoveryReport {
    pub fn strategies(&self) -> Vec<Strategy> {
        self.attempted.iter().map(|(s, _)| *s).collect()
    }
}

/// Clears the in-progress flag when a recovery pass ends, however it ends.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Ordered strategy runner.
#[derive(Debug, Default)]
pub struct RecoveryEngine {
    poll: PollBound,
    in_progress: AtomicBool,
}

impl RecoveryEngine {
    pub fn new(poll: PollBound) -> Self {
        Self {
            poll,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn poll_bound(&self) -> PollBound {
        self.poll
    }

    /// Whether a recovery pass is currently running.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Try every strategy in order until one succeeds.
    ///
    /// Returns `None` without touching anything if another pass is still
    /// running.
    pub async fn attempt_recovery(
        &self,
        env: &dyn Environment,
        session: &dyn SessionAccessor,
    ) -> Option<RecoveryReport> {
        let _guard = self.try_begin()?;
        let mut attempted = Vec::with_capacity(STRATEGY_ORDER.len());

        for strategy in STRATEGY_ORDER {
            let outcome = match strategy {
                Strategy::StateClear => clear_stale_state(session),
                Strategy::NativeResend => native_resend(env),
                Strategy::EditAndResend => self.edit_and_resend(env, session).await,
            };
            match outcome {
                Ok(result) => {
                    tracing::info!(strategy = strategy.as_str(), ?result, "recovery succeeded");
                    attempted.push((strategy, None));
                    return Some(RecoveryReport { result, attempted });
                }
                Err(reason) => {
                    tracing::debug!(
                        strategy = strategy.as_str(),
                        reason = %reason,
                        "recovery strategy did not apply"
                    );
                    attempted.push((strategy, Some(reason)));
                }
            }
        }

        Some(RecoveryReport {
            result: RecoveryAttemptResult::NoStrategySucceeded,
            attempted,
        })
    }

    fn try_begin(&self) -> Option<InProgressGuard<'_>> {
        match self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(InProgressGuard(&self.in_progress)),
            Err(_) => {
                tracing::debug!("recovery already in progress; skipping");
                None
            }
        }
    }

    async fn edit_and_resend(
        &self,
        env: &dyn Environment,
        session: &dyn SessionAccessor,
    ) -> Result<RecoveryAttemptResult, StrategyFailure> {
        let edit = locate(env, NativeControl::EditLastMessage)?;
        let replacement = session
            .context()
            .last_user_message_text
            .filter(|t| !t.is_empty())
            .ok_or(StrategyFailure::NoReplacementText)?;

        invoke(env, &edit)?;
        let (field, save) = self.wait_for_edit_mode(env).await?;
        if !env.inject_text(&field, &replacement) {
            return Err(StrategyFailure::InvokeFailed(NativeControl::EditField));
        }
        invoke(env, &save)?;
        Ok(RecoveryAttemptResult::UiActionPerformed(UiAction::EditAndResend))
    }

    /// Re-check for the edit field and save control once per interval, up to
    /// the attempt budget.
    async fn wait_for_edit_mode(
        &self,
        env: &dyn Environment,
    ) -> Result<(ControlHandle, ControlHandle), StrategyFailure> {
        for attempt in 1..=self.poll.attempts {
            tokio::time::sleep(self.poll.interval).await;
            let field = env.find(NativeControl::EditField);
            let save = env.find(NativeControl::SaveAndResend);
            if let (Some(field), Some(save)) = (field, save) {
                tracing::debug!(attempt, "edit mode ready");
                return Ok((field, save));
            }
        }
        Err(StrategyFailure::PollTimeout {
            attempts: self.poll.attempts,
        })
    }
}

fn clear_stale_state(
    session: &dyn SessionAccessor,
) -> Result<RecoveryAttemptResult, StrategyFailure> {
    // Every marker is cleared even once one is found set.
    let cleared: Vec<StaleMarker> = StaleMarker::ALL
        .into_iter()
        .filter(|marker| session.clear_marker(*marker))
        .collect();
    if cleared.is_empty() {
        return Err(StrategyFailure::NothingToClear);
    }
    tracing::debug!(?cleared, "cleared stale session markers");
    Ok(RecoveryAttemptResult::StateCleared)
}

fn native_resend(env: &dyn Environment) -> Result<RecoveryAttemptResult, StrategyFailure> {
    let resend = locate(env, NativeControl::Resend)?;
    invoke(env, &resend)?;
    Ok(RecoveryAttemptResult::UiActionPerformed(UiAction::Resend))
}

fn locate(env: &dyn Environment, control: NativeControl) -> Result<ControlHandle, StrategyFailure> {
    env.find(control)
        .ok_or(StrategyFailure::LocatorNotFound(control))
}

fn invoke(env: &dyn Environment, handle: &ControlHandle) -> Result<(), StrategyFailure> {
    if env.invoke(handle) {
        Ok(())
    } else {
        Err(StrategyFailure::InvokeFailed(handle.control))
    }
}
