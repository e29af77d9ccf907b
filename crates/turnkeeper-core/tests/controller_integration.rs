//! End-to-end behaviour of the interaction controller against the mock host.
//!
//! Every test runs on a paused tokio clock, so settle windows, recovery
//! polling and observer debouncing advance deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use turnkeeper_core::config::ControllerConfig;
use turnkeeper_core::host::{Element, NativeControl, StaleMarker};
use turnkeeper_core::mock::{InvokeEffect, MockHost};
use turnkeeper_core::observer::SignalObserver;
use turnkeeper_core::{
    BusyState, Controller, ControllerEvent, QueueError, RecoveryAttemptResult, UiAction,
    UserCommand,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn make_controller(host: &MockHost) -> (Controller, mpsc::UnboundedReceiver<ControllerEvent>) {
    make_controller_with(host, ControllerConfig::default())
}

fn make_controller_with(
    host: &MockHost,
    config: ControllerConfig,
) -> (Controller, mpsc::UnboundedReceiver<ControllerEvent>) {
    let shared = Arc::new(host.clone());
    Controller::new(config, shared.clone(), shared.clone(), shared)
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn kinds(events: &[ControllerEvent]) -> Vec<&'static str> {
    events.iter().map(ControllerEvent::kind).collect()
}

/// Make the agent busy, tick, then idle, tick: one full busy→idle edge.
async fn cycle_busy(host: &MockHost, controller: &mut Controller) {
    host.show(Element::StopControl);
    controller.tick().await;
    host.hide(Element::StopControl);
    controller.tick().await;
}

// ---------------------------------------------------------------------------
// Queue draining
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn capacity_rejection_then_single_drain_per_edge() {
    let host = MockHost::new();
    host.show(Element::ProgressIndicator);
    let (mut controller, mut rx) = make_controller(&host);
    controller.tick().await;
    assert_eq!(controller.busy_state(), BusyState::Busy);

    for text in ["a", "b", "c"] {
        controller.enqueue(text.to_string()).unwrap();
    }
    assert_eq!(
        controller.enqueue("d".to_string()),
        Err(QueueError::CapacityExceeded { capacity: 3 })
    );
    let events = drain_events(&mut rx);
    assert!(events.contains(&ControllerEvent::CapacityExceeded {
        capacity: 3,
        rejected: "d".to_string(),
    }));

    host.hide(Element::ProgressIndicator);
    let report = controller.tick().await;
    assert!(report.transition.is_busy_to_idle());
    assert_eq!(host.sent_texts(), vec!["a"]);

    let remaining: Vec<&str> = controller.queue().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(remaining, vec!["b", "c"]);

    // Still idle, no new edge: nothing else goes out.
    let report = controller.tick().await;
    assert_eq!(report.sent, None);
    assert_eq!(host.sent_texts(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn fifo_order_holds_across_edges() {
    let host = MockHost::new();
    host.show(Element::GeneratingIndicator);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.enqueue("first".to_string()).unwrap();
    controller.enqueue("second".to_string()).unwrap();
    host.hide(Element::GeneratingIndicator);
    controller.tick().await;

    cycle_busy(&host, &mut controller).await;
    cycle_busy(&host, &mut controller).await;

    assert_eq!(host.sent_texts(), vec!["first", "second"]);
    assert!(controller.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn settle_window_expiry_counts_as_an_edge() {
    let host = MockHost::new();
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.submit("now".to_string()).unwrap();
    controller.enqueue("next".to_string()).unwrap();

    // The agent never visibly turns busy; the queue must not stall.
    controller.tick().await;
    assert_eq!(host.sent_texts(), vec!["now"]);

    tokio::time::advance(controller.config().send_settle() + Duration::from_millis(1)).await;
    controller.tick().await;
    assert_eq!(host.sent_texts(), vec!["now", "next"]);
}

#[tokio::test(start_paused = true)]
async fn edited_and_removed_entries_are_respected() {
    let host = MockHost::new();
    host.show(Element::StreamingCursor);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    for text in ["a", "b", "c"] {
        controller.enqueue(text.to_string()).unwrap();
    }
    controller.edit(1, "B".to_string()).unwrap();
    controller.remove(0).unwrap();
    assert_eq!(
        controller.remove(5),
        Err(QueueError::IndexOutOfRange { index: 5, len: 2 })
    );

    host.hide(Element::StreamingCursor);
    controller.tick().await;
    assert_eq!(host.sent_texts(), vec!["B"]);
}

// ---------------------------------------------------------------------------
// Pause / resume
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn paused_queue_skips_edges_and_resume_sends_one() {
    let host = MockHost::new();
    host.show(Element::StopControl);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.enqueue("a".to_string()).unwrap();
    controller.enqueue("b".to_string()).unwrap();
    controller.pause();

    host.hide(Element::StopControl);
    controller.tick().await;
    assert!(host.sent().is_empty());

    let sent = controller.resume();
    assert!(sent.is_some());
    assert_eq!(host.sent_texts(), vec!["a"]);
    assert_eq!(controller.queue().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_while_busy_waits_for_the_edge() {
    let host = MockHost::new();
    host.show(Element::StopControl);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.enqueue("a".to_string()).unwrap();
    controller.pause();

    assert_eq!(controller.resume(), None);
    assert!(host.sent().is_empty());

    host.hide(Element::StopControl);
    controller.tick().await;
    assert_eq!(host.sent_texts(), vec!["a"]);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn orphaned_markers_are_cleared_without_advisory() {
    let host = MockHost::new();
    host.set_markers([StaleMarker::Streaming, StaleMarker::OrphanedStreamEntry]);
    host.show_controls([NativeControl::Resend]);
    let (mut controller, mut rx) = make_controller(&host);

    let report = controller.tick().await;
    assert!(report.error_state);
    assert_eq!(report.recovery, Some(RecoveryAttemptResult::StateCleared));
    assert!(host.invoked().is_empty(), "state clear wins over resend");
    assert!(!controller.advisory_shown());

    let report = controller.tick().await;
    assert!(!report.error_state);
    let events = drain_events(&mut rx);
    assert!(!kinds(&events).contains(&"advisory_shown"));
}

#[tokio::test(start_paused = true)]
async fn resend_control_recovers_failed_turn() {
    let host = MockHost::new();
    host.show(Element::ErrorBanner);
    host.show_controls([NativeControl::Resend]);
    host.on_invoke(
        NativeControl::Resend,
        InvokeEffect {
            hide: vec![Element::ErrorBanner],
            show: vec![Element::ProgressIndicator],
            conceal: vec![NativeControl::Resend],
            ..Default::default()
        },
    );
    let (mut controller, _rx) = make_controller(&host);

    let report = controller.tick().await;
    assert_eq!(
        report.recovery,
        Some(RecoveryAttemptResult::UiActionPerformed(UiAction::Resend))
    );
    let report = controller.tick().await;
    assert!(!report.error_state);
    assert_eq!(controller.busy_state(), BusyState::Busy);
}

#[tokio::test(start_paused = true)]
async fn resend_without_visible_busy_does_not_release_queue() {
    let host = MockHost::new();
    host.show(Element::StopControl);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.enqueue("queued".to_string()).unwrap();

    // The turn fails; pressing resend clears the banner but the host has not
    // rendered a busy indicator yet.
    host.hide(Element::StopControl);
    host.show(Element::ErrorBanner);
    host.show_controls([NativeControl::Resend]);
    host.on_invoke(
        NativeControl::Resend,
        InvokeEffect {
            hide: vec![Element::ErrorBanner],
            conceal: vec![NativeControl::Resend],
            ..Default::default()
        },
    );
    let report = controller.tick().await;
    assert_eq!(
        report.recovery,
        Some(RecoveryAttemptResult::UiActionPerformed(UiAction::Resend))
    );

    let report = controller.tick().await;
    assert!(!report.error_state);
    assert!(!report.transition.is_busy_to_idle());
    assert_eq!(report.sent, None);
    assert!(host.sent().is_empty(), "resent turn still owns the agent");

    // The resent turn runs and finishes: that edge releases the queue.
    cycle_busy(&host, &mut controller).await;
    assert_eq!(host.sent_texts(), vec!["queued"]);
}

#[tokio::test(start_paused = true)]
async fn resend_without_busy_releases_queue_after_settle() {
    let host = MockHost::new();
    host.show(Element::ErrorBanner);
    host.show_controls([NativeControl::Resend]);
    host.on_invoke(
        NativeControl::Resend,
        InvokeEffect {
            hide: vec![Element::ErrorBanner],
            ..Default::default()
        },
    );
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.enqueue("later".to_string()).unwrap();

    controller.tick().await;
    assert!(host.sent().is_empty());

    tokio::time::advance(controller.config().send_settle() + Duration::from_millis(1)).await;
    let report = controller.tick().await;
    assert!(report.transition.is_busy_to_idle());
    assert_eq!(host.sent_texts(), vec!["later"]);
}

#[tokio::test(start_paused = true)]
async fn edit_and_resend_uses_last_user_message() {
    let host = MockHost::new();
    host.show(Element::ErrorBanner);
    host.set_last_user_message("u-1", "what went wrong?");
    host.show_controls([NativeControl::EditLastMessage]);
    host.reveal_on_invoke(
        NativeControl::EditLastMessage,
        [NativeControl::EditField, NativeControl::SaveAndResend],
    );
    let (mut controller, _rx) = make_controller(&host);

    let report = controller.tick().await;
    assert_eq!(
        report.recovery,
        Some(RecoveryAttemptResult::UiActionPerformed(UiAction::EditAndResend))
    );
    assert_eq!(host.injected(), vec!["what went wrong?"]);
    assert_eq!(
        host.invoked(),
        vec![NativeControl::EditLastMessage, NativeControl::SaveAndResend]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_recovery_shows_then_retracts_advisory() {
    let host = MockHost::new();
    host.show(Element::ErrorBanner);
    let (mut controller, mut rx) = make_controller(&host);

    let report = controller.tick().await;
    assert_eq!(report.recovery, Some(RecoveryAttemptResult::NoStrategySucceeded));
    assert!(controller.advisory_shown());
    let events = drain_events(&mut rx);
    assert!(events.contains(&ControllerEvent::AdvisoryShown {
        text: controller.config().advisory_text.clone(),
    }));

    // Within the cooldown nothing is retried and the advisory is not repeated.
    let report = controller.tick().await;
    assert_eq!(report.recovery, None);
    assert!(drain_events(&mut rx).is_empty());

    host.hide(Element::ErrorBanner);
    controller.tick().await;
    assert!(!controller.advisory_shown());
    assert_eq!(kinds(&drain_events(&mut rx)), vec!["advisory_hidden"]);
}

#[tokio::test(start_paused = true)]
async fn recovery_retries_after_cooldown() {
    let host = MockHost::new();
    host.show(Element::ErrorBanner);
    let config = ControllerConfig {
        recovery_cooldown_ms: 500,
        ..Default::default()
    };
    let (mut controller, _rx) = make_controller_with(&host, config);

    assert!(controller.tick().await.recovery.is_some());
    assert!(controller.tick().await.recovery.is_none());
    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(controller.tick().await.recovery.is_some());
}

#[tokio::test(start_paused = true)]
async fn edge_during_error_is_deferred_until_error_clears() {
    let host = MockHost::new();
    host.show(Element::StopControl);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;
    controller.enqueue("held".to_string()).unwrap();

    host.hide(Element::StopControl);
    host.show(Element::ErrorBanner);
    let report = controller.tick().await;
    assert!(report.transition.is_busy_to_idle());
    assert!(report.error_state);
    assert!(host.sent().is_empty(), "no sends while in error");

    host.hide(Element::ErrorBanner);
    let report = controller.tick().await;
    assert_eq!(report.sent, Some(0));
    assert_eq!(host.sent_texts(), vec!["held"]);
}

#[tokio::test(start_paused = true)]
async fn submit_during_error_is_queued() {
    let host = MockHost::new();
    host.set_markers([StaleMarker::Failed]);
    host.show(Element::ErrorBanner);
    let (mut controller, _rx) = make_controller(&host);
    controller.tick().await;

    let outcome = controller.submit("after the error".to_string()).unwrap();
    assert_eq!(
        outcome,
        turnkeeper_core::SubmitOutcome::Queued { position: 0 }
    );
    assert!(host.sent().is_empty());
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn run_loop_drains_on_observed_edge() {
    let host = MockHost::new();
    host.show(Element::StopControl);
    let config = ControllerConfig::default();
    let (observer, notifier) = SignalObserver::new(config.debounce());
    host.attach_notifier(notifier);
    let (controller, mut events) = make_controller_with(&host, config);
    let (tx, commands) = mpsc::channel(8);

    let handle = tokio::spawn(controller.run(observer, commands));

    tx.send(UserCommand::Submit("queued while busy".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(host.sent().is_empty());

    host.hide(Element::StopControl);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(host.sent_texts(), vec!["queued while busy"]);

    drop(tx);
    handle.await.unwrap();

    let mut saw_sent = false;
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::MessageSent { text, .. } = event {
            assert_eq!(text, "queued while busy");
            saw_sent = true;
        }
    }
    assert!(saw_sent);
}

#[tokio::test(start_paused = true)]
async fn run_loop_polls_without_change_notifications() {
    let host = MockHost::new();
    host.show(Element::StopControl);
    let config = ControllerConfig {
        environment_poll_interval_ms: 200,
        ..Default::default()
    };
    let (observer, notifier) = SignalObserver::new(config.debounce());
    drop(notifier);
    let (controller, _events) = make_controller_with(&host, config);
    let (tx, commands) = mpsc::channel(8);
    let handle = tokio::spawn(controller.run(observer, commands));

    tx.send(UserCommand::Enqueue("polled".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    host.hide(Element::StopControl);
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(host.sent_texts(), vec!["polled"]);

    drop(tx);
    handle.await.unwrap();
}
