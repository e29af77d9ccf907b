//! `replay` subcommand: drive a controller against a scripted host.
//!
//! A scenario is a TOML file with an optional `[controller]` table and a list
//! of `[[step]]` entries. Host steps mutate the in-memory [`MockHost`]; user
//! steps call the controller; `tick` re-evaluates the environment and `wait`
//! sleeps in real time.
//!
//! ```toml
//! [controller]
//! send_settle_ms = 50
//!
//! [[step]]
//! action = "show"
//! element = "stop_control"
//!
//! [[step]]
//! action = "submit"
//! text = "hello"
//!
//! [[step]]
//! action = "tick"
//! ```
//!
//! When the scenario has a `[controller]` table it replaces the resolved
//! configuration entirely; missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cli::ReplayArgs;
use turnkeeper_core::config::{ControllerConfig, resolve_config};
use turnkeeper_core::host::{Element, InputState, NativeControl, StaleMarker};
use turnkeeper_core::mock::{InvokeEffect, MockHost};
use turnkeeper_core::{BusyState, Controller, ControllerEvent, QueueError};

/// A parsed scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub controller: Option<ControllerConfig>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    // Host
    SetElements {
        elements: Vec<Element>,
    },
    Show {
        element: Element,
    },
    Hide {
        element: Element,
    },
    SetInput {
        #[serde(default)]
        disabled: bool,
        #[serde(default)]
        read_only: bool,
    },
    SetMarkers {
        markers: Vec<StaleMarker>,
    },
    ShowControls {
        controls: Vec<NativeControl>,
    },
    HideControls {
        controls: Vec<NativeControl>,
    },
    OnInvoke {
        control: NativeControl,
        #[serde(default)]
        reveal: Vec<NativeControl>,
        #[serde(default)]
        conceal: Vec<NativeControl>,
        #[serde(default)]
        show: Vec<Element>,
        #[serde(default)]
        hide: Vec<Element>,
        #[serde(default)]
        clear_markers: Vec<StaleMarker>,
    },
    SetConversation {
        conversation_id: String,
        agent_id: String,
    },
    SetLastUserMessage {
        id: String,
        text: String,
    },

    // User
    Submit {
        text: String,
    },
    Enqueue {
        text: String,
    },
    Remove {
        position: usize,
    },
    Edit {
        position: usize,
        text: String,
    },
    Pause,
    Resume,
    Reset,
    Recover,

    // Time
    Tick,
    Wait {
        ms: u64,
    },
}

/// Final state after a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub sent: Vec<String>,
    pub queued: Vec<String>,
    pub paused: bool,
    pub busy: BusyState,
    pub error_state: bool,
    pub advisory_shown: bool,
}

/// Everything a replay produced.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub events: Vec<ControllerEvent>,
    pub summary: ReplaySummary,
}

/// Read and parse a scenario file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid scenario.
pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse scenario {}", path.display()))
}

/// Run every step of `scenario` against a fresh mock host.
///
/// Capacity rejections are part of normal behaviour and only show up as
/// events; out-of-range queue positions abort the replay.
///
/// # Errors
///
/// Returns an error naming the step whose queue position was out of range.
pub async fn replay(scenario: &Scenario, config: ControllerConfig) -> anyhow::Result<ReplayOutcome> {
    let host = MockHost::new();
    let shared = Arc::new(host.clone());
    let (mut controller, mut rx) = Controller::new(config, shared.clone(), shared.clone(), shared);
    let mut events = Vec::new();

    for (number, step) in scenario.steps.iter().enumerate() {
        tracing::debug!(number = number + 1, ?step, "replay step");
        apply_step(&host, &mut controller, step)
            .await
            .with_context(|| format!("step {} ({step:?}) failed", number + 1))?;
        drain(&mut rx, &mut events);
    }

    let summary = ReplaySummary {
        sent: host.sent_texts(),
        queued: controller.queue().iter().map(|m| m.text.clone()).collect(),
        paused: controller.queue().is_paused(),
        busy: controller.busy_state(),
        error_state: controller.error_state(),
        advisory_shown: controller.advisory_shown(),
    };
    Ok(ReplayOutcome { events, summary })
}

async fn apply_step(
    host: &MockHost,
    controller: &mut Controller,
    step: &Step,
) -> Result<(), QueueError> {
    match step {
        Step::SetElements { elements } => host.set_visible(elements.iter().copied()),
        Step::Show { element } => host.show(*element),
        Step::Hide { element } => host.hide(*element),
        Step::SetInput {
            disabled,
            read_only,
        } => host.set_input(InputState {
            disabled: *disabled,
            read_only: *read_only,
        }),
        Step::SetMarkers { markers } => host.set_markers(markers.iter().copied()),
        Step::ShowControls { controls } => host.show_controls(controls.iter().copied()),
        Step::HideControls { controls } => host.hide_controls(controls.iter().copied()),
        Step::OnInvoke {
            control,
            reveal,
            conceal,
            show,
            hide,
            clear_markers,
        } => host.on_invoke(
            *control,
            InvokeEffect {
                reveal: reveal.clone(),
                conceal: conceal.clone(),
                show: show.clone(),
                hide: hide.clone(),
                clear_markers: clear_markers.clone(),
            },
        ),
        Step::SetConversation {
            conversation_id,
            agent_id,
        } => host.set_conversation(conversation_id, agent_id),
        Step::SetLastUserMessage { id, text } => host.set_last_user_message(id, text),

        Step::Submit { text } => ignore_capacity(controller.submit(text.clone()).map(|_| ()))?,
        Step::Enqueue { text } => ignore_capacity(controller.enqueue(text.clone()).map(|_| ()))?,
        Step::Remove { position } => controller.remove(*position)?,
        Step::Edit { position, text } => controller.edit(*position, text.clone())?,
        Step::Pause => controller.pause(),
        Step::Resume => {
            controller.resume();
        }
        Step::Reset => controller.reset(),
        Step::Recover => {
            controller.attempt_recovery().await;
        }

        Step::Tick => {
            controller.tick().await;
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
    }
    Ok(())
}

fn ignore_capacity(result: Result<(), QueueError>) -> Result<(), QueueError> {
    match result {
        Err(QueueError::CapacityExceeded { .. }) => Ok(()),
        other => other,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>, out: &mut Vec<ControllerEvent>) {
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
}

/// Run the `replay` subcommand.
///
/// # Errors
///
/// Returns an error if the configuration or scenario cannot be loaded, or if
/// a step fails.
pub async fn run(config_path: &Option<PathBuf>, args: ReplayArgs) -> anyhow::Result<()> {
    let scenario = load_scenario(&args.scenario)?;
    let config = match scenario.controller.clone() {
        Some(cfg) => cfg,
        None => resolve_config(config_path.as_deref())?.controller,
    };

    let outcome = replay(&scenario, config).await?;

    if args.json {
        for event in &outcome.events {
            println!("{}", serde_json::to_string(event)?);
        }
        println!("{}", serde_json::to_string(&outcome.summary)?);
    } else {
        for event in &outcome.events {
            println!("{}", describe(event));
        }
        let s = &outcome.summary;
        println!();
        println!("summary:");
        println!("  sent           = {:?}", s.sent);
        println!("  queued         = {:?}", s.queued);
        println!("  paused         = {}", s.paused);
        println!("  busy           = {:?}", s.busy);
        println!("  error_state    = {}", s.error_state);
        println!("  advisory_shown = {}", s.advisory_shown);
    }
    Ok(())
}

fn describe(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::QueueChanged { messages, paused } => {
            let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
            format!(
                "queue        {texts:?}{}",
                if *paused { " (paused)" } else { "" }
            )
        }
        ControllerEvent::CapacityExceeded { capacity, rejected } => {
            format!("rejected     {rejected:?} (capacity {capacity})")
        }
        ControllerEvent::AdvisoryShown { text } => format!("advisory     {text}"),
        ControllerEvent::AdvisoryHidden => "advisory     hidden".to_string(),
        ControllerEvent::MessageSent { index, text } => format!("sent         #{index} {text:?}"),
        ControllerEvent::RecoveryAttempted { result } => format!("recovery     {result:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_and_controller_table() {
        let scenario: Scenario = toml::from_str(
            r#"
            [controller]
            queue_capacity = 2

            [[step]]
            action = "show"
            element = "progress_indicator"

            [[step]]
            action = "on_invoke"
            control = "edit_last_message"
            reveal = ["edit_field", "save_and_resend"]

            [[step]]
            action = "wait"
            ms = 5

            [[step]]
            action = "pause"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.controller.unwrap().queue_capacity, 2);
        assert_eq!(
            scenario.steps,
            vec![
                Step::Show {
                    element: Element::ProgressIndicator
                },
                Step::OnInvoke {
                    control: NativeControl::EditLastMessage,
                    reveal: vec![NativeControl::EditField, NativeControl::SaveAndResend],
                    conceal: vec![],
                    show: vec![],
                    hide: vec![],
                    clear_markers: vec![],
                },
                Step::Wait { ms: 5 },
                Step::Pause,
            ]
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = toml::from_str::<Scenario>("[[step]]\naction = \"explode\"\n").unwrap_err();
        assert!(err.to_string().contains("explode"));
    }

    #[tokio::test]
    async fn out_of_range_edit_names_the_step() {
        let scenario = Scenario {
            controller: None,
            steps: vec![Step::Edit {
                position: 3,
                text: "x".to_string(),
            }],
        };
        let err = replay(&scenario, ControllerConfig::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("step 1"));
    }

    #[test]
    fn describe_is_one_line_per_event() {
        let line = describe(&ControllerEvent::CapacityExceeded {
            capacity: 3,
            rejected: "d".to_string(),
        });
        assert_eq!(line, "rejected     \"d\" (capacity 3)");
    }
}
