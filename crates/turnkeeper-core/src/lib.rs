//! Interaction controller for single-flight conversational agents.
//!
//! The agent on the other end processes one message at a time. This crate
//! watches a host environment for busy signals, queues user messages while
//! the agent is working, sends exactly one queued message per busy→idle
//! edge, and recovers stuck conversations through an ordered list of
//! strategies before falling back to a user advisory.
//!
//! The host is reached only through the traits in [`host`]; [`mock`]
//! provides an in-memory implementation used by tests and scenario replay.

pub mod config;
pub mod controller;
pub mod detector;
pub mod event_log;
pub mod events;
pub mod home;
pub mod host;
pub mod logging;
pub mod mock;
pub mod observer;
pub mod queue;
pub mod recovery;

pub use config::{ControllerConfig, resolve_config};
pub use controller::{Controller, SubmitOutcome, TickReport, UserCommand};
pub use detector::{BusyDetector, BusyState, Transition};
pub use events::ControllerEvent;
pub use queue::{Message, OutboundQueue, QueueError};
pub use recovery::{RecoveryAttemptResult, RecoveryEngine, UiAction};

#[doc(inline)]
pub use mock::MockHost;
