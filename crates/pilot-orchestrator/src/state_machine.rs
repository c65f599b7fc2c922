//! Pure state machine for the step loop
//!
//! This module implements a pure functional state machine with NO I/O.
//! All state transitions are deterministic and testable.
//!
//! Key design principles:
//! - Pure function: transition(state, event) -> (state, effects)
//! - No async, no I/O
//! - Invalid transitions go to Error state (never panic)
//! - Effects are instructions for the step loop, which performs them

use serde::{Deserialize, Serialize};

/// Run state of an orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum State {
    /// No task running
    #[default]
    Idle,
    /// Capturing a snapshot of the surface
    Perceiving,
    /// Waiting for the reasoning service
    Thinking,
    /// Executing the actions of a decision
    Acting,
    /// Suspended at the step gate, checkpoint taken
    Paused,
    /// Task completed
    Finished { summary: String },
    /// Task abandoned
    Error { reason: String },
}

impl State {
    /// Finished or Error
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished { .. } | State::Error { .. })
    }

    /// A task is in progress (including paused)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            State::Perceiving | State::Thinking | State::Acting | State::Paused
        )
    }

    fn accepts_start(&self) -> bool {
        matches!(self, State::Idle) || self.is_terminal()
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "idle"),
            State::Perceiving => write!(f, "perceiving"),
            State::Thinking => write!(f, "thinking"),
            State::Acting => write!(f, "acting"),
            State::Paused => write!(f, "paused"),
            State::Finished { summary } => write!(f, "finished: {}", summary),
            State::Error { reason } => write!(f, "error: {}", reason),
        }
    }
}

/// How a recorded step ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep going
    Continue,
    /// A result carried `done`
    Completed { message: String },
    /// A result carried `fatal`
    Fatal { message: String },
    /// The step budget is spent
    MaxSteps { max: usize },
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin a fresh task
    Start { goal: String },
    /// Continue a restored task after `step` recorded steps
    Restore { step: usize },
    /// Snapshot captured and registry replaced
    SnapshotReady { elements: usize, cache_hit: bool },
    /// Snapshot capture failed
    PerceptionFailed {
        reason: String,
        attempts: u32,
        limit: u32,
    },
    /// Snapshot refresh after resuming failed
    RefreshFailed { reason: String },
    /// Reasoning channel rejected the call without trying (open breaker)
    ChannelUnavailable { retry_in_ms: u64 },
    /// Reply parsed into a decision
    DecisionReady { actions: usize },
    /// No usable decision this step
    DecisionFailed {
        reason: String,
        failures: u32,
        limit: u32,
        /// Whether the reasoning service should be told what went wrong
        correctable: bool,
    },
    /// Step record appended to history
    StepRecorded { step: usize, outcome: StepOutcome },
    /// Pause reached the step gate
    Pause,
    Resume,
    /// Permissions withdrawn mid-task
    PermissionRevoked,
    Cancel,
    /// Unexpected failure inside the loop
    Fail { message: String },
}

/// Side effects the step loop performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Log to tracing and the activity log
    LogActivity { message: String },
    /// Append a corrective instruction to the transcript
    InjectCorrection { reason: String },
    /// Snapshot the full run state
    SaveCheckpoint,
    /// Ask the host to grant permissions again
    RequestPermissions,
}

fn log(message: impl Into<String>) -> Effect {
    Effect::LogActivity {
        message: message.into(),
    }
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and effects to perform.
/// This function is completely deterministic and has no side effects.
///
/// # Invalid Transitions
/// Any invalid transition results in an Error state with a descriptive
/// reason. This function never panics.
pub fn transition(state: State, event: Event) -> (State, Vec<Effect>) {
    match (state, event) {
        (state, Event::Start { goal }) if state.accepts_start() => (
            State::Perceiving,
            vec![log(format!("Starting task: {}", goal))],
        ),

        (state, Event::Restore { step }) if state.accepts_start() => (
            State::Perceiving,
            vec![log(format!("Restored task, continuing at step {}", step + 1))],
        ),

        // From Perceiving
        (State::Perceiving, Event::SnapshotReady { elements, cache_hit }) => (
            State::Thinking,
            vec![log(format!(
                "Snapshot ready: {} elements{}",
                elements,
                if cache_hit { " (cached)" } else { "" }
            ))],
        ),

        (
            State::Perceiving,
            Event::PerceptionFailed {
                reason,
                attempts,
                limit,
            },
        ) => {
            if attempts >= limit {
                let reason = format!(
                    "perception unavailable after {} attempts: {}",
                    attempts, reason
                );
                (State::Error { reason: reason.clone() }, vec![log(reason)])
            } else {
                (
                    State::Perceiving,
                    vec![log(format!(
                        "Perception failed ({}/{}): {}",
                        attempts, limit, reason
                    ))],
                )
            }
        }

        // From Thinking
        (State::Thinking, Event::DecisionReady { actions }) => (
            State::Acting,
            vec![log(format!("Decision with {} action(s)", actions))],
        ),

        (State::Thinking, Event::RefreshFailed { reason }) => (
            State::Perceiving,
            vec![log(format!("Snapshot refresh after resume failed: {}", reason))],
        ),

        (State::Thinking, Event::ChannelUnavailable { retry_in_ms }) => (
            State::Perceiving,
            vec![log(format!(
                "Reasoning channel open, retrying in {}ms",
                retry_in_ms
            ))],
        ),

        (
            State::Thinking,
            Event::DecisionFailed {
                reason,
                failures,
                limit,
                correctable,
            },
        ) => {
            if failures >= limit {
                let reason = format!("{} consecutive failures: {}", failures, reason);
                (State::Error { reason: reason.clone() }, vec![log(reason)])
            } else {
                let mut effects = vec![log(format!(
                    "Decision failed ({}/{}): {}",
                    failures, limit, reason
                ))];
                if correctable {
                    effects.push(Effect::InjectCorrection { reason });
                }
                (State::Perceiving, effects)
            }
        }

        // From Acting
        (State::Acting, Event::StepRecorded { step, outcome }) => match outcome {
            StepOutcome::Continue => (
                State::Perceiving,
                vec![log(format!("Step {} recorded", step))],
            ),
            StepOutcome::Completed { message } => (
                State::Finished {
                    summary: message.clone(),
                },
                vec![log(format!("Task finished at step {}: {}", step, message))],
            ),
            StepOutcome::Fatal { message } => {
                let reason = format!("fatal failure at step {}: {}", step, message);
                (State::Error { reason: reason.clone() }, vec![log(reason)])
            }
            StepOutcome::MaxSteps { max } => {
                let reason = format!("max steps ({}) reached without finishing", max);
                (State::Error { reason: reason.clone() }, vec![log(reason)])
            }
        },

        // Pause and resume
        (State::Perceiving | State::Thinking | State::Acting, Event::Pause) => (
            State::Paused,
            vec![Effect::SaveCheckpoint, log("Paused")],
        ),

        (State::Paused, Event::Resume) => (State::Thinking, vec![log("Resumed")]),

        // Interruptions from any active state
        (state, Event::PermissionRevoked) if state.is_active() => (
            State::Idle,
            vec![
                Effect::SaveCheckpoint,
                Effect::RequestPermissions,
                log("Permissions revoked, task stopped"),
            ],
        ),

        (state, Event::Cancel) => {
            let effects = if state.is_active() {
                vec![log("Cancelled")]
            } else {
                vec![]
            };
            (State::Idle, effects)
        }

        (state, Event::Fail { message }) if state.is_active() => (
            State::Error {
                reason: message.clone(),
            },
            vec![log(format!("Error: {}", message))],
        ),

        // Terminal states only accept Start, Restore and Cancel
        (State::Finished { summary }, event) => (
            State::Error {
                reason: format!(
                    "Invalid transition from Finished state (summary: {}) on event: {:?}",
                    summary, event
                ),
            },
            vec![],
        ),

        (State::Error { reason }, event) => (
            State::Error {
                reason: format!(
                    "Invalid transition from Error state (reason: {}) on event: {:?}",
                    reason, event
                ),
            },
            vec![],
        ),

        // All other invalid transitions
        (state, event) => (
            State::Error {
                reason: format!(
                    "Invalid state transition: {:?} cannot handle event {:?}",
                    state, event
                ),
            },
            vec![],
        ),
    }
}
