//! # pilot-orchestrator
//!
//! Step loop and task control for Pilot.
//!
//! This crate provides:
//! - [`Orchestrator`]: one task at a time on a spawned step loop, with pause,
//!   resume, cancel, interruptions and checkpoint restore
//! - A pure [`transition`] function that every state change goes through
//! - [`ExecutionSupervisor`]: target binding, classified retries and
//!   heuristic recovery around an [`Actuator`]
//! - Checkpoint capture, validation and JSON persistence
//! - [`ScriptedSurface`], an in-memory surface for offline runs and tests

mod activity_logger;
pub mod checkpoint;
mod config;
mod control;
mod interruption;
mod loop_engine;
mod orchestrator;
pub mod prompt;
mod recovery;
mod retry;
mod scripted;
mod state_machine;
mod supervisor;

pub use activity_logger::ActivityLogger;
pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointStore};
pub use config::{BreakerConfig, LoopConfig, OrchestratorConfig, RecoveryConfig, RetryConfig};
pub use control::{RunControl, RunState};
pub use interruption::{Interruption, InterruptionDecision, InterruptionResponse};
pub use loop_engine::{RunData, SharedRunData, StepLoop};
pub use orchestrator::Orchestrator;
pub use recovery::{ErrorSignature, RecoveryEngine, RecoveryStrategy};
pub use retry::{categorize, classify, FailureCategory, RetryPolicy};
pub use scripted::ScriptedSurface;
pub use state_machine::{transition, Effect, Event, State, StepOutcome};
pub use supervisor::{ActionOutcome, Actuator, ExecutionSupervisor};
