//! # pilot-core
//!
//! Core types for the Pilot device-control orchestration engine.
//!
//! Pilot drives an agent that perceives an on-screen surface, asks a reasoning
//! service what to do next, and executes the resulting actions until a
//! natural-language task is finished or abandoned.
//!
//! ## Core Paradigm
//!
//! - A task owns all per-run state (loop counters, history, transcript)
//! - Actions are immutable values, consumed by exactly one execution attempt
//! - History is append-only; a checkpoint is enough to resume a task
//! - Element ids are only valid for the snapshot that produced them

pub mod action;
pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use action::{Action, ActionKind, DynamicAction, Point, ScrollDirection, Target};
pub use config::{
    BreakerSettings, LoopSettings, ModelSettings, PerceptionSettings, PilotConfig, RecoverySettings,
    RetrySettings,
};
pub use error::{PilotError, Result};
pub use types::*;
