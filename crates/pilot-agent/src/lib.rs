//! # pilot-agent
//!
//! Reasoning boundary and action resolution for Pilot.
//!
//! - [`ReasoningClient`]: the reasoning channel (Anthropic, scripted)
//! - [`CircuitBreaker`]: fail-fast protection around that channel
//! - Action resolution: a declarative [`schema`] that renders the action
//!   vocabulary and binds reply parameters, [`parse_decision`] for whole
//!   replies, and the [`fallback`] interpreter for unknown action names
//!
//! ## Key Pattern
//!
//! The schema registry is the single source of truth: the text the model sees
//! and the parser that reads its answer are both generated from it.

mod auth;
mod circuit_breaker;
mod client;
pub mod decision;
pub mod fallback;
pub mod params;
pub mod schema;
mod scripted;
mod types;

use async_trait::async_trait;
use pilot_core::{ConversationMessage, Result};

pub use auth::{get_auth_token, PILOT_API_KEY_ENV};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::AnthropicClient;
pub use decision::parse_decision;
pub use fallback::interpret as interpret_dynamic;
pub use schema::{registry, schema_for, vocabulary, ActionSchema, ParamSpec, ParamType};
pub use scripted::{ScriptedReasoning, ScriptedReply};
pub use types::*;

/// Reasoning boundary
///
/// May fail with network, timeout or rate-limit errors, and may return
/// malformed content; callers must handle both.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Produce a reply for the ordered conversation
    async fn generate(&self, conversation: &[ConversationMessage]) -> Result<String>;
}
