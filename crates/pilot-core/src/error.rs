//! Unified error types for Pilot

use std::time::Duration;
use thiserror::Error;

/// Unified error type for all Pilot operations
#[derive(Error, Debug)]
pub enum PilotError {
    // Perception errors
    #[error("Perception unavailable: {0}")]
    Perception(String),

    // Actuation errors
    #[error("Actuation failed: {0}")]
    Actuation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(u32),

    // Reasoning channel errors
    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Circuit breaker open, retry in {}ms", .retry_in.as_millis())]
    CircuitOpen { retry_in: Duration },

    // Decision errors
    #[error("Decision parse error: {0}")]
    DecisionParse(String),

    #[error("Action validation failed: {0}")]
    ActionValidation(String),

    // Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Operation cancelled")]
    Cancelled,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl PilotError {
    /// Whether this error came from the reasoning channel being unreachable or
    /// overloaded (as opposed to returning unusable content)
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            Self::Reasoning(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }
}

/// Result type alias using PilotError
pub type Result<T> = std::result::Result<T, PilotError>;
