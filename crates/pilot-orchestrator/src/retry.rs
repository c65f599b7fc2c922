//! Failure classification and retry policies
//!
//! Pure and deterministic: the same message and action kind always produce
//! the same category and policy.

use pilot_core::ActionKind;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::RetryConfig;

/// Broad cause of a failed action, derived from its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// Element, node or target is not on the surface
    NotFound,
    /// The action itself is malformed or unsupported
    Invalid,
    RateLimit,
    /// Timed out or the surface stopped responding
    Timeout,
    Network,
    Generic,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Invalid => "invalid",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered patterns; the first match wins
const PATTERNS: &[(FailureCategory, &str)] = &[
    (
        FailureCategory::NotFound,
        r"(?i)not\s+found|no\s+such\s+(element|node|file)|does\s+not\s+exist|unknown\s+element|stale\s+element|no\s+element",
    ),
    (
        FailureCategory::Invalid,
        r"(?i)invalid|unsupported|not\s+supported|malformed|missing\s+required|unknown\s+action",
    ),
    (
        FailureCategory::RateLimit,
        r"(?i)rate[\s_-]?limit|too\s+many\s+requests|\b429\b|quota",
    ),
    (
        FailureCategory::Timeout,
        r"(?i)timed?\s*out|timeout|deadline|unresponsive|not\s+responding|\banr\b",
    ),
    (
        FailureCategory::Network,
        r"(?i)network|connection|unreachable|\bdns\b|socket|reset\s+by\s+peer|broken\s+pipe",
    ),
];

fn patterns() -> &'static [(FailureCategory, Regex)] {
    static COMPILED: OnceLock<Vec<(FailureCategory, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(category, pattern)| {
                Regex::new(pattern).ok().map(|regex| (*category, regex))
            })
            .collect()
    })
}

/// Categorize a failure message
pub fn categorize(message: &str) -> FailureCategory {
    patterns()
        .iter()
        .find(|(_, regex)| regex.is_match(message))
        .map(|(category, _)| *category)
        .unwrap_or(FailureCategory::Generic)
}

/// How a failed action is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    /// Delay doubles after each attempt, starting at `base_delay`
    ExponentialBackoff { base_delay: Duration, max_attempts: u32 },
    Immediate { max_attempts: u32 },
}

impl RetryPolicy {
    /// Retries allowed after the first attempt
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::ExponentialBackoff { max_attempts, .. } | Self::Immediate { max_attempts } => {
                *max_attempts
            }
        }
    }

    /// Delay before retry `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::ExponentialBackoff { base_delay, .. } => {
                base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            }
            Self::None | Self::Immediate { .. } => Duration::ZERO,
        }
    }
}

/// Kinds whose repetition duplicates a side effect
fn repeats_side_effect(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::Type
            | ActionKind::AppendFile
            | ActionKind::Speak
            | ActionKind::AskUser
            | ActionKind::Finish
    )
}

/// Pick the retry policy for a failure
pub fn classify(message: &str, kind: Option<ActionKind>, config: &RetryConfig) -> RetryPolicy {
    match categorize(message) {
        FailureCategory::NotFound | FailureCategory::Invalid => RetryPolicy::None,
        FailureCategory::RateLimit => RetryPolicy::ExponentialBackoff {
            base_delay: config.rate_limit_base_delay,
            max_attempts: config.rate_limit_retries,
        },
        FailureCategory::Timeout | FailureCategory::Network => RetryPolicy::ExponentialBackoff {
            base_delay: config.network_base_delay,
            max_attempts: config.network_retries,
        },
        FailureCategory::Generic => match kind {
            Some(kind) if repeats_side_effect(kind) => RetryPolicy::None,
            _ => RetryPolicy::Immediate {
                max_attempts: config.generic_retries,
            },
        },
    }
}
