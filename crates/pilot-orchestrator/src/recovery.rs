//! Heuristic recovery for failed actions
//!
//! Once the retry policy is exhausted, the recovery engine maps the failure
//! signature to a remedial strategy:
//! - Element/node not found: scroll, then retry once
//! - Timeout or unresponsive surface: one slow retry
//! - Too many consecutive failures: restart the host app, or abandon
//! - Otherwise: a simpler equivalent action where one exists
//!
//! Strategies that worked are remembered per signature for the rest of the
//! run and tried first next time.

use pilot_core::{Action, ActionKind, ScrollDirection};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::RecoveryConfig;
use crate::retry::{categorize, FailureCategory};

/// What went wrong, reduced to something worth remembering
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorSignature {
    pub category: FailureCategory,
    /// Action name (`tap`, `open_app`, or a dynamic name)
    pub action_kind: String,
}

impl ErrorSignature {
    pub fn new(message: &str, action: &Action) -> Self {
        Self {
            category: categorize(message),
            action_kind: action.name().to_string(),
        }
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.action_kind)
    }
}

/// Remedial strategy for a failed action
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    Retry { attempts: u32, delay: Duration },
    ScrollAndRetry(ScrollDirection),
    RestartApp(String),
    AlternativeAction(Vec<Action>),
    Abandon,
}

impl RecoveryStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::ScrollAndRetry(_) => "scroll_and_retry",
            Self::RestartApp(_) => "restart_app",
            Self::AlternativeAction(_) => "alternative_action",
            Self::Abandon => "abandon",
        }
    }
}

/// Simpler equivalent of an action, if it has one
pub fn alternative_for(action: &Action) -> Option<Vec<Action>> {
    match action {
        Action::DoubleTap { target } | Action::LongPress { target, .. } => {
            Some(vec![Action::Tap { target: *target }])
        }
        Action::Enter => Some(vec![Action::Type {
            text: "\n".to_string(),
            target: None,
            clear: false,
        }]),
        _ => None,
    }
}

/// Recovery strategy selection with per-run memory
#[derive(Debug)]
pub struct RecoveryEngine {
    config: RecoveryConfig,
    remembered: HashMap<ErrorSignature, RecoveryStrategy>,
    /// Consecutive failed actions, including the one being recovered
    failure_streak: u32,
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            remembered: HashMap::new(),
            failure_streak: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Track the final outcome of an action
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.failure_streak = 0;
        } else {
            self.failure_streak += 1;
        }
    }

    /// Choose a strategy for `action`, which just failed with `message`
    ///
    /// Call after [`record_outcome`](Self::record_outcome) for the failure.
    pub fn strategy_for(
        &self,
        signature: &ErrorSignature,
        action: &Action,
        host_app: Option<&str>,
    ) -> RecoveryStrategy {
        if self.failure_streak >= self.config.abandon_after {
            return match host_app {
                Some(app) if action.kind() != Some(ActionKind::OpenApp) => {
                    RecoveryStrategy::RestartApp(app.to_string())
                }
                _ => RecoveryStrategy::Abandon,
            };
        }

        if let Some(strategy) = self.remembered.get(signature) {
            debug!("Using remembered strategy for {}", signature);
            return strategy.clone();
        }

        match signature.category {
            FailureCategory::NotFound => {
                RecoveryStrategy::ScrollAndRetry(self.config.scroll_direction)
            }
            FailureCategory::Timeout => RecoveryStrategy::Retry {
                attempts: 1,
                delay: self.config.slow_retry_delay,
            },
            _ => alternative_for(action)
                .map(RecoveryStrategy::AlternativeAction)
                .unwrap_or(RecoveryStrategy::Abandon),
        }
    }

    /// Remember a strategy that recovered `signature`
    pub fn remember(&mut self, signature: ErrorSignature, strategy: RecoveryStrategy) {
        if strategy != RecoveryStrategy::Abandon {
            self.remembered.insert(signature, strategy);
        }
    }

    pub fn remembered(&self, signature: &ErrorSignature) -> Option<&RecoveryStrategy> {
        self.remembered.get(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::Target;

    fn engine() -> RecoveryEngine {
        RecoveryEngine::new(RecoveryConfig::default())
    }

    fn tap() -> Action {
        Action::Tap {
            target: Target::Element(3),
        }
    }

    #[test]
    fn test_not_found_scrolls() {
        let mut engine = engine();
        engine.record_outcome(false);
        let signature = ErrorSignature::new("element not found", &tap());
        assert_eq!(
            engine.strategy_for(&signature, &tap(), None),
            RecoveryStrategy::ScrollAndRetry(ScrollDirection::Down)
        );
    }

    #[test]
    fn test_timeout_retries_slowly() {
        let mut engine = engine();
        engine.record_outcome(false);
        let signature = ErrorSignature::new("surface unresponsive", &tap());
        assert_eq!(
            engine.strategy_for(&signature, &tap(), None),
            RecoveryStrategy::Retry {
                attempts: 1,
                delay: RecoveryConfig::default().slow_retry_delay
            }
        );
    }

    #[test]
    fn test_alternatives_for_simpler_kinds() {
        let mut engine = engine();
        engine.record_outcome(false);
        let long_press = Action::LongPress {
            target: Target::Element(2),
            duration_ms: 800,
        };
        let signature = ErrorSignature::new("gesture rejected", &long_press);
        assert_eq!(
            engine.strategy_for(&signature, &long_press, None),
            RecoveryStrategy::AlternativeAction(vec![Action::Tap {
                target: Target::Element(2)
            }])
        );

        let signature = ErrorSignature::new("key event rejected", &Action::Enter);
        assert!(matches!(
            engine.strategy_for(&signature, &Action::Enter, None),
            RecoveryStrategy::AlternativeAction(actions)
                if matches!(&actions[0], Action::Type { text, .. } if text == "\n")
        ));

        let signature = ErrorSignature::new("gesture rejected", &Action::Home);
        assert_eq!(
            engine.strategy_for(&signature, &Action::Home, None),
            RecoveryStrategy::Abandon
        );
    }

    #[test]
    fn test_failure_streak_restarts_or_abandons() {
        let mut engine = engine();
        for _ in 0..3 {
            engine.record_outcome(false);
        }
        let signature = ErrorSignature::new("element not found", &tap());
        assert_eq!(
            engine.strategy_for(&signature, &tap(), Some("com.example.mail")),
            RecoveryStrategy::RestartApp("com.example.mail".to_string())
        );
        assert_eq!(
            engine.strategy_for(&signature, &tap(), None),
            RecoveryStrategy::Abandon
        );

        engine.record_outcome(true);
        assert_eq!(engine.failure_streak(), 0);
    }

    #[test]
    fn test_remembered_strategy_is_preferred() {
        let mut engine = engine();
        engine.record_outcome(false);
        let signature = ErrorSignature::new("element not found", &tap());
        engine.remember(signature.clone(), RecoveryStrategy::ScrollAndRetry(ScrollDirection::Up));
        assert_eq!(
            engine.strategy_for(&signature, &tap(), None),
            RecoveryStrategy::ScrollAndRetry(ScrollDirection::Up)
        );

        engine.remember(signature.clone(), RecoveryStrategy::Abandon);
        // Abandon is never remembered over a working strategy
        assert_eq!(
            engine.remembered(&signature),
            Some(&RecoveryStrategy::ScrollAndRetry(ScrollDirection::Up))
        );
    }
}
