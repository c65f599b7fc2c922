//! Runtime configuration for the step loop and its supervisors
//!
//! Built from [`PilotConfig`] (file settings in milliseconds) or from
//! defaults; durations are resolved once here.

use pilot_core::{
    BreakerSettings, LoopSettings, PilotConfig, RecoverySettings, RetrySettings, ScrollDirection,
};
use std::time::Duration;

/// Step loop limits
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Maximum recorded steps before the task fails
    pub max_steps: usize,
    /// Consecutive decision (or perception) failures before the task fails
    pub max_failures: u32,
    /// Pause between steps
    pub step_delay: Duration,
    /// Recent steps and transcript exchanges sent with each request
    pub history_window: usize,
    /// Cap on elements kept by a full perception parse
    pub max_elements: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_settings(&LoopSettings::default(), 300)
    }
}

impl LoopConfig {
    pub fn from_settings(settings: &LoopSettings, max_elements: usize) -> Self {
        Self {
            max_steps: settings.max_steps,
            max_failures: settings.max_failures.max(1),
            step_delay: Duration::from_millis(settings.step_delay_ms),
            history_window: settings.history_window,
            max_elements,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }
}

/// Retry policy parameters for action execution
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub rate_limit_base_delay: Duration,
    pub rate_limit_retries: u32,
    pub network_base_delay: Duration,
    pub network_retries: u32,
    pub generic_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            rate_limit_base_delay: Duration::from_millis(settings.rate_limit_base_delay_ms),
            rate_limit_retries: settings.rate_limit_retries,
            network_base_delay: Duration::from_millis(settings.network_base_delay_ms),
            network_retries: settings.network_retries,
            generic_retries: settings.generic_retries,
        }
    }
}

impl RetryConfig {
    /// Zero delays, same attempt counts (tests and scripted runs)
    pub fn immediate() -> Self {
        Self {
            rate_limit_base_delay: Duration::ZERO,
            network_base_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Circuit breaker parameters for the reasoning channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerSettings::default())
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            threshold: settings.threshold,
            cooldown: Duration::from_millis(settings.cooldown_ms),
        }
    }
}

/// Heuristic recovery parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub scroll_direction: ScrollDirection,
    pub slow_retry_delay: Duration,
    /// Consecutive failed actions before restarting the app or abandoning
    pub abandon_after: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::from(&RecoverySettings::default())
    }
}

impl From<&RecoverySettings> for RecoveryConfig {
    fn from(settings: &RecoverySettings) -> Self {
        Self {
            enabled: settings.enabled,
            scroll_direction: settings.scroll_direction,
            slow_retry_delay: Duration::from_millis(settings.slow_retry_delay_ms),
            abandon_after: settings.abandon_after.max(1),
        }
    }
}

/// Everything an [`Orchestrator`](crate::Orchestrator) needs to run a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratorConfig {
    pub run: LoopConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub recovery: RecoveryConfig,
}

impl From<&PilotConfig> for OrchestratorConfig {
    fn from(config: &PilotConfig) -> Self {
        Self {
            run: LoopConfig::from_settings(
                &config.loop_settings,
                config.perception.max_elements,
            ),
            retry: RetryConfig::from(&config.retry),
            breaker: BreakerConfig::from(&config.breaker),
            recovery: RecoveryConfig::from(&config.recovery),
        }
    }
}

impl OrchestratorConfig {
    /// No delays anywhere; for tests and scripted runs
    pub fn immediate() -> Self {
        Self {
            run: LoopConfig::default().with_step_delay(Duration::ZERO),
            retry: RetryConfig::immediate(),
            breaker: BreakerConfig::default(),
            recovery: RecoveryConfig {
                slow_retry_delay: Duration::ZERO,
                ..RecoveryConfig::default()
            },
        }
    }

    pub fn with_run(mut self, run: LoopConfig) -> Self {
        self.run = run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pilot_config_resolves_durations() {
        let mut file = PilotConfig::default();
        file.loop_settings.max_steps = 7;
        file.loop_settings.step_delay_ms = 250;
        file.retry.network_base_delay_ms = 40;
        file.breaker.cooldown_ms = 1500;
        file.recovery.scroll_direction = ScrollDirection::Up;
        file.perception.max_elements = 50;

        let config = OrchestratorConfig::from(&file);

        assert_eq!(config.run.max_steps, 7);
        assert_eq!(config.run.step_delay, Duration::from_millis(250));
        assert_eq!(config.run.max_elements, 50);
        assert_eq!(config.retry.network_base_delay, Duration::from_millis(40));
        assert_eq!(config.breaker.cooldown, Duration::from_millis(1500));
        assert_eq!(config.recovery.scroll_direction, ScrollDirection::Up);
    }

    #[test]
    fn test_failure_budget_is_at_least_one() {
        let config = LoopConfig::default().with_max_failures(0);
        assert_eq!(config.max_failures, 1);
    }

    #[test]
    fn test_immediate_config_has_no_delays() {
        let config = OrchestratorConfig::immediate();
        assert_eq!(config.run.step_delay, Duration::ZERO);
        assert_eq!(config.retry.rate_limit_base_delay, Duration::ZERO);
        assert_eq!(config.recovery.slow_retry_delay, Duration::ZERO);
        assert_eq!(config.retry.generic_retries, RetryConfig::default().generic_retries);
    }
}
