//! Configuration management for Pilot
//!
//! Repository-level settings for the step loop, retry policies, the circuit
//! breaker around the reasoning channel, heuristic recovery, perception limits
//! and model selection. Loaded from `.pilot/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::action::ScrollDirection;
use crate::Result;

/// Repository-level Pilot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotConfig {
    /// Step loop limits
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Per-action retry policies
    #[serde(default)]
    pub retry: RetrySettings,

    /// Circuit breaker around the reasoning channel
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Heuristic recovery
    #[serde(default)]
    pub recovery: RecoverySettings,

    /// Perception limits
    #[serde(default)]
    pub perception: PerceptionSettings,

    /// Model selection
    #[serde(default)]
    pub model: ModelSettings,
}

/// Step loop limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Maximum recorded steps before the task fails
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Consecutive decision failures before the task fails
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Delay between steps
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Recent steps (and transcript exchanges) included in each request
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

/// Retry policy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_rate_limit_base_delay_ms")]
    pub rate_limit_base_delay_ms: u64,

    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    #[serde(default = "default_network_base_delay_ms")]
    pub network_base_delay_ms: u64,

    #[serde(default = "default_network_retries")]
    pub network_retries: u32,

    /// Immediate retries for unclassified failures
    #[serde(default = "default_generic_retries")]
    pub generic_retries: u32,
}

/// Circuit breaker parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,

    /// How long the breaker stays open before a trial call
    #[serde(default = "default_breaker_cooldown_ms")]
    pub cooldown_ms: u64,
}

/// Heuristic recovery parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,

    /// Direction scrolled before retrying a not-found action
    #[serde(default)]
    pub scroll_direction: ScrollDirection,

    /// Delay before retrying after a timeout
    #[serde(default = "default_slow_retry_delay_ms")]
    pub slow_retry_delay_ms: u64,

    /// Consecutive action failures before abandoning
    #[serde(default = "default_abandon_after")]
    pub abandon_after: u32,
}

/// Perception limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionSettings {
    /// Maximum elements kept by a full parse
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Default model to use
    #[serde(default = "default_model")]
    pub default: String,

    /// Maximum tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

// Default value providers
fn default_max_steps() -> usize {
    50
}

fn default_max_failures() -> u32 {
    3
}

fn default_step_delay_ms() -> u64 {
    500
}

fn default_history_window() -> usize {
    5
}

fn default_rate_limit_base_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_retries() -> u32 {
    3
}

fn default_network_base_delay_ms() -> u64 {
    500
}

fn default_network_retries() -> u32 {
    5
}

fn default_generic_retries() -> u32 {
    2
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_ms() -> u64 {
    60_000
}

fn default_recovery_enabled() -> bool {
    true
}

fn default_slow_retry_delay_ms() -> u64 {
    3000
}

fn default_abandon_after() -> u32 {
    3
}

fn default_max_elements() -> usize {
    300
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl PilotConfig {
    /// Load configuration from `.pilot/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".pilot/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::PilotError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Write default configuration to `.pilot/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".pilot");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let config = Self::default();
        let content = toml::to_string_pretty(&config).map_err(|e| {
            crate::PilotError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            loop_settings: LoopSettings::default(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            recovery: RecoverySettings::default(),
            perception: PerceptionSettings::default(),
            model: ModelSettings::default(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_failures: default_max_failures(),
            step_delay_ms: default_step_delay_ms(),
            history_window: default_history_window(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            rate_limit_base_delay_ms: default_rate_limit_base_delay_ms(),
            rate_limit_retries: default_rate_limit_retries(),
            network_base_delay_ms: default_network_base_delay_ms(),
            network_retries: default_network_retries(),
            generic_retries: default_generic_retries(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            cooldown_ms: default_breaker_cooldown_ms(),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
            scroll_direction: ScrollDirection::Down,
            slow_retry_delay_ms: default_slow_retry_delay_ms(),
            abandon_after: default_abandon_after(),
        }
    }
}

impl Default for PerceptionSettings {
    fn default() -> Self {
        Self {
            max_elements: default_max_elements(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default: default_model(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
        }
    }
}
