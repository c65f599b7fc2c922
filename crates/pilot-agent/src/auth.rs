//! Authentication for the Anthropic reasoning channel
//!
//! Lookup order:
//! 1. `PILOT_API_KEY` (dedicated key for the agent)
//! 2. The configured key variable (`ANTHROPIC_API_KEY` by default)

use pilot_core::{PilotError, Result};
use std::env;

/// Variable checked before the configured one
pub const PILOT_API_KEY_ENV: &str = "PILOT_API_KEY";

/// Get the API key for the reasoning channel
pub fn get_auth_token(api_key_env: &str) -> Result<String> {
    if let Some(key) = non_empty_var(PILOT_API_KEY_ENV) {
        tracing::info!("Using {}", PILOT_API_KEY_ENV);
        return Ok(key);
    }

    if let Some(key) = non_empty_var(api_key_env) {
        tracing::info!("Using {}", api_key_env);
        return Ok(key);
    }

    Err(PilotError::Auth(format!(
        "No API key found. Set either:\n\
         - {}=...  (dedicated agent key)\n\
         - {}=...  (Anthropic API key)",
        PILOT_API_KEY_ENV, api_key_env
    )))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_pilot_key_priority() {
        with_env_vars(
            &[
                ("PILOT_API_KEY", Some("pilot-key")),
                ("ANTHROPIC_API_KEY", Some("anthropic-key")),
            ],
            || {
                assert_eq!(get_auth_token("ANTHROPIC_API_KEY").unwrap(), "pilot-key");
            },
        );
    }

    #[test]
    fn test_configured_key_fallback() {
        with_env_vars(
            &[
                ("PILOT_API_KEY", None),
                ("PILOT_TEST_CUSTOM_KEY", Some("custom-key")),
            ],
            || {
                assert_eq!(get_auth_token("PILOT_TEST_CUSTOM_KEY").unwrap(), "custom-key");
            },
        );
    }

    #[test]
    fn test_empty_key_is_ignored() {
        with_env_vars(
            &[
                ("PILOT_API_KEY", Some("  ")),
                ("ANTHROPIC_API_KEY", Some("anthropic-key")),
            ],
            || {
                assert_eq!(get_auth_token("ANTHROPIC_API_KEY").unwrap(), "anthropic-key");
            },
        );
    }

    #[test]
    fn test_no_auth() {
        with_env_vars(
            &[("PILOT_API_KEY", None), ("ANTHROPIC_API_KEY", None)],
            || {
                let result = get_auth_token("ANTHROPIC_API_KEY");
                assert!(matches!(result, Err(PilotError::Auth(_))));
            },
        );
    }
}
