//! Runtime configuration resolution for tagsync-backfill
//!
//! Provides multi-tier resolution with ENV → TOML → default priority. Every
//! tunable has an environment override named `TAGSYNC_<NAME>` (for example
//! `TAGSYNC_BATCH_SIZE`).

use crate::coordinator::CoordinatorConfig;
use crate::migration::BackfillConfig;
use crate::services::DEFAULT_API_BASE_URL;
use std::str::FromStr;
use tagsync_common::config::TomlConfig;
use tracing::{info, warn};

/// Environment variable prefix for runtime overrides
pub const ENV_PREFIX: &str = "TAGSYNC_";

/// Fully resolved runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub coordinator: CoordinatorConfig,
    pub backfill: BackfillConfig,
}

/// Resolve against the process environment
pub fn resolve_runtime_config(toml_config: &TomlConfig) -> RuntimeConfig {
    resolve_with(toml_config, |name| std::env::var(name).ok())
}

/// Resolve with an explicit environment lookup
pub fn resolve_with<F>(toml_config: &TomlConfig, env: F) -> RuntimeConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut coordinator = CoordinatorConfig::default().with_overrides(&toml_config.coordinator);
    override_from_env(&env, "MAX_REQUESTS_PER_SECOND", &mut coordinator.max_requests_per_second);
    override_from_env(&env, "MAX_REQUESTS_PER_MINUTE", &mut coordinator.max_requests_per_minute);
    override_from_env(&env, "CIRCUIT_BREAKER_THRESHOLD", &mut coordinator.circuit_breaker_threshold);
    override_from_env(&env, "CIRCUIT_BREAKER_RESET_MS", &mut coordinator.circuit_breaker_reset_ms);
    override_from_env(&env, "REQUEST_TIMEOUT_MS", &mut coordinator.request_timeout_ms);
    override_from_env(&env, "MAX_RATE_LIMIT_WAITS", &mut coordinator.max_rate_limit_waits);

    let mut backfill = BackfillConfig::default().with_overrides(&toml_config.backfill);
    override_from_env(&env, "BATCH_SIZE", &mut backfill.batch_size);
    override_from_env(&env, "MAX_RECORD_ATTEMPTS", &mut backfill.max_record_attempts);
    override_from_env(&env, "RETRY_BASE_DELAY_MS", &mut backfill.retry_base_delay_ms);
    override_from_env(&env, "RETRY_MAX_DELAY_MS", &mut backfill.retry_max_delay_ms);
    override_from_env(&env, "BATCH_DELAY_MS", &mut backfill.batch_delay_ms);
    override_from_env(&env, "BATCH_DELAY_MAX_MS", &mut backfill.batch_delay_max_ms);
    override_from_env(&env, "BATCH_DELAY_MULTIPLIER", &mut backfill.batch_delay_multiplier);
    override_from_env(&env, "MAX_CONSECUTIVE_FAILURES", &mut backfill.max_consecutive_failures);
    override_from_env(&env, "CHECKPOINT_EVERY_BATCHES", &mut backfill.checkpoint_every_batches);

    let api_base_url = env_value(&env, "API_BASE_URL")
        .or_else(|| toml_config.api_base_url.clone().filter(|v| is_valid_value(v)))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

    RuntimeConfig {
        api_base_url,
        api_token: resolve_api_token(toml_config, &env),
        coordinator,
        backfill,
    }
}

/// API token: ENV → TOML, warning when both are set
fn resolve_api_token<F>(toml_config: &TomlConfig, env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let env_token = env_value(env, "API_TOKEN");
    let toml_token = toml_config.api_token.clone().filter(|v| is_valid_value(v));

    if env_token.is_some() && toml_token.is_some() {
        warn!("API token found in multiple sources: environment, TOML. Using environment (highest priority).");
    }

    if let Some(token) = env_token {
        info!("API token loaded from environment variable");
        return Some(token);
    }
    if let Some(token) = toml_token {
        info!("API token loaded from TOML config");
        return Some(token);
    }

    warn!("No API token configured, requests will be sent unauthenticated");
    None
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

fn env_value<F>(env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(&format!("{}{}", ENV_PREFIX, name)).filter(|v| is_valid_value(v))
}

fn override_from_env<F, T>(env: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = env_value(env, name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(
            variable = %format!("{}{}", ENV_PREFIX, name),
            value = %raw,
            "Ignoring unparsable environment override"
        ),
    }
}
