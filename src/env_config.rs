//! Environment configuration validation and loading
//!
//! This module validates the recognized environment variables up front so the
//! process fails fast with a clear message instead of misbehaving at the
//! first request.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::Region;

const DEFAULT_REQUEST_RATE_SECS: u64 = 1;
const DEFAULT_REFRESH_RATE_SECS: u64 = 10;
const DEFAULT_PORT: u16 = 5000;

/// Environment variables that should be validated if present
const VALIDATED_VARS: &[(&str, fn(&str) -> bool)] = &[
    ("SERVER_PORT", validate_port),
    ("REQUEST_RATE", validate_positive_number),
    ("REFRESH_RATE", validate_positive_number),
    ("SECRET_TTL", validate_positive_number),
];

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream used when a request carries no region headers. `None` means
    /// headers are mandatory (`BWS_REGION=NONE`).
    pub default_region: Option<Region>,
    pub refresh_interval: Duration,
    pub request_interval: Duration,
    pub parse_secret_values: bool,
    /// Volatile directory holding one upstream auth blob per tenant.
    pub auth_state_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_region = region_from_parts(
            &env::var("BWS_REGION").unwrap_or_else(|_| "DEFAULT".to_string()),
            env::var("BWS_API_URL").ok(),
            env::var("BWS_IDENTITY_URL").ok(),
        )?;

        if env::var("SECRET_TTL").is_ok() {
            tracing::warn!(
                "SECRET_TTL is accepted for compatibility but ignored; \
                 the refresh loop is driven by incremental sync"
            );
        }

        Ok(Self {
            default_region,
            refresh_interval: Duration::from_secs(secs_var(
                "REFRESH_RATE",
                DEFAULT_REFRESH_RATE_SECS,
            )),
            request_interval: Duration::from_secs(secs_var(
                "REQUEST_RATE",
                DEFAULT_REQUEST_RATE_SECS,
            )),
            parse_secret_values: env::var("PARSE_SECRET_VALUES")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            auth_state_dir: env::var("AUTH_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
        })
    }
}

/// Validates all recognized environment variables
pub fn validate_env() -> Result<()> {
    let mut errors = Vec::new();

    for (var, validator) in VALIDATED_VARS {
        if let Ok(value) = env::var(var) {
            if !validator(&value) {
                errors.push(format!(
                    "Invalid value for environment variable {}: '{}'",
                    var, value
                ));
            }
        }
    }

    let region = env::var("BWS_REGION").unwrap_or_else(|_| "DEFAULT".to_string());
    if region.to_uppercase() == "CUSTOM" {
        for var in ["BWS_API_URL", "BWS_IDENTITY_URL"] {
            if env::var(var).is_err() {
                errors.push(format!("{} is required when BWS_REGION=CUSTOM", var));
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!(
            "Environment configuration errors:\n  - {}",
            errors.join("\n  - ")
        );
    }

    Ok(())
}

/// Logs all configured environment variables (without sensitive values)
pub fn log_env_config() {
    tracing::info!("Environment configuration:");

    log_var("BWS_REGION");
    log_var("BWS_API_URL");
    log_var("BWS_IDENTITY_URL");
    log_var("REFRESH_RATE");
    log_var("REQUEST_RATE");
    log_var("SECRET_TTL");
    log_var("PARSE_SECRET_VALUES");
    log_var("LOG_LEVEL");
    log_var("SERVER_HOST");
    log_var("SERVER_PORT");
    log_var("AUTH_STATE_DIR");
}

/// Default tracing filter derived from `LOG_LEVEL`, used when `RUST_LOG` is
/// not set.
pub fn log_filter() -> String {
    let level = parse_log_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "WARNING".to_string()));
    format!("bws_cache={level},tower_http={level}")
}

fn parse_log_level(value: &str) -> &'static str {
    match value.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "ERROR" | "CRITICAL" => "error",
        _ => "warn",
    }
}

/// Region selection: a named deployment, a custom endpoint pair, or none at
/// all (per-request headers become mandatory).
fn region_from_parts(
    region: &str,
    api_url: Option<String>,
    identity_url: Option<String>,
) -> Result<Option<Region>> {
    match region.to_uppercase().as_str() {
        "DEFAULT" => Ok(Some(Region::bitwarden_com())),
        "EU" => Ok(Some(Region::bitwarden_eu())),
        "CUSTOM" => {
            let api_url = api_url.context("BWS_API_URL is required when BWS_REGION=CUSTOM")?;
            let identity_url =
                identity_url.context("BWS_IDENTITY_URL is required when BWS_REGION=CUSTOM")?;
            Ok(Some(Region {
                api_url,
                identity_url,
            }))
        }
        "NONE" => Ok(None),
        other => anyhow::bail!("Unrecognized BWS_REGION value: {other}"),
    }
}

/// Helper to log a single environment variable
fn log_var(name: &str) {
    if let Ok(value) = env::var(name) {
        tracing::info!("  {}: {}", name, value);
    }
}

fn secs_var(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Validate port number
fn validate_port(value: &str) -> bool {
    value.parse::<u16>().map(|p| p > 0).unwrap_or(false)
}

/// Validate positive number
fn validate_positive_number(value: &str) -> bool {
    value.parse::<u64>().map(|n| n > 0).unwrap_or(false)
}
