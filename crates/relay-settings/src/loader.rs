//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides
//! 4. Validate the result
//!
//! Command-line flags are applied by the binary on top of this.

use std::path::{Path, PathBuf};

use relay_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the default settings path (`~/.chat-relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chat-relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON, or values that
/// fail [`RelaySettings::validate`], is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides, read through `env`, to loaded settings.
///
/// | Variable                | Field                      |
/// |-------------------------|----------------------------|
/// | `PORT`                  | `server.port`              |
/// | `RELAY_HOST`            | `server.host`              |
/// | `RELAY_MAX_CONNECTIONS` | `server.max_connections`   |
/// | `RELAY_LOG_LEVEL`       | `logging.level`            |
/// | `RELAY_LOG_FORMAT`      | `logging.format`           |
/// | `RELAY_CORS_ORIGINS`    | `cors.allowed_origins` (comma-separated) |
///
/// Invalid values are logged and ignored.
fn apply_overrides_from(settings: &mut RelaySettings, env: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = read("PORT") {
        match parse_u16_range(&v, 1, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RELAY_MAX_CONNECTIONS") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.server.max_connections = n,
            None => {
                warn!(key = "RELAY_MAX_CONNECTIONS", value = %v, "invalid usize env var, ignoring");
            }
        }
    }
    if let Some(v) = read("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RELAY_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "RELAY_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
    if let Some(v) = read("RELAY_CORS_ORIGINS") {
        settings.cors.allowed_origins = parse_list(&v);
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks. `*` alone means "any".
pub fn parse_list(val: &str) -> Vec<String> {
    let items: Vec<String> = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.iter().any(|s| s == "*") {
        Vec::new()
    } else {
        items
    }
}
