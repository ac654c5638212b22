//! Settings loading.
//!
//! Compiled defaults, then `~/.taskflow/settings.json` deep-merged on top,
//! then `TASKFLOW_*` environment overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::TaskflowSettings;

pub fn taskflow_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".taskflow")
}

pub fn settings_path() -> PathBuf {
    taskflow_dir().join("settings.json")
}

pub fn load_settings() -> Result<TaskflowSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides applied.
///
/// A missing file yields defaults; malformed JSON or an invalid value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TaskflowSettings> {
    let defaults = serde_json::to_value(TaskflowSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TaskflowSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Objects merge per key; arrays and primitives from `source` replace;
/// nulls in `source` are skipped.
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

/// Apply overrides read through `lookup`. Invalid values are warned about and ignored.
pub fn apply_overrides<F>(settings: &mut TaskflowSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("TASKFLOW_BROKER_URL") {
        settings.realtime.broker_url = v;
    }
    if let Some(v) = env.bool("TASKFLOW_SOCKJS") {
        settings.realtime.sockjs = v;
    }
    if let Some(v) = env.u64_in("TASKFLOW_MAX_RECONNECT_ATTEMPTS", 1, 100) {
        settings.realtime.max_reconnect_attempts = v as u32;
    }
    if let Some(v) = env.u64_in("TASKFLOW_RECONNECT_BASE_DELAY_MS", 10, 600_000) {
        settings.realtime.reconnect_base_delay_ms = v;
    }
    if let Some(v) = env.u64_in("TASKFLOW_HEARTBEAT_MS", 0, 600_000) {
        settings.realtime.heartbeat_outgoing_ms = v;
        settings.realtime.heartbeat_incoming_ms = v;
    }
    if let Some(v) = env.string("TASKFLOW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TASKFLOW_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.string("TASKFLOW_TOKEN_FILE") {
        settings.auth.token_file = Some(v);
    }
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, case-insensitively.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "out-of-range env var, ignoring");
        }
        result
    }
}
