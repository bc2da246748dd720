//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SkeinSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SKEIN_*` environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SkeinSettings;

/// Environment variable naming an alternative settings file.
pub const SETTINGS_PATH_ENV: &str = "SKEIN_SETTINGS";

/// Resolve the settings file path: `$SKEIN_SETTINGS`, else `./skein.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(SETTINGS_PATH_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("skein.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SkeinSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid value is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<SkeinSettings> {
    let defaults = serde_json::to_value(SkeinSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SkeinSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut SkeinSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Split out of [`apply_env_overrides`] so tests do not touch the process
/// environment.
pub fn apply_overrides(settings: &mut SkeinSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("SKEIN_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_PORT", |v| parse_range::<u16>(v, 0, 65535)) {
        settings.server.port = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    let t = &mut settings.transport;
    if let Some(v) = read("SKEIN_CLIENT_LIBRARY_URL") {
        t.client_library_url = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_HEARTBEAT_INTERVAL_MS", |v| {
        parse_range::<u64>(v, 100, 3_600_000)
    }) {
        t.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_DISCONNECT_DELAY_MS", |v| {
        parse_range::<u64>(v, 100, 3_600_000)
    }) {
        t.disconnect_delay_ms = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_STREAM_BYTES_LIMIT", |v| {
        parse_range::<usize>(v, 1024, 1_073_741_824)
    }) {
        t.stream_bytes_limit = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_MESSAGE_CACHE_SIZE", |v| {
        parse_range::<usize>(v, 1, 1_000_000)
    }) {
        t.http_message_cache_size = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_WEBSOCKET_ENABLED", parse_bool) {
        t.websocket_enabled = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_SESSION_COOKIE_NEEDED", parse_bool) {
        t.session_cookie_needed = v;
    }
    if let Some(v) = read_parsed(&read, "SKEIN_SUPPRESS_CORS", parse_bool) {
        t.suppress_cors = v;
    }
    if let Some(v) = read("SKEIN_ALLOWED_ORIGINS") {
        t.allowed_origins = parse_list(&v);
    }
    if let Some(v) = read("SKEIN_ALLOWED_ORIGIN_PATTERNS") {
        t.allowed_origin_patterns = parse_list(&v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("SKEIN_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn read_parsed<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number within an inclusive range.
pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping empty entries.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"transport": {"heartbeatIntervalMs": 25000, "websocketEnabled": true}});
        let source = serde_json::json!({"transport": {"heartbeatIntervalMs": 1000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["transport"]["heartbeatIntervalMs"], 1000);
        assert_eq!(merged["transport"]["websocketEnabled"], true);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"allowedOrigins": ["a", "b"]});
        let source = serde_json::json!({"allowedOrigins": ["c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["allowedOrigins"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, serde_json::json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/skein.json")).unwrap();
        assert_eq!(settings.transport, SkeinSettings::default().transport);
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skein.json");
        std::fs::write(
            &path,
            r#"{"transport":{"disconnectDelayMs":1500,"allowedOrigins":["https://x.example"]}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.transport.disconnect_delay_ms, 1500);
        assert_eq!(settings.transport.allowed_origins, vec!["https://x.example"]);
        assert_eq!(settings.transport.heartbeat_interval_ms, 25_000);
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skein.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn load_invalid_value_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skein.json");
        std::fs::write(&path, r#"{"transport":{"sweepIntervalMs":0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = SkeinSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("SKEIN_PORT", "9000"),
                ("SKEIN_WEBSOCKET_ENABLED", "off"),
                ("SKEIN_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
                ("SKEIN_DISCONNECT_DELAY_MS", "2500"),
                ("SKEIN_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.server.port, 9000);
        assert!(!settings.transport.websocket_enabled);
        assert_eq!(
            settings.transport.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(settings.transport.disconnect_delay_ms, 2500);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = SkeinSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("SKEIN_PORT", "not-a-port"),
                ("SKEIN_HEARTBEAT_INTERVAL_MS", "5"),
                ("SKEIN_SUPPRESS_CORS", "maybe"),
            ]),
        );
        assert_eq!(settings, SkeinSettings::default());
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut settings = SkeinSettings::default();
        apply_overrides(&mut settings, env(&[("SKEIN_HOST", "")]));
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u64>("100", 100, 200), Some(100));
        assert_eq!(parse_range::<u64>("201", 100, 200), None);
        assert_eq!(parse_range::<u64>("-1", 0, 200), None);
    }
}
