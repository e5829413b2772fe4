//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If a settings file is given, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Environment variable naming an optional JSON settings file.
pub const SETTINGS_PATH_VAR: &str = "RELAY_SETTINGS";

/// Load `.env` from the working directory (or a parent) into the process
/// environment. Variables already set in the environment win.
///
/// Returns the path of the file that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => None,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable .env file");
            None
        }
    }
}

/// Load settings, reading `path` (or `$RELAY_SETTINGS`) when given, then
/// applying environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<RelaySettings> {
    let from_env = read_env_string(SETTINGS_PATH_VAR).map(PathBuf::from);
    match path.map(Path::to_path_buf).or(from_env) {
        Some(path) => load_settings_from_path(&path),
        None => {
            debug!("no settings file configured, using defaults");
            let mut settings = RelaySettings::default();
            apply_env_overrides(&mut settings);
            Ok(settings)
        }
    }
}

/// Load settings from a specific JSON file with env var overrides.
///
/// The file must exist; an unreadable file or invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    debug!(?path, "loading settings from file");
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content)?;
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let mut settings: RelaySettings = serde_json::from_value(deep_merge(defaults, user))?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PORT", |s| parse_u16_range(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("ALLOWED_ORIGINS") {
        settings.server.allowed_origins = parse_origin_list(&v);
    }
    if let Some(v) = env.parsed("RELAY_ENFORCE_ORIGINS", parse_bool) {
        settings.server.enforce_origins = v;
    }
    if let Some(v) = env.parsed("HEARTBEAT_INTERVAL_MS", |s| {
        parse_u64_range(s, 1000, 600_000)
    }) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.parsed("RELAY_MAX_MESSAGE_SIZE", |s| {
        parse_usize_range(s, 1024, 1_073_741_824)
    }) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.parsed("RELAY_SEND_QUEUE", |s| parse_usize_range(s, 1, 65_536)) {
        settings.server.send_queue_capacity = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("RELAY_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn validate(settings: &RelaySettings) -> Result<()> {
    if settings.server.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalMs must be greater than zero".to_string(),
        ));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origin_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3030, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 4040}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 4040);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"origins": ["a", "b"]});
        let source = serde_json::json!({"origins": ["c"]});
        assert_eq!(deep_merge(target, source)["origins"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"port": 3030});
        let source = serde_json::json!({"port": null});
        assert_eq!(deep_merge(target, source)["port"], 3030);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_is_io_error() {
        let result = load_settings_from_path(Path::new("/nonexistent/relay.json"));
        assert!(matches!(result, Err(SettingsError::Io { .. })));
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 5000, "allowedOrigins": ["http://a.test"]}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.heartbeat_interval_ms, 5000);
        assert_eq!(settings.server.allowed_origins, vec!["http://a.test"]);
        assert_eq!(settings.server.send_queue_capacity, 256);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_zero_heartbeat_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"server": {"heartbeatIntervalMs": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    // ── apply_overrides ─────────────────────────────────────────────

    #[test]
    fn overrides_port_and_origins() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("PORT", "8088"),
                ("ALLOWED_ORIGINS", "http://one.test, http://two.test,,"),
            ]),
        );
        assert_eq!(settings.server.port, 8088);
        assert_eq!(
            settings.server.allowed_origins,
            vec!["http://one.test", "http://two.test"]
        );
    }

    #[test]
    fn overrides_heartbeat_and_flags() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("HEARTBEAT_INTERVAL_MS", "1500"),
                ("RELAY_ENFORCE_ORIGINS", "yes"),
                ("RELAY_LOG_JSON", "on"),
                ("RELAY_LOG_LEVEL", "debug,relay_server=trace"),
                ("RELAY_SEND_QUEUE", "8"),
            ]),
        );
        assert_eq!(settings.server.heartbeat_interval_ms, 1500);
        assert!(settings.server.enforce_origins);
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "debug,relay_server=trace");
        assert_eq!(settings.server.send_queue_capacity, 8);
    }

    #[test]
    fn invalid_override_values_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("PORT", "0"),
                ("HEARTBEAT_INTERVAL_MS", "10"),
                ("RELAY_ENFORCE_ORIGINS", "maybe"),
                ("HOST", ""),
            ]),
        );
        assert_eq!(settings, RelaySettings::default());
    }

    // ── Parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("3030", 1, 65535), Some(3030));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("999", 1000, 600_000), None);
        assert_eq!(parse_usize_range("abc", 1, 10), None);
    }

    #[test]
    fn origin_list_trims_and_drops_blanks() {
        assert_eq!(parse_origin_list(" a , ,b"), vec!["a", "b"]);
        assert!(parse_origin_list("").is_empty());
    }
}
