//! Loading: defaults, then the settings file, then the environment.
//!
//! Merge rules for the settings file:
//! - objects merge key by key, recursively
//! - arrays and scalars from the file replace the default outright
//! - `null` in the file keeps the default

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ThumpSettings;

/// `~/.thump/settings.json`, falling back to `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".thump").join("settings.json")
}

/// Load from [`settings_path`] with environment overrides.
pub fn load_settings() -> Result<ThumpSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides.
///
/// A missing file yields the defaults; an unreadable or malformed one is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<ThumpSettings> {
    let mut settings = read_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<ThumpSettings> {
    let defaults = serde_json::to_value(ThumpSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Merge `source` over `target`.
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

/// Apply `THUMP_*` overrides read through `lookup`.
///
/// Unparseable or out-of-range values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut ThumpSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("THUMP_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("THUMP_PORT", |s| parse_u16_range(s, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("THUMP_BPM", parse_bpm) {
        settings.clock.default_bpm = v;
    }
    if let Some(v) = env.parsed("THUMP_ROBO", parse_bool) {
        settings.robo.enabled = v;
    }
    if let Some(v) = env.string("THUMP_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("THUMP_MAILBOX_CAPACITY", |s| {
        parse_usize_range(s, 1, 1 << 20)
    }) {
        settings.session.mailbox_capacity = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = (self.lookup)(name)?;
        let value = parse(&raw);
        if value.is_none() {
            warn!(key = name, value = %raw, "invalid env override, ignoring");
        }
        value
    }
}

// ── Parsers ────────────────────────────────────────────────────────────────

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A `u16` within `[min, max]`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// A `usize` within `[min, max]`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// A tempo within the range the clock accepts.
pub fn parse_bpm(val: &str) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    thump_core::is_valid_bpm(n).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_keeps_siblings() {
        let target = serde_json::json!({"server": {"port": 38883, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 4000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 4000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_keeps_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"paths": ["/api", "/api/ws"]}),
            serde_json::json!({"paths": ["/jam"]}),
        );
        assert_eq!(merged["paths"], serde_json::json!(["/jam"]));
    }

    #[test]
    fn merge_scalar_replaces_object() {
        let merged = deep_merge(serde_json::json!({"a": {"b": 1}}), serde_json::json!({"a": 2}));
        assert_eq!(merged["a"], 2);
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let settings = read_file_layer(Path::new("/nonexistent/thump/settings.json")).unwrap();
        assert_eq!(settings, ThumpSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 4000}, "clock": {"defaultBpm": 120}, "robo": {"enabled": true}}"#,
        )
        .unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.clock.default_bpm, 120.0);
        assert!(settings.robo.enabled);
        assert_eq!(settings.robo.name, "the-server");
    }

    #[test]
    fn ws_paths_replaced_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"wsPaths": ["/jam"]}}"#).unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.server.ws_paths, vec!["/jam".to_owned()]);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = read_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "high"}}"#).unwrap();

        assert!(read_file_layer(&path).is_err());
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = ThumpSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("THUMP_HOST", "127.0.0.1"),
                ("THUMP_PORT", "9000"),
                ("THUMP_BPM", "128.5"),
                ("THUMP_ROBO", "yes"),
                ("THUMP_LOG_LEVEL", "debug"),
                ("THUMP_MAILBOX_CAPACITY", "64"),
            ]),
        );
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.clock.default_bpm, 128.5);
        assert!(s.robo.enabled);
        assert_eq!(s.logging.level, "debug");
        assert_eq!(s.session.mailbox_capacity, 64);
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut s = ThumpSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("THUMP_PORT", "99999"),
                ("THUMP_BPM", "-4"),
                ("THUMP_ROBO", "maybe"),
                ("THUMP_MAILBOX_CAPACITY", "0"),
                ("THUMP_HOST", ""),
            ]),
        );
        assert_eq!(s, ThumpSettings::default());
    }

    #[test]
    fn invalid_override_is_logged() {
        let (logs, _guard) = thump_core::logging::capture_logs();
        let mut s = ThumpSettings::default();
        apply_overrides(&mut s, env(&[("THUMP_BPM", "fast")]));
        assert!(logs.has_event(tracing::Level::WARN, "invalid env override"));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("38883", 1, u16::MAX), Some(38883));
        assert_eq!(parse_u16_range("0", 1, u16::MAX), None);
        assert_eq!(parse_u16_range("70000", 0, u16::MAX), None);
        assert_eq!(parse_u16_range("port", 0, u16::MAX), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("512", 1, 1024), Some(512));
        assert_eq!(parse_usize_range("2048", 1, 1024), None);
    }

    #[test]
    fn parse_bpm_rejects_non_positive() {
        assert_eq!(parse_bpm("95"), Some(95.0));
        assert_eq!(parse_bpm(" 72.5 "), Some(72.5));
        assert_eq!(parse_bpm("0"), None);
        assert_eq!(parse_bpm("inf"), None);
        assert_eq!(parse_bpm("NaN"), None);
        assert_eq!(parse_bpm("1e-20"), None);
        assert_eq!(parse_bpm("5000"), None);
    }
}
