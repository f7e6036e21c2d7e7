//! Configuration store
//!
//! A flat, string-keyed settings table built once at startup:
//! defaults, then an optional TOML file, then environment overrides.
//! Read-only after construction and shared behind an `Arc`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/smoked/config.toml";
const CONFIG_PATH_ENV: &str = "SMOKED_CONFIG";

/// Read-only key/value lookup consumed by the dispatch engine.
pub trait ConfigLookup: Send + Sync {
    /// String value for `key`, or the empty string when unset.
    fn get_string(&self, key: &str) -> String;

    fn get_bool(&self, key: &str) -> bool {
        parse_bool(&self.get_string(key))
    }

    /// Whether the `feature.<name>` flag is switched on.
    fn feature_enabled(&self, name: &str) -> bool {
        self.get_bool(&format!("feature.{name}"))
    }
}

impl ConfigLookup for HashMap<String, String> {
    fn get_string(&self, key: &str) -> String {
        self.get(key).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config from {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unsupported value type for config key {key}")]
    Unsupported { key: String },
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Process-wide settings table
#[derive(Debug, Clone)]
pub struct Settings {
    values: HashMap<String, String>,
    source: Option<PathBuf>,
}

impl Settings {
    /// Built-in defaults only.
    pub fn defaults() -> Self {
        let values = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values,
            source: None,
        }
    }

    /// Defaults, overlaid with the file named by `SMOKED_CONFIG` (or the
    /// default path) and then with process environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// [`Settings::load`] against an arbitrary environment. A missing file at
    /// the default path is skipped, but a path named through `SMOKED_CONFIG`
    /// must exist.
    pub fn load_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::defaults();
        match env(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            Some(path) => settings.merge_file(Path::new(&path))?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    settings.merge_file(path)?;
                }
            }
        }
        settings.apply_env_with(env);
        Ok(settings)
    }

    /// The config file that was merged, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_table("", &table)?;
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    /// Flattens nested tables into dotted keys. Quoted keys may carry dots
    /// themselves, so `[feature] "ping.count" = 3` sets `feature.ping.count`.
    fn merge_table(&mut self, prefix: &str, table: &toml::Table) -> Result<(), ConfigError> {
        for (name, value) in table {
            let key = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            let flat = match value {
                toml::Value::Table(inner) => {
                    self.merge_table(&key, inner)?;
                    continue;
                }
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Datetime(d) => d.to_string(),
                toml::Value::Array(_) => return Err(ConfigError::Unsupported { key }),
            };
            debug!(key = %key, "config file override");
            self.values.insert(key, flat);
        }
        Ok(())
    }

    /// Overrides every known key from the environment. `feature.ping.count`
    /// is read from `FEATURE_PING_COUNT`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, value) in self.values.iter_mut() {
            if let Some(over) = lookup(&env_name(key)) {
                debug!(key = %key, "environment override");
                *value = over;
            }
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<u64, ConfigError> {
        let raw = self.get_string(key);
        raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            expected: "a non-negative integer",
        })
    }

    pub fn get_duration(&self, key: &str) -> Result<Duration, ConfigError> {
        let raw = self.get_string(key);
        parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            expected: "a duration such as 30s, 1m or 500ms",
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ConfigLookup for Settings {
    fn get_string(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }
}

const DEFAULTS: &[(&str, &str)] = &[
    ("server.listen", "0.0.0.0:8080"),
    ("log.level", "info"),
    ("rate.limit", "30"),
    ("rate.timeframe", "1m"),
    ("cors.origin", ""),
    // Common features, enabled by default
    ("feature.mtr", "true"),
    ("feature.traceroute", "true"),
    ("feature.ping", "true"),
    ("feature.ping.count", "5"),
    // Extra features, disabled by default
    ("feature.files", "false"),
    ("feature.files.path", "/data/files"),
    ("feature.bgp", "false"),
    // 0 disables the limit
    ("exec.timeout", "0"),
    ("exec.max_output", "0"),
];

fn env_name(key: &str) -> String {
    key.to_uppercase().replace('.', "_")
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "on"
    )
}

/// Parses `500ms`, `30s`, `1m`, `2h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::defaults();
        assert!(settings.source().is_none());
        assert_eq!(settings.get_string("feature.ping.count"), "5");
        assert_eq!(settings.get_string("server.listen"), "0.0.0.0:8080");
        assert!(settings.feature_enabled("mtr"));
        assert!(settings.feature_enabled("traceroute"));
        assert!(settings.feature_enabled("ping"));
        assert!(!settings.feature_enabled("bgp"));
        assert!(!settings.feature_enabled("files"));
    }

    #[test]
    fn test_missing_key_is_empty() {
        let settings = Settings::defaults();
        assert_eq!(settings.get_string("no.such.key"), "");
        assert!(!settings.get_bool("no.such.key"));
    }

    #[test]
    fn test_env_override() {
        let mut settings = Settings::defaults();
        settings.apply_env_with(|name| match name {
            "FEATURE_PING_COUNT" => Some("3".into()),
            "FEATURE_BGP" => Some("true".into()),
            _ => None,
        });
        assert_eq!(settings.get_string("feature.ping.count"), "3");
        assert!(settings.feature_enabled("bgp"));
        assert!(settings.feature_enabled("mtr"));
    }

    #[test]
    fn test_merge_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
listen = "127.0.0.1:9000"

[rate]
limit = 100

[feature]
bgp = true
"ping.count" = 10
"#
        )
        .unwrap();

        let mut settings = Settings::defaults();
        settings.merge_file(file.path()).unwrap();
        assert_eq!(settings.get_string("server.listen"), "127.0.0.1:9000");
        assert_eq!(settings.get_u64("rate.limit").unwrap(), 100);
        assert_eq!(settings.get_string("feature.ping.count"), "10");
        assert!(settings.feature_enabled("bgp"));
        // untouched keys keep their defaults
        assert!(settings.feature_enabled("ping"));
        assert_eq!(settings.source(), Some(file.path()));
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(include_str!("../config.example.toml").as_bytes())
            .unwrap();

        let mut settings = Settings::defaults();
        settings.merge_file(file.path()).unwrap();
        for (key, value) in DEFAULTS {
            assert_eq!(settings.get_string(key), *value, "{key}");
        }
    }

    #[test]
    fn test_merge_file_rejects_arrays() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[cors]\norigin = [\"a\", \"b\"]\n").unwrap();

        let mut settings = Settings::defaults();
        let err = settings.merge_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { ref key } if key == "cors.origin"));
    }

    #[test]
    fn test_merge_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is = = not toml").unwrap();

        let mut settings = Settings::defaults();
        assert!(matches!(
            settings.merge_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_with_named_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate]\nlimit = 7").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let settings = Settings::load_with(|name| match name {
            "SMOKED_CONFIG" => Some(path.clone()),
            "RATE_TIMEFRAME" => Some("10s".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.source(), Some(file.path()));
        assert_eq!(settings.get_string("rate.limit"), "7");
        assert_eq!(settings.get_string("rate.timeframe"), "10s");
    }

    #[test]
    fn test_load_with_missing_named_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let named = missing.to_string_lossy().into_owned();

        let err = Settings::load_with(|name| {
            (name == "SMOKED_CONFIG").then(|| named.clone())
        })
        .unwrap_err();
        match &err {
            ConfigError::Read { path, .. } => assert_eq!(path, &missing),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("absent.toml"), "{err}");
    }

    #[test]
    fn test_parse_bool() {
        for yes in ["1", "t", "true", "TRUE", "yes", "on"] {
            assert!(parse_bool(yes), "{yes} should be true");
        }
        for no in ["", "0", "false", "off", "nope"] {
            assert!(!parse_bool(no), "{no} should be false");
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5 minutes"), None);
        assert_eq!(parse_duration("m"), None);
    }

    #[test]
    fn test_invalid_numeric_value() {
        let mut settings = Settings::defaults();
        settings.set("rate.limit", "lots");
        assert!(matches!(
            settings.get_u64("rate.limit"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_hashmap_lookup() {
        let mut map = HashMap::new();
        map.insert("feature.ping".to_string(), "true".to_string());
        assert!(map.feature_enabled("ping"));
        assert!(!map.feature_enabled("mtr"));
        assert_eq!(map.get_string("feature.ping.count"), "");
    }
}
