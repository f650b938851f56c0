use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;
use toml::Value as TomlValue;

use crate::error::Result;
use crate::protocol::ModelVariant;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_SMALL_MODEL: &str = "deepseek-r1:1.5b";
pub const DEFAULT_LARGE_MODEL: &str = "deepseek-r1:7b";
pub const DEFAULT_OPTIMIZE_COMMAND: &str = "optimize-deepseek";
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STATS_REFRESH_SECS: u64 = 5;

const CONFIG_TOML_FILE: &str = "config.toml";

/// Application configuration loaded from disk and merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Host root of the inference server, e.g. `http://localhost:11434`.
    pub base_url: String,

    /// Model tag sent for [`ModelVariant::Small`].
    pub small_model: String,

    /// Model tag sent for [`ModelVariant::Large`].
    pub large_model: String,

    /// Variant selected when a session starts.
    pub default_variant: ModelVariant,

    pub connect_timeout: Duration,

    /// A turn fails when the response body stays silent for this long.
    pub stream_idle_timeout: Duration,

    /// Program run by the "optimize performance" action.
    pub optimize_command: String,

    /// File holding the CPU temperature in millidegrees Celsius.
    pub thermal_zone_path: PathBuf,

    pub stats_refresh_interval: Duration,

    /// Directory holding `config.toml` and `log/`. Defaults to `~/.localchat`.
    pub localchat_home: PathBuf,
}

/// Base config deserialized from ~/.localchat/config.toml.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub base_url: Option<String>,
    pub small_model: Option<String>,
    pub large_model: Option<String>,
    pub default_variant: Option<ModelVariant>,
    pub connect_timeout_secs: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
    pub optimize_command: Option<String>,
    pub thermal_zone_path: Option<PathBuf>,
    pub stats_refresh_secs: Option<u64>,
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub default_variant: Option<ModelVariant>,
}

impl Config {
    /// Load configuration, applying `cli_overrides` (dotted `-c` paths) to the
    /// parsed TOML and then `overrides` (highest precedence).
    pub fn load_with_cli_overrides(
        cli_overrides: Vec<(String, TomlValue)>,
        overrides: ConfigOverrides,
    ) -> std::io::Result<Self> {
        let localchat_home = find_localchat_home()?;
        let mut root_value = load_config_as_toml(&localchat_home)?;
        for (path, value) in cli_overrides {
            apply_toml_override(&mut root_value, &path, value);
        }

        let cfg: ConfigToml = root_value.try_into().map_err(|e| {
            tracing::error!("Failed to deserialize overridden config: {e}");
            std::io::Error::new(std::io::ErrorKind::InvalidData, e)
        })?;

        Ok(Self::load_from_base_config_with_overrides(
            cfg,
            overrides,
            localchat_home,
        ))
    }

    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        localchat_home: PathBuf,
    ) -> Self {
        let ConfigOverrides {
            base_url,
            default_variant,
        } = overrides;

        let base_url = base_url
            .or(cfg.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            base_url,
            small_model: cfg
                .small_model
                .unwrap_or_else(|| DEFAULT_SMALL_MODEL.to_string()),
            large_model: cfg
                .large_model
                .unwrap_or_else(|| DEFAULT_LARGE_MODEL.to_string()),
            default_variant: default_variant.or(cfg.default_variant).unwrap_or_default(),
            connect_timeout: Duration::from_secs(
                cfg.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            stream_idle_timeout: Duration::from_secs(
                cfg.stream_idle_timeout_secs.unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
            ),
            optimize_command: cfg
                .optimize_command
                .unwrap_or_else(|| DEFAULT_OPTIMIZE_COMMAND.to_string()),
            thermal_zone_path: cfg
                .thermal_zone_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_THERMAL_ZONE)),
            stats_refresh_interval: Duration::from_secs(
                cfg.stats_refresh_secs.unwrap_or(DEFAULT_STATS_REFRESH_SECS).max(1),
            ),
            localchat_home,
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.localchat_home.join("log")
    }
}

/// Read `config.toml` under `localchat_home`. A missing file yields an empty
/// table.
pub fn load_config_as_toml(localchat_home: &Path) -> std::io::Result<TomlValue> {
    let config_path = localchat_home.join(CONFIG_TOML_FILE);
    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<TomlValue>(&contents) {
            Ok(val) => Ok(val),
            Err(e) => {
                tracing::error!("Failed to parse {}: {e}", config_path.display());
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("{} not found, using defaults", config_path.display());
            Ok(TomlValue::Table(Default::default()))
        }
        Err(e) => {
            tracing::error!("Failed to read {}: {e}", config_path.display());
            Err(e)
        }
    }
}

/// Parse a config file body; used by tests and by callers that already hold
/// the text.
pub fn parse_config_toml(contents: &str) -> Result<ConfigToml> {
    Ok(toml::from_str(contents)?)
}

/// Apply a single dotted-path override onto a TOML value, creating
/// intermediate tables as needed.
fn apply_toml_override(root: &mut TomlValue, path: &str, value: TomlValue) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (idx, segment) in segments.iter().enumerate() {
        let is_last = idx == segments.len() - 1;

        if is_last {
            match current {
                TomlValue::Table(table) => {
                    table.insert((*segment).to_string(), value);
                }
                _ => {
                    let mut table = toml::map::Map::new();
                    table.insert((*segment).to_string(), value);
                    *current = TomlValue::Table(table);
                }
            }
            return;
        }

        match current {
            TomlValue::Table(table) => {
                current = table
                    .entry((*segment).to_string())
                    .or_insert_with(|| TomlValue::Table(toml::map::Map::new()));
            }
            _ => {
                *current = TomlValue::Table(toml::map::Map::new());
                if let TomlValue::Table(tbl) = current {
                    current = tbl
                        .entry((*segment).to_string())
                        .or_insert_with(|| TomlValue::Table(toml::map::Map::new()));
                }
            }
        }
    }
}

/// Returns the path to the localchat configuration directory, which can be
/// specified by the `LOCALCHAT_HOME` environment variable. If not set,
/// defaults to `~/.localchat`.
///
/// - If `LOCALCHAT_HOME` is set, the value is canonicalized and must exist.
/// - If it is not set, this does not verify that the directory exists.
pub fn find_localchat_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var("LOCALCHAT_HOME") {
        if !val.is_empty() {
            return PathBuf::from(val).canonicalize();
        }
    }

    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".localchat");
    Ok(p)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_config_is_empty() {
        let home = TempDir::new().unwrap();
        let config = Config::load_from_base_config_with_overrides(
            ConfigToml::default(),
            ConfigOverrides::default(),
            home.path().to_path_buf(),
        );

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.small_model, "deepseek-r1:1.5b");
        assert_eq!(config.large_model, "deepseek-r1:7b");
        assert_eq!(config.default_variant, ModelVariant::Small);
        assert_eq!(config.optimize_command, "optimize-deepseek");
        assert_eq!(config.log_dir(), home.path().join("log"));
    }

    #[test]
    fn toml_values_are_applied_and_overrides_win() {
        let cfg = parse_config_toml(
            r#"
base_url = "http://phone.local:11434"
large_model = "deepseek-r1:8b"
default_variant = "large"
stream_idle_timeout_secs = 30
"#,
        )
        .unwrap();
        let home = TempDir::new().unwrap();
        let config = Config::load_from_base_config_with_overrides(
            cfg,
            ConfigOverrides {
                base_url: Some("http://127.0.0.1:9999".to_string()),
                default_variant: None,
            },
            home.path().to_path_buf(),
        );

        assert_eq!(config.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.large_model, "deepseek-r1:8b");
        assert_eq!(config.default_variant, ModelVariant::Large);
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_config_file_is_an_empty_table() {
        let home = TempDir::new().unwrap();
        let value = load_config_as_toml(home.path()).unwrap();
        assert_eq!(value, TomlValue::Table(Default::default()));
    }

    #[test]
    fn invalid_config_file_is_reported() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join(CONFIG_TOML_FILE), "base_url = [").unwrap();
        let err = load_config_as_toml(home.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn dotted_override_creates_tables() {
        let mut root = TomlValue::Table(Default::default());
        apply_toml_override(&mut root, "a.b", TomlValue::Integer(1));
        apply_toml_override(&mut root, "base_url", TomlValue::String("x".into()));
        assert_eq!(
            root,
            toml::from_str::<TomlValue>("base_url = \"x\"\n[a]\nb = 1\n").unwrap()
        );
    }

    #[test]
    fn unknown_variant_is_a_parse_error() {
        assert!(parse_config_toml("default_variant = \"huge\"").is_err());
    }
}
