use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub(crate) const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub(crate) const DEFAULT_LINE: &str = "3";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) api_base_url: String,
    pub(crate) line: String,
    pub(crate) catalog_path: Option<PathBuf>,
    pub(crate) http: HttpSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            line: DEFAULT_LINE.to_string(),
            catalog_path: None,
            http: HttpSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct HttpSettings {
    pub(crate) connect_timeout_ms: u64,
    pub(crate) read_timeout_ms: u64,
    pub(crate) attempts: usize,
    pub(crate) retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            read_timeout_ms: 5_000,
            attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl HttpSettings {
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// File values first, then `HISUBTORY_*` environment overrides.
    pub(crate) fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let parsed: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            info!("loaded config from {}", path.display());
            parsed
        } else {
            Self::default()
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(url) = read("HISUBTORY_API_URL") {
            info!("HISUBTORY_API_URL set, using {url}");
            self.api_base_url = url;
        }
        if let Some(line) = read("HISUBTORY_LINE") {
            self.line = line;
        }
        if let Some(path) = read("HISUBTORY_CATALOG") {
            self.catalog_path = Some(PathBuf::from(path));
        }
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        let trimmed = self.api_base_url.trim().trim_end_matches('/').to_string();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be an http(s) URL, got `{}`",
                self.api_base_url
            )));
        }
        self.api_base_url = trimmed;
        if self.line.trim().is_empty() {
            return Err(ConfigError::Invalid("line must not be empty".to_string()));
        }
        if self.http.attempts == 0 {
            warn!("http.attempts is 0, using a single attempt");
            self.http.attempts = 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = AppConfig::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config.line, DEFAULT_LINE);
        assert_eq!(config.http.attempts, 2);
        assert!(config.api_base_url.starts_with("http"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "api_base_url": "https://stories.example/", "http": { "attempts": 0 } }"#,
        )
        .expect("write config");

        let mut config: AppConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.api_base_url, "https://stories.example");
        assert_eq!(config.http.attempts, 1);
        assert_eq!(config.http.read_timeout_ms, 5_000);
        assert_eq!(config.line, DEFAULT_LINE);
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HISUBTORY_API_URL", "http://10.0.0.2:8000"),
            ("HISUBTORY_LINE", " 5 "),
            ("HISUBTORY_CATALOG", ""),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|value| value.to_string()));
        assert_eq!(config.api_base_url, "http://10.0.0.2:8000");
        assert_eq!(config.line, "5");
        assert_eq!(config.catalog_path, None);
    }

    #[test]
    fn rejects_malformed_file_and_bad_url() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").expect("write config");
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));

        let mut config = AppConfig {
            api_base_url: "ftp://host".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
