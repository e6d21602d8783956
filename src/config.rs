//! Settings for the pipeline, read from `config.toml` and the environment.
//!
//! The file's `[API]` table must provide `BASE_URL` and `TOKEN`:
//!
//! ```toml
//! [API]
//! BASE_URL = "https://api.ouraring.com"
//! TOKEN = "personal-access-token"
//!
//! [api]
//! rate_limit_per_minute = 60
//!
//! [database]
//! db_path = "data/oura.db"
//! ```
//!
//! Values are merged in this order, later wins: built-in defaults, `[API]`,
//! `[api]`, `[database]`, then `OURA_*` environment variables.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DB_PATH: &str = "data/oura.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration is incomplete, missing: {}", missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Endpoint and credential for the Oura API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: String,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &mask_token(&self.token))
            .finish()
    }
}

impl ApiConfig {
    /// Reads the `[API]` table of the file at `path`, without environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Settings::load(path, &EnvOverrides::default()).map(|settings| settings.api)
    }
}

/// HTTP client tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub rate_limit_per_minute: u32,
    pub retry_total: u32,
    pub retry_backoff_factor: f64,
    pub retry_status_forcelist: Vec<u16>,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            retry_total: 3,
            retry_backoff_factor: 1.0,
            retry_status_forcelist: vec![429, 500, 502, 503, 504],
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub db_path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiConfig,
    pub client: ClientSettings,
    pub database: DatabaseSettings,
}

/// `OURA_*` environment values. Empty variables count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub access_token: Option<String>,
    pub base_url: Option<String>,
    pub rate_limit_per_minute: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            access_token: var("OURA_ACCESS_TOKEN"),
            base_url: var("OURA_API_URL"),
            rate_limit_per_minute: var("OURA_RATE_LIMIT"),
            db_path: var("OURA_DB_PATH").map(PathBuf::from),
        }
    }
}

// On-disk layout
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(rename = "API")]
    api_upper: Option<UpperApiSection>,
    api: Option<ApiSection>,
    database: Option<DatabaseSection>,
}

#[derive(Debug, Default, Deserialize)]
struct UpperApiSection {
    #[serde(rename = "BASE_URL")]
    base_url: Option<String>,
    #[serde(rename = "TOKEN")]
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    access_token: Option<String>,
    base_url: Option<String>,
    rate_limit_per_minute: Option<u32>,
    retry_total: Option<u32>,
    retry_backoff_factor: Option<f64>,
    retry_status_forcelist: Option<Vec<u16>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    db_path: Option<PathBuf>,
}

impl Settings {
    pub fn load(path: &Path, overrides: &EnvOverrides) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&content, path, overrides)
    }

    /// Parses already-read file content; `path` is only used in error messages.
    pub fn from_toml_str(
        content: &str,
        path: &Path,
        overrides: &EnvOverrides,
    ) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let upper = file.api_upper.unwrap_or_default();
        let lower = file.api.unwrap_or_default();
        let database = file.database.unwrap_or_default();

        let mut base_url = upper.base_url;
        let mut token = upper.token;
        if lower.base_url.is_some() {
            base_url = lower.base_url;
        }
        if lower.access_token.is_some() {
            token = lower.access_token;
        }

        let defaults = ClientSettings::default();
        let mut client = ClientSettings {
            rate_limit_per_minute: lower
                .rate_limit_per_minute
                .unwrap_or(defaults.rate_limit_per_minute),
            retry_total: lower.retry_total.unwrap_or(defaults.retry_total),
            retry_backoff_factor: lower
                .retry_backoff_factor
                .unwrap_or(defaults.retry_backoff_factor),
            retry_status_forcelist: lower
                .retry_status_forcelist
                .unwrap_or(defaults.retry_status_forcelist),
            timeout: lower
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };
        let mut db_path = database
            .db_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        // Environment takes precedence over the file
        if let Some(value) = &overrides.access_token {
            token = Some(value.clone());
        }
        if let Some(value) = &overrides.base_url {
            base_url = Some(value.clone());
        }
        if let Some(value) = &overrides.rate_limit_per_minute {
            match value.trim().parse::<u32>() {
                Ok(limit) => client.rate_limit_per_minute = limit,
                Err(_) => warn!("Ignoring OURA_RATE_LIMIT={value}: not a whole number"),
            }
        }
        if let Some(value) = &overrides.db_path {
            db_path = value.clone();
        }

        let mut missing = Vec::new();
        if base_url.is_none() {
            missing.push("API.BASE_URL");
        }
        if token.is_none() {
            missing.push("API.TOKEN");
        }
        let (Some(base_url), Some(token)) = (base_url, token) else {
            return Err(ConfigError::Incomplete { missing });
        };

        let settings = Self {
            api: ApiConfig { base_url, token },
            client,
            database: DatabaseSettings { db_path },
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.api.base_url).map_err(|e| ConfigError::Invalid {
            key: "API.BASE_URL",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "API.BASE_URL",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if self.client.rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid {
                key: "api.rate_limit_per_minute",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.client.retry_backoff_factor.is_finite() || self.client.retry_backoff_factor < 0.0 {
            return Err(ConfigError::Invalid {
                key: "api.retry_backoff_factor",
                reason: "must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

/// Picks the configuration file when `--config` is not given: `./config.toml`,
/// then the per-user config directory, falling back to `./config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|dir| dir.join("oura-etl").join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_base_url_and_token_verbatim() {
        let file = write_config(
            r#"
[API]
BASE_URL = "https://api.ouraring.com"
TOKEN = "abc123"
"#,
        );

        let config = ApiConfig::load(file.path()).unwrap();

        assert_eq!(config.base_url, "https://api.ouraring.com");
        assert_eq!(config.token, "abc123");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let err = ApiConfig::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::NotFound { path: p } if p == path));
    }

    #[test]
    fn missing_token_is_incomplete() {
        let file = write_config(
            r#"
[API]
BASE_URL = "https://api.ouraring.com"
"#,
        );

        let err = ApiConfig::load(file.path()).unwrap_err();

        match err {
            ConfigError::Incomplete { missing } => assert_eq!(missing, vec!["API.TOKEN"]),
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn missing_api_table_lists_both_keys() {
        let file = write_config("[database]\ndb_path = \"x.db\"\n");

        let err = ApiConfig::load(file.path()).unwrap_err();

        match err {
            ConfigError::Incomplete { missing } => {
                assert_eq!(missing, vec!["API.BASE_URL", "API.TOKEN"])
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let file = write_config("[API\nBASE_URL = \"https://api.ouraring.com\"\n");

        let err = ApiConfig::load(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn wrong_value_type_is_parse_error() {
        let file = write_config("[API]\nBASE_URL = \"https://api.ouraring.com\"\nTOKEN = 5\n");

        let err = ApiConfig::load(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn defaults_apply_when_optional_tables_are_absent() {
        let settings = Settings::from_toml_str(
            "[API]\nBASE_URL = \"https://api.ouraring.com\"\nTOKEN = \"t\"\n",
            Path::new("config.toml"),
            &EnvOverrides::default(),
        )
        .unwrap();

        assert_eq!(settings.client, ClientSettings::default());
        assert_eq!(settings.database.db_path, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn lower_case_tables_tune_client_and_database() {
        let settings = Settings::from_toml_str(
            r#"
[API]
BASE_URL = "https://api.ouraring.com"
TOKEN = "from-upper"

[api]
access_token = "from-lower"
rate_limit_per_minute = 120
retry_total = 5
retry_backoff_factor = 0.5
retry_status_forcelist = [503]
timeout_secs = 10

[database]
db_path = "/tmp/oura.db"
"#,
            Path::new("config.toml"),
            &EnvOverrides::default(),
        )
        .unwrap();

        assert_eq!(settings.api.token, "from-lower");
        assert_eq!(settings.client.rate_limit_per_minute, 120);
        assert_eq!(settings.client.retry_total, 5);
        assert_eq!(settings.client.retry_backoff_factor, 0.5);
        assert_eq!(settings.client.retry_status_forcelist, vec![503]);
        assert_eq!(settings.client.timeout, Duration::from_secs(10));
        assert_eq!(settings.database.db_path, PathBuf::from("/tmp/oura.db"));
    }

    #[test]
    fn environment_overrides_win() {
        let overrides = EnvOverrides {
            access_token: Some("env-token".to_string()),
            base_url: Some("http://localhost:8080".to_string()),
            rate_limit_per_minute: Some("30".to_string()),
            db_path: Some(PathBuf::from("env.db")),
        };

        let settings = Settings::from_toml_str(
            "[API]\nBASE_URL = \"https://api.ouraring.com\"\nTOKEN = \"file-token\"\n",
            Path::new("config.toml"),
            &overrides,
        )
        .unwrap();

        assert_eq!(settings.api.token, "env-token");
        assert_eq!(settings.api.base_url, "http://localhost:8080");
        assert_eq!(settings.client.rate_limit_per_minute, 30);
        assert_eq!(settings.database.db_path, PathBuf::from("env.db"));
    }

    #[test]
    fn environment_token_completes_file_without_token() {
        let overrides = EnvOverrides {
            access_token: Some("env-token".to_string()),
            ..Default::default()
        };

        let settings = Settings::from_toml_str(
            "[API]\nBASE_URL = \"https://api.ouraring.com\"\n",
            Path::new("config.toml"),
            &overrides,
        )
        .unwrap();

        assert_eq!(settings.api.token, "env-token");
    }

    #[test]
    fn invalid_rate_limit_override_is_ignored() {
        let overrides = EnvOverrides {
            rate_limit_per_minute: Some("fast".to_string()),
            ..Default::default()
        };

        let settings = Settings::from_toml_str(
            "[API]\nBASE_URL = \"https://api.ouraring.com\"\nTOKEN = \"t\"\n",
            Path::new("config.toml"),
            &overrides,
        )
        .unwrap();

        assert_eq!(settings.client.rate_limit_per_minute, 60);
    }

    #[test]
    fn relative_base_url_is_invalid() {
        let err = Settings::from_toml_str(
            "[API]\nBASE_URL = \"api.ouraring.com\"\nTOKEN = \"t\"\n",
            Path::new("config.toml"),
            &EnvOverrides::default(),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { key: "API.BASE_URL", .. }));
    }

    #[test]
    fn zero_rate_limit_is_invalid() {
        let err = Settings::from_toml_str(
            "[API]\nBASE_URL = \"https://api.ouraring.com\"\nTOKEN = \"t\"\n[api]\nrate_limit_per_minute = 0\n",
            Path::new("config.toml"),
            &EnvOverrides::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "api.rate_limit_per_minute",
                ..
            }
        ));
    }

    #[test]
    fn debug_output_masks_token() {
        let config = ApiConfig {
            base_url: "https://api.ouraring.com".to_string(),
            token: "ABCDEFGHIJKLMNOP".to_string(),
        };

        let debug = format!("{config:?}");

        assert!(!debug.contains("ABCDEFGHIJKLMNOP"));
        assert!(debug.contains("****MNOP"));
        assert_eq!(mask_token("short"), "****");
    }

    #[test]
    fn explicit_config_path_is_used_as_is() {
        let path = Path::new("/etc/oura/config.toml");
        assert_eq!(resolve_config_path(Some(path)), path);
    }
}
