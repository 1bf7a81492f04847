// ABOUTME: Configuration - database connection settings and sync/server options
// ABOUTME: Loaded from ~/.table-sync/config.toml (or --config), overridden by CLI flags and env

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::{ApplyMode, KeyPolicy, ReconcileConfig, Side};

/// Connection settings for one database.
///
/// Either `url` (a `postgresql://` URL or libpq keyword string) or the
/// individual fields. Also the body shape of `POST /connect`.
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: Option<String>,
    pub host: String,
    #[serde(deserialize_with = "string_or_number")]
    pub port: String,
    pub user: String,
    pub password: String,
    #[serde(alias = "dbname")]
    pub database: String,
    pub sslmode: Option<String>,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url.as_deref().map(crate::utils::strip_password))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

impl DbConfig {
    /// Connection string for this database.
    ///
    /// `url` wins when present. Otherwise a libpq keyword string is built
    /// from the non-empty fields:
    ///
    /// ```
    /// use table_sync::config::DbConfig;
    ///
    /// let config = DbConfig {
    ///     host: "db".to_string(),
    ///     port: "5432".to_string(),
    ///     user: "app".to_string(),
    ///     password: "s3cret pass".to_string(),
    ///     database: "shop".to_string(),
    ///     ..Default::default()
    /// };
    /// assert_eq!(
    ///     config.build_dsn().unwrap(),
    ///     "host=db port=5432 user=app password='s3cret pass' dbname=shop"
    /// );
    /// ```
    pub fn build_dsn(&self) -> Result<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.to_string());
        }
        if self.host.is_empty() {
            bail!("Database host is required when no url is given");
        }

        let pairs = [
            ("host", self.host.as_str()),
            ("port", self.port.as_str()),
            ("user", self.user.as_str()),
            ("password", self.password.as_str()),
            ("dbname", self.database.as_str()),
            ("sslmode", self.sslmode.as_deref().unwrap_or("")),
        ];

        Ok(pairs
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{}={}", key, quote_dsn_value(value)))
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Quote a libpq keyword value when it contains spaces, quotes or backslashes.
fn quote_dsn_value(value: &str) -> String {
    if !value
        .chars()
        .any(|c| c.is_whitespace() || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u16),
    }

    Ok(match Port::deserialize(deserializer)? {
        Port::Text(s) => s,
        Port::Number(n) => n.to_string(),
    })
}

/// `[sync]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Schema both tables live in
    pub schema: String,
    pub key_policy: KeyPolicy,
    pub apply_mode: ApplyMode,
    pub override_system_value: bool,
    pub connect_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            key_policy: KeyPolicy::Single,
            apply_mode: ApplyMode::Independent,
            override_system_value: true,
            connect_retries: 5,
            retry_delay_ms: 1000,
        }
    }
}

impl SyncSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            key_policy: self.key_policy,
            apply_mode: self.apply_mode,
            target_schema: self.schema.clone(),
            override_system_value: self.override_system_value,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: Option<DbConfig>,
    pub target: Option<DbConfig>,
    pub sync: SyncSettings,
    pub server: ServerSettings,
}

/// `~/.table-sync/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".table-sync").join("config.toml"))
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load `path` when given (it must exist), else the default path when it
    /// exists, else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Connection string for `side`: the CLI/env value when given, else the
    /// config file section.
    pub fn connection_string(&self, side: Side, cli_value: Option<&str>) -> Result<String> {
        if let Some(value) = cli_value.filter(|v| !v.trim().is_empty()) {
            return Ok(value.to_string());
        }
        let section = match side {
            Side::Source => self.source.as_ref(),
            Side::Target => self.target.as_ref(),
        };
        match section {
            Some(db) => db
                .build_dsn()
                .with_context(|| format!("Invalid [{}] section in config", side)),
            None => bail!(
                "No {side} database configured: pass --{side}, set TABLE_SYNC_{} or add a [{side}] section to the config file",
                side.to_string().to_uppercase()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sync.schema, "public");
        assert_eq!(config.sync.key_policy, KeyPolicy::Single);
        assert_eq!(config.sync.apply_mode, ApplyMode::Independent);
        assert_eq!(config.sync.connect_retries, 5);
        assert_eq!(config.sync.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[source]
url = "postgresql://app:pw@src:5432/shop"

[target]
host = "dst"
port = 6543
user = "app"
password = "pw"
database = "shop_copy"
sslmode = "require"

[sync]
schema = "sales"
key_policy = "composite"
apply_mode = "transactional"
override_system_value = false

[server]
port = 9000
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.sync.schema, "sales");
        assert_eq!(config.sync.key_policy, KeyPolicy::Composite);
        assert_eq!(config.sync.apply_mode, ApplyMode::Transactional);
        assert!(!config.sync.override_system_value);
        assert_eq!(config.sync.connect_retries, 5);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");

        assert_eq!(
            config.connection_string(Side::Source, None).unwrap(),
            "postgresql://app:pw@src:5432/shop"
        );
        assert_eq!(
            config.connection_string(Side::Target, None).unwrap(),
            "host=dst port=6543 user=app password=pw dbname=shop_copy sslmode=require"
        );

        let reconcile = config.sync.reconcile_config();
        assert_eq!(reconcile.target_schema, "sales");
        assert_eq!(reconcile.apply_mode, ApplyMode::Transactional);
    }

    #[test]
    fn test_cli_value_overrides_file() {
        let config = AppConfig {
            source: Some(DbConfig {
                url: Some("postgresql://file/db".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            config
                .connection_string(Side::Source, Some("postgresql://cli/db"))
                .unwrap(),
            "postgresql://cli/db"
        );
    }

    #[test]
    fn test_missing_side_is_an_error() {
        let err = AppConfig::default()
            .connection_string(Side::Target, None)
            .unwrap_err();
        assert!(err.to_string().contains("TABLE_SYNC_TARGET"));
        assert!(err.to_string().contains("--target"));
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[sync\nschema = 1").unwrap();
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_build_dsn_quotes_and_skips_empty() {
        let config = DbConfig {
            host: "localhost".to_string(),
            user: "o'neil".to_string(),
            password: "a\\b".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.build_dsn().unwrap(),
            "host=localhost user='o\\'neil' password='a\\\\b'"
        );
    }

    #[test]
    fn test_build_dsn_requires_host() {
        assert!(DbConfig::default().build_dsn().is_err());
    }

    #[test]
    fn test_port_accepts_string_or_number() {
        let from_json: DbConfig =
            serde_json::from_str(r#"{"host":"h","port":"5432","database":"d"}"#).unwrap();
        assert_eq!(from_json.port, "5432");
        let from_number: DbConfig = serde_json::from_str(r#"{"host":"h","port":5432}"#).unwrap();
        assert_eq!(from_number.port, "5432");
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DbConfig {
            host: "h".to_string(),
            password: "hunter2".to_string(),
            url: Some("postgresql://u:hunter2@h/db".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
