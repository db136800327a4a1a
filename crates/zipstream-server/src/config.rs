use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zipstream::StreamOptions;

/// Deployment environment. Controls log format and error detail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// SQLite database file, or `:memory:`. Defaults to the user data dir.
    pub database: Option<PathBuf>,
    pub data_lifetime_minutes: u64,
    pub fetch_concurrency: usize,
    pub channel_capacity: usize,
    pub purge_interval_secs: u64,
    pub fetchers: Vec<FetcherEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            host: "0.0.0.0".into(),
            port: 4040,
            database: None,
            data_lifetime_minutes: 10080,
            fetch_concurrency: zipstream::streamer::DEFAULT_FETCH_CONCURRENCY,
            channel_capacity: zipstream::streamer::DEFAULT_CHANNEL_CAPACITY,
            purge_interval_secs: 3600,
            fetchers: default_fetchers(),
        }
    }
}

/// A storage backend to register, keyed by the URI schemes it serves.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum FetcherEntry {
    /// S3-compatible object store: `<scheme>://<bucket>/<key>`.
    #[serde(rename = "object-store")]
    ObjectStore {
        #[serde(default = "default_object_scheme")]
        scheme: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        allow_http: bool,
    },

    /// Plain HTTP(S) downloads.
    #[serde(rename = "http")]
    Http {
        #[serde(default = "default_http_schemes")]
        schemes: Vec<String>,
    },
}

fn default_object_scheme() -> String {
    "s3".into()
}

fn default_region() -> String {
    "us-west-2".into()
}

fn default_http_schemes() -> Vec<String> {
    vec!["https".into(), "http".into()]
}

/// Fetchers registered when the config names none.
pub fn default_fetchers() -> Vec<FetcherEntry> {
    vec![
        FetcherEntry::ObjectStore {
            scheme: default_object_scheme(),
            region: default_region(),
            endpoint: None,
            allow_http: false,
        },
        FetcherEntry::Http {
            schemes: default_http_schemes(),
        },
    ]
}

/// Where the bundle database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

/// Values given on the command line or through the environment. They win
/// over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub environment: Option<Environment>,
    pub database: Option<PathBuf>,
}

impl AppConfig {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(environment) = overrides.environment {
            self.environment = environment;
        }
        if let Some(database) = overrides.database {
            self.database = Some(database);
        }
    }

    pub fn data_lifetime(&self) -> Duration {
        Duration::from_secs(self.data_lifetime_minutes.saturating_mul(60))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            fetch_concurrency: self.fetch_concurrency.max(1),
            channel_capacity: self.channel_capacity.max(1),
        }
    }

    /// Resolve the database setting, falling back to the user data dir.
    pub fn database_location(&self) -> Option<DatabaseLocation> {
        match &self.database {
            Some(path) if path.as_os_str() == ":memory:" => Some(DatabaseLocation::Memory),
            Some(path) => Some(DatabaseLocation::File(path.clone())),
            None => default_database_path().map(DatabaseLocation::File),
        }
    }
}

/// Errors loading the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Config file path: `~/.config/zipstream/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("zipstream").join("config.toml"))
}

/// Database path: `~/.local/share/zipstream/bundles.db`
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("zipstream").join("bundles.db"))
}

/// Load config from `path` (or the default location), using defaults if the
/// file does not exist. A file that exists but cannot be parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
        return Ok(AppConfig::default());
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => parse_config(&contents).map_err(|source| ConfigError::Parse { path, source }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Read { path, source }),
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(contents)
}
