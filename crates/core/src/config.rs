use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::association::DEFAULT_ATTRIBUTE_THRESHOLD;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub import: ImportConfig,
    pub matching: MatchingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ImportConfig {
    pub provider_id: String,
    pub source_path: PathBuf,
    pub workers: usize,
    pub timeout_secs: u64,
    pub enrich_attributes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MatchingConfig {
    pub attribute_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub import_source_path: Option<PathBuf>,
    pub import_workers: Option<usize>,
    pub import_timeout_secs: Option<u64>,
    pub attribute_threshold: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://catalink.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            import: ImportConfig {
                provider_id: "JsonDataProvider".to_string(),
                source_path: PathBuf::from("sample-data/products.json"),
                workers: 4,
                timeout_secs: 300,
                enrich_attributes: vec!["Category".to_string()],
            },
            matching: MatchingConfig { attribute_threshold: DEFAULT_ATTRIBUTE_THRESHOLD },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("catalink.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(import) = patch.import {
            if let Some(provider_id) = import.provider_id {
                self.import.provider_id = provider_id;
            }
            if let Some(source_path) = import.source_path {
                self.import.source_path = source_path;
            }
            if let Some(workers) = import.workers {
                self.import.workers = workers;
            }
            if let Some(timeout_secs) = import.timeout_secs {
                self.import.timeout_secs = timeout_secs;
            }
            if let Some(enrich_attributes) = import.enrich_attributes {
                self.import.enrich_attributes = enrich_attributes;
            }
        }

        if let Some(matching) = patch.matching {
            if let Some(attribute_threshold) = matching.attribute_threshold {
                self.matching.attribute_threshold = attribute_threshold;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CATALINK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CATALINK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("CATALINK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CATALINK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("CATALINK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CATALINK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CATALINK_SERVER_PORT") {
            self.server.port = parse_env("CATALINK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CATALINK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("CATALINK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CATALINK_IMPORT_PROVIDER_ID") {
            self.import.provider_id = value;
        }
        if let Some(value) = read_env("CATALINK_IMPORT_SOURCE_PATH") {
            self.import.source_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("CATALINK_IMPORT_WORKERS") {
            self.import.workers = parse_env("CATALINK_IMPORT_WORKERS", &value)?;
        }
        if let Some(value) = read_env("CATALINK_IMPORT_TIMEOUT_SECS") {
            self.import.timeout_secs = parse_env("CATALINK_IMPORT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CATALINK_IMPORT_ENRICH_ATTRIBUTES") {
            self.import.enrich_attributes = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = read_env("CATALINK_MATCHING_ATTRIBUTE_THRESHOLD") {
            self.matching.attribute_threshold =
                parse_env("CATALINK_MATCHING_ATTRIBUTE_THRESHOLD", &value)?;
        }

        let log_level =
            read_env("CATALINK_LOGGING_LEVEL").or_else(|| read_env("CATALINK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CATALINK_LOGGING_FORMAT").or_else(|| read_env("CATALINK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(source_path) = overrides.import_source_path {
            self.import.source_path = source_path;
        }
        if let Some(workers) = overrides.import_workers {
            self.import.workers = workers;
        }
        if let Some(timeout_secs) = overrides.import_timeout_secs {
            self.import.timeout_secs = timeout_secs;
        }
        if let Some(attribute_threshold) = overrides.attribute_threshold {
            self.matching.attribute_threshold = attribute_threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_import(&self.import)?;
        validate_matching(&self.matching)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("catalink.toml"), PathBuf::from("config/catalink.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_import(import: &ImportConfig) -> Result<(), ConfigError> {
    if import.provider_id.trim().is_empty() {
        return Err(ConfigError::Validation("import.provider_id must not be empty".to_string()));
    }

    if import.source_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("import.source_path must not be empty".to_string()));
    }

    if import.workers == 0 || import.workers > 64 {
        return Err(ConfigError::Validation("import.workers must be in range 1..=64".to_string()));
    }

    if import.timeout_secs == 0 || import.timeout_secs > 3600 {
        return Err(ConfigError::Validation(
            "import.timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    if import.enrich_attributes.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "import.enrich_attributes must not contain blank names".to_string(),
        ));
    }

    Ok(())
}

fn validate_matching(matching: &MatchingConfig) -> Result<(), ConfigError> {
    let threshold = matching.attribute_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "matching.attribute_threshold must be in range (0, 1]".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    import: Option<ImportPatch>,
    matching: Option<MatchingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ImportPatch {
    provider_id: Option<String>,
    source_path: Option<PathBuf>,
    workers: Option<usize>,
    timeout_secs: Option<u64>,
    enrich_attributes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct MatchingPatch {
    attribute_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
