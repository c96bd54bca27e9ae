use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use catalink_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let line = |key: &str, value: &str, env_keys: &[&str]| {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        render_line(key, value, source)
    };

    let database = &config.database;
    let server = &config.server;
    let import = &config.import;
    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        line("database.url", &database.url, &["CATALINK_DATABASE_URL"]),
        line(
            "database.max_connections",
            &database.max_connections.to_string(),
            &["CATALINK_DATABASE_MAX_CONNECTIONS"],
        ),
        line(
            "database.timeout_secs",
            &database.timeout_secs.to_string(),
            &["CATALINK_DATABASE_TIMEOUT_SECS"],
        ),
        line("server.bind_address", &server.bind_address, &["CATALINK_SERVER_BIND_ADDRESS"]),
        line("server.port", &server.port.to_string(), &["CATALINK_SERVER_PORT"]),
        line(
            "server.graceful_shutdown_secs",
            &server.graceful_shutdown_secs.to_string(),
            &["CATALINK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        line("import.provider_id", &import.provider_id, &["CATALINK_IMPORT_PROVIDER_ID"]),
        line(
            "import.source_path",
            &import.source_path.display().to_string(),
            &["CATALINK_IMPORT_SOURCE_PATH"],
        ),
        line("import.workers", &import.workers.to_string(), &["CATALINK_IMPORT_WORKERS"]),
        line(
            "import.timeout_secs",
            &import.timeout_secs.to_string(),
            &["CATALINK_IMPORT_TIMEOUT_SECS"],
        ),
        line(
            "import.enrich_attributes",
            &import.enrich_attributes.join(","),
            &["CATALINK_IMPORT_ENRICH_ATTRIBUTES"],
        ),
        line(
            "matching.attribute_threshold",
            &config.matching.attribute_threshold.to_string(),
            &["CATALINK_MATCHING_ATTRIBUTE_THRESHOLD"],
        ),
        line("logging.level", &config.logging.level, &["CATALINK_LOGGING_LEVEL", "CATALINK_LOG_LEVEL"]),
        line(
            "logging.format",
            &format!("{:?}", config.logging.format),
            &["CATALINK_LOGGING_FORMAT", "CATALINK_LOG_FORMAT"],
        ),
    ];

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("catalink.toml"), PathBuf::from("config/catalink.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
