use std::env;
use std::fs;
use std::path::Path;

use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let options = LoadOptions::default();
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = AppConfig::locate_file(&options);
    render(&config, config_file_path.as_deref())
}

/// One line per setting, each attributed to env, file or default.
pub fn render(config: &AppConfig, config_file_path: Option<&Path>) -> String {
    let config_file_doc = load_config_file_doc(config_file_path);

    let settings = [
        setting("database.url", config.database.url.clone(), &["SIGNOFF_DATABASE_URL"]),
        setting(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
        ),
        setting(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
        ),
        setting(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["SIGNOFF_SERVER_BIND_ADDRESS"],
        ),
        setting("server.port", config.server.port.to_string(), &["SIGNOFF_SERVER_PORT"]),
        setting(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        setting(
            "logging.level",
            config.logging.level.clone(),
            &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
        ),
        setting(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
        ),
        setting(
            "approvals.document_types",
            render_list(&config.approvals.document_types),
            &["SIGNOFF_APPROVALS_DOCUMENT_TYPES"],
        ),
        setting(
            "approvals.manager_role_codes",
            render_list(&config.approvals.manager_role_codes),
            &["SIGNOFF_APPROVALS_MANAGER_ROLE_CODES"],
        ),
    ];

    let mut lines =
        vec!["effective config (source precedence: overrides > env > file > default):".to_string()];
    for Setting { key, value, env_keys } in settings {
        let source = field_source(key, env_keys, config_file_doc.as_ref(), config_file_path);
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn setting(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Setting {
    Setting { key, value, env_keys }
}

fn render_list(values: &[String]) -> String {
    if values.is_empty() {
        return "<empty>".to_string();
    }
    format!("[{}]", values.join(", "))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
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
