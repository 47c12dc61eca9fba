use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    render(LoadOptions::default())
}

pub fn render(options: LoadOptions) -> String {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = explicit_path.or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let auth_token = match &config.channel.auth_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        Field::new("database.url", "SIGNOFF_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "SIGNOFF_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            "SIGNOFF_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "server.bind_address",
            "SIGNOFF_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Field::new("server.port", "SIGNOFF_SERVER_PORT", config.server.port.to_string()),
        Field::new("server.role", "SIGNOFF_SERVER_ROLE", config.server.role.as_str()),
        Field::new(
            "server.graceful_shutdown_secs",
            "SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Field::new("channel.kind", "SIGNOFF_CHANNEL_KIND", config.channel.kind.as_str()),
        Field::new("channel.url", "SIGNOFF_CHANNEL_URL", &config.channel.url),
        Field::new("channel.auth_token", "SIGNOFF_CHANNEL_AUTH_TOKEN", auth_token),
        Field::new("channel.stream", "SIGNOFF_CHANNEL_STREAM", &config.channel.stream),
        Field::new("channel.subject", "SIGNOFF_CHANNEL_SUBJECT", &config.channel.subject),
        Field::new("channel.consumer", "SIGNOFF_CHANNEL_CONSUMER", &config.channel.consumer),
        Field::new(
            "collaborators.employee_service_url",
            "SIGNOFF_EMPLOYEE_SERVICE_URL",
            &config.collaborators.employee_service_url,
        ),
        Field::new(
            "collaborators.notification_service_url",
            "SIGNOFF_NOTIFICATION_SERVICE_URL",
            &config.collaborators.notification_service_url,
        ),
        Field::new(
            "collaborators.request_service_url",
            "SIGNOFF_REQUEST_SERVICE_URL",
            config.collaborators.request_service_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "collaborators.timeout_secs",
            "SIGNOFF_COLLABORATORS_TIMEOUT_SECS",
            config.collaborators.timeout_secs.to_string(),
        ),
        Field::new("logging.level", "SIGNOFF_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "SIGNOFF_LOGGING_FORMAT",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["signoff.toml", "config/signoff.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

/// Keeps four characters so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}
