use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub channel: ChannelConfig,
    pub collaborators: CollaboratorConfig,
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
    pub role: ServiceRole,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub url: String,
    pub auth_token: Option<SecretString>,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
}

#[derive(Clone, Debug)]
pub struct CollaboratorConfig {
    pub employee_service_url: String,
    pub notification_service_url: String,
    /// Where the processing role forwards decisions. Unused when the request
    /// side runs in the same process.
    pub request_service_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Combined,
    Requests,
    Processing,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Requests => "requests",
            Self::Processing => "processing",
        }
    }

    pub fn serves_requests(&self) -> bool {
        matches!(self, Self::Combined | Self::Requests)
    }

    pub fn serves_processing(&self) -> bool {
        matches!(self, Self::Combined | Self::Processing)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Nats,
    InProcess,
    Direct,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nats => "nats",
            Self::InProcess => "in_process",
            Self::Direct => "direct",
        }
    }
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
    pub server_role: Option<ServiceRole>,
    pub server_port: Option<u16>,
    pub channel_kind: Option<ChannelKind>,
    pub channel_url: Option<String>,
    pub employee_service_url: Option<String>,
    pub notification_service_url: Option<String>,
    pub request_service_url: Option<String>,
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
                url: "sqlite://signoff.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                role: ServiceRole::Combined,
                graceful_shutdown_secs: 15,
            },
            channel: ChannelConfig {
                kind: ChannelKind::InProcess,
                url: "nats://127.0.0.1:4222".to_string(),
                auth_token: None,
                stream: "APPROVAL".to_string(),
                subject: "approval.requested".to_string(),
                consumer: "approval-work".to_string(),
            },
            collaborators: CollaboratorConfig {
                employee_service_url: "http://employee-service:8000".to_string(),
                notification_service_url: "http://notification-service:8000".to_string(),
                request_service_url: None,
                timeout_secs: 5,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ServiceRole {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "combined" => Ok(Self::Combined),
            "requests" => Ok(Self::Requests),
            "processing" => Ok(Self::Processing),
            other => Err(ConfigError::Validation(format!(
                "unsupported server role `{other}` (expected combined|requests|processing)"
            ))),
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nats" => Ok(Self::Nats),
            "in_process" => Ok(Self::InProcess),
            "direct" => Ok(Self::Direct),
            other => Err(ConfigError::Validation(format!(
                "unsupported channel kind `{other}` (expected nats|in_process|direct)"
            ))),
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("signoff.toml"));
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
            if let Some(role) = server.role {
                self.server.role = role;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(kind) = channel.kind {
                self.channel.kind = kind;
            }
            if let Some(url) = channel.url {
                self.channel.url = url;
            }
            if let Some(channel_auth_token_value) = channel.auth_token {
                self.channel.auth_token = Some(secret_value(channel_auth_token_value));
            }
            if let Some(stream) = channel.stream {
                self.channel.stream = stream;
            }
            if let Some(subject) = channel.subject {
                self.channel.subject = subject;
            }
            if let Some(consumer) = channel.consumer {
                self.channel.consumer = consumer;
            }
        }

        if let Some(collaborators) = patch.collaborators {
            if let Some(url) = collaborators.employee_service_url {
                self.collaborators.employee_service_url = url;
            }
            if let Some(url) = collaborators.notification_service_url {
                self.collaborators.notification_service_url = url;
            }
            if let Some(url) = collaborators.request_service_url {
                self.collaborators.request_service_url = Some(url);
            }
            if let Some(timeout_secs) = collaborators.timeout_secs {
                self.collaborators.timeout_secs = timeout_secs;
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
        if let Some(value) = read_env("SIGNOFF_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SIGNOFF_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SIGNOFF_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_PORT") {
            self.server.port = parse_u16("SIGNOFF_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_ROLE") {
            self.server.role = value.parse()?;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_CHANNEL_KIND") {
            self.channel.kind = value.parse()?;
        }
        if let Some(value) = read_env("SIGNOFF_CHANNEL_URL") {
            self.channel.url = value;
        }
        if let Some(value) = read_env("SIGNOFF_CHANNEL_AUTH_TOKEN") {
            self.channel.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SIGNOFF_CHANNEL_STREAM") {
            self.channel.stream = value;
        }
        if let Some(value) = read_env("SIGNOFF_CHANNEL_SUBJECT") {
            self.channel.subject = value;
        }
        if let Some(value) = read_env("SIGNOFF_CHANNEL_CONSUMER") {
            self.channel.consumer = value;
        }

        if let Some(value) = read_env("SIGNOFF_EMPLOYEE_SERVICE_URL") {
            self.collaborators.employee_service_url = value;
        }
        if let Some(value) = read_env("SIGNOFF_NOTIFICATION_SERVICE_URL") {
            self.collaborators.notification_service_url = value;
        }
        if let Some(value) = read_env("SIGNOFF_REQUEST_SERVICE_URL") {
            self.collaborators.request_service_url = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_COLLABORATORS_TIMEOUT_SECS") {
            self.collaborators.timeout_secs =
                parse_u64("SIGNOFF_COLLABORATORS_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("SIGNOFF_LOGGING_LEVEL").or_else(|| read_env("SIGNOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SIGNOFF_LOGGING_FORMAT").or_else(|| read_env("SIGNOFF_LOG_FORMAT"));
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
        if let Some(role) = overrides.server_role {
            self.server.role = role;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(kind) = overrides.channel_kind {
            self.channel.kind = kind;
        }
        if let Some(url) = overrides.channel_url {
            self.channel.url = url;
        }
        if let Some(url) = overrides.employee_service_url {
            self.collaborators.employee_service_url = url;
        }
        if let Some(url) = overrides.notification_service_url {
            self.collaborators.notification_service_url = url;
        }
        if let Some(url) = overrides.request_service_url {
            self.collaborators.request_service_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_channel(&self.channel, self.server.role)?;
        validate_collaborators(&self.collaborators, self.server.role)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
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

fn validate_channel(channel: &ChannelConfig, role: ServiceRole) -> Result<(), ConfigError> {
    if role != ServiceRole::Combined && channel.kind != ChannelKind::Nats {
        return Err(ConfigError::Validation(
            "channel.kind must be `nats` when server.role is `requests` or `processing`"
                .to_string(),
        ));
    }

    if channel.kind == ChannelKind::Nats {
        if !channel.url.starts_with("nats://") && !channel.url.starts_with("tls://") {
            return Err(ConfigError::Validation(
                "channel.url must start with nats:// or tls://".to_string(),
            ));
        }
        let blank_token = channel
            .auth_token
            .as_ref()
            .map(|token| token.expose_secret().trim().is_empty())
            .unwrap_or(false);
        if blank_token {
            return Err(ConfigError::Validation(
                "channel.auth_token must not be blank when set".to_string(),
            ));
        }
    }

    for (key, value) in [
        ("channel.stream", &channel.stream),
        ("channel.subject", &channel.subject),
        ("channel.consumer", &channel.consumer),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
    }

    Ok(())
}

fn validate_collaborators(
    collaborators: &CollaboratorConfig,
    role: ServiceRole,
) -> Result<(), ConfigError> {
    if collaborators.timeout_secs == 0 || collaborators.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "collaborators.timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    let urls = [
        ("collaborators.employee_service_url", Some(&collaborators.employee_service_url)),
        ("collaborators.notification_service_url", Some(&collaborators.notification_service_url)),
        ("collaborators.request_service_url", collaborators.request_service_url.as_ref()),
    ];
    for (key, value) in urls {
        if let Some(url) = value {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{key} must start with http:// or https://"
                )));
            }
        }
    }

    if role == ServiceRole::Processing && collaborators.request_service_url.is_none() {
        return Err(ConfigError::Validation(
            "collaborators.request_service_url is required when server.role is `processing`"
                .to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    channel: Option<ChannelPatch>,
    collaborators: Option<CollaboratorPatch>,
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
    role: Option<ServiceRole>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    kind: Option<ChannelKind>,
    url: Option<String>,
    auth_token: Option<String>,
    stream: Option<String>,
    subject: Option<String>,
    consumer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CollaboratorPatch {
    employee_service_url: Option<String>,
    notification_service_url: Option<String>,
    request_service_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
