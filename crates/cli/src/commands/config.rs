use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use procura_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

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

/// Prints every effective setting with the layer it came from.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let database = &config.database;
    let notifier = &config.notifier;
    vec![
        Field::new("database.url", "PROCURA_DATABASE_URL", database.url.clone()),
        Field::new(
            "database.max_connections",
            "PROCURA_DATABASE_MAX_CONNECTIONS",
            database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            "PROCURA_DATABASE_TIMEOUT_SECS",
            database.timeout_secs.to_string(),
        ),
        Field::new(
            "notifier.sender_address",
            "PROCURA_NOTIFIER_SENDER_ADDRESS",
            notifier.sender_address.clone(),
        ),
        Field::new(
            "notifier.portal_base_url",
            "PROCURA_NOTIFIER_PORTAL_BASE_URL",
            notifier.portal_base_url.clone(),
        ),
        Field::new(
            "notifier.smtp_host",
            "PROCURA_NOTIFIER_SMTP_HOST",
            notifier.smtp_host.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "notifier.smtp_username",
            "PROCURA_NOTIFIER_SMTP_USERNAME",
            notifier.smtp_username.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "notifier.smtp_password",
            "PROCURA_NOTIFIER_SMTP_PASSWORD",
            redact_secret(notifier.smtp_password.as_ref()),
        ),
        Field::new(
            "workflow.decision_retry_limit",
            "PROCURA_WORKFLOW_DECISION_RETRY_LIMIT",
            config.workflow.decision_retry_limit.to_string(),
        ),
        Field::new("logging.level", "PROCURA_LOGGING_LEVEL", config.logging.level.clone()),
        Field::new("logging.format", "PROCURA_LOGGING_FORMAT", config.logging.format.as_str()),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("procura.toml"), PathBuf::from("config/procura.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
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

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        None => "<unset>",
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>",
        Some(_) => "<redacted>",
    }
}
