use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tabula_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILES};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());

    let fields: Vec<(&str, String)> = vec![
        (
            "data.fixture_path",
            config
                .data
                .fixture_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<demo dataset>".to_string()),
        ),
        ("data.cache_capacity", config.data.cache_capacity.to_string()),
        ("data.cache_default_ttl_secs", config.data.cache_default_ttl_secs.to_string()),
        ("data.sweep_interval_secs", config.data.sweep_interval_secs.to_string()),
        ("llm.provider", config.llm.provider.as_str().to_string()),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm_endpoint().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", redact_secret(config.llm.api_key.is_some())),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        ("llm.temperature", config.llm.temperature.to_string()),
        ("conversation.max_history", config.conversation.max_history.to_string()),
        ("conversation.idle_timeout_secs", config.conversation.idle_timeout_secs.to_string()),
        ("workflow.node_timeout_secs", config.workflow.node_timeout_secs.to_string()),
        (
            "workflow.include_transitive_dependencies",
            config.workflow.include_transitive_dependencies.to_string(),
        ),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", config.logging.format.as_str().to_string()),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value) in fields {
        let source = field_source(key_path, file_doc.as_ref(), file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }
    lines.join("\n")
}

/// `data.cache_capacity` -> `TABULA_DATA_CACHE_CAPACITY`.
pub fn env_key(key_path: &str) -> String {
    format!("TABULA_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES.iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, config_file_doc: Option<&Value>, config_file_path: Option<&Path>) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
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

fn redact_secret(present: bool) -> String {
    if present { "<redacted>" } else { "<unset>" }.to_string()
}
