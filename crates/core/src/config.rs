use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "TABULA_";
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["tabula.toml", "config/tabula.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data: DataConfig,
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DataConfig {
    /// JSON fixture with `{ "<sheet>": [ {row}, ... ] }`; demo data when unset.
    pub fixture_path: Option<PathBuf>,
    pub cache_capacity: usize,
    /// TTL for sheets without a freshness class.
    pub cache_default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub max_history: usize,
    pub idle_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub node_timeout_secs: u64,
    pub include_transitive_dependencies: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Disabled,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::Disabled => None,
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
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

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub fixture_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
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
            data: DataConfig {
                fixture_path: None,
                cache_capacity: 100,
                cache_default_ttl_secs: 600,
                sweep_interval_secs: 300,
            },
            llm: LlmConfig {
                provider: LlmProvider::Disabled,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                temperature: 0.7,
            },
            conversation: ConversationConfig { max_history: 10, idle_timeout_secs: 3600 },
            workflow: WorkflowConfig { node_timeout_secs: 30, include_transitive_dependencies: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected disabled|openai|ollama)"
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Base URL the LLM client should call: explicit setting first, then the
    /// provider default.
    pub fn llm_endpoint(&self) -> Option<String> {
        self.llm
            .base_url
            .clone()
            .or_else(|| self.llm.provider.default_base_url().map(str::to_owned))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(data) = patch.data {
            if let Some(fixture_path) = data.fixture_path {
                self.data.fixture_path = Some(fixture_path);
            }
            if let Some(cache_capacity) = data.cache_capacity {
                self.data.cache_capacity = cache_capacity;
            }
            if let Some(ttl) = data.cache_default_ttl_secs {
                self.data.cache_default_ttl_secs = ttl;
            }
            if let Some(sweep) = data.sweep_interval_secs {
                self.data.sweep_interval_secs = sweep;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(max_history) = conversation.max_history {
                self.conversation.max_history = max_history;
            }
            if let Some(idle) = conversation.idle_timeout_secs {
                self.conversation.idle_timeout_secs = idle;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(node_timeout_secs) = workflow.node_timeout_secs {
                self.workflow.node_timeout_secs = node_timeout_secs;
            }
            if let Some(transitive) = workflow.include_transitive_dependencies {
                self.workflow.include_transitive_dependencies = transitive;
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
        if let Some(value) = read_env("TABULA_DATA_FIXTURE_PATH") {
            self.data.fixture_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("TABULA_DATA_CACHE_CAPACITY") {
            self.data.cache_capacity = parse_usize("TABULA_DATA_CACHE_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("TABULA_DATA_CACHE_DEFAULT_TTL_SECS") {
            self.data.cache_default_ttl_secs =
                parse_u64("TABULA_DATA_CACHE_DEFAULT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("TABULA_DATA_SWEEP_INTERVAL_SECS") {
            self.data.sweep_interval_secs = parse_u64("TABULA_DATA_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("TABULA_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TABULA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TABULA_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TABULA_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TABULA_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TABULA_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TABULA_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("TABULA_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("TABULA_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("TABULA_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("TABULA_CONVERSATION_MAX_HISTORY") {
            self.conversation.max_history = parse_usize("TABULA_CONVERSATION_MAX_HISTORY", &value)?;
        }
        if let Some(value) = read_env("TABULA_CONVERSATION_IDLE_TIMEOUT_SECS") {
            self.conversation.idle_timeout_secs =
                parse_u64("TABULA_CONVERSATION_IDLE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TABULA_WORKFLOW_NODE_TIMEOUT_SECS") {
            self.workflow.node_timeout_secs = parse_u64("TABULA_WORKFLOW_NODE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TABULA_WORKFLOW_INCLUDE_TRANSITIVE_DEPENDENCIES") {
            self.workflow.include_transitive_dependencies =
                parse_bool("TABULA_WORKFLOW_INCLUDE_TRANSITIVE_DEPENDENCIES", &value)?;
        }

        let log_level = read_env("TABULA_LOGGING_LEVEL").or_else(|| read_env("TABULA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TABULA_LOGGING_FORMAT").or_else(|| read_env("TABULA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(fixture_path) = overrides.fixture_path {
            self.data.fixture_path = Some(fixture_path);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_data(&self.data)?;
        validate_llm(&self.llm)?;
        validate_conversation(&self.conversation)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_data(data: &DataConfig) -> Result<(), ConfigError> {
    if data.cache_capacity == 0 {
        return Err(ConfigError::Validation(
            "data.cache_capacity must be greater than zero".to_string(),
        ));
    }
    if data.cache_default_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "data.cache_default_ttl_secs must be greater than zero".to_string(),
        ));
    }
    if data.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "data.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    if let Some(path) = &data.fixture_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "data.fixture_path must not be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Disabled => {}
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set TABULA_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(false);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url must not be blank for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.max_history == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_history must be greater than zero".to_string(),
        ));
    }
    if conversation.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.node_timeout_secs == 0 || workflow.node_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "workflow.node_timeout_secs must be in range 1..=600".to_string(),
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

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    data: Option<DataPatch>,
    llm: Option<LlmPatch>,
    conversation: Option<ConversationPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DataPatch {
    fixture_path: Option<PathBuf>,
    cache_capacity: Option<usize>,
    cache_default_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    max_history: Option<usize>,
    idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    node_timeout_secs: Option<u64>,
    include_transitive_dependencies: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn missing_file() -> LoadOptions {
        LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/tabula.toml")),
            ..LoadOptions::default()
        }
    }

    #[test]
    fn defaults_are_valid_and_offline() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;

        ensure(config.llm.provider == LlmProvider::Disabled, "llm is disabled by default")?;
        ensure(config.data.cache_capacity == 100, "cache capacity defaults to 100")?;
        ensure(config.data.sweep_interval_secs == 300, "sweep interval defaults to 300s")?;
        ensure(config.conversation.idle_timeout_secs == 3600, "idle timeout defaults to 1h")?;
        ensure(config.workflow.include_transitive_dependencies, "sub-graphs are transitive")?;
        ensure(config.llm_endpoint().is_none(), "disabled provider has no endpoint")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TABULA_OPENAI_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tabula.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_TABULA_OPENAI_KEY}"
model = "gpt-4o"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider comes from the file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_owned())
                    == Some("sk-from-env".to_owned()),
                "api key should be interpolated from the environment",
            )?;
            ensure(
                config.llm_endpoint().as_deref() == Some("https://api.openai.com/v1"),
                "openai endpoint defaults to the public api",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TABULA_OPENAI_KEY"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_TABULA_ABSENT"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("tabula.toml");
        fs::write(&path, "[data]\nfixture_path = \"${TEST_TABULA_ABSENT}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
        ensure(
            matches!(error, Err(ConfigError::MissingEnvInterpolation { ref var }) if var == "TEST_TABULA_ABSENT"),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TABULA_LOG_LEVEL", "warn");
        env::set_var("TABULA_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config =
                AppConfig::load(missing_file()).map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TABULA_LOG_LEVEL", "TABULA_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TABULA_DATA_CACHE_CAPACITY", "250");
        env::set_var("TABULA_WORKFLOW_NODE_TIMEOUT_SECS", "45");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tabula.toml");
            fs::write(
                &path,
                r#"
[data]
fixture_path = "from-file.json"
cache_capacity = 50

[workflow]
node_timeout_secs = 10
include_transitive_dependencies = false

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    fixture_path: Some(PathBuf::from("from-override.json")),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.data.fixture_path == Some(PathBuf::from("from-override.json")),
                "override fixture path should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.data.cache_capacity == 250, "env cache capacity should win over file")?;
            ensure(config.workflow.node_timeout_secs == 45, "env node timeout should win over file")?;
            ensure(
                !config.workflow.include_transitive_dependencies,
                "file value should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["TABULA_DATA_CACHE_CAPACITY", "TABULA_WORKFLOW_NODE_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn malformed_env_values_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TABULA_CONVERSATION_MAX_HISTORY", "lots");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(missing_file());
            ensure(
                matches!(error, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "TABULA_CONVERSATION_MAX_HISTORY"),
                "invalid override should name the variable",
            )
        })();

        clear_vars(&["TABULA_CONVERSATION_MAX_HISTORY"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TABULA_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(missing_file()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["TABULA_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TABULA_LLM_PROVIDER", "openai");
        env::set_var("TABULA_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config =
                AppConfig::load(missing_file()).map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["TABULA_LLM_PROVIDER", "TABULA_LLM_API_KEY"]);
        result
    }
}
