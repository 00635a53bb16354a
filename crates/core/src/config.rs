use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub token_overflow: TokenOverflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub max_clarification_retries: u32,
    pub connection_timeout_secs: u64,
    pub max_sub_tasks: usize,
    pub max_chain_depth: usize,
    pub progress_mode: ProgressMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TokenOverflowConfig {
    pub strategy: OverflowStrategyKind,
    pub max_tokens: u32,
    /// Share of `max_tokens` the sliding window keeps free for the response.
    pub reserve_ratio: f64,
    /// Message count above which the summarize strategy kicks in.
    pub summary_threshold: usize,
    pub summary_model: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
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

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategyKind {
    #[default]
    None,
    SlidingWindow,
    Summarize,
}

impl OverflowStrategyKind {
    /// Unknown or empty selectors resolve to `None`.
    pub fn from_selector(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sliding_window" => Self::SlidingWindow,
            "summarize" | "summary" => Self::Summarize,
            _ => Self::None,
        }
    }
}

/// How parent-task progress is derived from completed sub-tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// `(complete / total) * 100` with integer division: 0 until every sub-task is done.
    #[default]
    TruncatedRatio,
    /// `complete * 100 / total`, floored.
    Percentage,
}

impl ProgressMode {
    pub fn percent(&self, complete: usize, total: usize) -> u8 {
        if total == 0 {
            return 0;
        }
        let complete = complete.min(total);
        let value = match self {
            Self::TruncatedRatio => (complete / total) * 100,
            Self::Percentage => complete * 100 / total,
        };
        value.min(100) as u8
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub overflow_strategy: Option<OverflowStrategyKind>,
    pub overflow_max_tokens: Option<u32>,
    pub max_clarification_retries: Option<u32>,
    pub progress_mode: Option<ProgressMode>,
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
                url: "sqlite://agentflow.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            workflow: WorkflowConfig::default(),
            token_overflow: TokenOverflowConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_clarification_retries: 2,
            connection_timeout_secs: 600,
            max_sub_tasks: 8,
            max_chain_depth: 16,
            progress_mode: ProgressMode::TruncatedRatio,
        }
    }
}

impl Default for TokenOverflowConfig {
    fn default() -> Self {
        Self {
            strategy: OverflowStrategyKind::None,
            max_tokens: 8_000,
            reserve_ratio: 0.2,
            summary_threshold: 20,
            summary_model: None,
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
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
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

impl std::str::FromStr for ProgressMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "truncated_ratio" => Ok(Self::TruncatedRatio),
            "percentage" => Ok(Self::Percentage),
            other => Err(ConfigError::Validation(format!(
                "unsupported progress mode `{other}` (expected truncated_ratio|percentage)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("agentflow.toml"));
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
        }

        if let Some(workflow) = patch.workflow {
            if let Some(retries) = workflow.max_clarification_retries {
                self.workflow.max_clarification_retries = retries;
            }
            if let Some(timeout_secs) = workflow.connection_timeout_secs {
                self.workflow.connection_timeout_secs = timeout_secs;
            }
            if let Some(max_sub_tasks) = workflow.max_sub_tasks {
                self.workflow.max_sub_tasks = max_sub_tasks;
            }
            if let Some(max_chain_depth) = workflow.max_chain_depth {
                self.workflow.max_chain_depth = max_chain_depth;
            }
            if let Some(progress_mode) = workflow.progress_mode {
                self.workflow.progress_mode = progress_mode;
            }
        }

        if let Some(overflow) = patch.token_overflow {
            if let Some(strategy) = overflow.strategy {
                self.token_overflow.strategy = OverflowStrategyKind::from_selector(&strategy);
            }
            if let Some(max_tokens) = overflow.max_tokens {
                self.token_overflow.max_tokens = max_tokens;
            }
            if let Some(reserve_ratio) = overflow.reserve_ratio {
                self.token_overflow.reserve_ratio = reserve_ratio;
            }
            if let Some(summary_threshold) = overflow.summary_threshold {
                self.token_overflow.summary_threshold = summary_threshold;
            }
            if let Some(summary_model) = overflow.summary_model {
                self.token_overflow.summary_model = Some(summary_model);
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
        if let Some(value) = read_env("AGENTFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AGENTFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("AGENTFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("AGENTFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AGENTFLOW_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("AGENTFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AGENTFLOW_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("AGENTFLOW_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("AGENTFLOW_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("AGENTFLOW_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("AGENTFLOW_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("AGENTFLOW_WORKFLOW_MAX_CLARIFICATION_RETRIES") {
            self.workflow.max_clarification_retries =
                parse_u32("AGENTFLOW_WORKFLOW_MAX_CLARIFICATION_RETRIES", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_WORKFLOW_CONNECTION_TIMEOUT_SECS") {
            self.workflow.connection_timeout_secs =
                parse_u64("AGENTFLOW_WORKFLOW_CONNECTION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_WORKFLOW_MAX_SUB_TASKS") {
            self.workflow.max_sub_tasks = parse_usize("AGENTFLOW_WORKFLOW_MAX_SUB_TASKS", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_WORKFLOW_PROGRESS_MODE") {
            self.workflow.progress_mode = value.parse()?;
        }

        if let Some(value) = read_env("AGENTFLOW_TOKEN_OVERFLOW_STRATEGY") {
            self.token_overflow.strategy = OverflowStrategyKind::from_selector(&value);
        }
        if let Some(value) = read_env("AGENTFLOW_TOKEN_OVERFLOW_MAX_TOKENS") {
            self.token_overflow.max_tokens =
                parse_u32("AGENTFLOW_TOKEN_OVERFLOW_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_TOKEN_OVERFLOW_RESERVE_RATIO") {
            self.token_overflow.reserve_ratio =
                parse_f64("AGENTFLOW_TOKEN_OVERFLOW_RESERVE_RATIO", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_TOKEN_OVERFLOW_SUMMARY_THRESHOLD") {
            self.token_overflow.summary_threshold =
                parse_usize("AGENTFLOW_TOKEN_OVERFLOW_SUMMARY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("AGENTFLOW_TOKEN_OVERFLOW_SUMMARY_MODEL") {
            self.token_overflow.summary_model = Some(value);
        }

        let log_level =
            read_env("AGENTFLOW_LOGGING_LEVEL").or_else(|| read_env("AGENTFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AGENTFLOW_LOGGING_FORMAT").or_else(|| read_env("AGENTFLOW_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(strategy) = overrides.overflow_strategy {
            self.token_overflow.strategy = strategy;
        }
        if let Some(max_tokens) = overrides.overflow_max_tokens {
            self.token_overflow.max_tokens = max_tokens;
        }
        if let Some(retries) = overrides.max_clarification_retries {
            self.workflow.max_clarification_retries = retries;
        }
        if let Some(progress_mode) = overrides.progress_mode {
            self.workflow.progress_mode = progress_mode;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_workflow(&self.workflow)?;
        validate_token_overflow(&self.token_overflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("agentflow.toml"), PathBuf::from("config/agentflow.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.connection_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "workflow.connection_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if workflow.max_sub_tasks == 0 {
        return Err(ConfigError::Validation(
            "workflow.max_sub_tasks must be greater than zero".to_string(),
        ));
    }

    // ANALYZE -> ... -> COMPLETED is eight hops.
    if workflow.max_chain_depth < 8 {
        return Err(ConfigError::Validation(
            "workflow.max_chain_depth must be at least 8 to reach COMPLETED".to_string(),
        ));
    }

    Ok(())
}

fn validate_token_overflow(overflow: &TokenOverflowConfig) -> Result<(), ConfigError> {
    if !(0.0..1.0).contains(&overflow.reserve_ratio) {
        return Err(ConfigError::Validation(
            "token_overflow.reserve_ratio must be in range 0.0..1.0".to_string(),
        ));
    }

    if overflow.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "token_overflow.max_tokens must be greater than zero".to_string(),
        ));
    }

    if overflow.strategy == OverflowStrategyKind::Summarize && overflow.summary_threshold == 0 {
        return Err(ConfigError::Validation(
            "token_overflow.summary_threshold must be greater than zero for the summarize strategy"
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

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    workflow: Option<WorkflowPatch>,
    token_overflow: Option<TokenOverflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_clarification_retries: Option<u32>,
    connection_timeout_secs: Option<u64>,
    max_sub_tasks: Option<usize>,
    max_chain_depth: Option<usize>,
    progress_mode: Option<ProgressMode>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenOverflowPatch {
    strategy: Option<String>,
    max_tokens: Option<u32>,
    reserve_ratio: Option<f64>,
    summary_threshold: Option<usize>,
    summary_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
