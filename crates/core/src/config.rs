use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

/// Default minimum score treated as a decisive match on the 0..=10 scale.
pub const DEFAULT_CONFIDENT_SCORE_THRESHOLD: u8 = 10;
/// Default window within which a plain actionable guideline contends with a
/// confident journey entry.
pub const DEFAULT_JOURNEY_SCORE_TOLERANCE: u8 = 2;
/// Default bounded retry budget per evaluation batch.
pub const DEFAULT_MAX_BATCH_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub matching: MatchingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
}

/// Policy constants of the matching pass. The score threshold and tolerance
/// are fixed in behavior today; they live here as named, overridable settings
/// rather than magic numbers.
#[derive(Clone, Debug)]
pub struct MatchingConfig {
    pub confident_score_threshold: u8,
    pub journey_score_tolerance: u8,
    pub max_batch_attempts: u32,
    /// Sampling temperature per retry attempt; the last entry is reused once
    /// the schedule is exhausted.
    pub temperature_schedule: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub model_provider: Option<ModelProvider>,
    pub model_name: Option<String>,
    pub log_level: Option<String>,
    pub confident_score_threshold: Option<u8>,
    pub journey_score_tolerance: Option<u8>,
    pub max_batch_attempts: Option<u32>,
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
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                provider: ModelProvider::Ollama,
                api_key: None,
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            matching: MatchingConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            confident_score_threshold: DEFAULT_CONFIDENT_SCORE_THRESHOLD,
            journey_score_tolerance: DEFAULT_JOURNEY_SCORE_TOLERANCE,
            max_batch_attempts: DEFAULT_MAX_BATCH_ATTEMPTS,
            temperature_schedule: vec![0.1, 0.5, 0.9],
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported model provider `{other}` (expected openai|anthropic|ollama)"
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    model: Option<ModelPatch>,
    matching: Option<MatchingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    provider: Option<ModelProvider>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MatchingPatch {
    confident_score_threshold: Option<u8>,
    journey_score_tolerance: Option<u8>,
    max_batch_attempts: Option<u32>,
    temperature_schedule: Option<Vec<f32>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<String>,
}

impl EngineConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("waypoint.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(model) = patch.model {
            if let Some(provider) = model.provider {
                self.model.provider = provider;
            }
            if let Some(model_api_key_value) = model.api_key {
                self.model.api_key = Some(SecretString::from(model_api_key_value));
            }
            if let Some(name) = model.model {
                self.model.model = name;
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
        }

        if let Some(matching) = patch.matching {
            if let Some(threshold) = matching.confident_score_threshold {
                self.matching.confident_score_threshold = threshold;
            }
            if let Some(tolerance) = matching.journey_score_tolerance {
                self.matching.journey_score_tolerance = tolerance;
            }
            if let Some(attempts) = matching.max_batch_attempts {
                self.matching.max_batch_attempts = attempts;
            }
            if let Some(schedule) = matching.temperature_schedule {
                self.matching.temperature_schedule = schedule;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format.parse()?;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("WAYPOINT_MODEL_PROVIDER") {
            self.model.provider = value.parse()?;
        }
        if let Some(value) = read_env("WAYPOINT_MODEL_API_KEY") {
            self.model.api_key = Some(SecretString::from(value));
        }
        if let Some(value) = read_env("WAYPOINT_MODEL_NAME") {
            self.model.model = value;
        }
        if let Some(value) = read_env("WAYPOINT_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = parse_u64("WAYPOINT_MODEL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("WAYPOINT_CONFIDENT_SCORE_THRESHOLD") {
            self.matching.confident_score_threshold =
                parse_u8("WAYPOINT_CONFIDENT_SCORE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_JOURNEY_SCORE_TOLERANCE") {
            self.matching.journey_score_tolerance =
                parse_u8("WAYPOINT_JOURNEY_SCORE_TOLERANCE", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_MAX_BATCH_ATTEMPTS") {
            self.matching.max_batch_attempts = parse_u32("WAYPOINT_MAX_BATCH_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("WAYPOINT_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("WAYPOINT_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.model_provider {
            self.model.provider = provider;
        }
        if let Some(name) = overrides.model_name {
            self.model.model = name;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(threshold) = overrides.confident_score_threshold {
            self.matching.confident_score_threshold = threshold;
        }
        if let Some(tolerance) = overrides.journey_score_tolerance {
            self.matching.journey_score_tolerance = tolerance;
        }
        if let Some(attempts) = overrides.max_batch_attempts {
            self.matching.max_batch_attempts = attempts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_model(&self.model)?;
        validate_matching(&self.matching)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("waypoint.toml"), PathBuf::from("config/waypoint.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str::<ConfigPatch>(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    if model.timeout_secs == 0 || model.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "model.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if model.model.trim().is_empty() {
        return Err(ConfigError::Validation("model.model must not be empty".to_string()));
    }

    match model.provider {
        ModelProvider::OpenAi | ModelProvider::Anthropic => {
            let missing = model
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "model.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        ModelProvider::Ollama => {}
    }

    Ok(())
}

fn validate_matching(matching: &MatchingConfig) -> Result<(), ConfigError> {
    if matching.confident_score_threshold == 0 || matching.confident_score_threshold > 10 {
        return Err(ConfigError::Validation(
            "matching.confident_score_threshold must be in range 1..=10".to_string(),
        ));
    }

    if matching.journey_score_tolerance >= matching.confident_score_threshold {
        return Err(ConfigError::Validation(
            "matching.journey_score_tolerance must be below the confident threshold".to_string(),
        ));
    }

    if matching.max_batch_attempts == 0 {
        return Err(ConfigError::Validation(
            "matching.max_batch_attempts must be greater than zero".to_string(),
        ));
    }

    if matching.temperature_schedule.is_empty() {
        return Err(ConfigError::Validation(
            "matching.temperature_schedule must not be empty".to_string(),
        ));
    }

    if matching.temperature_schedule.iter().any(|t| !(0.0..=2.0).contains(t)) {
        return Err(ConfigError::Validation(
            "matching.temperature_schedule entries must be in range 0.0..=2.0".to_string(),
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

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{
        ConfigError, ConfigOverrides, EngineConfig, LoadOptions, ModelProvider,
        DEFAULT_CONFIDENT_SCORE_THRESHOLD, DEFAULT_JOURNEY_SCORE_TOLERANCE,
    };

    #[test]
    fn defaults_pass_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.matching.confident_score_threshold,
            DEFAULT_CONFIDENT_SCORE_THRESHOLD
        );
        assert_eq!(config.matching.journey_score_tolerance, DEFAULT_JOURNEY_SCORE_TOLERANCE);
    }

    #[test]
    fn file_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[model]
provider = "ollama"
model = "qwen2.5"

[matching]
confident_score_threshold = 8
journey_score_tolerance = 1
max_batch_attempts = 2
temperature_schedule = [0.0, 0.3]
"#
        )
        .expect("write config");

        let config = EngineConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("load config");

        assert_eq!(config.model.model, "qwen2.5");
        assert_eq!(config.matching.confident_score_threshold, 8);
        assert_eq!(config.matching.journey_score_tolerance, 1);
        assert_eq!(config.matching.max_batch_attempts, 2);
        assert_eq!(config.matching.temperature_schedule, vec![0.0, 0.3]);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = EngineConfig::load(LoadOptions {
            config_path: Some("does/not/exist.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn explicit_overrides_win() {
        let config = EngineConfig::load(LoadOptions {
            config_path: Some("does/not/exist.toml".into()),
            require_file: false,
            overrides: ConfigOverrides {
                model_provider: Some(ModelProvider::Ollama),
                model_name: Some("mistral".to_string()),
                confident_score_threshold: Some(9),
                journey_score_tolerance: Some(2),
                max_batch_attempts: Some(5),
                log_level: Some("debug".to_string()),
            },
        })
        .expect("load config");

        assert_eq!(config.model.model, "mistral");
        assert_eq!(config.matching.confident_score_threshold, 9);
        assert_eq!(config.matching.max_batch_attempts, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn tolerance_at_or_above_threshold_is_rejected() {
        let mut config = EngineConfig::default();
        config.matching.confident_score_threshold = 5;
        config.matching.journey_score_tolerance = 5;

        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn api_key_required_for_hosted_providers() {
        let mut config = EngineConfig::default();
        config.model.provider = ModelProvider::Anthropic;
        config.model.api_key = None;

        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
