//! Configuration loader and validator for the J-Grants sync tool.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub ai: AiSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    /// Canonical API field name -> destination custom-field identifier.
    /// Entries with an empty destination are ignored by the record store.
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub data_dir: String,
}

/// J-Grants listing API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Api {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

impl Default for Api {
    fn default() -> Self {
        Api {
            base_url: default_api_base_url(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.jgrants-portal.go.jp/exp/v1".to_string()
}

/// Gemini generation settings. An empty `api_key` disables AI content
/// generation rather than failing the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_true")]
    pub enable_ai_tags: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        AiSettings {
            api_key: String::new(),
            model: default_model(),
            enable_ai_tags: true,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model() -> String {
    "gemini-pro".to_string()
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

/// Defaults used by the batch-create path when the caller omits values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    #[serde(default = "default_keyword")]
    pub default_keyword: String,
    #[serde(default = "default_count")]
    pub default_count: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            default_keyword: default_keyword(),
            default_count: default_count(),
        }
    }
}

fn default_keyword() -> String {
    "デジタル".to_string()
}

fn default_count() -> usize {
    10
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.api.base_url).is_err() {
        return Err(ConfigError::Invalid("api.base_url must be a valid URL"));
    }
    if !(0.0..=2.0).contains(&cfg.ai.temperature) {
        return Err(ConfigError::Invalid("ai.temperature must be in [0, 2]"));
    }
    if cfg.ai.max_tokens == 0 {
        return Err(ConfigError::Invalid("ai.max_tokens must be > 0"));
    }
    if cfg.ai.model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.model must be non-empty"));
    }
    if cfg.sync.default_keyword.chars().count() < 2 {
        return Err(ConfigError::Invalid(
            "sync.default_keyword must be at least 2 characters",
        ));
    }
    if cfg.sync.default_count == 0 || cfg.sync.default_count > 50 {
        return Err(ConfigError::Invalid("sync.default_count must be in [1, 50]"));
    }
    Ok(())
}

/// Example configuration shipped with the tool.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

api:
  base_url: "https://api.jgrants-portal.go.jp/exp/v1"

ai:
  api_key: "YOUR_GEMINI_API_KEY"
  model: "gemini-pro"
  enable_ai_tags: true
  temperature: 0.7
  max_tokens: 1024

sync:
  default_keyword: "デジタル"
  default_count: 10

field_mapping:
  organization: "grant_organization"
  amount_min: "grant_amount_min"
  amount_max: "grant_amount_max"
  rate: "grant_rate"
  ai_summary: "grant_ai_summary"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.ai.max_tokens, 1024);
        assert_eq!(
            cfg.field_mapping.get("organization").map(String::as_str),
            Some("grant_organization")
        );
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("app:\n  data_dir: \"./data\"\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.ai.model, "gemini-pro");
        assert!((cfg.ai.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.sync.default_keyword, "デジタル");
        assert!(cfg.field_mapping.is_empty());
        assert!(cfg.ai.api_key.is_empty());
    }

    #[test]
    fn invalid_data_dir() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("data_dir")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_temperature() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ai.temperature = 3.5;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_default_keyword() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.default_keyword = "x".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("default_keyword")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_default_count() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.default_count = 51;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.sync.default_count, 10);
    }
}
