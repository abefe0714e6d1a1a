// Shared configuration schema for config/models.json
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/models.json";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Python programming assistant. Your task is to write Python functions according to the user's prompt. Respond only with the necessary Python code, including python package imports if needed. Do not provide example usage, only the python function.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub quantize: bool,
    /// Identifier the backend serves the quantized build under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantized_id: Option<String>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), quantize: false, quantized_id: None }
    }

    /// Name sent to the generation backend
    pub fn served_model(&self) -> &str {
        match (&self.quantize, &self.quantized_id) {
            (true, Some(quantized)) => quantized,
            _ => &self.id,
        }
    }

    pub fn label(&self) -> String {
        let kind = if self.quantize { "quantized" } else { "unmodified" };
        format!("{} {}", kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub base_url: String,
    pub max_new_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            max_new_tokens: 512,
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub dataset: String,
    /// First dataset line to evaluate (1-based, inclusive)
    pub start: usize,
    /// Last dataset line to evaluate (1-based, inclusive)
    pub end: usize,
    pub adaptive_retry: bool,
    pub max_repair_rounds: u32,
    pub timeout_ms: u64,
    pub python: String,
    pub verbose: bool,
    pub system_prompt: String,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            dataset: "data/mbpp/mbpp.jsonl".to_string(),
            start: 11,
            end: 510,
            adaptive_retry: false,
            max_repair_rounds: 2,
            timeout_ms: 10_000,
            python: "python3".to_string(),
            verbose: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelsJson {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub evaluation: EvaluationSettings,
}

impl ModelsJson {
    /// Load from disk; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let eval = &self.evaluation;
        if eval.start == 0 {
            return Err(ConfigError::Invalid("evaluation.start is 1-based and must be >= 1".into()));
        }
        if eval.end < eval.start {
            return Err(ConfigError::Invalid(format!(
                "evaluation.end ({}) is before evaluation.start ({})",
                eval.end, eval.start
            )));
        }
        if eval.timeout_ms == 0 {
            return Err(ConfigError::Invalid("evaluation.timeout_ms must be positive".into()));
        }

        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(ConfigError::Invalid("model id cannot be empty".into()));
            }
            if model.quantize && model.quantized_id.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "model '{}' requests quantized loading but has no quantized_id",
                    model.id
                )));
            }
        }

        Ok(())
    }

    /// The stock configuration written by `repairbench-cli init`
    pub fn starter() -> Self {
        Self {
            models: vec![
                ModelConfig::new("meta-llama/Llama-3.2-3B-Instruct"),
                ModelConfig {
                    id: "meta-llama/Llama-3.2-3B-Instruct".to_string(),
                    quantize: true,
                    quantized_id: Some("llama3.2:3b-instruct-q4_0".to_string()),
                },
                ModelConfig {
                    id: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
                    quantize: true,
                    quantized_id: Some("llama3.1:8b-instruct-q4_0".to_string()),
                },
            ],
            generation: GenerationSettings::default(),
            evaluation: EvaluationSettings::default(),
        }
    }
}
