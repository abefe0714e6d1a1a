// Model configuration management for the repairbench runner
use anyhow::{bail, Context, Result};
use repairbench_common::config::{EvaluationSettings, GenerationSettings, ModelConfig, ModelsJson};
use std::path::Path;

/// Command-line overrides layered on top of config/models.json
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub quantize: Option<bool>,
    pub quantized_id: Option<String>,
    pub adaptive_retry: Option<bool>,
    pub verbose: bool,
    pub dataset: Option<String>,
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Model configuration manager
#[derive(Debug, Clone)]
pub struct ModelConfigManager {
    config: ModelsJson,
}

impl ModelConfigManager {
    /// Load model configurations from a models.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = ModelsJson::load(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: ModelsJson) -> Self {
        Self { config }
    }

    /// Apply command-line overrides and validate the result
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        let config = &mut self.config;

        if let Some(id) = overrides.model {
            // An explicit model replaces the configured list, but keeps a
            // matching entry's served identifiers
            let quantize = overrides.quantize.unwrap_or(false);
            let existing = config
                .models
                .iter()
                .find(|m| m.id == id && m.quantize == quantize)
                .cloned();
            let model = match existing {
                Some(mut model) => {
                    if overrides.quantized_id.is_some() {
                        model.quantized_id = overrides.quantized_id;
                    }
                    model
                }
                None => ModelConfig {
                    id,
                    quantize,
                    quantized_id: overrides.quantized_id,
                },
            };
            config.models = vec![model];
        } else if let Some(quantize) = overrides.quantize {
            config.models.retain(|m| m.quantize == quantize);
        }

        let eval = &mut config.evaluation;
        if let Some(adaptive) = overrides.adaptive_retry {
            eval.adaptive_retry = adaptive;
        }
        if overrides.verbose {
            eval.verbose = true;
        }
        if let Some(dataset) = overrides.dataset {
            eval.dataset = dataset;
        }
        if let Some(start) = overrides.start {
            eval.start = start;
        }
        if let Some(end) = overrides.end {
            eval.end = end;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            eval.timeout_ms = timeout_ms;
        }
        if let Some(base_url) = overrides.base_url {
            config.generation.base_url = base_url;
        }

        config.validate().context("Invalid configuration")?;
        if config.models.is_empty() {
            bail!("No models configured; pass --model or add one with repairbench-cli add-model");
        }

        Ok(self)
    }

    /// Models in evaluation order
    pub fn models(&self) -> &[ModelConfig] {
        &self.config.models
    }

    pub fn generation(&self) -> &GenerationSettings {
        &self.config.generation
    }

    pub fn evaluation(&self) -> &EvaluationSettings {
        &self.config.evaluation
    }

    pub fn list_models(&self) -> Vec<String> {
        self.config.models.iter().map(ModelConfig::label).collect()
    }
}
