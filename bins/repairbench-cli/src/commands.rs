// CLI commands for managing repairbench configuration
use anyhow::{bail, Context, Result};
use repairbench_common::config::{ModelConfig, ModelsJson};
use repairbench_common::dataset::{self, DatasetError};
use std::io::{self, Write};
use std::path::Path;

fn load(config_path: &Path) -> Result<ModelsJson> {
    ModelsJson::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))
}

fn save(config_path: &Path, config: &ModelsJson) -> Result<()> {
    config.validate().context("Refusing to save an invalid configuration")?;
    config
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))
}

/// Write the starter configuration
pub async fn init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = ModelsJson::starter();
    save(config_path, &config)?;

    println!("✅ Wrote {} with {} model(s)", config_path.display(), config.models.len());
    println!("\n📋 Next steps:");
    println!("  1. Point generation.base_url at your OpenAI-compatible server");
    println!("  2. Download the dataset to {}", config.evaluation.dataset);
    println!("  3. Run: repairbench-runner --config {}", config_path.display());

    Ok(())
}

/// Add a model configuration
pub async fn add_model(
    config_path: &Path,
    id: &str,
    quantize: bool,
    quantized_id: Option<&str>,
) -> Result<()> {
    if id.trim().is_empty() {
        bail!("Model id cannot be empty");
    }

    let mut config = load(config_path)?;

    if config.models.iter().any(|m| m.id == id && m.quantize == quantize) {
        bail!(
            "Model '{}' ({}) already exists in config",
            id,
            if quantize { "quantized" } else { "unmodified" }
        );
    }

    let model = ModelConfig {
        id: id.to_string(),
        quantize,
        quantized_id: quantized_id.map(str::to_string),
    };
    println!("🚀 Adding {}", model.label());
    config.models.push(model);
    save(config_path, &config)?;

    println!("✅ {} now lists {} model(s)", config_path.display(), config.models.len());
    Ok(())
}

/// Remove a model configuration
pub async fn remove_model(
    config_path: &Path,
    id: &str,
    quantize: Option<bool>,
    yes: bool,
) -> Result<()> {
    let mut config = load(config_path)?;

    let matches = |m: &ModelConfig| m.id == id && quantize.map_or(true, |q| m.quantize == q);
    let count = config.models.iter().filter(|m| matches(m)).count();
    if count == 0 {
        bail!("Model '{}' not found in config", id);
    }

    if !yes {
        print!("⚠️  This will remove {} entr{} for '{}'. Continue? (y/N): ", count, if count == 1 { "y" } else { "ies" }, id);
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    config.models.retain(|m| !matches(m));
    save(config_path, &config)?;

    println!("✅ Removed {} entr{} for '{}'", count, if count == 1 { "y" } else { "ies" }, id);
    Ok(())
}

/// List configured models
pub async fn list_models(config_path: &Path, json: bool) -> Result<()> {
    let config = load(config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config.models)?);
        return Ok(());
    }

    if config.models.is_empty() {
        println!("No models configured.");
        println!("\n💡 Add a model with: repairbench-cli add-model --id <id>");
        return Ok(());
    }

    println!("📋 Configured Models:\n");
    println!("{:<40} {:<10} {:<30}", "Model", "Quantized", "Served As");
    println!("{}", "─".repeat(80));

    for model in &config.models {
        println!(
            "{:<40} {:<10} {:<30}",
            model.id,
            if model.quantize { "yes" } else { "no" },
            model.served_model()
        );
    }

    println!("\n✅ Total: {} model(s)", config.models.len());
    Ok(())
}

/// Load a dataset slice the same way the runner does
pub async fn check_dataset(
    config_path: &Path,
    dataset_path: Option<&str>,
    start: Option<usize>,
    end: Option<usize>,
) -> Result<usize> {
    let config = load(config_path)?;
    let eval = &config.evaluation;

    let path = dataset_path.unwrap_or(&eval.dataset);
    let start = start.unwrap_or(eval.start);
    let end = end.unwrap_or(eval.end);
    if start == 0 || end < start {
        bail!("Invalid slice {}..={} (lines are 1-based)", start, end);
    }

    println!("🔍 Checking {} lines {}..={}", path, start, end);

    match dataset::load_prompts(Path::new(path), start, end, &eval.system_prompt) {
        Ok(prompts) => {
            println!("✅ {} prompt(s) loaded", prompts.len());
            Ok(prompts.len())
        }
        Err(DatasetError::Malformed { line, reason }) => {
            bail!("❌ Line {} is malformed: {}", line, reason)
        }
        Err(e) => Err(e).context("Failed to load dataset"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("models.json");

        init_config(&path, false).await.unwrap();
        assert!(init_config(&path, false).await.is_err());
        init_config(&path, true).await.unwrap();

        assert_eq!(load(&path).unwrap(), ModelsJson::starter());
    }

    #[tokio::test]
    async fn test_add_and_remove_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");

        add_model(&path, "qwen", false, None).await.unwrap();
        add_model(&path, "qwen", true, Some("qwen-q4")).await.unwrap();
        assert!(add_model(&path, "qwen", false, None).await.is_err());
        assert_eq!(load(&path).unwrap().models.len(), 2);

        remove_model(&path, "qwen", Some(true), true).await.unwrap();
        let models = load(&path).unwrap().models;
        assert_eq!(models, vec![ModelConfig::new("qwen")]);

        assert!(remove_model(&path, "missing", None, true).await.is_err());
    }

    #[tokio::test]
    async fn test_quantized_model_needs_served_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");

        assert!(add_model(&path, "qwen", true, None).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_check_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("models.json");
        let data_path = dir.path().join("mbpp.jsonl");

        let good = r#"{"text": "t", "test_list": ["assert True", "assert 1"]}"#;
        fs::write(&data_path, format!("{}\n{}\n{{oops\n", good, good)).unwrap();
        let data = data_path.to_str().unwrap();

        assert_eq!(check_dataset(&config_path, Some(data), Some(1), Some(2)).await.unwrap(), 2);

        let err = check_dataset(&config_path, Some(data), Some(1), Some(3)).await.unwrap_err();
        assert!(err.to_string().contains("Line 3"));

        assert!(check_dataset(&config_path, Some(data), Some(3), Some(1)).await.is_err());
    }
}
