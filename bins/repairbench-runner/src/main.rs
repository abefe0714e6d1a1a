mod collector;
mod config;
mod engine;
mod evaluator;
mod extractor;
mod generator;
mod orchestrator;
mod progress;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use config::{ModelConfigManager, Overrides};
use engine::PythonEngine;
use generator::HttpGenerator;
use orchestrator::{Orchestrator, RetryPolicy};
use progress::{ConsoleSink, NullSink, ProgressSink};
use repairbench_common::config::{ModelConfig, DEFAULT_CONFIG_PATH};
use repairbench_common::dataset;
use repairbench_common::types::{Prompt, RunStatistics, RunSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info, instrument, warn};

#[derive(Parser)]
#[command(name = "repairbench-runner")]
#[command(about = "Evaluate code-generating models on held-out tests with optional repair rounds", long_about = None)]
struct Args {
    /// Path to models.json
    #[arg(short, long, env = "REPAIRBENCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Evaluate only this model id
    #[arg(short, long)]
    model: Option<String>,

    /// Use the quantized build (with --model) or only quantized entries
    #[arg(long)]
    quantize: Option<bool>,

    /// Backend identifier of the quantized build
    #[arg(long)]
    quantized_id: Option<String>,

    /// Feed failures back to the model for repair rounds
    #[arg(long)]
    adaptive_retry: Option<bool>,

    /// Echo streamed tokens
    #[arg(short, long)]
    verbose: bool,

    /// Dataset JSONL path
    #[arg(long)]
    dataset: Option<String>,

    /// First dataset line (1-based, inclusive)
    #[arg(long)]
    start: Option<usize>,

    /// Last dataset line (1-based, inclusive)
    #[arg(long)]
    end: Option<usize>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "REPAIRBENCH_BASE_URL")]
    base_url: Option<String>,

    /// Execution deadline per candidate
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print summaries as JSON lines and suppress console progress
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "REPAIRBENCH_LOG_JSON")]
    log_json: bool,

    /// Bearer token for the generation backend
    #[arg(long, env = "REPAIRBENCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            quantize: self.quantize,
            quantized_id: self.quantized_id.clone(),
            adaptive_retry: self.adaptive_retry,
            verbose: self.verbose,
            dataset: self.dataset.clone(),
            start: self.start,
            end: self.end,
            base_url: self.base_url.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Logs go to stderr; stdout carries status lines and summaries
fn init_tracing(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("repairbench runner booting...");

    let manager = ModelConfigManager::load(&args.config)?.with_overrides(args.overrides())?;
    info!("Models to evaluate: {:?}", manager.list_models());

    let eval = manager.evaluation();
    let prompts = dataset::load_prompts(Path::new(&eval.dataset), eval.start, eval.end, &eval.system_prompt)
        .context("Failed to load dataset")?;
    info!(
        dataset = %eval.dataset,
        start = eval.start,
        end = eval.end,
        prompts = prompts.len(),
        "Dataset loaded"
    );

    let sink: Arc<dyn ProgressSink> = if args.json {
        Arc::new(NullSink)
    } else {
        Arc::new(ConsoleSink)
    };

    tokio::select! {
        result = run_all(&manager, &prompts, sink, args.api_key.clone(), args.json) => result?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted; discarding the unfinished model run");
        }
    }

    info!("Evaluation complete");
    Ok(())
}

/// Evaluate every configured model over the same prompts
async fn run_all(
    manager: &ModelConfigManager,
    prompts: &[Prompt],
    sink: Arc<dyn ProgressSink>,
    api_key: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    for model in manager.models() {
        if !json {
            println!("\n---- {} ----\n", model.label());
        }

        let summary = run_model(manager, model, prompts, Arc::clone(&sink), api_key.clone()).await?;

        if json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            println!("{}", evaluator::render_summary(&summary));
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(model = %model.id, quantized = model.quantize))]
async fn run_model(
    manager: &ModelConfigManager,
    model: &ModelConfig,
    prompts: &[Prompt],
    sink: Arc<dyn ProgressSink>,
    api_key: Option<String>,
) -> anyhow::Result<RunSummary> {
    let eval = manager.evaluation();

    let generator = HttpGenerator::new(manager.generation(), model.served_model(), api_key)?;
    let engine = PythonEngine::from_settings(eval).with_sink(Arc::clone(&sink));
    let policy = RetryPolicy {
        adaptive: eval.adaptive_retry,
        max_repair_rounds: eval.max_repair_rounds,
    };

    info!(
        served_model = model.served_model(),
        adaptive_retry = policy.adaptive,
        max_repair_rounds = policy.max_repair_rounds,
        timeout_ms = engine.timeout().as_millis() as u64,
        "Starting model run"
    );

    let orchestrator = Orchestrator::new(generator, engine, policy, sink).verbose(eval.verbose);

    // Counters are scoped to this model configuration
    let mut stats = RunStatistics::new();
    let started_at = Utc::now();
    let reports = orchestrator.run(prompts, &mut stats).await;

    for report in &reports {
        debug!(
            index = report.index,
            prompt_id = ?report.prompt_id,
            rounds = report.rounds.len(),
            outcome = report.final_outcome.label(),
            "Prompt report"
        );
    }

    Ok(evaluator::summarize(model, policy.adaptive, &stats, &reports, started_at))
}
