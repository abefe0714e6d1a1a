/// Outcome Evaluator & Scorer
///
/// **Core Responsibility:**
/// Turn raw program output into a `ValidationOutcome`, and turn run
/// counters into pass rates, status lines and summaries.
///
/// **Critical Properties:**
/// - Knows nothing about processes or Python
/// - Knows nothing about the generation backend
/// - Pure functions only
///
/// **Classification Priority:**
/// 1. Timeout
/// 2. Failed assertion
/// 3. Any other runtime fault, including a clean exit before the test ran
/// 4. Passed, only when the harness reports it

use crate::orchestrator::PromptReport;
use chrono::{DateTime, Utc};
use repairbench_common::config::ModelConfig;
use repairbench_common::types::{RunStatistics, RunSummary, ValidationOutcome};
use std::time::Duration;
use uuid::Uuid;

/// Marker line the harness writes when an `AssertionError` escapes
pub const ASSERTION_MARKER: &str = "__repairbench_assertion__";
/// Marker prefix the harness writes before any other exception message
pub const ERROR_MARKER: &str = "__repairbench_error__:";
/// Marker line the harness writes once candidate and test ran to completion
pub const PASSED_MARKER: &str = "__repairbench_passed__";

const EARLY_EXIT: &str = "program exited before the test ran";

/// Raw result of running one candidate program
/// Produced by the engine, consumed here
#[derive(Debug, Clone)]
pub struct ProgramOutput {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
}

/// Classify a finished (or abandoned) program run
pub fn classify(output: &ProgramOutput, test: &str) -> ValidationOutcome {
    if output.timed_out {
        return ValidationOutcome::TimedOut;
    }

    // The harness marker is the last thing it writes, so search from the end
    let marker_line = output.stderr.lines().rev().find(|line| {
        line.starts_with(ASSERTION_MARKER)
            || line.starts_with(ERROR_MARKER)
            || line.starts_with(PASSED_MARKER)
    });

    match (marker_line, output.exit_code) {
        (Some(line), _) if line.starts_with(ASSERTION_MARKER) => ValidationOutcome::AssertionFailed {
            test: test.to_string(),
        },
        (Some(line), _) if line.starts_with(ERROR_MARKER) => ValidationOutcome::RuntimeError {
            message: line[ERROR_MARKER.len()..].trim().to_string(),
        },
        (Some(_), Some(0)) => ValidationOutcome::Passed,
        // Exit status 0 without the passed marker: the candidate left early
        (None, Some(0)) => ValidationOutcome::RuntimeError {
            message: EARLY_EXIT.to_string(),
        },
        (_, Some(code)) => ValidationOutcome::RuntimeError {
            message: last_line(&output.stderr)
                .map(str::to_string)
                .unwrap_or_else(|| format!("process exited with status {}", code)),
        },
        (_, None) => ValidationOutcome::RuntimeError {
            message: "process terminated by a signal".to_string(),
        },
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with(PASSED_MARKER))
}

/// passed / attempted * 100, or 0 before anything was attempted
pub fn pass_rate(stats: &RunStatistics) -> f64 {
    if stats.attempted() == 0 {
        return 0.0;
    }
    stats.passed() as f64 / stats.attempted() as f64 * 100.0
}

pub fn status_line(stats: &RunStatistics) -> String {
    format!(
        "Tests Passed: {}/{} ({:.2}%)",
        stats.passed(),
        stats.attempted(),
        pass_rate(stats)
    )
}

/// Per-attempt timing line; `index` is zero-based
pub fn attempt_line(index: usize, duration: Duration, ttft: Duration) -> String {
    format!(
        "{} ({:.2}s TTFT: {:.2}s)",
        index + 1,
        duration.as_secs_f64(),
        ttft.as_secs_f64()
    )
}

/// Line printed once a round has been validated
pub fn round_line(round: u32, outcome: &ValidationOutcome) -> String {
    match outcome {
        ValidationOutcome::Passed => format!("  round {}: PASSED", round),
        other => format!("  round {}: FAILED: {}", round, other.feedback()),
    }
}

/// Prompts whose first round failed but a later round passed
pub fn repaired_count(reports: &[PromptReport]) -> u32 {
    reports
        .iter()
        .filter(|report| report.final_outcome.passed() && report.rounds.len() > 1)
        .count() as u32
}

/// Mean time-to-first-token over every successful generation
pub fn mean_ttft(reports: &[PromptReport]) -> Option<Duration> {
    let ttfts: Vec<Duration> = reports
        .iter()
        .flat_map(|report| report.rounds.iter())
        .filter_map(|round| round.ttft)
        .collect();

    if ttfts.is_empty() {
        return None;
    }
    Some(ttfts.iter().sum::<Duration>() / ttfts.len() as u32)
}

pub fn summarize(
    model: &ModelConfig,
    adaptive_retry: bool,
    stats: &RunStatistics,
    reports: &[PromptReport],
    started_at: DateTime<Utc>,
) -> RunSummary {
    RunSummary {
        run_id: Uuid::new_v4(),
        model: model.id.clone(),
        quantized: model.quantize,
        adaptive_retry,
        attempted: stats.attempted(),
        passed: stats.passed(),
        repaired: repaired_count(reports),
        pass_rate: pass_rate(stats),
        mean_ttft_ms: mean_ttft(reports).map(|ttft| ttft.as_micros() as f64 / 1000.0),
        started_at,
        finished_at: Utc::now(),
    }
}

pub fn render_summary(summary: &RunSummary) -> String {
    let elapsed = summary.finished_at - summary.started_at;
    format!(
        "Summary [{}] {} ({}, adaptive retry {}): {}/{} passed ({:.2}%), {} after repair, mean TTFT {}, in {}s",
        summary.run_id,
        summary.model,
        if summary.quantized { "quantized" } else { "unmodified" },
        if summary.adaptive_retry { "on" } else { "off" },
        summary.passed,
        summary.attempted,
        summary.pass_rate,
        summary.repaired,
        summary
            .mean_ttft_ms
            .map(|ms| format!("{:.0}ms", ms))
            .unwrap_or_else(|| "n/a".to_string()),
        elapsed.num_seconds()
    )
}
