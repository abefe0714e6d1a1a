/// Execution Engine - Candidate Program Runner
///
/// **Core Responsibility:**
/// Run `candidate + test` under a hard wall-clock deadline and capture the
/// raw result for the evaluator to classify.
///
/// **Isolation:**
/// Each run is a fresh `python3` child process in its own temporary working
/// directory. On timeout the child is killed, so a candidate stuck in an
/// infinite loop cannot hold up the caller or leak into later rounds.
///
/// **Trust Boundary:**
/// The child runs with the invoking user's privileges, environment and
/// filesystem access. This is NOT a sandbox. Only run candidates produced
/// for a controlled benchmark, never arbitrary third-party input.

use crate::evaluator::{self, ProgramOutput, ASSERTION_MARKER, ERROR_MARKER, PASSED_MARKER};
use crate::progress::ProgressSink;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use repairbench_common::config::EvaluationSettings;
use repairbench_common::types::ValidationOutcome;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tracing::{debug, info, warn};

/// Guardrails against pathological candidates
const MAX_PROGRAM_BYTES: usize = 64 * 1024;
const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// How long stderr may stay open after the candidate exits, e.g. when a
/// spawned descendant inherited it
const STDERR_GRACE: Duration = Duration::from_millis(250);

const PROGRAM_ENV: &str = "REPAIRBENCH_PROGRAM";

/// Validates a candidate against its test
#[async_trait]
pub trait CodeValidator: Send + Sync {
    /// `round` only labels progress output
    async fn validate(&self, code: &str, test: &str, round: u32) -> ValidationOutcome;
}

/// Python source run inside the child. Reports every ending through marker
/// lines on the original stderr so a pass is never inferred from the exit
/// status alone.
fn harness() -> String {
    format!(
        r#"import base64, os, sys
report = sys.__stderr__
source = base64.b64decode(os.environ.pop("{env}")).decode("utf-8")
try:
    exec(compile(source, "<candidate>", "exec"), {{"__name__": "__main__"}})
except AssertionError:
    report.write("\n{assertion}\n")
    report.flush()
    sys.exit(1)
except SystemExit as exit:
    report.write("\n{error}program called exit(" + str(exit.code) + ") before the test ran\n")
    report.flush()
    sys.exit(1)
except Exception as error:
    message = str(error).replace("\n", " ") or type(error).__name__
    report.write("\n{error}" + message + "\n")
    report.flush()
    sys.exit(1)
else:
    report.write("\n{passed}\n")
    report.flush()
"#,
        env = PROGRAM_ENV,
        assertion = ASSERTION_MARKER,
        error = ERROR_MARKER,
        passed = PASSED_MARKER,
    )
}

/// Join candidate and test into a single program
pub fn program_source(code: &str, test: &str) -> String {
    format!("{}\n\n{}", code, test)
}

#[derive(Clone)]
pub struct PythonEngine {
    python: String,
    timeout: Duration,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl PythonEngine {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self { python: python.into(), timeout, sink: None }
    }

    pub fn from_settings(settings: &EvaluationSettings) -> Self {
        Self::new(settings.python.clone(), Duration::from_millis(settings.timeout_ms))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a full program under the deadline
    ///
    /// **Safety Guarantees:**
    /// - Oversized programs are rejected before spawning
    /// - Hard timeout via `tokio::time::timeout`; the child is killed on expiry
    /// - stderr is drained continuously and capped to its last 1 MiB
    /// - `kill_on_drop` reaps the child even if this future is dropped
    pub async fn run_program(&self, source: &str) -> Result<ProgramOutput> {
        if source.len() > MAX_PROGRAM_BYTES {
            bail!("Program exceeds maximum size of {} bytes", MAX_PROGRAM_BYTES);
        }

        let workdir = tempfile::tempdir().context("Failed to create working directory")?;

        let start_time = Instant::now();
        let mut child = Command::new(&self.python)
            .arg("-I")
            .arg("-c")
            .arg(harness())
            .env(PROGRAM_ENV, general_purpose::STANDARD.encode(source))
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.python))?;

        let stderr = child.stderr.take().context("Child stderr was not captured")?;

        // The pipe is drained for the whole run so a chatty candidate never
        // blocks on a full pipe; only the tail is kept
        let tail = Arc::new(Mutex::new(TailBuffer::new(MAX_STDERR_BYTES)));
        let mut reader = tokio::spawn(drain_stderr(stderr, Arc::clone(&tail)));

        let wait_result = tokio::time::timeout(self.timeout, child.wait()).await;

        let (exit_code, timed_out) = match wait_result {
            Ok(status) => {
                let status = status.context("Failed to wait for candidate process")?;
                if tokio::time::timeout(STDERR_GRACE, &mut reader).await.is_err() {
                    debug!("Candidate stderr still open after exit; closing it");
                    reader.abort();
                }
                (status.code(), false)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Execution timed out; killing candidate");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out candidate");
                }
                reader.abort();
                (None, true)
            }
        };

        let stderr = if timed_out { String::new() } else { lock(&tail).contents() };

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        debug!(exit_code = ?exit_code, timed_out, execution_time_ms, "Candidate finished");

        Ok(ProgramOutput { exit_code, stderr, execution_time_ms, timed_out })
    }

    fn emit(&self, line: String) {
        if let Some(sink) = &self.sink {
            sink.status(&line);
        }
    }
}

/// Keeps the most recent `cap` bytes written to a stream
#[derive(Debug)]
struct TailBuffer {
    bytes: Vec<u8>,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self { bytes: Vec::new(), cap }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        // Trim lazily so the front is not shifted on every chunk
        if self.bytes.len() > self.cap * 2 {
            let excess = self.bytes.len() - self.cap;
            self.bytes.drain(..excess);
        }
    }

    fn contents(&self) -> String {
        let start = self.bytes.len().saturating_sub(self.cap);
        String::from_utf8_lossy(&self.bytes[start..]).into_owned()
    }
}

fn lock(tail: &Mutex<TailBuffer>) -> MutexGuard<'_, TailBuffer> {
    tail.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn drain_stderr(mut stderr: ChildStderr, tail: Arc<Mutex<TailBuffer>>) {
    let mut chunk = vec![0u8; 8 * 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => lock(&tail).push(&chunk[..n]),
            Err(e) => {
                warn!(error = %e, "Failed to read candidate stderr");
                break;
            }
        }
    }
}

#[async_trait]
impl CodeValidator for PythonEngine {
    async fn validate(&self, code: &str, test: &str, round: u32) -> ValidationOutcome {
        self.emit(format!("  round {}: running", round));

        let outcome = match self.run_program(&program_source(code, test)).await {
            Ok(output) => {
                debug!(round, execution_ms = output.execution_time_ms, "Classifying candidate output");
                evaluator::classify(&output, test)
            }
            Err(e) => {
                warn!(round, error = %e, "Candidate could not be executed");
                ValidationOutcome::RuntimeError { message: format!("{:#}", e) }
            }
        };

        info!(round, outcome = outcome.label(), "Validation finished");
        self.emit(evaluator::round_line(round, &outcome));
        outcome
    }
}
