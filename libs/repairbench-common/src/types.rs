use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A benchmark prompt: the opening turns plus the withheld assertion
/// used to judge whatever the model writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: Option<u64>,
    pub turns: Vec<Turn>,
    pub test: String,
}

impl Prompt {
    pub fn new(turns: Vec<Turn>, test: impl Into<String>) -> Self {
        Self { id: None, turns, test: test.into() }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Append-only turn log for one in-flight evaluation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn from_prompt(prompt: &Prompt) -> Self {
        Self { turns: prompt.turns.clone() }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// Output of a single generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub duration: Duration,
    pub ttft: Duration,
}

/// Result of running a candidate against its test
///
/// Ordering of classification when several apply:
/// TimedOut > AssertionFailed > RuntimeError > Passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed,
    AssertionFailed { test: String },
    RuntimeError { message: String },
    TimedOut,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed)
    }

    /// Human-readable reason, forwarded to the model on failure
    pub fn feedback(&self) -> String {
        match self {
            ValidationOutcome::Passed => "PASSED".to_string(),
            ValidationOutcome::AssertionFailed { test } => {
                format!("There is a logical error in the code. TEST: {} FAILED", test)
            }
            ValidationOutcome::RuntimeError { message } => format!("ERROR: {}", message),
            ValidationOutcome::TimedOut => "Execution timed out".to_string(),
        }
    }

    pub fn verdict(&self) -> (bool, String) {
        (self.passed(), self.feedback())
    }

    /// Short label for logs and status lines
    pub fn label(&self) -> &'static str {
        match self {
            ValidationOutcome::Passed => "passed",
            ValidationOutcome::AssertionFailed { .. } => "assertion_failed",
            ValidationOutcome::RuntimeError { .. } => "runtime_error",
            ValidationOutcome::TimedOut => "timed_out",
        }
    }
}

/// Pass/attempt counters for one model configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    attempted: u32,
    passed: u32,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final outcome of one prompt
    pub fn record(&mut self, outcome: &ValidationOutcome) {
        self.attempted += 1;
        if outcome.passed() {
            self.passed += 1;
        }
    }

    pub fn attempted(&self) -> u32 {
        self.attempted
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }
}

/// End-of-run report for one model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub model: String,
    pub quantized: bool,
    pub adaptive_retry: bool,
    pub attempted: u32,
    pub passed: u32,
    /// Prompts that failed round 0 but passed a repair round
    pub repaired: u32,
    pub pass_rate: f64,
    pub mean_ttft_ms: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
