// Observational output: streamed tokens and status lines.
// Nothing here feeds back into evaluation results.
use std::io::{self, Write};

pub trait ProgressSink: Send + Sync {
    /// Called for every streamed token when verbose echo is on
    fn token(&self, _token: &str) {}

    /// Called with a formatted status line
    fn status(&self, _line: &str) {}
}

/// Discards everything
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Writes to stdout
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn token(&self, token: &str) {
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "{}", token);
        let _ = stdout.flush();
    }

    fn status(&self, line: &str) {
        println!("{}", line);
    }
}
