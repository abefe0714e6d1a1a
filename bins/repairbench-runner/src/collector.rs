/// Stream Collector - Token Stream Consumption
///
/// **Responsibility:**
/// Run one generation call while a dedicated consumer task drains the token
/// channel, then return the assembled text with its timings.
///
/// **Guarantees:**
/// - The generator is never blocked by the consumer (unbounded channel)
/// - Both the generation call and the consumer are finished before returning,
///   on success and on failure
/// - `text` is exactly the concatenation of streamed tokens
/// - `ttft <= duration`: duration is taken after the consumer is joined

use crate::generator::{GenerationError, Generator};
use crate::progress::ProgressSink;
use repairbench_common::types::{Conversation, GenerationResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Generate a response for `conversation`, echoing tokens to `echo` if set
pub async fn collect<G>(
    generator: &G,
    conversation: &Conversation,
    echo: Option<Arc<dyn ProgressSink>>,
) -> Result<GenerationResult, GenerationError>
where
    G: Generator + ?Sized,
{
    let start = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let consumer = tokio::spawn(async move {
        let mut text = String::new();
        let mut ttft: Option<Duration> = None;
        while let Some(token) = rx.recv().await {
            if ttft.is_none() {
                ttft = Some(start.elapsed());
            }
            if let Some(sink) = &echo {
                sink.token(&token);
            }
            text.push_str(&token);
        }
        (text, ttft)
    });

    // The sender moves into the call, so the channel closes when it returns
    let generated = generator.generate(conversation, tx).await;

    let (text, ttft) = consumer
        .await
        .map_err(|e| GenerationError::Backend(format!("token consumer failed: {}", e)))?;
    let duration = start.elapsed();

    let final_text = generated?;
    let ttft = ttft.ok_or(GenerationError::Empty)?;

    if final_text != text {
        warn!(
            streamed_chars = text.len(),
            final_chars = final_text.len(),
            "Streamed tokens differ from the returned text; keeping the stream"
        );
    }

    debug!(
        elapsed_ms = duration.as_millis() as u64,
        ttft_ms = ttft.as_millis() as u64,
        chars = text.len(),
        "Generation collected"
    );

    Ok(GenerationResult { text, duration, ttft })
}
