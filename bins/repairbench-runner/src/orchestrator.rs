/// Orchestrator - Generate / Extract / Validate Retry Loop
///
/// **Responsibility:**
/// Drive one prompt at a time through up to `1 + max_repair_rounds`
/// attempts, growing the conversation with the previous response and the
/// failure feedback between attempts.
///
/// **Round transitions:**
/// - Round 0 always runs
/// - Stop when the candidate passes, when adaptive retry is off, or when the
///   repair budget is spent
/// - Otherwise append `assistant(response)` + `user(feedback)` and regenerate
///   from the full conversation
///
/// The final outcome is always the outcome of the last round executed.
/// `RunStatistics` is updated exactly once per prompt.

use crate::collector;
use crate::engine::CodeValidator;
use crate::evaluator;
use crate::extractor::extract_code;
use crate::generator::Generator;
use crate::progress::ProgressSink;
use repairbench_common::types::{Conversation, Prompt, RunStatistics, Turn, ValidationOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub adaptive: bool,
    pub max_repair_rounds: u32,
}

/// One generate-extract-validate cycle
#[derive(Debug, Clone)]
pub struct RoundRecord {
    pub round: u32,
    /// None when generation failed
    pub duration: Option<Duration>,
    pub ttft: Option<Duration>,
    pub outcome: ValidationOutcome,
}

#[derive(Debug, Clone)]
pub struct PromptReport {
    pub index: usize,
    pub prompt_id: Option<u64>,
    pub rounds: Vec<RoundRecord>,
    pub final_outcome: ValidationOutcome,
}

/// User turn sent back to the model after a failed round
pub fn repair_message(feedback: &str) -> String {
    format!(
        " While running that code I received the following: {}. Can you update the code and fix the problem?",
        feedback
    )
}

pub struct Orchestrator<G, V> {
    generator: G,
    validator: V,
    policy: RetryPolicy,
    sink: Arc<dyn ProgressSink>,
    verbose: bool,
}

impl<G, V> Orchestrator<G, V>
where
    G: Generator,
    V: CodeValidator,
{
    pub fn new(generator: G, validator: V, policy: RetryPolicy, sink: Arc<dyn ProgressSink>) -> Self {
        Self { generator, validator, policy, sink, verbose: false }
    }

    /// Echo streamed tokens to the sink
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Evaluate prompts strictly one after another
    pub async fn run(&self, prompts: &[Prompt], stats: &mut RunStatistics) -> Vec<PromptReport> {
        let mut reports = Vec::with_capacity(prompts.len());
        for (index, prompt) in prompts.iter().enumerate() {
            reports.push(self.evaluate_prompt(index, prompt, stats).await);
        }
        reports
    }

    #[instrument(skip(self, prompt, stats), fields(prompt_id = ?prompt.id))]
    pub async fn evaluate_prompt(
        &self,
        index: usize,
        prompt: &Prompt,
        stats: &mut RunStatistics,
    ) -> PromptReport {
        let mut conversation = Conversation::from_prompt(prompt);
        let mut rounds = Vec::new();
        let mut round = 0u32;

        let final_outcome = loop {
            let (response, record) = self.attempt(index, &conversation, &prompt.test, round).await;
            let outcome = record.outcome.clone();
            rounds.push(record);

            if outcome.passed() || !self.policy.adaptive || round >= self.policy.max_repair_rounds {
                break outcome;
            }

            self.sink.status(&evaluator::status_line(stats));

            conversation.push(Turn::assistant(response));
            conversation.push(Turn::user(repair_message(&outcome.feedback())));
            round += 1;
        };

        stats.record(&final_outcome);
        info!(
            rounds = rounds.len(),
            outcome = final_outcome.label(),
            passed = stats.passed(),
            attempted = stats.attempted(),
            "Prompt evaluated"
        );
        self.sink.status(&evaluator::status_line(stats));

        PromptReport {
            index,
            prompt_id: prompt.id,
            rounds,
            final_outcome,
        }
    }

    /// Returns the raw response (empty if generation failed) and the round record
    async fn attempt(
        &self,
        index: usize,
        conversation: &Conversation,
        test: &str,
        round: u32,
    ) -> (String, RoundRecord) {
        let echo = self.verbose.then(|| Arc::clone(&self.sink));

        match collector::collect(&self.generator, conversation, echo).await {
            Ok(generation) => {
                self.sink
                    .status(&evaluator::attempt_line(index, generation.duration, generation.ttft));

                let code = extract_code(&generation.text).trim();
                let outcome = self.validator.validate(code, test, round).await;

                let record = RoundRecord {
                    round,
                    duration: Some(generation.duration),
                    ttft: Some(generation.ttft),
                    outcome,
                };
                (generation.text, record)
            }
            Err(e) => {
                warn!(round, error = %e, "Generation failed");
                let outcome = ValidationOutcome::RuntimeError {
                    message: format!("generation failed: {}", e),
                };
                self.sink.status(&evaluator::round_line(round, &outcome));

                let record = RoundRecord { round, duration: None, ttft: None, outcome };
                (String::new(), record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GenerationError, TokenSender};
    use crate::progress::testing::RecordingSink;
    use crate::progress::NullSink;
    use async_trait::async_trait;
    use repairbench_common::types::Role;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every conversation it was given
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<String, String>>>,
        seen: Mutex<Vec<Conversation>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            let responses = responses
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            Self { responses: Mutex::new(responses), seen: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn conversations(&self) -> Vec<Conversation> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            conversation: &Conversation,
            tokens: TokenSender,
        ) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(conversation.clone());
            let next = self.responses.lock().unwrap().pop_front().expect("script exhausted");
            match next {
                Ok(text) => {
                    for chunk in text.split_inclusive(' ') {
                        tokens.send(chunk.to_string()).unwrap();
                    }
                    Ok(text)
                }
                Err(message) => Err(GenerationError::Backend(message)),
            }
        }
    }

    /// Passes exactly when the extracted code equals `accept`
    struct ExactValidator {
        accept: &'static str,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl ExactValidator {
        fn new(accept: &'static str) -> Self {
            Self { accept, calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CodeValidator for ExactValidator {
        async fn validate(&self, code: &str, test: &str, round: u32) -> ValidationOutcome {
            self.calls.lock().unwrap().push((code.to_string(), round));
            if code == self.accept {
                ValidationOutcome::Passed
            } else {
                ValidationOutcome::AssertionFailed { test: test.to_string() }
            }
        }
    }

    fn prompt() -> Prompt {
        Prompt::new(
            vec![Turn::system("sys"), Turn::user("write f")],
            "assert f() == 1",
        )
    }

    fn orchestrator(
        responses: Vec<Result<&str, &str>>,
        adaptive: bool,
    ) -> Orchestrator<ScriptedGenerator, ExactValidator> {
        Orchestrator::new(
            ScriptedGenerator::new(responses),
            ExactValidator::new("def f(): return 1"),
            RetryPolicy { adaptive, max_repair_rounds: 2 },
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_failure_without_retry_runs_one_round() {
        let orch = orchestrator(vec![Ok("def f(): return 2")], false);
        let mut stats = RunStatistics::new();

        let report = orch.evaluate_prompt(0, &prompt(), &mut stats).await;

        assert_eq!(orch.generator.calls(), 1);
        assert_eq!(report.rounds.len(), 1);
        assert!(!report.final_outcome.passed());
        assert_eq!(stats.attempted(), 1);
        assert_eq!(stats.passed(), 0);
    }

    #[tokio::test]
    async fn test_pass_on_last_repair_round() {
        let orch = orchestrator(
            vec![
                Ok("def f(): return 2"),
                Ok("def f(): return 3"),
                Ok("```python\ndef f(): return 1\n```"),
            ],
            true,
        );
        let mut stats = RunStatistics::new();

        let report = orch.evaluate_prompt(0, &prompt(), &mut stats).await;

        assert_eq!(orch.generator.calls(), 3);
        assert_eq!(report.final_outcome, ValidationOutcome::Passed);
        assert_eq!(stats.attempted(), 1);
        assert_eq!(stats.passed(), 1);

        let rounds: Vec<u32> = orch.validator.calls().iter().map(|(_, r)| *r).collect();
        assert_eq!(rounds, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_never_passing_uses_last_round_outcome() {
        let orch = orchestrator(
            vec![Ok("def f(): return 2"), Ok("def f(): return 3"), Err("backend exploded")],
            true,
        );
        let mut stats = RunStatistics::new();

        let report = orch.evaluate_prompt(0, &prompt(), &mut stats).await;

        assert_eq!(orch.generator.calls(), 3);
        assert_eq!(report.rounds.len(), 3);
        assert_eq!(report.final_outcome, report.rounds[2].outcome);
        match &report.final_outcome {
            ValidationOutcome::RuntimeError { message } => {
                assert!(message.contains("backend exploded"));
            }
            other => panic!("unexpected final outcome {:?}", other),
        }
        assert_eq!(stats.attempted(), 1);
        assert_eq!(stats.passed(), 0);
    }

    #[tokio::test]
    async fn test_success_short_circuits() {
        let orch = orchestrator(vec![Ok("def f(): return 1")], true);
        let mut stats = RunStatistics::new();

        let report = orch.evaluate_prompt(0, &prompt(), &mut stats).await;

        assert_eq!(orch.generator.calls(), 1);
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(stats.passed(), 1);
    }

    #[tokio::test]
    async fn test_repair_conversation_accumulates() {
        let orch = orchestrator(
            vec![Ok("def f(): return 2"), Ok("def f(): return 3"), Ok("def f(): return 4")],
            true,
        );
        let mut stats = RunStatistics::new();
        orch.evaluate_prompt(0, &prompt(), &mut stats).await;

        let seen = orch.generator.conversations();
        assert_eq!(seen.iter().map(Conversation::len).collect::<Vec<_>>(), vec![2, 4, 6]);

        let last = seen[2].turns();
        assert_eq!(last[2], Turn::assistant("def f(): return 2"));
        assert_eq!(last[4], Turn::assistant("def f(): return 3"));
        assert_eq!(last[5].role, Role::User);
        assert_eq!(
            last[5].content,
            repair_message("There is a logical error in the code. TEST: assert f() == 1 FAILED")
        );
    }

    #[tokio::test]
    async fn test_generation_failure_is_consumed_by_retry() {
        let orch = orchestrator(vec![Err("timeout"), Ok("def f(): return 1")], true);
        let mut stats = RunStatistics::new();

        let report = orch.evaluate_prompt(0, &prompt(), &mut stats).await;

        assert_eq!(report.rounds[0].duration, None);
        assert!(report.final_outcome.passed());
        // only the successful generation reached the validator
        assert_eq!(orch.validator.calls().len(), 1);

        let second = &orch.generator.conversations()[1];
        assert_eq!(second.turns()[2], Turn::assistant(""));
        assert!(second.turns()[3].content.contains("ERROR: generation failed"));
    }

    #[tokio::test]
    async fn test_run_counts_once_per_prompt() {
        let orch = orchestrator(
            vec![
                Ok("def f(): return 1"),
                Ok("def f(): return 0"),
                Ok("def f(): return 0"),
                Ok("def f(): return 0"),
            ],
            true,
        );
        let mut stats = RunStatistics::new();

        let reports = orch.run(&[prompt(), prompt()], &mut stats).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].index, 1);
        assert_eq!(stats.attempted(), 2);
        assert_eq!(stats.passed(), 1);
        assert_eq!(evaluator::pass_rate(&stats), 50.0);
    }

    #[tokio::test]
    async fn test_status_lines_emitted() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn ProgressSink> = sink.clone();
        let orch = Orchestrator::new(
            ScriptedGenerator::new(vec![Ok("def f(): return 2"), Ok("def f(): return 1")]),
            ExactValidator::new("def f(): return 1"),
            RetryPolicy { adaptive: true, max_repair_rounds: 2 },
            shared,
        )
        .verbose(true);
        let mut stats = RunStatistics::new();

        orch.evaluate_prompt(4, &prompt(), &mut stats).await;

        let lines = sink.lines();
        assert!(lines[0].starts_with("5 ("));
        assert!(lines.contains(&"Tests Passed: 0/0 (0.00%)".to_string()));
        assert_eq!(lines.last().unwrap(), "Tests Passed: 1/1 (100.00%)");
        assert_eq!(sink.tokens().concat(), "def f(): return 2def f(): return 1");
    }
}
