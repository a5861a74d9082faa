use crate::chunking::split_sentences;
use crate::error::LlmError;
use crate::llm::{GenerationConfig, LlmClient};
use crate::selector::MAX_CONTEXTS;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const NO_CONTEXT_MESSAGE: &str = "No context information available to answer this question.";
pub const NO_RELEVANT_SENTENCES_MESSAGE: &str =
    "Could not find relevant information in the provided documents.";

const FALLBACK_SENTENCES: usize = 3;
const MIN_KEYWORD_CHARS: usize = 4;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_step: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: 5s before the first retry, 10s before the second.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
    sleeper: Arc<dyn Sleeper>,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, generation: GenerationConfig) -> Self {
        Self {
            llm,
            sleeper: Arc::new(TokioSleeper),
            generation,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Always produces a user-facing answer; failures are logged, not returned.
    pub async fn synthesize(&self, question: &str, contexts: &[String]) -> String {
        if contexts.is_empty() {
            return NO_CONTEXT_MESSAGE.to_string();
        }

        let prompt = build_prompt(question, contexts);
        tracing::info!(
            contexts = contexts.len().min(MAX_CONTEXTS),
            prompt_chars = prompt.chars().count(),
            "generating answer"
        );

        match self.generate_with_retry(&prompt).await {
            Ok(answer) => answer.trim().to_string(),
            Err(error) => {
                tracing::warn!(%error, "llm unavailable, using local extraction");
                match extract_answer_locally(question, contexts) {
                    Ok(answer) => answer,
                    Err(fallback_error) => {
                        tracing::error!(%error, %fallback_error, "local extraction failed");
                        format!("Unable to generate answer. API error: {error}")
                    }
                }
            }
        }
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.llm.generate(prompt, &self.generation).await {
                Ok(answer) => return Ok(answer),
                Err(error) if error.is_rate_limited() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let wait = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        wait_secs = wait.as_secs(),
                        "rate limited, backing off"
                    );
                    self.sleeper.sleep(wait).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn build_prompt(question: &str, contexts: &[String]) -> String {
    let combined = contexts
        .iter()
        .take(MAX_CONTEXTS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an intelligent assistant tasked with answering questions based mostly on the provided context information.\n\
         Your goal is to be accurate, comprehensive, and helpful.\n\
         \n\
         CONTEXT INFORMATION:\n\
         {combined}\n\
         \n\
         IMPORTANT INSTRUCTIONS:\n\
         1. Format your answer in a clear, readable way.\n\
         \n\
         QUESTION: {question}\n\
         \n\
         ANSWER:"
    )
}

fn keywords(words: &Regex, text: &str) -> HashSet<String> {
    words
        .find_iter(&text.to_lowercase())
        .map(|word| word.as_str().to_string())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
        .collect()
}

/// Picks the context sentences sharing the most significant words with the
/// question. Ties keep their original order.
pub fn extract_answer_locally(question: &str, contexts: &[String]) -> Result<String, regex::Error> {
    if contexts.is_empty() {
        return Ok(NO_CONTEXT_MESSAGE.to_string());
    }

    let words = Regex::new(r"\w+")?;
    let question_words = keywords(&words, question);

    let mut scored = split_sentences(&contexts.join(" "))
        .into_iter()
        .filter_map(|sentence| {
            let matches = keywords(&words, &sentence)
                .intersection(&question_words)
                .count();
            (matches > 0).then_some((sentence, matches))
        })
        .collect::<Vec<_>>();

    if scored.is_empty() {
        return Ok(NO_RELEVANT_SENTENCES_MESSAGE.to_string());
    }

    scored.sort_by(|left, right| right.1.cmp(&left.1));
    Ok(scored
        .into_iter()
        .take(FALLBACK_SENTENCES)
        .map(|(sentence, _)| sentence)
        .collect::<Vec<_>>()
        .join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    fn synthesizer(llm: Arc<ScriptedLlm>, sleeper: Arc<RecordingSleeper>) -> AnswerSynthesizer {
        AnswerSynthesizer::new(llm, GenerationConfig::default()).with_sleeper(sleeper)
    }

    fn rate_limited() -> Result<String, LlmError> {
        Err(LlmError::RateLimited("429".to_string()))
    }

    fn contexts() -> Vec<String> {
        vec![
            "Cats are mammals. Dogs bark loudly.".to_string(),
            "Mammals have fur.".to_string(),
        ]
    }

    #[tokio::test]
    async fn no_context_skips_the_model() {
        let llm = ScriptedLlm::new(vec![Ok("unused".to_string())]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let answer = synthesizer(llm.clone(), sleeper).synthesize("Anything?", &[]).await;

        assert_eq!(answer, NO_CONTEXT_MESSAGE);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn rate_limits_are_retried_with_linear_backoff() {
        let llm = ScriptedLlm::new(vec![
            rate_limited(),
            rate_limited(),
            Ok("  Cats are mammals.  ".to_string()),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let answer = synthesizer(llm.clone(), sleeper.clone())
            .synthesize("What are cats?", &contexts())
            .await;

        assert_eq!(answer, "Cats are mammals.");
        assert_eq!(llm.calls(), 3);
        let waits = sleeper.waits.lock().unwrap().clone();
        assert_eq!(waits, vec![Duration::from_secs(5), Duration::from_secs(10)]);
        assert!(waits.iter().sum::<Duration>() >= Duration::from_secs(15));
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back() {
        let llm = ScriptedLlm::new(vec![rate_limited(), rate_limited(), rate_limited()]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let answer = synthesizer(llm.clone(), sleeper.clone())
            .synthesize("Which animals are mammals?", &contexts())
            .await;

        assert_eq!(llm.calls(), 3);
        assert_eq!(sleeper.waits.lock().unwrap().len(), 2);
        assert_eq!(answer, "Cats are mammals. Mammals have fur.");
    }

    #[tokio::test]
    async fn other_failures_fall_back_without_retry() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Api {
            status: 500,
            details: "boom".to_string(),
        })]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let answer = synthesizer(llm.clone(), sleeper.clone())
            .synthesize("Which animals are mammals?", &contexts())
            .await;

        assert_eq!(llm.calls(), 1);
        assert!(sleeper.waits.lock().unwrap().is_empty());
        assert_eq!(answer, "Cats are mammals. Mammals have fur.");
    }

    #[test]
    fn fallback_reports_when_nothing_matches() {
        let answer = extract_answer_locally("Where is Paris?", &contexts()).unwrap();
        assert_eq!(answer, NO_RELEVANT_SENTENCES_MESSAGE);
    }

    #[test]
    fn fallback_keeps_top_three_in_original_order_on_ties() {
        let contexts = vec![
            "Pumps one. Pumps two. Valves three. Pumps four! Pumps five?".to_string(),
        ];
        let answer = extract_answer_locally("How do pumps work?", &contexts).unwrap();
        assert_eq!(answer, "Pumps one. Pumps two. Pumps four!");
    }

    #[test]
    fn fallback_prefers_higher_scores() {
        let contexts = vec![
            "Hydraulic pumps move fluid. Hydraulic pressure builds in pumps under load.".to_string(),
        ];
        let answer =
            extract_answer_locally("Why does hydraulic pressure build in pumps?", &contexts).unwrap();
        assert!(answer.starts_with("Hydraulic pressure builds in pumps under load."));
    }

    #[test]
    fn prompt_uses_first_five_contexts() {
        let contexts = (0..7).map(|index| format!("context-{index}")).collect::<Vec<_>>();
        let prompt = build_prompt("What?", &contexts);

        assert!(prompt.contains("context-0\n\ncontext-1"));
        assert!(prompt.contains("context-4"));
        assert!(!prompt.contains("context-5"));
        assert!(prompt.contains("QUESTION: What?"));
        assert!(prompt.ends_with("ANSWER:"));
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
    }
}
