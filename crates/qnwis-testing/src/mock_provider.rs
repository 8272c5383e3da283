//! Mock completion provider with rule-based scripting.
//!
//! Rules match on a substring of the prompt and yield a queue of responses;
//! the last response of a queue is sticky, so a single-response rule
//! answers every matching call. Prompts are logged for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use qnwis::{Completion, CompletionProvider, Error, Result, Usage};
use std::collections::VecDeque;
use std::time::Duration;

enum Scripted {
    Text(String),
    Failure(String),
}

struct Rule {
    needle: String,
    responses: VecDeque<Scripted>,
}

/// A scripted [`CompletionProvider`] for tests.
///
/// ```rust,ignore
/// let provider = MockProvider::new()
///     .on("routing classifier", r#"{"complexity": "simple"}"#)
///     .on_seq("specialist analyst", vec![bad_reply, good_reply])
///     .on_error("moderating a panel", "provider down");
/// ```
#[derive(Default)]
pub struct MockProvider {
    rules: Mutex<Vec<Rule>>,
    default_response: Mutex<String>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Provider whose default reply is an empty JSON object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_response: Mutex::new("{}".to_string()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer every prompt containing `needle` with `response`.
    #[must_use]
    pub fn on(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.push_rule(needle, vec![Scripted::Text(response.into())]);
        self
    }

    /// Answer successive prompts containing `needle` with successive
    /// responses; the last one is sticky.
    #[must_use]
    pub fn on_seq(self, needle: impl Into<String>, responses: Vec<String>) -> Self {
        self.push_rule(needle, responses.into_iter().map(Scripted::Text).collect());
        self
    }

    /// Fail every prompt containing `needle`.
    #[must_use]
    pub fn on_error(self, needle: impl Into<String>, reason: impl Into<String>) -> Self {
        self.push_rule(needle, vec![Scripted::Failure(reason.into())]);
        self
    }

    /// Change the default reply for unmatched prompts.
    #[must_use]
    pub fn with_default(self, response: impl Into<String>) -> Self {
        *self.default_response.lock() = response.into();
        self
    }

    /// Sleep before answering, to exercise timeouts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt seen so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of prompts containing `needle`.
    #[must_use]
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|p| p.contains(needle)).count()
    }

    fn push_rule(&self, needle: impl Into<String>, responses: Vec<Scripted>) {
        self.rules.lock().push(Rule {
            needle: needle.into(),
            responses: responses.into_iter().collect(),
        });
    }

    fn answer(&self, prompt: &str) -> Scripted {
        let mut rules = self.rules.lock();
        for rule in rules.iter_mut() {
            if prompt.contains(&rule.needle) {
                return if rule.responses.len() > 1 {
                    rule.responses.pop_front().unwrap_or(Scripted::Text(String::new()))
                } else {
                    match rule.responses.front() {
                        Some(Scripted::Text(text)) => Scripted::Text(text.clone()),
                        Some(Scripted::Failure(reason)) => Scripted::Failure(reason.clone()),
                        None => Scripted::Text(String::new()),
                    }
                };
            }
        }
        Scripted::Text(self.default_response.lock().clone())
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _stop: Option<&[String]>,
    ) -> Result<Completion> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(prompt.to_string());
        match self.answer(prompt) {
            Scripted::Text(text) => Ok(Completion {
                text,
                usage: Usage {
                    prompt_tokens: prompt.len() as u32 / 4,
                    completion_tokens: 64,
                },
            }),
            Scripted::Failure(reason) => Err(Error::Provider(reason)),
        }
    }
}
