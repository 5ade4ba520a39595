//! LLM completion interface.
//!
//! The pipeline never talks to a provider directly; it takes a
//! `&dyn CompletionClient` so every stage is testable with scripted
//! stubs. The blocking client model is deliberate: job workers run on
//! dedicated OS threads, so blocking HTTP never sits on the tokio
//! runtime.

pub mod ollama;

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub use ollama::OllamaClient;

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the completion.
    EndTurn,
    /// Token cap hit — the text is likely truncated mid-thought and a
    /// continuation must be issued regardless of word count.
    MaxTokens,
    Other,
}

/// A single completion result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub stop_reason: StopReason,
}

impl Completion {
    pub fn new(text: impl Into<String>, stop_reason: StopReason) -> Self {
        Self {
            text: text.into(),
            stop_reason,
        }
    }
}

/// One completion request. `max_tokens` is a generous cap, not a target;
/// callers size it from the word budget.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
}

/// Errors from the completion provider.
///
/// Protocol errors (malformed or empty content) are retried the same way
/// transport errors are, so everything here counts as retryable; input
/// validation failures never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider is not reachable at {0}")]
    NotReachable(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Provider returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Provider returned an empty completion")]
    EmptyCompletion,

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

/// Text-in/text-out completion service returning a stop reason.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, LlmError>;
}

// ═══════════════════════════════════════════════════════════
// ScriptedClient — recorded stub for tests
// ═══════════════════════════════════════════════════════════

/// Stub client that replays a fixed script of completions in order.
///
/// When the script runs dry the last completion repeats, which keeps
/// long multi-chunk test jobs terse. Every prompt is recorded for
/// assertions.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Completion>>,
    last: Mutex<Option<Completion>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: always answer with the same text and `EndTurn`.
    pub fn always(text: &str) -> Self {
        Self::new(vec![Completion::new(text, StopReason::EndTurn)])
    }

    /// Prompts seen so far, in call order.
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(req.prompt.to_string());
        }

        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Http("stub lock poisoned".into()))?
            .pop_front();

        match next {
            Some(completion) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(completion.clone());
                }
                Ok(completion)
            }
            None => self
                .last
                .lock()
                .map_err(|_| LlmError::Http("stub lock poisoned".into()))?
                .clone()
                .ok_or(LlmError::EmptyCompletion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_client_replays_in_order() {
        let client = ScriptedClient::new(vec![
            Completion::new("first", StopReason::EndTurn),
            Completion::new("second", StopReason::MaxTokens),
        ]);
        let req = CompletionRequest {
            model: "m",
            system: "s",
            prompt: "p1",
            max_tokens: 100,
        };
        assert_eq!(client.complete(&req).unwrap().text, "first");
        let second = client.complete(&req).unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(second.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn scripted_client_repeats_last_when_dry() {
        let client = ScriptedClient::always("steady");
        let req = CompletionRequest {
            model: "m",
            system: "s",
            prompt: "p",
            max_tokens: 100,
        };
        for _ in 0..3 {
            assert_eq!(client.complete(&req).unwrap().text, "steady");
        }
    }

    #[test]
    fn scripted_client_records_prompts() {
        let client = ScriptedClient::always("x");
        let req = CompletionRequest {
            model: "m",
            system: "s",
            prompt: "remember me",
            max_tokens: 10,
        };
        let _ = client.complete(&req);
        assert_eq!(client.recorded_prompts(), vec!["remember me".to_string()]);
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn empty_script_errors() {
        let client = ScriptedClient::new(vec![]);
        let req = CompletionRequest {
            model: "m",
            system: "s",
            prompt: "p",
            max_tokens: 10,
        };
        assert!(client.complete(&req).is_err());
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::MaxTokens).unwrap(),
            "\"max_tokens\""
        );
    }
}
