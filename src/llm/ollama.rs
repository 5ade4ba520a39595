//! Ollama HTTP provider for the `CompletionClient` trait.
//!
//! Owns two HTTP clients with different timeouts:
//! - `client`: 600s for generation requests (a full chunk at a high
//!   token cap can run for minutes on local hardware)
//! - `client_quick`: 5s for health checks and model listing
//!
//! Blocking client stays blocking; job workers run on their own threads.

use serde::{Deserialize, Serialize};

use super::{Completion, CompletionClient, CompletionRequest, LlmError, StopReason};

/// Default per-request generation timeout (seconds).
const GENERATION_TIMEOUT_SECS: u64 = 600;

pub struct OllamaClient {
    base_url: String,
    /// Long-timeout client for generation.
    client: reqwest::blocking::Client,
    /// Short-timeout client for health/list (quick fail if unreachable).
    client_quick: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        let client_quick = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to create quick HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            client_quick,
            timeout_secs,
        }
    }

    /// Default Ollama instance at localhost:11434 with the 10-minute
    /// generation timeout.
    pub fn default_local() -> Self {
        Self::new("http://localhost:11434", GENERATION_TIMEOUT_SECS)
    }

    /// Base URL from `REWEAVE_LLM_URL` when set, localhost otherwise.
    pub fn from_env() -> Self {
        match std::env::var("REWEAVE_LLM_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(&url, GENERATION_TIMEOUT_SECS),
            _ => Self::default_local(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lightweight health check — verifies the provider is reachable.
    pub fn is_reachable(&self) -> bool {
        let url = format!("{}/", self.base_url);
        matches!(
            self.client_quick.get(&url).send(),
            Ok(resp) if resp.status().is_success()
        )
    }

    /// List locally installed model names.
    pub fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client_quick.get(&url).send().map_err(|e| {
            if e.is_connect() {
                LlmError::NotReachable(self.base_url.clone())
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

/// Request body for Ollama /api/generate.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

/// Response body from Ollama /api/generate.
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// Map Ollama's `done_reason` onto the provider-neutral stop reason.
fn map_stop_reason(done_reason: Option<&str>) -> StopReason {
    match done_reason {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some(_) => StopReason::Other,
        // Older servers omit done_reason for natural completions.
        None => StopReason::EndTurn,
    }
}

impl CompletionClient for OllamaClient {
    fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: req.model,
            prompt: req.prompt,
            system: req.system,
            stream: false,
            options: GenerateOptions {
                num_predict: req.max_tokens,
            },
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                LlmError::NotReachable(self.base_url.clone())
            } else if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }

        Ok(Completion {
            text: parsed.response,
            stop_reason: map_stop_reason(parsed.done_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", 60);
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let client = OllamaClient::default_local();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.timeout_secs, GENERATION_TIMEOUT_SECS);
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(map_stop_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(map_stop_reason(Some("load")), StopReason::Other);
        assert_eq!(map_stop_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn unreachable_provider_reports_not_reachable() {
        // Port 9 (discard) is essentially never an HTTP server.
        let client = OllamaClient::new("http://127.0.0.1:9", 1);
        let req = CompletionRequest {
            model: "m",
            system: "s",
            prompt: "p",
            max_tokens: 16,
        };
        let err = client.complete(&req).unwrap_err();
        assert!(
            matches!(err, LlmError::NotReachable(_) | LlmError::Http(_) | LlmError::Timeout(_)),
            "Unexpected error: {err:?}"
        );
    }
}
