pub mod chunker;
pub mod controller;
pub mod delta_store;
pub mod directive;
pub mod enforcer;
pub mod expansion;
pub mod prompts;
pub mod reconstructor;
pub mod registry;
pub mod skeleton;
pub mod stitcher;
pub mod words;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Malformed skeleton: {0}")]
    MalformedSkeleton(String),

    #[error("Input must be {min}-{max} words, got {got}")]
    InputSize { min: u32, max: u32, got: u32 },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Job {id} is {status} and cannot be resumed")]
    NotResumable { id: String, status: String },

    #[error("Chunk {index} failed after {attempts} attempts: {reason}")]
    ChunkFailed {
        index: u32,
        attempts: u32,
        reason: String,
    },
}

impl PipelineError {
    /// Input errors are rejected before job creation and never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InputSize { .. })
    }
}

/// Extract a JSON object from an LLM response.
///
/// Prefers a fenced ```json block (case-insensitive, handles ```JSON);
/// falls back to the outermost brace pair for models that skip the
/// fence.
pub(crate) fn extract_json_block(response: &str) -> Option<String> {
    let lower = response.to_lowercase();
    if let Some(fence_start) = lower.find("```json") {
        let content_start = fence_start + 7;
        if let Some(fence_len) = response[content_start..].find("```") {
            return Some(response[content_start..content_start + fence_len].trim().to_string());
        }
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end > start {
        Some(response[start..=end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let response = "Here you go:\n```json\n{\"a\": 1}\n```\ntrailing";
        assert_eq!(extract_json_block(response).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn fence_detection_is_case_insensitive() {
        let response = "```JSON\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(response).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn falls_back_to_brace_matching() {
        let response = "prose before {\"sections\": []} prose after";
        assert_eq!(extract_json_block(response).unwrap(), "{\"sections\": []}");
    }

    #[test]
    fn no_json_yields_none() {
        assert_eq!(extract_json_block("just prose, no json"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }
}
