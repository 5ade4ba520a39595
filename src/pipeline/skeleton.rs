//! Skeleton extraction — one LLM call per job producing the global
//! outline.
//!
//! Transport errors and malformed skeletons are both retried, up to
//! three attempts with exponential backoff (base 1s, cap 30s).
//! Persistent failure fails the job.

use crate::config::PacingConfig;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::models::GlobalSkeleton;

use super::prompts::{build_skeleton_prompt, SKELETON_SYSTEM};
use super::{extract_json_block, PipelineError};

const MAX_ATTEMPTS: u32 = 3;

/// Token cap for the outline call; outlines are small compared to
/// chunk generation.
const SKELETON_TOKEN_CAP: u32 = 4096;

pub struct SkeletonExtractor<'a> {
    llm: &'a dyn CompletionClient,
    model: &'a str,
    pacing: &'a PacingConfig,
}

impl<'a> SkeletonExtractor<'a> {
    pub fn new(llm: &'a dyn CompletionClient, model: &'a str, pacing: &'a PacingConfig) -> Self {
        Self { llm, model, pacing }
    }

    /// Run the extraction with retries. `structure_hint` carries any
    /// sections planned from the user directive.
    pub fn extract(
        &self,
        source: &str,
        structure_hint: &str,
        target_words: u32,
    ) -> Result<GlobalSkeleton, PipelineError> {
        let prompt = build_skeleton_prompt(source, structure_hint, target_words);

        let mut last_error: Option<PipelineError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                std::thread::sleep(self.pacing.skeleton_backoff(attempt - 1));
            }

            match self.attempt(&prompt, target_words) {
                Ok(skeleton) => {
                    tracing::info!(
                        sections = skeleton.sections.len(),
                        attempt,
                        "Skeleton extracted"
                    );
                    return Ok(skeleton);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Skeleton extraction attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.expect("at least one attempt ran"))
    }

    fn attempt(&self, prompt: &str, target_words: u32) -> Result<GlobalSkeleton, PipelineError> {
        let completion = self.llm.complete(&CompletionRequest {
            model: self.model,
            system: SKELETON_SYSTEM,
            prompt,
            max_tokens: SKELETON_TOKEN_CAP,
        })?;

        parse_skeleton(&completion.text, target_words)
    }
}

/// Parse and normalise a skeleton response.
///
/// Ids are reassigned positionally so delta references stay stable
/// regardless of what the model emitted; a skeleton whose word targets
/// are all zero gets the job target distributed evenly.
pub fn parse_skeleton(response: &str, target_words: u32) -> Result<GlobalSkeleton, PipelineError> {
    let json = extract_json_block(response)
        .ok_or_else(|| PipelineError::MalformedSkeleton("no JSON object found".into()))?;

    let mut skeleton: GlobalSkeleton = serde_json::from_str(&json)
        .map_err(|e| PipelineError::MalformedSkeleton(e.to_string()))?;

    if !skeleton.is_well_formed() {
        return Err(PipelineError::MalformedSkeleton(
            "empty section list or untitled section".into(),
        ));
    }

    for (i, section) in skeleton.sections.iter_mut().enumerate() {
        section.id = i as u32;
    }

    if skeleton.total_target_words() == 0 && target_words > 0 {
        let share = target_words / skeleton.sections.len() as u32;
        for section in &mut skeleton.sections {
            section.target_words = share;
        }
    }

    Ok(skeleton)
}
