//! Chunk reconstruction — generates one output chunk under the global
//! skeleton, the accumulated coherence context, and a length band.
//!
//! The first pass asks for the rewritten chunk plus a fenced JSON delta
//! block. Under-production or a `max_tokens` stop hands off to the
//! length enforcer. A missing or unparseable delta is synthesized by
//! lightweight claim extraction so invariant "complete ⇒ delta" holds
//! without a second LLM round trip.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::PacingConfig;
use crate::llm::{Completion, CompletionClient, CompletionRequest, LlmError};
use crate::models::{ChunkDelta, ChunkRecord, GlobalSkeleton, LedgerEntry, TermUse, UserParams};

use super::delta_store::CoherenceContext;
use super::enforcer::{EnforcementStatus, LengthEnforcer};
use super::prompts::{build_chunk_prompt, RECONSTRUCTION_SYSTEM};
use super::words::count_words;

/// Claims synthesized from an output when the model omits the delta.
const SYNTH_MAX_CLAIMS: usize = 5;
const SYNTH_MAX_TERMS: usize = 8;
const SYNTH_MAX_LEDGER: usize = 3;

/// Result of reconstructing one chunk.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub text: String,
    pub words: u32,
    pub delta: ChunkDelta,
    /// Total LLM calls spent (first pass + continuations).
    pub attempts: u32,
    pub status: EnforcementStatus,
}

pub struct ChunkReconstructor<'a> {
    llm: &'a dyn CompletionClient,
    model: &'a str,
    pacing: &'a PacingConfig,
}

impl<'a> ChunkReconstructor<'a> {
    pub fn new(llm: &'a dyn CompletionClient, model: &'a str, pacing: &'a PacingConfig) -> Self {
        Self { llm, model, pacing }
    }

    pub fn reconstruct(
        &self,
        chunk: &ChunkRecord,
        total_chunks: u32,
        skeleton: &GlobalSkeleton,
        context: &CoherenceContext,
        params: &UserParams,
    ) -> Result<ChunkOutcome, LlmError> {
        let prompt = build_chunk_prompt(
            &chunk.input_text,
            chunk.chunk_index,
            total_chunks,
            &skeleton.summary(),
            &context.summary(),
            &chunk.band,
            params,
        );

        let completion = self.llm.complete(&CompletionRequest {
            model: self.model,
            system: RECONSTRUCTION_SYSTEM,
            prompt: &prompt,
            // Generous cap: roughly two tokens per requested word.
            max_tokens: chunk.band.target * 2,
        })?;

        let (prose, parsed_delta) = strip_delta_block(&completion.text);

        let enforcer = LengthEnforcer::new(self.llm, self.model, self.pacing);
        let enforced = enforcer.enforce(
            Completion {
                text: prose,
                stop_reason: completion.stop_reason,
            },
            &chunk.band,
        )?;

        let delta = match parsed_delta {
            Some(delta) if !delta.is_empty() => delta,
            _ => {
                tracing::debug!(
                    chunk_index = chunk.chunk_index,
                    "No structured delta in response; synthesizing"
                );
                synthesize_delta(&enforced.text, chunk.chunk_index)
            }
        };

        Ok(ChunkOutcome {
            words: count_words(&enforced.text),
            text: enforced.text,
            delta,
            attempts: enforced.attempts,
            status: enforced.status,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Delta parsing
// ═══════════════════════════════════════════════════════════

/// Split a response into prose and the trailing delta block, if any.
///
/// Handles fenced ```json blocks case-insensitively and a bare trailing
/// JSON object that carries delta keys. An unparseable block is still
/// stripped from the prose (the reader must never see raw JSON) but
/// yields no delta.
pub(crate) fn strip_delta_block(response: &str) -> (String, Option<ChunkDelta>) {
    let lower = response.to_lowercase();
    if let Some(fence_start) = lower.rfind("```json") {
        let content_start = fence_start + 7;
        let content_end = response[content_start..]
            .find("```")
            .map(|i| content_start + i)
            .unwrap_or(response.len());

        let block = response[content_start..content_end].trim();
        let mut prose = response[..fence_start].trim_end().to_string();
        let after = content_end + 3;
        if after < response.len() {
            prose.push_str(response[after..].trim_end());
        }
        return (prose, parse_delta_lenient(block));
    }

    // Bare trailing JSON object with delta keys.
    if response.trim_end().ends_with('}') {
        if let Some(brace) = response.rfind("\n{") {
            let block = response[brace..].trim();
            if block.contains("new_claims") || block.contains("terms_used") {
                let prose = response[..brace].trim_end().to_string();
                return (prose, parse_delta_lenient(block));
            }
        }
    }

    (response.to_string(), None)
}

/// Parse a delta block leniently: items that fail to deserialize are
/// dropped with a warning rather than discarding the whole delta.
fn parse_delta_lenient(block: &str) -> Option<ChunkDelta> {
    if let Ok(delta) = serde_json::from_str::<ChunkDelta>(block) {
        return Some(delta);
    }

    let value: serde_json::Value = serde_json::from_str(block).ok()?;
    let object = value.as_object()?;

    let new_claims = lenient_array(object.get("new_claims"), "claim");
    let terms_used: Vec<TermUse> = lenient_array(object.get("terms_used"), "term");
    let conflicts = lenient_array(object.get("conflicts"), "conflict");
    let ledger = lenient_array(object.get("ledger"), "ledger entry");

    Some(ChunkDelta {
        new_claims,
        terms_used,
        conflicts,
        ledger,
    })
}

fn lenient_array<T: serde::de::DeserializeOwned>(
    value: Option<&serde_json::Value>,
    kind: &str,
) -> Vec<T> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut parsed = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value(item.clone()) {
            Ok(value) => parsed.push(value),
            Err(e) => {
                tracing::warn!(kind, index = i, error = %e, "Dropped delta item during lenient parse");
            }
        }
    }
    parsed
}

// ═══════════════════════════════════════════════════════════
// Delta synthesis
// ═══════════════════════════════════════════════════════════

fn capitalized_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").unwrap())
}

/// Lightweight claim extraction: paragraph-leading sentences become
/// claims, capitalised multi-word phrases become terms.
pub fn synthesize_delta(output: &str, chunk_index: u32) -> ChunkDelta {
    let mut new_claims = Vec::new();
    for paragraph in output.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sentence = first_sentence(trimmed);
        if sentence.len() >= 30 {
            new_claims.push(sentence);
            if new_claims.len() >= SYNTH_MAX_CLAIMS {
                break;
            }
        }
    }

    let mut terms: Vec<TermUse> = Vec::new();
    for caps in capitalized_phrase_re().captures_iter(output) {
        let term = caps[1].to_string();
        if terms.iter().any(|t| t.term == term) {
            continue;
        }
        terms.push(TermUse {
            term,
            sense: String::new(),
        });
        if terms.len() >= SYNTH_MAX_TERMS {
            break;
        }
    }

    let ledger = new_claims
        .iter()
        .take(SYNTH_MAX_LEDGER)
        .map(|fact| LedgerEntry {
            fact: fact.clone(),
            source_chunk: chunk_index,
        })
        .collect();

    ChunkDelta {
        new_claims,
        terms_used: terms,
        conflicts: Vec::new(),
        ledger,
    }
}

fn first_sentence(paragraph: &str) -> String {
    for (i, c) in paragraph.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            return paragraph[..=i].to_string();
        }
    }
    paragraph.to_string()
}
