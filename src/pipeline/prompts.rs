//! Prompt templates for the reconstruction pipeline.
//!
//! Every LLM-facing string lives here so prompt changes never hide
//! inside control flow.

use crate::models::{LengthBand, UserParams};

/// System prompt for the one-shot skeleton extraction.
pub const SKELETON_SYSTEM: &str = "\
You are a document architect. You read a source document and produce a \
structured outline of a rewritten version as JSON only. Output valid JSON \
and nothing else.";

/// System prompt for chunk reconstruction.
pub const RECONSTRUCTION_SYSTEM: &str = "\
You are a careful long-form writer. You rewrite one chunk of a larger \
document so it fits a global outline, never contradicting claims already \
made in earlier chunks and using established terms consistently.";

/// System prompt for directive-driven section generation.
pub const SECTION_SYSTEM: &str = "\
You are a long-form writer producing one section of a larger work to an \
exact word budget, following the user's structural and stylistic \
directives.";

/// Build the skeleton-extraction prompt.
///
/// `structure_hint` carries any sections the directive parser planned;
/// empty when the model should derive the outline itself.
pub fn build_skeleton_prompt(source: &str, structure_hint: &str, target_words: u32) -> String {
    let structure_block = if structure_hint.is_empty() {
        String::new()
    } else {
        format!("\nPlanned sections to honour:\n{structure_hint}\n")
    };

    format!(
        "Read the source document below and design the outline of a \
rewritten version totalling about {target_words} words.\n\
{structure_block}\
Return JSON of the shape:\n\
{{\"sections\": [{{\"id\": 0, \"title\": \"...\", \"claims\": [\"...\"], \
\"target_words\": 0, \"terms\": [\"...\"], \"related\": [0]}}]}}\n\n\
Rules:\n\
- ids are 0-based and sequential\n\
- claims are the factual commitments each section will make\n\
- terms are the terms of art the section introduces\n\
- related lists ids of sections that share claims or terms\n\
- target_words across sections must sum to about {target_words}\n\n\
SOURCE DOCUMENT:\n{source}"
    )
}

/// Build the first-pass reconstruction prompt for one chunk.
#[allow(clippy::too_many_arguments)]
pub fn build_chunk_prompt(
    chunk_text: &str,
    chunk_index: u32,
    total_chunks: u32,
    skeleton_summary: &str,
    context_summary: &str,
    band: &LengthBand,
    params: &UserParams,
) -> String {
    let mut prompt = format!(
        "You are writing chunk {} of {} of a reconstructed document.\n\n\
GLOBAL OUTLINE:\n{skeleton_summary}\n\n",
        chunk_index + 1,
        total_chunks,
    );

    if !context_summary.is_empty() {
        prompt.push_str(context_summary);
        prompt.push_str("\n\n");
    }

    if let Some(audience) = &params.audience {
        prompt.push_str(&format!("Audience: {audience}\n"));
    }
    if let Some(rigor) = &params.rigor {
        prompt.push_str(&format!("Rigor level: {rigor}\n"));
    }
    if let Some(instructions) = &params.instructions {
        prompt.push_str(&format!("Additional instructions: {instructions}\n"));
    }

    prompt.push_str(&format!(
        "\nRewrite the chunk below in light of the outline and the \
coherence context. Aim for {} words (acceptable range {}-{}).\n\n\
After the prose, append a fenced ```json block of the shape:\n\
{{\"new_claims\": [\"...\"], \
\"terms_used\": [{{\"term\": \"...\", \"sense\": \"...\"}}], \
\"conflicts\": [{{\"description\": \"...\", \"with_chunk\": 0, \"severity\": \"low\"}}], \
\"ledger\": [{{\"fact\": \"...\", \"source_chunk\": {}}}]}}\n\n\
CHUNK INPUT:\n{}",
        band.target, band.min, band.max, chunk_index, chunk_text
    ));

    prompt
}

/// Build a continuation prompt from the verbatim tail of what has been
/// produced so far.
pub fn build_continuation_prompt(tail: &str, requested_words: u32, remaining_words: u32) -> String {
    let conclusion_rule = if remaining_words <= 4000 {
        "You may bring the chunk to a natural close as you approach the target."
    } else {
        "Do NOT conclude or summarise yet; substantial material remains."
    };

    format!(
        "Continue the text below. Write approximately {requested_words} \
additional words.\n\
Do not repeat any prior content. Do not restate the ending you are \
continuing from. {conclusion_rule}\n\n\
TEXT SO FAR (ending excerpt):\n{tail}"
    )
}

/// Build the per-section prompt for the expansion engine.
pub fn build_section_prompt(
    section_name: &str,
    section_index: usize,
    total_sections: usize,
    outline: &str,
    previous_tail: &str,
    band: &LengthBand,
    plan_notes: &str,
) -> String {
    let mut prompt = format!(
        "You are writing section {} of {}: \"{section_name}\".\n\n\
FULL OUTLINE:\n{outline}\n\n",
        section_index + 1,
        total_sections,
    );

    if !previous_tail.is_empty() {
        prompt.push_str(&format!(
            "The previous section ended with:\n{previous_tail}\n\n\
Continue naturally from it without repeating it.\n\n"
        ));
    }

    if !plan_notes.is_empty() {
        prompt.push_str(&format!("Constraints:\n{plan_notes}\n\n"));
    }

    prompt.push_str(&format!(
        "Write the complete section. Aim for {} words (acceptable range {}-{}).",
        band.target, band.min, band.max
    ));

    prompt
}
