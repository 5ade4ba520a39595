//! Universal Expansion Engine — parses a free-text directive into a
//! concrete section plan, then drives the streaming section generator
//! with word-count enforcement.
//!
//! Structurally a sibling of the reconstruction pipeline: same LLM
//! handle, same length enforcer, same hub fan-out, but sections come
//! from the directive rather than from chunking a source document, and
//! events travel on the `generation` channel.

use std::sync::Arc;

use crate::config::PacingConfig;
use crate::llm::{CompletionClient, CompletionRequest, LlmError};
use crate::models::LengthBand;
use crate::stream::{StreamHub, StreamMessage, GENERATION_CHANNEL};

use super::directive::{parse_directive, DirectivePlan, PlannedSection};
use super::enforcer::{EnforcementStatus, LengthEnforcer};
use super::prompts::{build_section_prompt, SECTION_SYSTEM};
use super::words::{count_words, last_paragraphs};

/// Target when the directive names none and no downstream default
/// applies.
const DEFAULT_TARGET_WORDS: u32 = 5_000;

/// Floor for sections whose budget would otherwise be zero (explicit
/// sections already saturate the target).
const SECTION_FLOOR_WORDS: u32 = 500;

/// Paragraphs of the previous section carried into the next prompt.
const CARRY_PARAGRAPHS: usize = 2;

#[derive(Debug, Clone)]
pub struct SectionResult {
    pub name: String,
    pub text: String,
    pub words: u32,
    pub status: EnforcementStatus,
}

#[derive(Debug, Clone)]
pub struct ExpansionResult {
    pub id: String,
    pub plan: DirectivePlan,
    pub sections: Vec<SectionResult>,
    pub final_output: String,
    pub final_words: u32,
}

pub struct ExpansionEngine<'a> {
    llm: &'a dyn CompletionClient,
    model: &'a str,
    pacing: &'a PacingConfig,
    hub: Arc<StreamHub>,
}

impl<'a> ExpansionEngine<'a> {
    pub fn new(
        llm: &'a dyn CompletionClient,
        model: &'a str,
        pacing: &'a PacingConfig,
        hub: Arc<StreamHub>,
    ) -> Self {
        Self {
            llm,
            model,
            pacing,
            hub,
        }
    }

    /// Parse the directive, distribute the budget, and generate every
    /// section in order, streaming progress on the `generation` channel.
    pub fn run(&self, instructions: &str) -> Result<ExpansionResult, LlmError> {
        let plan = parse_directive(instructions);
        let target = plan.target_word_count.unwrap_or(DEFAULT_TARGET_WORDS);
        let sections = distribute_budget(&plan, target);
        let id = uuid::Uuid::new_v4().to_string();

        let outline = sections
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {} (~{} words)", i + 1, s.name, s.word_count))
            .collect::<Vec<_>>()
            .join("\n");

        self.hub.broadcast(
            GENERATION_CHANNEL,
            StreamMessage::Outline {
                job_id: id.clone(),
                summary: outline.clone(),
                sections: sections.len() as u32,
            },
        );

        let plan_notes = plan_notes(&plan);
        let start = std::time::Instant::now();
        let enforcer = LengthEnforcer::new(self.llm, self.model, self.pacing);

        let mut results: Vec<SectionResult> = Vec::with_capacity(sections.len());
        let mut running_total: u32 = 0;

        for (index, section) in sections.iter().enumerate() {
            if index > 0 {
                std::thread::sleep(self.pacing.chunk_pause(index as u32));
            }

            let band = LengthBand::for_target(section.word_count);
            let previous_tail = results
                .last()
                .map(|r| last_paragraphs(&r.text, CARRY_PARAGRAPHS))
                .unwrap_or_default();

            let prompt = build_section_prompt(
                &section.name,
                index,
                sections.len(),
                &outline,
                &previous_tail,
                &band,
                &plan_notes,
            );

            let first_pass = self.llm.complete(&CompletionRequest {
                model: self.model,
                system: SECTION_SYSTEM,
                prompt: &prompt,
                max_tokens: band.target * 2,
            })?;

            let enforced = enforcer.enforce(first_pass, &band)?;
            running_total += enforced.words;

            tracing::info!(
                section = %section.name,
                words = enforced.words,
                attempts = enforced.attempts,
                "Section generated"
            );

            self.hub.broadcast(
                GENERATION_CHANNEL,
                StreamMessage::SectionComplete {
                    job_id: id.clone(),
                    section_index: index as u32,
                    total_sections: sections.len() as u32,
                    name: section.name.clone(),
                    section_text: enforced.text.clone(),
                    actual_words: enforced.words,
                    target_words: section.word_count,
                    running_total,
                },
            );

            results.push(SectionResult {
                name: section.name.clone(),
                words: enforced.words,
                status: enforced.status,
                text: enforced.text,
            });
        }

        let final_output = results
            .iter()
            .map(|r| format!("## {}\n\n{}", r.name, r.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let final_words = count_words(&final_output);

        self.hub.broadcast(
            GENERATION_CHANNEL,
            StreamMessage::Complete {
                job_id: id.clone(),
                final_output: final_output.clone(),
                final_word_count: final_words,
                target_words: target,
                time_elapsed: start.elapsed().as_secs(),
            },
        );

        Ok(ExpansionResult {
            id,
            plan,
            sections: results,
            final_output,
            final_words,
        })
    }
}

/// Concretise the section plan: explicit budgets stand, zero-budget
/// sections share the remaining target uniformly (with a floor when
/// explicit sections already saturate it), and an empty structure
/// becomes a single full-budget body.
pub fn distribute_budget(plan: &DirectivePlan, target: u32) -> Vec<PlannedSection> {
    if plan.structure.is_empty() {
        return vec![PlannedSection {
            name: "Body".into(),
            word_count: target,
        }];
    }

    let explicit: u32 = plan.structure.iter().map(|s| s.word_count).sum();
    let unassigned = plan.structure.iter().filter(|s| s.word_count == 0).count() as u32;
    let remaining = target.saturating_sub(explicit);

    let share = if unassigned > 0 && remaining > 0 {
        (remaining / unassigned).max(SECTION_FLOOR_WORDS)
    } else {
        SECTION_FLOOR_WORDS
    };

    plan.structure
        .iter()
        .map(|s| PlannedSection {
            name: s.name.clone(),
            word_count: if s.word_count > 0 { s.word_count } else { share },
        })
        .collect()
}

fn plan_notes(plan: &DirectivePlan) -> String {
    let mut notes: Vec<String> = Vec::new();

    if plan.academic_register {
        notes.push("Maintain a formal academic register.".into());
    }
    if plan.no_bullet_points {
        notes.push("Do not use bullet points; continuous prose only.".into());
    }
    if plan.internal_subsections {
        notes.push("Structure the section with internal subsections.".into());
    }
    if plan.literature_review {
        notes.push("Ground the argument in the published literature.".into());
    }
    if let Some(citations) = &plan.citations {
        let mut line = match citations.count {
            0 => "Support the argument with citations".to_string(),
            n => format!("Include approximately {n} citations across the work"),
        };
        if let Some(timeframe) = &citations.timeframe {
            line.push_str(&format!(" drawn from the {timeframe}"));
        }
        line.push('.');
        notes.push(line);
    }
    if !plan.philosophers.is_empty() {
        notes.push(format!(
            "Engage directly with the work of {}.",
            plan.philosophers.join(", ")
        ));
    }

    notes.join("\n")
}
