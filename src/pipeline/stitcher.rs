//! Global stitch pass — cross-chunk validation and light repair.
//!
//! Runs once after the last chunk completes. Purely structural: it
//! works from chunk outputs and deltas, finding contradictions, term
//! drift, premises never introduced, and near-verbatim redundancies,
//! and dedupes boilerplate transition paragraphs while concatenating
//! the final output. Best-effort by contract — the caller still ships
//! the concatenation if stitching is ever skipped.

use std::collections::BTreeMap;

use crate::models::{
    ChunkRecord, CoherenceBand, ConflictSeverity, CrossChunkConflict, GlobalSkeleton, Redundancy,
    RepairStep, StitchResult, TermDrift,
};

/// Issue-score thresholds for the coherence band.
const GOOD_MAX_SCORE: u32 = 2;
const MIXED_MAX_SCORE: u32 = 8;

/// Word-overlap ratio above which a skeleton claim counts as introduced.
const INTRODUCED_OVERLAP: f64 = 0.5;

/// Run the stitch pass. Returns the final output text and the
/// validation result.
pub fn stitch(skeleton: &GlobalSkeleton, chunks: &[ChunkRecord]) -> (String, StitchResult) {
    let (final_output, repair_plan) = assemble_output(chunks);

    let conflicts = collect_conflicts(chunks);
    let term_drift = detect_term_drift(chunks);
    let missing_premises = detect_missing_premises(skeleton, chunks);
    let redundancies = detect_redundancies(chunks);

    let mut notes = Vec::new();
    let flagged: Vec<u32> = chunks
        .iter()
        .filter(|c| c.flagged)
        .map(|c| c.chunk_index)
        .collect();
    if !flagged.is_empty() {
        notes.push(format!(
            "{} chunk(s) below minimum length after enforcement: {:?}",
            flagged.len(),
            flagged
        ));
    }

    let score = issue_score(&conflicts, &term_drift, &missing_premises, &redundancies);
    let coherence = if score <= GOOD_MAX_SCORE {
        CoherenceBand::Good
    } else if score <= MIXED_MAX_SCORE {
        CoherenceBand::Mixed
    } else {
        CoherenceBand::Poor
    };

    let verdict = match coherence {
        CoherenceBand::Good => "passed",
        CoherenceBand::Mixed => "passed with issues",
        CoherenceBand::Poor => "review recommended",
    };

    let result = StitchResult {
        conflicts,
        term_drift,
        missing_premises,
        redundancies,
        repair_plan,
        coherence: Some(coherence),
        verdict: Some(verdict.to_string()),
        notes,
    };

    (final_output, result)
}

/// Concatenate chunk outputs with paragraph separators, dropping a
/// chunk-opening paragraph that repeats the previous chunk's closing
/// paragraph (the usual boilerplate transition).
fn assemble_output(chunks: &[ChunkRecord]) -> (String, Vec<RepairStep>) {
    let mut parts: Vec<String> = Vec::new();
    let mut repair_plan = Vec::new();
    let mut previous_tail: Option<String> = None;

    for chunk in chunks {
        let Some(output) = chunk.output_text.as_deref() else {
            continue;
        };

        let mut paragraphs: Vec<&str> = output
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if let (Some(first), Some(tail)) = (paragraphs.first(), &previous_tail) {
            if normalize(first) == *tail {
                paragraphs.remove(0);
                repair_plan.push(RepairStep {
                    chunk_index: chunk.chunk_index,
                    instruction: "removed duplicated transition paragraph".into(),
                });
            }
        }

        previous_tail = paragraphs.last().map(|p| normalize(p));
        if !paragraphs.is_empty() {
            parts.push(paragraphs.join("\n\n"));
        }
    }

    (parts.join("\n\n"), repair_plan)
}

fn collect_conflicts(chunks: &[ChunkRecord]) -> Vec<CrossChunkConflict> {
    let mut conflicts = Vec::new();
    for chunk in chunks {
        let Some(delta) = &chunk.delta else { continue };
        for note in &delta.conflicts {
            conflicts.push(CrossChunkConflict {
                description: note.description.clone(),
                chunks: vec![note.with_chunk, chunk.chunk_index],
                severity: note.severity,
            });
        }
    }
    conflicts
}

/// Same term used with differing (non-empty) senses in different chunks.
fn detect_term_drift(chunks: &[ChunkRecord]) -> Vec<TermDrift> {
    let mut by_term: BTreeMap<String, Vec<(u32, String)>> = BTreeMap::new();

    for chunk in chunks {
        let Some(delta) = &chunk.delta else { continue };
        for term_use in &delta.terms_used {
            if term_use.sense.trim().is_empty() {
                continue;
            }
            by_term
                .entry(term_use.term.to_lowercase())
                .or_default()
                .push((chunk.chunk_index, term_use.sense.clone()));
        }
    }

    by_term
        .into_iter()
        .filter_map(|(term, senses)| {
            let mut distinct: Vec<&str> = senses.iter().map(|(_, s)| s.as_str()).collect();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() > 1 {
                Some(TermDrift { term, senses })
            } else {
                None
            }
        })
        .collect()
}

/// Skeleton claims that no chunk ever introduced.
fn detect_missing_premises(skeleton: &GlobalSkeleton, chunks: &[ChunkRecord]) -> Vec<String> {
    let introduced: Vec<Vec<String>> = chunks
        .iter()
        .filter_map(|c| c.delta.as_ref())
        .flat_map(|d| d.new_claims.iter())
        .map(|claim| claim_words(claim))
        .collect();

    let mut missing = Vec::new();
    for section in &skeleton.sections {
        for claim in &section.claims {
            let words = claim_words(claim);
            if words.is_empty() {
                continue;
            }
            let covered = introduced
                .iter()
                .any(|candidate| overlap_ratio(&words, candidate) >= INTRODUCED_OVERLAP);
            if !covered {
                missing.push(claim.clone());
            }
        }
    }
    missing
}

/// Claims repeated near-verbatim across chunks.
fn detect_redundancies(chunks: &[ChunkRecord]) -> Vec<Redundancy> {
    let mut by_claim: BTreeMap<String, (String, Vec<u32>)> = BTreeMap::new();

    for chunk in chunks {
        let Some(delta) = &chunk.delta else { continue };
        for claim in &delta.new_claims {
            let key = normalize(claim);
            if key.is_empty() {
                continue;
            }
            let entry = by_claim.entry(key).or_insert_with(|| (claim.clone(), vec![]));
            if !entry.1.contains(&chunk.chunk_index) {
                entry.1.push(chunk.chunk_index);
            }
        }
    }

    by_claim
        .into_values()
        .filter(|(_, chunks)| chunks.len() > 1)
        .map(|(claim, chunks)| Redundancy { claim, chunks })
        .collect()
}

fn issue_score(
    conflicts: &[CrossChunkConflict],
    drift: &[TermDrift],
    missing: &[String],
    redundancies: &[Redundancy],
) -> u32 {
    let conflict_score: u32 = conflicts
        .iter()
        .map(|c| match c.severity {
            ConflictSeverity::High => 3,
            ConflictSeverity::Medium => 2,
            ConflictSeverity::Low => 1,
        })
        .sum();
    conflict_score + drift.len() as u32 * 2 + missing.len() as u32 + redundancies.len() as u32
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn claim_words(claim: &str) -> Vec<String> {
    normalize(claim)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn overlap_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let hits = a.iter().filter(|word| b.contains(word)).count();
    hits as f64 / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkDelta, ChunkStatus, ConflictNote, LengthBand, SkeletonSection, TermUse};

    fn chunk(index: u32, output: &str, delta: Option<ChunkDelta>) -> ChunkRecord {
        ChunkRecord {
            job_id: "job-1".into(),
            chunk_index: index,
            input_text: String::new(),
            input_words: 0,
            band: LengthBand::for_target(100),
            output_text: Some(output.to_string()),
            actual_words: Some(100),
            status: ChunkStatus::Complete,
            flagged: false,
            retry_count: 0,
            delta,
        }
    }

    fn empty_skeleton() -> GlobalSkeleton {
        GlobalSkeleton {
            sections: vec![SkeletonSection {
                id: 0,
                title: "Only".into(),
                claims: vec![],
                target_words: 100,
                terms: vec![],
                related: vec![],
            }],
        }
    }

    #[test]
    fn clean_chunks_stitch_to_good() {
        let chunks = vec![
            chunk(0, "First chunk body.", Some(ChunkDelta::default())),
            chunk(1, "Second chunk body.", Some(ChunkDelta::default())),
        ];
        let (output, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(output, "First chunk body.\n\nSecond chunk body.");
        assert_eq!(result.coherence, Some(CoherenceBand::Good));
        assert_eq!(result.verdict.as_deref(), Some("passed"));
        assert_eq!(result.issue_count(), 0);
    }

    #[test]
    fn single_chunk_job_stitches() {
        let chunks = vec![chunk(0, "Lone body.", Some(ChunkDelta::default()))];
        let (output, result) = stitch(&empty_skeleton(), &chunks);
        assert_eq!(output, "Lone body.");
        assert_eq!(result.coherence, Some(CoherenceBand::Good));
    }

    #[test]
    fn duplicate_transition_paragraph_removed() {
        let chunks = vec![
            chunk(0, "Body of one.\n\nIn summary, the system is ordered.", None),
            chunk(1, "In summary, the system is ordered.\n\nBody of two.", None),
        ];
        let (output, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(
            output,
            "Body of one.\n\nIn summary, the system is ordered.\n\nBody of two."
        );
        assert_eq!(result.repair_plan.len(), 1);
        assert_eq!(result.repair_plan[0].chunk_index, 1);
    }

    #[test]
    fn conflicts_collected_with_both_chunks() {
        let delta = ChunkDelta {
            conflicts: vec![ConflictNote {
                description: "dates disagree".into(),
                with_chunk: 0,
                severity: ConflictSeverity::High,
            }],
            ..Default::default()
        };
        let chunks = vec![chunk(0, "a", None), chunk(2, "b", Some(delta))];
        let (_, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].chunks, vec![0, 2]);
    }

    #[test]
    fn term_drift_detected_across_chunks() {
        let use_of = |sense: &str| ChunkDelta {
            terms_used: vec![TermUse {
                term: "Entropy".into(),
                sense: sense.into(),
            }],
            ..Default::default()
        };
        let chunks = vec![
            chunk(0, "a", Some(use_of("thermodynamic disorder"))),
            chunk(1, "b", Some(use_of("information content"))),
        ];
        let (_, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(result.term_drift.len(), 1);
        assert_eq!(result.term_drift[0].term, "entropy");
        assert_eq!(result.term_drift[0].senses.len(), 2);
    }

    #[test]
    fn consistent_term_is_not_drift() {
        let use_of = || ChunkDelta {
            terms_used: vec![TermUse {
                term: "Entropy".into(),
                sense: "disorder".into(),
            }],
            ..Default::default()
        };
        let chunks = vec![chunk(0, "a", Some(use_of())), chunk(1, "b", Some(use_of()))];
        let (_, result) = stitch(&empty_skeleton(), &chunks);
        assert!(result.term_drift.is_empty());
    }

    #[test]
    fn missing_premise_reported() {
        let skeleton = GlobalSkeleton {
            sections: vec![SkeletonSection {
                id: 0,
                title: "Core".into(),
                claims: vec!["The protocol guarantees exactly once delivery".into()],
                target_words: 100,
                terms: vec![],
                related: vec![],
            }],
        };
        let delta = ChunkDelta {
            new_claims: vec!["Something entirely unrelated happened elsewhere".into()],
            ..Default::default()
        };
        let (_, result) = stitch(&skeleton, &[chunk(0, "a", Some(delta))]);

        assert_eq!(result.missing_premises.len(), 1);
    }

    #[test]
    fn introduced_premise_not_reported() {
        let skeleton = GlobalSkeleton {
            sections: vec![SkeletonSection {
                id: 0,
                title: "Core".into(),
                claims: vec!["The protocol guarantees ordered delivery".into()],
                target_words: 100,
                terms: vec![],
                related: vec![],
            }],
        };
        let delta = ChunkDelta {
            new_claims: vec!["The protocol guarantees ordered delivery of messages".into()],
            ..Default::default()
        };
        let (_, result) = stitch(&skeleton, &[chunk(0, "a", Some(delta))]);

        assert!(result.missing_premises.is_empty());
    }

    #[test]
    fn repeated_claim_is_redundancy() {
        let with_claim = || ChunkDelta {
            new_claims: vec!["The cache is write-through.".into()],
            ..Default::default()
        };
        let chunks = vec![
            chunk(0, "a", Some(with_claim())),
            chunk(3, "b", Some(with_claim())),
        ];
        let (_, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(result.redundancies.len(), 1);
        assert_eq!(result.redundancies[0].chunks, vec![0, 3]);
    }

    #[test]
    fn heavy_issues_band_poor() {
        let bad = |i: u32| ChunkDelta {
            conflicts: vec![ConflictNote {
                description: format!("conflict {i}"),
                with_chunk: 0,
                severity: ConflictSeverity::High,
            }],
            ..Default::default()
        };
        let chunks: Vec<ChunkRecord> =
            (0..4).map(|i| chunk(i, "text", Some(bad(i)))).collect();
        let (_, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(result.coherence, Some(CoherenceBand::Poor));
        assert_eq!(result.verdict.as_deref(), Some("review recommended"));
    }

    #[test]
    fn flagged_chunks_noted() {
        let mut flagged_chunk = chunk(1, "short", Some(ChunkDelta::default()));
        flagged_chunk.flagged = true;
        let chunks = vec![chunk(0, "ok", Some(ChunkDelta::default())), flagged_chunk];
        let (_, result) = stitch(&empty_skeleton(), &chunks);

        assert_eq!(result.notes.len(), 1);
        assert!(result.notes[0].contains("below minimum length"));
    }
}
