//! Word counting and target-length parsing.
//!
//! Everything downstream (chunk budgets, enforcement bands, progress
//! projections) is denominated in whitespace-separated words, so the
//! counting rule lives in exactly one place.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{LengthConfig, LengthMode};

/// Desired output words per chunk before clamping.
const OUTPUT_WORDS_PER_CHUNK: u32 = 1_000;

/// Chunk output target bounds.
const CHUNK_TARGET_MIN: u32 = 600;
const CHUNK_TARGET_MAX: u32 = 4_000;

/// The chunker's hard floor on input words per chunk; bounds how many
/// chunks a small input can yield.
const INPUT_WORDS_FLOOR: u32 = 200;

/// Default sizes implied by academic keywords.
const DISSERTATION_WORDS: u32 = 40_000;
const THESIS_WORDS: u32 = 20_000;

/// Count of whitespace-separated non-empty tokens.
pub fn count_words(s: &str) -> u32 {
    s.split_whitespace().count() as u32
}

/// A parsed target: a single value (`min == max`) or an explicit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLength {
    pub min: u32,
    pub max: u32,
}

impl TargetLength {
    pub fn single(n: u32) -> Self {
        Self { min: n, max: n }
    }

    pub fn mid(&self) -> u32 {
        (self.min + self.max) / 2
    }

    pub fn is_range(&self) -> bool {
        self.min != self.max
    }
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d[\d,]*)\s*(?:[-–—]|to)\s*(\d[\d,]*)\s+words?\b").unwrap()
    })
}

fn k_shorthand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*k\b").unwrap())
}

fn n_words_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d[\d,]*)[\s-]*words?\b").unwrap())
}

fn bare_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d[\d,]*)\b").unwrap())
}

fn parse_grouped(s: &str) -> Option<u32> {
    s.replace(',', "").parse().ok()
}

/// Extract a target word count (or range) from a free-form instruction.
///
/// Recognised forms, in precedence order:
/// 1. `"15,000–20,000 words"` (also `-`, `—`, `to`)
/// 2. `"20k"`, `"2.5K"`
/// 3. `"90000 word"`, `"3,500 words"` — an explicit number next to the
///    noun is always taken literally, keywords notwithstanding
/// 4. academic keywords: dissertation/PhD ⇒ 40k, thesis/master's ⇒ 20k;
///    a bare number < 500 next to such a keyword is read as thousands
///
/// A bare number with no unit and no keyword is ambiguous and yields
/// `None`; callers fall back to a downstream default.
pub fn parse_target_length(instr: &str) -> Option<TargetLength> {
    let trimmed = instr.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = range_re().captures(trimmed) {
        let a = parse_grouped(&caps[1])?;
        let b = parse_grouped(&caps[2])?;
        return Some(TargetLength {
            min: a.min(b),
            max: a.max(b),
        });
    }

    if let Some(caps) = k_shorthand_re().captures(trimmed) {
        let n: f64 = caps[1].parse().ok()?;
        return Some(TargetLength::single((n * 1000.0).round() as u32));
    }

    if let Some(caps) = n_words_re().captures(trimmed) {
        return parse_grouped(&caps[1]).map(TargetLength::single);
    }

    let lower = trimmed.to_lowercase();
    let dissertation = lower.contains("dissertation") || lower.contains("phd");
    let thesis =
        lower.contains("thesis") || lower.contains("master's") || lower.contains("masters");

    if let Some(caps) = bare_number_re().captures(trimmed) {
        let n = parse_grouped(&caps[1])?;
        if dissertation || thesis {
            // "a 90 thesis" almost certainly means 90k words.
            let literal = if n < 500 { n * 1000 } else { n };
            return Some(TargetLength::single(literal));
        }
        // Bare number with no unit: ambiguous.
        return None;
    }

    if dissertation {
        return Some(TargetLength::single(DISSERTATION_WORDS));
    }
    if thesis {
        return Some(TargetLength::single(THESIS_WORDS));
    }

    None
}

/// Derive the length plan for a job.
///
/// `target_min`/`target_max` come from the directive (or default to the
/// input size when absent). The chunk count is output-driven but bounded
/// by the chunker's 200-input-word floor, and the per-chunk output
/// target is clamped to [600, 4000].
pub fn calculate_length_config(
    input_words: u32,
    target_min: u32,
    target_max: u32,
    instr: &str,
) -> LengthConfig {
    let target_mid = (target_min + target_max) / 2;
    let ratio = f64::from(target_mid) / f64::from(input_words.max(1));

    let mode = classify_mode(ratio, instr);

    let by_output = ((f64::from(target_mid) / f64::from(OUTPUT_WORDS_PER_CHUNK)).round() as u32)
        .max(1);
    let by_input_floor = (input_words / INPUT_WORDS_FLOOR).max(1);
    let num_chunks = by_output.min(by_input_floor);

    let chunk_target = chunk_output_target(target_mid, num_chunks);

    LengthConfig {
        target_min,
        target_max,
        target_mid,
        ratio,
        mode,
        chunk_target,
        num_chunks,
    }
}

/// Output words per chunk for a given total and chunk count, clamped to
/// [600, 4000]. Re-run after chunking, whose floor/merge rules can move
/// the real chunk count away from the plan.
pub fn chunk_output_target(target_mid: u32, num_chunks: u32) -> u32 {
    ((f64::from(target_mid) / f64::from(num_chunks.max(1))).round() as u32)
        .clamp(CHUNK_TARGET_MIN, CHUNK_TARGET_MAX)
}

fn classify_mode(ratio: f64, instr: &str) -> LengthMode {
    // An explicit range request is a custom envelope rather than a
    // simple scaling of the input.
    if parse_target_length(instr).is_some_and(|t| t.is_range()) {
        return LengthMode::Custom;
    }
    if ratio < 0.9 {
        LengthMode::Compress
    } else if ratio <= 1.1 {
        LengthMode::Preserve
    } else {
        LengthMode::Expand
    }
}

/// The last `n` paragraphs of `text`, joined with blank lines. Used by
/// continuation prompts to carry forward verbatim context.
pub fn last_paragraphs(text: &str, n: usize) -> String {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let start = paragraphs.len().saturating_sub(n);
    paragraphs[start..].join("\n\n")
}
