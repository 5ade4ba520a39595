//! Directive parser — turns a free-form user instruction into a
//! structured generation plan.
//!
//! The parser is deterministic and never fails: malformed input yields
//! an empty plan. It recognises case-insensitive variants, Arabic and
//! Roman chapter numerals, `1k`/`2.5K` shorthand, and the common
//! academic abbreviations (`Intro`, `Lit Review`, `Meth`, `Concl`).
//!
//! Numbers bound to a section or a citation request are masked out
//! before the global target is derived, so "Chapter 2 (3,000 words)"
//! never leaks into `target_word_count`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::words::parse_target_length;

/// Canonical section names substituted for the usual abbreviations.
const DEFAULT_ACADEMIC_STRUCTURE: [&str; 8] = [
    "Introduction",
    "Literature Review",
    "Methodology",
    "Theoretical Framework",
    "Results",
    "Discussion",
    "Conclusion",
    "Future Work",
];

/// Sections whose canonical names prefix-match on this many characters
/// are considered duplicates; first occurrence wins.
const MERGE_PREFIX_CHARS: usize = 15;

/// One planned output section. `word_count == 0` marks "to be
/// distributed" from the remaining budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSection {
    pub name: String,
    pub word_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationKind {
    PeerReviewed,
    Academic,
}

impl CitationKind {
    fn as_phrase(&self) -> &'static str {
        match self {
            Self::PeerReviewed => "peer-reviewed",
            Self::Academic => "academic",
        }
    }
}

/// A citation constraint: how many, what kind, optionally how recent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationSpec {
    pub kind: CitationKind,
    /// 0 means "citations requested, count unspecified".
    pub count: u32,
    /// Normalised as "last N years" when present.
    pub timeframe: Option<String>,
}

/// Structured plan extracted from a free-form directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectivePlan {
    pub target_word_count: Option<u32>,
    pub structure: Vec<PlannedSection>,
    pub citations: Option<CitationSpec>,
    pub academic_register: bool,
    pub no_bullet_points: bool,
    pub internal_subsections: bool,
    pub literature_review: bool,
    pub philosophers: Vec<String>,
}

impl DirectivePlan {
    pub fn is_empty(&self) -> bool {
        self == &DirectivePlan::default()
    }

    /// Render the plan back into directive prose. Re-parsing the result
    /// yields an identical plan for every recognised field.
    pub fn to_prompt(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        if let Some(target) = self.target_word_count {
            lines.push(format!("Write {target} words in total."));
        }

        for (i, section) in self.structure.iter().enumerate() {
            if section.word_count > 0 {
                lines.push(format!(
                    "Chapter {}: {} ({} words)",
                    i + 1,
                    section.name,
                    section.word_count
                ));
            } else {
                lines.push(format!("Chapter {}: {}", i + 1, section.name));
            }
        }

        if let Some(citations) = &self.citations {
            let mut line = if citations.count > 0 {
                format!(
                    "Include {} {} sources",
                    citations.count,
                    citations.kind.as_phrase()
                )
            } else {
                format!("Include {} sources", citations.kind.as_phrase())
            };
            if let Some(timeframe) = &citations.timeframe {
                line.push_str(&format!(" from the {timeframe}"));
            }
            line.push('.');
            lines.push(line);
        }

        if self.academic_register {
            lines.push("Use an academic register.".into());
        }
        if self.no_bullet_points {
            lines.push("Do not use bullet points.".into());
        }
        if self.internal_subsections {
            lines.push("Use internal subsections.".into());
        }
        let has_lit_review_section = self
            .structure
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case("Literature Review"));
        if self.literature_review && !has_lit_review_section {
            lines.push("Engage with the published literature.".into());
        }
        if !self.philosophers.is_empty() {
            lines.push(format!("Referencing {}.", self.philosophers.join(", ")));
        }

        lines.join("\n")
    }
}

// ═══════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct SectionMatch {
    start: usize,
    end: usize,
    name: String,
    word_count: u32,
}

const NAMED_SECTIONS: &str = "intro(?:duction)?|lit(?:erature)?\\s+review|methodology|\
methods?|meth|theoretical\\s+framework|background|abstract|analysis|results|discussion|\
conclusions?|concl|future\\s+work|references|appendix";

fn chapter_with_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:chapter|section|part)\s+(\d{1,3}|[ivxlcdm]{1,7})\b[\s:.\-–—]*([^\n,;.()\d]{0,60}?)[\s:\-–—]*[(\[]?(\d[\d,]*(?:\.\d+)?)\s*(k\b)?\s*words?\b[)\]]?",
        )
        .unwrap()
    })
}

fn chapter_plain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:chapter|section|part)\s+(\d{1,3}|[ivxlcdm]{1,7})\b[\s:.\-–—]*([^\n,;.(]{0,60})")
            .unwrap()
    })
}

fn named_with_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b({NAMED_SECTIONS})\b[\s:\-–—]*(?:of\s+)?[(\[]?(\d[\d,]*(?:\.\d+)?)\s*(?:(k)\b\s*(?:words?\b)?|words?\b)[)\]]?"
        ))
        .unwrap()
    })
}

fn named_plain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"(?i)\b({NAMED_SECTIONS})\b")).unwrap())
}

fn structure_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:chapters?|sections?|parts?|structure|outline)\b").unwrap())
}

fn citation_with_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,3})\s+(peer[\s-]?reviewed|academic|scholarly)?\s*(?:sources|citations|references)\b")
            .unwrap()
    })
}

fn citation_plain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(peer[\s-]?reviewed|academic|scholarly)\s+(?:sources|citations|references)\b")
            .unwrap()
    })
}

fn timeframe_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from\s+|within\s+|of\s+)?the\s+last\s+(\d{1,3})\s+years?\b").unwrap()
    })
}

fn philosophers_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?i:referencing|citing|drawing\s+on|philosophers\s+such\s+as|engaging\s+with)\s+([A-Z][A-Za-z'\-]+(?:(?:,\s*|\s+(?i:and)\s+)[A-Z][A-Za-z'\-]+)*)",
        )
        .unwrap()
    })
}

/// Parse a free-form directive. Never fails; unrecognised text simply
/// contributes nothing to the plan.
pub fn parse_directive(instr: &str) -> DirectivePlan {
    let text = instr.trim();
    if text.is_empty() {
        return DirectivePlan::default();
    }

    let mut matches = scan_sections(text);
    matches.sort_by_key(|m| m.start);
    let mut structure = merge_sections(&matches);

    let (citations, citation_spans) = scan_citations(text);

    // Mask section and citation spans so their numbers cannot be
    // mistaken for the global target.
    let mut mask_spans: Vec<(usize, usize)> =
        matches.iter().map(|m| (m.start, m.end)).collect();
    mask_spans.extend(citation_spans);
    let masked = mask_text(text, &mask_spans);
    let target_word_count = parse_target_length(&masked).map(|t| t.mid());

    let lower = text.to_lowercase();
    let academic_register = lower.contains("academic register")
        || lower.contains("academic tone")
        || lower.contains("scholarly tone")
        || lower.contains("formal academic");
    let no_bullet_points = ["no bullet", "without bullet", "avoid bullet", "do not use bullet"]
        .iter()
        .any(|phrase| lower.contains(phrase));
    let internal_subsections = lower.contains("subsection") || lower.contains("sub-section");

    let philosophers = scan_philosophers(text);

    // An academic-form directive with no explicit structure implies the
    // standard outline; budgets are distributed downstream.
    let academic_form = lower.contains("dissertation")
        || lower.contains("phd")
        || lower.contains("thesis")
        || lower.contains("master");
    if structure.is_empty() && academic_form {
        structure = DEFAULT_ACADEMIC_STRUCTURE
            .iter()
            .map(|name| PlannedSection {
                name: (*name).to_string(),
                word_count: 0,
            })
            .collect();
    }

    // A planned Literature Review section implies the flag, so a plan
    // survives a render/re-parse round trip with the flag intact.
    let literature_review = lower.contains("literature review")
        || lower.contains("lit review")
        || lower.contains("published literature")
        || structure
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case("Literature Review"));

    DirectivePlan {
        target_word_count,
        structure,
        citations,
        academic_register,
        no_bullet_points,
        internal_subsections,
        literature_review,
        philosophers,
    }
}

fn scan_sections(text: &str) -> Vec<SectionMatch> {
    let mut found: Vec<SectionMatch> = Vec::new();

    for caps in chapter_with_count_re().captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let number = &caps[1];
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        let count = parse_count(&caps[3], caps.get(4).is_some());
        found.push(SectionMatch {
            start: whole.start(),
            end: whole.end(),
            name: section_name(title, number),
            word_count: count,
        });
    }

    for caps in chapter_plain_re().captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if overlaps(&found, whole.start()) {
            continue;
        }
        let number = &caps[1];
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        found.push(SectionMatch {
            start: whole.start(),
            end: whole.end(),
            name: section_name(title, number),
            word_count: 0,
        });
    }

    for caps in named_with_count_re().captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if overlaps(&found, whole.start()) {
            continue;
        }
        let count = parse_count(&caps[2], caps.get(3).is_some());
        found.push(SectionMatch {
            start: whole.start(),
            end: whole.end(),
            name: canonical_section(&caps[1]),
            word_count: count,
        });
    }

    // Count-less named sections are only trusted when the directive
    // talks about structure at all; otherwise "discuss the results"
    // would sprout a Results chapter.
    if structure_cue_re().is_match(text) {
        for caps in named_plain_re().captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&found, whole.start()) {
                continue;
            }
            found.push(SectionMatch {
                start: whole.start(),
                end: whole.end(),
                name: canonical_section(&caps[1]),
                word_count: 0,
            });
        }
    }

    found
}

fn overlaps(found: &[SectionMatch], pos: usize) -> bool {
    found.iter().any(|m| pos >= m.start && pos < m.end)
}

/// Merge duplicate sections: prefix-equal on the first 15 characters of
/// the canonical (lowercased) name; first occurrence wins.
fn merge_sections(matches: &[SectionMatch]) -> Vec<PlannedSection> {
    let mut sections: Vec<(String, PlannedSection)> = Vec::new();

    for m in matches {
        let key: String = m
            .name
            .to_lowercase()
            .chars()
            .take(MERGE_PREFIX_CHARS)
            .collect();
        if sections.iter().any(|(k, _)| *k == key) {
            continue;
        }
        sections.push((
            key,
            PlannedSection {
                name: m.name.clone(),
                word_count: m.word_count,
            },
        ));
    }

    sections.into_iter().map(|(_, s)| s).collect()
}

fn scan_citations(text: &str) -> (Option<CitationSpec>, Vec<(usize, usize)>) {
    let mut spans: Vec<(usize, usize)> = Vec::new();

    let timeframe = timeframe_re().captures(text).map(|caps| {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        format!("last {} years", &caps[1])
    });

    if let Some(caps) = citation_with_count_re().captures(text) {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        let count = caps[1].replace(',', "").parse().unwrap_or(0);
        let kind = citation_kind(caps.get(2).map(|m| m.as_str()));
        return (
            Some(CitationSpec {
                kind,
                count,
                timeframe,
            }),
            spans,
        );
    }

    if let Some(caps) = citation_plain_re().captures(text) {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        let kind = citation_kind(Some(&caps[1]));
        return (
            Some(CitationSpec {
                kind,
                count: 0,
                timeframe,
            }),
            spans,
        );
    }

    (None, spans)
}

fn citation_kind(adjective: Option<&str>) -> CitationKind {
    match adjective.map(|s| s.to_lowercase()) {
        Some(s) if s.starts_with("peer") => CitationKind::PeerReviewed,
        _ => CitationKind::Academic,
    }
}

fn scan_philosophers(text: &str) -> Vec<String> {
    const STOP_WORDS: [&str; 6] = ["The", "A", "An", "This", "These", "Their"];

    let Some(caps) = philosophers_re().captures(text) else {
        return Vec::new();
    };

    caps[1]
        .split(',')
        .flat_map(|part| part.split(" and "))
        .flat_map(|part| part.split(" AND "))
        .map(str::trim)
        .filter(|name| !name.is_empty() && !STOP_WORDS.contains(name))
        .map(str::to_string)
        .collect()
}

fn parse_count(number: &str, k: bool) -> u32 {
    let n: f64 = number.replace(',', "").parse().unwrap_or(0.0);
    if k {
        (n * 1000.0).round() as u32
    } else {
        n.round() as u32
    }
}

fn section_name(title: &str, number: &str) -> String {
    let cleaned = title.trim_matches(|c: char| c.is_whitespace() || ":-–—".contains(c));
    if cleaned.is_empty() {
        format!("Chapter {}", chapter_number(number))
    } else {
        canonical_section(cleaned)
    }
}

fn chapter_number(raw: &str) -> u32 {
    if let Ok(n) = raw.parse() {
        return n;
    }
    roman_to_u32(raw).unwrap_or(0)
}

fn roman_to_u32(raw: &str) -> Option<u32> {
    let mut total: u32 = 0;
    let mut prev: u32 = 0;
    for c in raw.to_lowercase().chars().rev() {
        let value = match c {
            'i' => 1,
            'v' => 5,
            'x' => 10,
            'l' => 50,
            'c' => 100,
            'd' => 500,
            'm' => 1000,
            _ => return None,
        };
        if value < prev {
            total = total.checked_sub(value)?;
        } else {
            total += value;
            prev = value;
        }
    }
    Some(total)
}

/// Map abbreviations and spelling variants onto canonical section names.
fn canonical_section(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.as_str() {
        "intro" | "introduction" => "Introduction".into(),
        "lit review" | "literature review" => "Literature Review".into(),
        "meth" | "method" | "methods" | "methodology" => "Methodology".into(),
        "concl" | "conclusion" | "conclusions" => "Conclusion".into(),
        "theoretical framework" => "Theoretical Framework".into(),
        "future work" => "Future Work".into(),
        "background" => "Background".into(),
        "abstract" => "Abstract".into(),
        "analysis" => "Analysis".into(),
        "results" => "Results".into(),
        "discussion" => "Discussion".into(),
        "references" => "References".into(),
        "appendix" => "Appendix".into(),
        _ => title_case(&collapsed),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn mask_text(text: &str, spans: &[(usize, usize)]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for &(start, end) in spans {
        let end = end.min(bytes.len());
        for b in bytes.iter_mut().take(end).skip(start) {
            *b = b' ';
        }
    }
    // Spans come from regex matches, so boundaries are char-aligned and
    // every masked byte became ASCII.
    String::from_utf8(bytes).unwrap_or_else(|_| text.to_string())
}
