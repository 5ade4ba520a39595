use serde::{Deserialize, Serialize};

use super::delta::ConflictSeverity;

/// Coherence score band emitted by the stitcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceBand {
    Good,
    Mixed,
    Poor,
}

impl CoherenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Mixed => "mixed",
            Self::Poor => "poor",
        }
    }
}

/// A contradiction spanning chunks, found during the stitch pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossChunkConflict {
    pub description: String,
    pub chunks: Vec<u32>,
    pub severity: ConflictSeverity,
}

/// The same term used with differing senses across chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermDrift {
    pub term: String,
    /// (chunk index, sense used there).
    pub senses: Vec<(u32, String)>,
}

/// A claim repeated near-verbatim in more than one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redundancy {
    pub claim: String,
    pub chunks: Vec<u32>,
}

/// One ordered edit instruction from the repair plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairStep {
    pub chunk_index: u32,
    pub instruction: String,
}

/// Output of the global stitch/validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StitchResult {
    #[serde(default)]
    pub conflicts: Vec<CrossChunkConflict>,
    #[serde(default)]
    pub term_drift: Vec<TermDrift>,
    #[serde(default)]
    pub missing_premises: Vec<String>,
    #[serde(default)]
    pub redundancies: Vec<Redundancy>,
    #[serde(default)]
    pub repair_plan: Vec<RepairStep>,
    pub coherence: Option<CoherenceBand>,
    pub verdict: Option<String>,
    /// Soft annotations (flagged chunks, stitcher failure notes).
    #[serde(default)]
    pub notes: Vec<String>,
}

impl StitchResult {
    pub fn issue_count(&self) -> usize {
        self.conflicts.len()
            + self.term_drift.len()
            + self.missing_premises.len()
            + self.redundancies.len()
    }
}
