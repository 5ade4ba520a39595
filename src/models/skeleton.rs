use serde::{Deserialize, Serialize};

/// One planned output section. Sections carry integer ids so chunk
/// deltas can cite them without object references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonSection {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub claims: Vec<String>,
    pub target_words: u32,
    #[serde(default)]
    pub terms: Vec<String>,
    /// Ids of related sections.
    #[serde(default)]
    pub related: Vec<u32>,
}

/// Structured outline of the whole output, produced once per job by the
/// skeleton extractor and read-only thereafter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSkeleton {
    pub sections: Vec<SkeletonSection>,
}

impl GlobalSkeleton {
    /// Structural validity: at least one section, every section titled.
    /// A skeleton failing this check is a retryable extraction failure.
    pub fn is_well_formed(&self) -> bool {
        !self.sections.is_empty() && self.sections.iter().all(|s| !s.title.trim().is_empty())
    }

    /// Compact one-line-per-section rendering for prompts and the
    /// `outline` stream message.
    pub fn summary(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("{}. {} (~{} words)", s.id, s.title, s.target_words))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn total_target_words(&self) -> u32 {
        self.sections.iter().map(|s| s.target_words).sum()
    }
}
