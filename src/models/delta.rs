use serde::{Deserialize, Serialize};

/// Severity of a detected contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

/// A contradiction a chunk introduced against an earlier chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictNote {
    pub description: String,
    pub with_chunk: u32,
    pub severity: ConflictSeverity,
}

/// A term of art and the sense it was used in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermUse {
    pub term: String,
    #[serde(default)]
    pub sense: String,
}

/// A structured fact added to the job-wide ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fact: String,
    pub source_chunk: u32,
}

/// What one chunk added to the shared coherence context. Written in the
/// same transaction as the chunk's output text and `complete` status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub new_claims: Vec<String>,
    #[serde(default)]
    pub terms_used: Vec<TermUse>,
    #[serde(default)]
    pub conflicts: Vec<ConflictNote>,
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
}

impl ChunkDelta {
    pub fn is_empty(&self) -> bool {
        self.new_claims.is_empty()
            && self.terms_used.is_empty()
            && self.conflicts.is_empty()
            && self.ledger.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delta_is_empty() {
        assert!(ChunkDelta::default().is_empty());
    }

    #[test]
    fn delta_with_claim_is_not_empty() {
        let delta = ChunkDelta {
            new_claims: vec!["The measure is monotone.".into()],
            ..Default::default()
        };
        assert!(!delta.is_empty());
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let delta: ChunkDelta =
            serde_json::from_str(r#"{"new_claims": ["a claim"]}"#).unwrap();
        assert_eq!(delta.new_claims.len(), 1);
        assert!(delta.terms_used.is_empty());
    }

    #[test]
    fn severity_serializes_snake_case() {
        let json = serde_json::to_string(&ConflictSeverity::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
