use serde::{Deserialize, Serialize};

/// Kind of an audit event. Every LLM call, DB write, and chunk
/// completion lands in the append-only log under one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    JobStarted,
    JobCompleted,
    DbQuery,
    DbInsert,
    DbUpdate,
    LlmCall,
    ChunkProcessed,
    SkeletonExtracted,
    StitchPass,
    Error,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::JobCompleted => "job_completed",
            Self::DbQuery => "db_query",
            Self::DbInsert => "db_insert",
            Self::DbUpdate => "db_update",
            Self::LlmCall => "llm_call",
            Self::ChunkProcessed => "chunk_processed",
            Self::SkeletonExtracted => "skeleton_extracted",
            Self::StitchPass => "stitch_pass",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "job_started" => Some(Self::JobStarted),
            "job_completed" => Some(Self::JobCompleted),
            "db_query" => Some(Self::DbQuery),
            "db_insert" => Some(Self::DbInsert),
            "db_update" => Some(Self::DbUpdate),
            "llm_call" => Some(Self::LlmCall),
            "chunk_processed" => Some(Self::ChunkProcessed),
            "skeleton_extracted" => Some(Self::SkeletonExtracted),
            "stitch_pass" => Some(Self::StitchPass),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One append-only audit entry. `(job_id, sequence)` is unique and
/// sequence is strictly monotonic per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub job_id: String,
    pub sequence: u64,
    pub timestamp: String,
    pub kind: AuditKind,
    pub payload: serde_json::Value,
}
