use serde::{Deserialize, Serialize};

use super::delta::ChunkDelta;

/// Chunk lifecycle: pending → processing → (complete | failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The `[min, max]` word interval within which a chunk's output is
/// considered on-target: 0.85× … 1.15× of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBand {
    pub target: u32,
    pub min: u32,
    pub max: u32,
}

impl LengthBand {
    pub fn for_target(target: u32) -> Self {
        Self {
            target,
            min: (f64::from(target) * 0.85).floor() as u32,
            max: (f64::from(target) * 1.15).ceil() as u32,
        }
    }

    pub fn contains(&self, words: u32) -> bool {
        words >= self.min && words <= self.max
    }
}

/// One ordered slice of the source document, as persisted in `chunks`.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub job_id: String,
    pub chunk_index: u32,
    pub input_text: String,
    pub input_words: u32,
    pub band: LengthBand,
    pub output_text: Option<String>,
    pub actual_words: Option<u32>,
    pub status: ChunkStatus,
    /// Below-minimum after the continuation cap; complete but annotated.
    pub flagged: bool,
    pub retry_count: u32,
    pub delta: Option<ChunkDelta>,
}
