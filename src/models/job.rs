use serde::{Deserialize, Serialize};

use super::skeleton::GlobalSkeleton;
use super::stitch::StitchResult;

/// Lifecycle state of a reconstruction job.
///
/// Transitions only move forward:
/// pending → skeleton_extraction → chunk_processing → stitching →
/// complete | failed | aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    SkeletonExtraction,
    ChunkProcessing,
    Stitching,
    Complete,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SkeletonExtraction => "skeleton_extraction",
            Self::ChunkProcessing => "chunk_processing",
            Self::Stitching => "stitching",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "skeleton_extraction" => Some(Self::SkeletonExtraction),
            "chunk_processing" => Some(Self::ChunkProcessing),
            "stitching" => Some(Self::Stitching),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Terminal states never transition again and are eligible for sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the output length relates to the input length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthMode {
    Compress,
    Preserve,
    Expand,
    Custom,
}

impl LengthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Preserve => "preserve",
            Self::Expand => "expand",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compress" => Some(Self::Compress),
            "preserve" => Some(Self::Preserve),
            "expand" => Some(Self::Expand),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Derived length plan for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthConfig {
    pub target_min: u32,
    pub target_max: u32,
    pub target_mid: u32,
    /// target_mid / input_words.
    pub ratio: f64,
    pub mode: LengthMode,
    /// Output words per chunk, clamped to [600, 4000].
    pub chunk_target: u32,
    pub num_chunks: u32,
}

/// Free-form user parameters carried through to every prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserParams {
    pub audience: Option<String>,
    pub rigor: Option<String>,
    pub instructions: Option<String>,
}

/// One reconstruction job, as persisted in the `jobs` table.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub source_text: String,
    pub input_words: u32,
    pub length: LengthConfig,
    pub params: UserParams,
    pub status: JobStatus,
    /// 1 + max index of a complete chunk (0 if none).
    pub current_chunk: u32,
    pub error_message: Option<String>,
    pub global_skeleton: Option<GlobalSkeleton>,
    pub final_output: Option<String>,
    pub validation_result: Option<StitchResult>,
    pub created_at: String,
    pub updated_at: String,
}
