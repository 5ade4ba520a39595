//! Shared helpers for the API layer.

use rusqlite::Connection;
use serde_json::json;

use crate::db::repository::{chunk as chunk_repo, job as job_repo};
use crate::db::DatabaseError;

/// Build the status snapshot served by `GET /api/jobs/{id}` and the
/// `get_status` WebSocket request. Late observers recover missed live
/// messages through this; the hub itself never replays.
pub fn job_status_json(conn: &Connection, job_id: &str) -> Result<serde_json::Value, DatabaseError> {
    let job = job_repo::get_job(conn, job_id)?;
    let chunks = chunk_repo::list_chunks(conn, job_id)?;

    let words_processed: u32 = chunks.iter().filter_map(|c| c.actual_words).sum();
    let completed = chunk_repo::count_complete(conn, job_id)?;
    let flagged: Vec<u32> = chunks
        .iter()
        .filter(|c| c.flagged)
        .map(|c| c.chunk_index)
        .collect();

    Ok(json!({
        "type": "status",
        "jobId": job.id,
        "status": job.status.as_str(),
        "currentChunk": job.current_chunk,
        "completedChunks": completed,
        "totalChunks": job.length.num_chunks,
        "inputWords": job.input_words,
        "targetWords": job.length.target_mid,
        "lengthMode": job.length.mode.as_str(),
        "wordsProcessed": words_processed,
        "flaggedChunks": flagged,
        "errorMessage": job.error_message,
        "finalWordCount": job.final_output.as_deref().map(crate::pipeline::words::count_words),
        "hasFinalOutput": job.final_output.is_some(),
        "createdAt": job.created_at,
        "updatedAt": job.updated_at,
    }))
}
