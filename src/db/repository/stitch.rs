use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::StitchResult;

/// Persist (or replace) the stitch result for a job.
pub fn upsert_stitch_result(
    conn: &Connection,
    job_id: &str,
    result: &StitchResult,
) -> Result<(), DatabaseError> {
    let raw = serde_json::to_string(result).map_err(|e| DatabaseError::JsonColumn(e.to_string()))?;
    let band = result
        .coherence
        .map(|b| b.as_str())
        .unwrap_or("mixed");
    conn.execute(
        "INSERT OR REPLACE INTO stitch_results (job_id, result, coherence_band, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![job_id, raw, band, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn get_stitch_result(
    conn: &Connection,
    job_id: &str,
) -> Result<Option<StitchResult>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT result FROM stitch_results WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| DatabaseError::JsonColumn(e.to_string())),
    }
}
