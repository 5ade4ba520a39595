use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;
use crate::models::{ChunkDelta, ChunkRecord, ChunkStatus, LengthBand};
use crate::pipeline::chunker::InputChunk;

/// Insert the pending chunk rows for a freshly planned job.
pub fn insert_chunks(
    conn: &Connection,
    job_id: &str,
    chunks: &[InputChunk],
    band: LengthBand,
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO chunks (job_id, chunk_index, input_text, input_words,
                             target_words, min_words, max_words, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')",
    )?;
    for (index, chunk) in chunks.iter().enumerate() {
        stmt.execute(params![
            job_id,
            index as u32,
            chunk.text,
            chunk.word_count,
            band.target,
            band.min,
            band.max,
        ])?;
    }
    Ok(())
}

pub fn get_chunk(
    conn: &Connection,
    job_id: &str,
    chunk_index: u32,
) -> Result<ChunkRecord, DatabaseError> {
    conn.query_row(
        "SELECT job_id, chunk_index, input_text, input_words,
                target_words, min_words, max_words,
                output_text, actual_words, status, flagged, retry_count, delta
         FROM chunks WHERE job_id = ?1 AND chunk_index = ?2",
        params![job_id, chunk_index],
        row_to_chunk,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::NotFound {
        entity_type: "chunk".into(),
        id: format!("{job_id}/{chunk_index}"),
    })
}

/// All chunks of a job in index order.
pub fn list_chunks(conn: &Connection, job_id: &str) -> Result<Vec<ChunkRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT job_id, chunk_index, input_text, input_words,
                target_words, min_words, max_words,
                output_text, actual_words, status, flagged, retry_count, delta
         FROM chunks WHERE job_id = ?1 ORDER BY chunk_index ASC",
    )?;
    let rows = stmt.query_map(params![job_id], row_to_chunk)?;
    let mut chunks = Vec::new();
    for row in rows {
        chunks.push(row?);
    }
    Ok(chunks)
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let status_raw: String = row.get(9)?;
    let delta_raw: Option<String> = row.get(12)?;
    Ok(ChunkRecord {
        job_id: row.get(0)?,
        chunk_index: row.get(1)?,
        input_text: row.get(2)?,
        input_words: row.get(3)?,
        band: LengthBand {
            target: row.get(4)?,
            min: row.get(5)?,
            max: row.get(6)?,
        },
        output_text: row.get(7)?,
        actual_words: row.get(8)?,
        status: ChunkStatus::parse(&status_raw).unwrap_or(ChunkStatus::Failed),
        flagged: row.get::<_, i64>(10)? != 0,
        retry_count: row.get(11)?,
        delta: delta_raw.and_then(|raw| serde_json::from_str::<ChunkDelta>(&raw).ok()),
    })
}

pub fn set_chunk_status(
    conn: &Connection,
    job_id: &str,
    chunk_index: u32,
    status: ChunkStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE chunks SET status = ?1 WHERE job_id = ?2 AND chunk_index = ?3",
        params![status.as_str(), job_id, chunk_index],
    )?;
    Ok(())
}

pub fn increment_retry(
    conn: &Connection,
    job_id: &str,
    chunk_index: u32,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE chunks SET retry_count = retry_count + 1
         WHERE job_id = ?1 AND chunk_index = ?2",
        params![job_id, chunk_index],
    )?;
    Ok(())
}

pub fn count_complete(conn: &Connection, job_id: &str) -> Result<u32, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM chunks WHERE job_id = ?1 AND status = 'complete'",
        params![job_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Raw deltas of chunks `[0, upto_index)` in index order; `None` for a
/// complete chunk whose delta column is null.
pub fn load_deltas(
    conn: &Connection,
    job_id: &str,
    upto_index: u32,
) -> Result<Vec<(u32, Option<ChunkDelta>)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT chunk_index, delta FROM chunks
         WHERE job_id = ?1 AND chunk_index < ?2 AND status = 'complete'
         ORDER BY chunk_index ASC",
    )?;
    let rows = stmt.query_map(params![job_id, upto_index], |row| {
        let index: u32 = row.get(0)?;
        let raw: Option<String> = row.get(1)?;
        Ok((index, raw))
    })?;

    let mut deltas = Vec::new();
    for row in rows {
        let (index, raw) = row?;
        deltas.push((index, raw.and_then(|r| serde_json::from_str(&r).ok())));
    }
    Ok(deltas)
}
