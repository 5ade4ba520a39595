use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;
use crate::models::{
    GlobalSkeleton, Job, JobStatus, LengthConfig, LengthMode, StitchResult, UserParams,
};

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::JsonColumn(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::JsonColumn(e.to_string()))
}

pub fn insert_job(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, source_text, input_words,
                           target_min, target_max, target_mid, ratio, length_mode,
                           chunk_target, num_chunks,
                           audience, rigor, instructions,
                           status, current_chunk, error_message,
                           global_skeleton, final_output, validation_result,
                           created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            job.id,
            job.source_text,
            job.input_words,
            job.length.target_min,
            job.length.target_max,
            job.length.target_mid,
            job.length.ratio,
            job.length.mode.as_str(),
            job.length.chunk_target,
            job.length.num_chunks,
            job.params.audience,
            job.params.rigor,
            job.params.instructions,
            job.status.as_str(),
            job.current_chunk,
            job.error_message,
            job.global_skeleton.as_ref().map(to_json).transpose()?,
            job.final_output,
            job.validation_result.as_ref().map(to_json).transpose()?,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<Job, DatabaseError> {
    conn.query_row(
        "SELECT id, source_text, input_words,
                target_min, target_max, target_mid, ratio, length_mode,
                chunk_target, num_chunks,
                audience, rigor, instructions,
                status, current_chunk, error_message,
                global_skeleton, final_output, validation_result,
                created_at, updated_at
         FROM jobs WHERE id = ?1",
        params![job_id],
        row_to_job,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::NotFound {
        entity_type: "job".into(),
        id: job_id.into(),
    })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let mode_raw: String = row.get(7)?;
    let status_raw: String = row.get(13)?;
    let skeleton_raw: Option<String> = row.get(16)?;
    let validation_raw: Option<String> = row.get(18)?;

    Ok(Job {
        id: row.get(0)?,
        source_text: row.get(1)?,
        input_words: row.get(2)?,
        length: LengthConfig {
            target_min: row.get(3)?,
            target_max: row.get(4)?,
            target_mid: row.get(5)?,
            ratio: row.get(6)?,
            mode: LengthMode::parse(&mode_raw).unwrap_or(LengthMode::Preserve),
            chunk_target: row.get(8)?,
            num_chunks: row.get(9)?,
        },
        params: UserParams {
            audience: row.get(10)?,
            rigor: row.get(11)?,
            instructions: row.get(12)?,
        },
        status: JobStatus::parse(&status_raw).unwrap_or(JobStatus::Failed),
        current_chunk: row.get(14)?,
        error_message: row.get(15)?,
        global_skeleton: skeleton_raw.and_then(|raw| from_json::<GlobalSkeleton>(&raw).ok()),
        final_output: row.get(17)?,
        validation_result: validation_raw.and_then(|raw| from_json::<StitchResult>(&raw).ok()),
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

pub fn job_exists(conn: &Connection, job_id: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE id = ?1",
        params![job_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Persist a forward status transition.
pub fn update_job_status(
    conn: &Connection,
    job_id: &str,
    status: JobStatus,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now(), job_id],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "job".into(),
            id: job_id.into(),
        });
    }
    Ok(())
}

pub fn set_job_error(conn: &Connection, job_id: &str, message: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = 'failed', error_message = ?1, updated_at = ?2 WHERE id = ?3",
        params![message, now(), job_id],
    )?;
    Ok(())
}

pub fn set_skeleton(
    conn: &Connection,
    job_id: &str,
    skeleton: &GlobalSkeleton,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET global_skeleton = ?1, updated_at = ?2 WHERE id = ?3",
        params![to_json(skeleton)?, now(), job_id],
    )?;
    Ok(())
}

/// Persist the final output and validation verdict together with the
/// terminal `complete` status.
pub fn set_final_output(
    conn: &Connection,
    job_id: &str,
    final_output: &str,
    validation: &StitchResult,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = 'complete', final_output = ?1,
                         validation_result = ?2, updated_at = ?3
         WHERE id = ?4",
        params![final_output, to_json(validation)?, now(), job_id],
    )?;
    Ok(())
}

/// Delete jobs that have sat in a sweepable terminal state longer than
/// `retention_hours`. Chunks, stitch results and audit events cascade.
pub fn sweep_terminal_jobs(
    conn: &Connection,
    retention_hours: i64,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM jobs
         WHERE status IN ('complete', 'aborted')
           AND datetime(updated_at) < datetime('now', ?1)",
        params![format!("-{retention_hours} hours")],
    )?;
    Ok(deleted)
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
