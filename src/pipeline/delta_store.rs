//! Delta store — persistence and accumulation of per-chunk coherence
//! deltas.
//!
//! The write path is the invariant-bearing one: a chunk's output text,
//! its delta, its `complete` status, and the job's `current_chunk`
//! cursor commit in a single transaction, so a reader can never observe
//! output-without-delta. A post-commit verification read guards against
//! silent null deltas; the write retries once, then fails the chunk.

use rusqlite::Connection;

use crate::db::repository::chunk;
use crate::db::DatabaseError;
use crate::models::ChunkDelta;

/// Bounds on the accumulated context, preserving prompt size on long
/// jobs. Must not grow past provider limits.
pub const MAX_CONTEXT_CLAIMS: usize = 15;
pub const MAX_CONTEXT_TERMS: usize = 20;
pub const MAX_CONTEXT_CONFLICTS: usize = 5;

/// Accumulated coherence context for a chunk: everything its
/// predecessors added, compressed into a bounded prompt fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoherenceContext {
    /// Number of prior complete chunks folded in.
    pub chunk_count: usize,
    /// Order-preserving union of claims, last 15.
    pub claims: Vec<String>,
    /// Deduplicated terms by recency, last 20.
    pub terms: Vec<String>,
    /// Recent conflict descriptions, last 5.
    pub conflicts: Vec<String>,
}

impl CoherenceContext {
    /// Render the prompt fragment consumed by the chunk reconstructor.
    /// Empty when no prior chunks exist.
    pub fn summary(&self) -> String {
        if self.chunk_count == 0 {
            return String::new();
        }

        let mut out = format!(
            "=== PRIOR CHUNKS COHERENCE CONTEXT ({} chunks) ===",
            self.chunk_count
        );

        if !self.claims.is_empty() {
            out.push_str("\nACCUMULATED CLAIMS (must not contradict):");
            for claim in &self.claims {
                out.push_str(&format!("\n  - {claim}"));
            }
        }

        if !self.terms.is_empty() {
            out.push_str(&format!(
                "\nTERMS ALREADY USED (use consistently): {}",
                self.terms.join(", ")
            ));
        }

        if !self.conflicts.is_empty() {
            out.push_str("\nPREVIOUS CONFLICTS DETECTED (avoid repeating):");
            for conflict in &self.conflicts {
                out.push_str(&format!("\n  - {conflict}"));
            }
        }

        out
    }
}

/// Write a completed chunk: output + delta + status + cursor advance in
/// one transaction, then verify the delta landed. One retry.
pub fn write_chunk(
    conn: &mut Connection,
    job_id: &str,
    chunk_index: u32,
    output: &str,
    actual_words: u32,
    flagged: bool,
    delta: &ChunkDelta,
) -> Result<(), DatabaseError> {
    let delta_json =
        serde_json::to_string(delta).map_err(|e| DatabaseError::JsonColumn(e.to_string()))?;

    for attempt in 0..2 {
        commit_chunk(
            conn,
            job_id,
            chunk_index,
            output,
            actual_words,
            flagged,
            &delta_json,
        )?;

        // Verification read after commit.
        let written = chunk::get_chunk(conn, job_id, chunk_index)?;
        if written.delta.is_some() {
            return Ok(());
        }
        tracing::warn!(
            job_id,
            chunk_index,
            attempt,
            "Verification read found null delta after commit; retrying write"
        );
    }

    Err(DatabaseError::WriteVerification(format!(
        "chunk {job_id}/{chunk_index}: delta still null after retry"
    )))
}

fn commit_chunk(
    conn: &mut Connection,
    job_id: &str,
    chunk_index: u32,
    output: &str,
    actual_words: u32,
    flagged: bool,
    delta_json: &str,
) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;

    tx.execute(
        "UPDATE chunks
         SET output_text = ?1, actual_words = ?2, status = 'complete',
             flagged = ?3, delta = ?4
         WHERE job_id = ?5 AND chunk_index = ?6",
        rusqlite::params![
            output,
            actual_words,
            flagged as i64,
            delta_json,
            job_id,
            chunk_index
        ],
    )?;

    tx.execute(
        "UPDATE jobs SET current_chunk = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![chunk_index + 1, chrono::Utc::now().to_rfc3339(), job_id],
    )?;

    tx.commit()?;
    Ok(())
}

/// Load and accumulate the deltas of chunks `[0, upto_index)`.
///
/// A complete chunk with a null delta is a soft error: logged, skipped,
/// and the job continues.
pub fn load_prior_deltas(
    conn: &Connection,
    job_id: &str,
    upto_index: u32,
) -> Result<CoherenceContext, DatabaseError> {
    let rows = chunk::load_deltas(conn, job_id, upto_index)?;

    let mut claims: Vec<String> = Vec::new();
    let mut terms: Vec<String> = Vec::new();
    let mut conflicts: Vec<String> = Vec::new();
    let mut chunk_count = 0usize;

    for (index, delta) in rows {
        chunk_count += 1;
        let Some(delta) = delta else {
            tracing::warn!(
                job_id,
                chunk_index = index,
                "Complete chunk has null delta; continuing without it"
            );
            continue;
        };

        for claim in delta.new_claims {
            if !claims.contains(&claim) {
                claims.push(claim);
            }
        }

        for term_use in delta.terms_used {
            // Recency dedup: a re-used term moves to the back.
            if let Some(pos) = terms.iter().position(|t| *t == term_use.term) {
                terms.remove(pos);
            }
            terms.push(term_use.term);
        }

        for conflict in delta.conflicts {
            conflicts.push(format!(
                "with chunk {}: {}",
                conflict.with_chunk, conflict.description
            ));
        }
    }

    truncate_front(&mut claims, MAX_CONTEXT_CLAIMS);
    truncate_front(&mut terms, MAX_CONTEXT_TERMS);
    truncate_front(&mut conflicts, MAX_CONTEXT_CONFLICTS);

    Ok(CoherenceContext {
        chunk_count,
        claims,
        terms,
        conflicts,
    })
}

/// Keep the last `keep` entries.
fn truncate_front<T>(items: &mut Vec<T>, keep: usize) {
    if items.len() > keep {
        items.drain(..items.len() - keep);
    }
}
