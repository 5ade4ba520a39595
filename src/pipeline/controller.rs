//! Job controller — the per-job state machine.
//!
//! ```text
//! pending
//!   → skeleton_extraction     (on start)
//!   → chunk_processing        (when skeleton written)
//!   → stitching               (when current_chunk == num_chunks)
//!   → complete | failed | aborted
//! ```
//!
//! One controller runs per job, on a dedicated worker thread, with its
//! own database connection and a borrowed LLM handle. Chunks are
//! strictly sequential; the abort flag is honoured at chunk boundaries;
//! resume picks up at `current_chunk` with the persisted skeleton.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;

use crate::audit::AuditLogger;
use crate::config::{self, PacingConfig};
use crate::db::repository::{chunk as chunk_repo, job as job_repo, stitch as stitch_repo};
use crate::llm::{CompletionClient, LlmError};
use crate::models::{
    AuditKind, ChunkStatus, Job, JobStatus, UserParams,
};
use crate::stream::{ChunkWireStatus, StreamHub, StreamMessage};

use super::chunker::chunk_input;
use super::delta_store;
use super::directive::parse_directive;
use super::enforcer::EnforcementStatus;
use super::reconstructor::{ChunkOutcome, ChunkReconstructor};
use super::registry::JobRegistry;
use super::skeleton::SkeletonExtractor;
use super::stitcher;
use super::words::{chunk_output_target, calculate_length_config, count_words, parse_target_length};
use super::PipelineError;

/// Transport retries per chunk (beyond the first attempt).
const CHUNK_RETRIES: u32 = 3;

/// Projection warnings start at this chunk index and repeat every 10.
const WARNING_START_INDEX: u32 = 19;
const WARNING_INTERVAL: u32 = 10;

/// Projected shortfall (percent) above which a warning is broadcast.
const SHORTFALL_WARNING_PERCENT: u32 = 25;

/// Parameters of a new reconstruction job.
#[derive(Debug, Clone, Default)]
pub struct NewJobParams {
    pub text: String,
    pub instructions: Option<String>,
    pub audience: Option<String>,
    pub rigor: Option<String>,
}

/// Create and persist a new job with its planned chunks.
///
/// Rejects inputs outside [501, 50,000] words before anything is
/// written.
pub fn create_job(conn: &Connection, params: &NewJobParams) -> Result<Job, PipelineError> {
    let input_words = count_words(&params.text);
    if !(config::MIN_INPUT_WORDS..=config::MAX_INPUT_WORDS).contains(&input_words) {
        return Err(PipelineError::InputSize {
            min: config::MIN_INPUT_WORDS,
            max: config::MAX_INPUT_WORDS,
            got: input_words,
        });
    }

    let instructions = params.instructions.as_deref().unwrap_or("");
    let target = parse_target_length(instructions);
    let (target_min, target_max) = match target {
        Some(t) => (t.min, t.max),
        None => (input_words, input_words),
    };

    let mut length = calculate_length_config(input_words, target_min, target_max, instructions);

    // The chunker's floor and merge rules decide the real chunk count;
    // rebalance the per-chunk output target against it.
    let per_chunk_input = (input_words / length.num_chunks).max(1);
    let chunks = chunk_input(&params.text, per_chunk_input);
    length.num_chunks = chunks.len() as u32;
    length.chunk_target = chunk_output_target(length.target_mid, length.num_chunks);

    let now = chrono::Utc::now().to_rfc3339();
    let job = Job {
        id: uuid::Uuid::new_v4().to_string(),
        source_text: params.text.clone(),
        input_words,
        length,
        params: UserParams {
            audience: params.audience.clone(),
            rigor: params.rigor.clone(),
            instructions: params.instructions.clone(),
        },
        status: JobStatus::Pending,
        current_chunk: 0,
        error_message: None,
        global_skeleton: None,
        final_output: None,
        validation_result: None,
        created_at: now.clone(),
        updated_at: now,
    };

    job_repo::insert_job(conn, &job)?;
    chunk_repo::insert_chunks(
        conn,
        &job.id,
        &chunks,
        crate::models::LengthBand::for_target(job.length.chunk_target),
    )?;

    tracing::info!(
        job_id = %job.id,
        input_words,
        num_chunks = job.length.num_chunks,
        chunk_target = job.length.chunk_target,
        mode = job.length.mode.as_str(),
        "Job created"
    );

    Ok(job)
}

pub struct JobController<'a> {
    conn: &'a mut Connection,
    llm: &'a dyn CompletionClient,
    hub: &'a StreamHub,
    audit: &'a AuditLogger,
    registry: &'a JobRegistry,
    pacing: &'a PacingConfig,
    model: String,
}

impl<'a> JobController<'a> {
    pub fn new(
        conn: &'a mut Connection,
        llm: &'a dyn CompletionClient,
        hub: &'a StreamHub,
        audit: &'a AuditLogger,
        registry: &'a JobRegistry,
        pacing: &'a PacingConfig,
        model: String,
    ) -> Self {
        Self {
            conn,
            llm,
            hub,
            audit,
            registry,
            pacing,
            model,
        }
    }

    /// Run (or resume) a job to a terminal state.
    ///
    /// Registration and lookup problems return `Err`; runtime failures
    /// are persisted, broadcast, and reported as `Ok(JobStatus::Failed)`.
    pub fn run(&mut self, job_id: &str) -> Result<JobStatus, PipelineError> {
        let abort = self.registry.try_register(job_id)?;
        let outcome = self.run_registered(job_id, &abort);
        self.registry.remove(job_id);
        self.audit.close_stream(job_id);
        outcome
    }

    fn run_registered(
        &mut self,
        job_id: &str,
        abort: &Arc<AtomicBool>,
    ) -> Result<JobStatus, PipelineError> {
        let job = match job_repo::get_job(self.conn, job_id) {
            Ok(job) => job,
            Err(crate::db::DatabaseError::NotFound { .. }) => {
                return Err(PipelineError::JobNotFound(job_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if matches!(job.status, JobStatus::Complete | JobStatus::Aborted) {
            return Err(PipelineError::NotResumable {
                id: job_id.to_string(),
                status: job.status.as_str().to_string(),
            });
        }

        let start = Instant::now();
        self.audit.record(
            self.conn,
            job_id,
            AuditKind::JobStarted,
            serde_json::json!({
                "resume_from": job.current_chunk,
                "num_chunks": job.length.num_chunks,
            }),
        );
        self.hub.broadcast(
            job_id,
            StreamMessage::JobStarted {
                job_id: job_id.to_string(),
                total_chunks: job.length.num_chunks,
                input_words: job.input_words,
                target_words: job.length.target_mid,
                length_mode: job.length.mode.as_str().to_string(),
                length_ratio: job.length.ratio,
            },
        );

        // ── Skeleton phase ──────────────────────────────────
        let skeleton = match &job.global_skeleton {
            Some(skeleton) => skeleton.clone(),
            None => {
                self.transition(job_id, JobStatus::SkeletonExtraction);
                self.progress(job_id, "skeleton_extraction", "Extracting document outline", start);

                let plan = parse_directive(
                    job.params.instructions.as_deref().unwrap_or(""),
                );
                let hint = plan
                    .structure
                    .iter()
                    .map(|s| {
                        if s.word_count > 0 {
                            format!("{} (~{} words)", s.name, s.word_count)
                        } else {
                            s.name.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");

                let extractor = SkeletonExtractor::new(self.llm, &self.model, self.pacing);
                self.audit.record(
                    self.conn,
                    job_id,
                    AuditKind::LlmCall,
                    serde_json::json!({"purpose": "skeleton"}),
                );

                match extractor.extract(&job.source_text, &hint, job.length.target_mid) {
                    Ok(skeleton) => {
                        if let Err(e) = job_repo::set_skeleton(self.conn, job_id, &skeleton) {
                            return Ok(self.fail(job_id, start, &format!("skeleton write: {e}")));
                        }
                        self.audit.record(
                            self.conn,
                            job_id,
                            AuditKind::SkeletonExtracted,
                            serde_json::json!({"sections": skeleton.sections.len()}),
                        );
                        self.hub.broadcast(
                            job_id,
                            StreamMessage::Outline {
                                job_id: job_id.to_string(),
                                summary: skeleton.summary(),
                                sections: skeleton.sections.len() as u32,
                            },
                        );
                        skeleton
                    }
                    Err(e) => {
                        return Ok(self.fail(job_id, start, &format!("skeleton extraction: {e}")));
                    }
                }
            }
        };

        // ── Chunk phase ─────────────────────────────────────
        self.transition(job_id, JobStatus::ChunkProcessing);

        // Resume-aware running total over already-complete chunks.
        let mut running_words: u32 = match chunk_repo::list_chunks(self.conn, job_id) {
            Ok(chunks) => chunks.iter().filter_map(|c| c.actual_words).sum(),
            Err(_) => 0,
        };

        let first_chunk = job_repo::get_job(self.conn, job_id)
            .map(|j| j.current_chunk)
            .unwrap_or(job.current_chunk);
        let total_chunks = job.length.num_chunks;

        for index in first_chunk..total_chunks {
            // Cooperative abort at every chunk boundary.
            if abort.load(Ordering::SeqCst) {
                return Ok(self.abort_job(job_id, total_chunks));
            }

            if index > first_chunk {
                std::thread::sleep(self.pacing.chunk_pause(index));
            }

            let outcome = match self.process_chunk(job_id, index, total_chunks, &job, &skeleton) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let _ = chunk_repo::set_chunk_status(self.conn, job_id, index, ChunkStatus::Failed);
                    return Ok(self.fail(
                        job_id,
                        start,
                        &format!("chunk {index} failed: {e}"),
                    ));
                }
            };

            running_words += outcome.words;
            let completed = index + 1;
            let projected =
                (f64::from(running_words) / f64::from(completed) * f64::from(total_chunks)) as u32;

            self.audit.record(
                self.conn,
                job_id,
                AuditKind::ChunkProcessed,
                serde_json::json!({
                    "chunk_index": index,
                    "actual_words": outcome.words,
                    "attempts": outcome.attempts,
                    "status": outcome.status.as_str(),
                }),
            );

            self.hub.broadcast(
                job_id,
                StreamMessage::ChunkComplete {
                    job_id: job_id.to_string(),
                    chunk_index: index,
                    total_chunks,
                    chunk_text: outcome.text.clone(),
                    actual_words: outcome.words,
                    target_words: job.length.chunk_target,
                    min_words: (f64::from(job.length.chunk_target) * 0.85).floor() as u32,
                    max_words: (f64::from(job.length.chunk_target) * 1.15).ceil() as u32,
                    running_total: running_words,
                    projected_final: projected,
                    status: wire_status(outcome.status),
                },
            );

            self.progress_with_stats(job_id, completed, total_chunks, running_words, projected, start, &job);
            self.maybe_warn_shortfall(job_id, index, projected, job.length.target_mid);
        }

        // ── Stitch phase ────────────────────────────────────
        if abort.load(Ordering::SeqCst) {
            return Ok(self.abort_job(job_id, total_chunks));
        }
        self.transition(job_id, JobStatus::Stitching);
        self.progress(job_id, "stitching", "Running global validation pass", start);

        let chunks = match chunk_repo::list_chunks(self.conn, job_id) {
            Ok(chunks) => chunks,
            Err(e) => return Ok(self.fail(job_id, start, &format!("chunk load: {e}"))),
        };

        let (final_output, stitch_result) = stitcher::stitch(&skeleton, &chunks);
        self.audit.record(
            self.conn,
            job_id,
            AuditKind::StitchPass,
            serde_json::json!({
                "coherence": stitch_result.coherence.map(|b| b.as_str()),
                "issues": stitch_result.issue_count(),
            }),
        );

        // Final output is a critical write; the stitch-result row is not.
        if let Err(e) = job_repo::set_final_output(self.conn, job_id, &final_output, &stitch_result)
        {
            return Ok(self.fail(job_id, start, &format!("final write: {e}")));
        }
        if let Err(e) = stitch_repo::upsert_stitch_result(self.conn, job_id, &stitch_result) {
            tracing::warn!(job_id, error = %e, "Stitch result write failed; continuing");
        }

        let final_words = count_words(&final_output);
        self.audit.record(
            self.conn,
            job_id,
            AuditKind::JobCompleted,
            serde_json::json!({"final_words": final_words}),
        );
        self.hub.broadcast(
            job_id,
            StreamMessage::JobComplete {
                job_id: job_id.to_string(),
                final_output,
                final_word_count: final_words,
                target_words: job.length.target_mid,
                stitch_result,
                time_elapsed: start.elapsed().as_secs(),
            },
        );

        tracing::info!(job_id, final_words, "Job complete");
        Ok(JobStatus::Complete)
    }

    /// One chunk: processing status, prior deltas, reconstruction with
    /// transport retries, transactional write.
    fn process_chunk(
        &mut self,
        job_id: &str,
        index: u32,
        total_chunks: u32,
        job: &Job,
        skeleton: &crate::models::GlobalSkeleton,
    ) -> Result<ChunkOutcome, PipelineError> {
        if let Err(e) = chunk_repo::set_chunk_status(self.conn, job_id, index, ChunkStatus::Processing)
        {
            // Status updates are non-critical.
            tracing::warn!(job_id, index, error = %e, "Chunk status write failed; continuing");
        }

        let context = delta_store::load_prior_deltas(self.conn, job_id, index)?;
        let chunk = chunk_repo::get_chunk(self.conn, job_id, index)?;

        let reconstructor = ChunkReconstructor::new(self.llm, &self.model, self.pacing);

        let mut last_error: Option<LlmError> = None;
        for attempt in 0..=CHUNK_RETRIES {
            if attempt > 0 {
                std::thread::sleep(self.pacing.chunk_backoff(attempt - 1));
                let _ = chunk_repo::increment_retry(self.conn, job_id, index);
                self.hub.broadcast(
                    job_id,
                    StreamMessage::Progress {
                        job_id: job_id.to_string(),
                        phase: "chunk_processing".into(),
                        message: format!("Retrying chunk {index} (attempt {})", attempt + 1),
                        completed_chunks: Some(index),
                        total_chunks: Some(total_chunks),
                        words_processed: None,
                        target_words: None,
                        projected_final: None,
                        time_elapsed: None,
                        estimated_remaining: None,
                    },
                );
            }

            self.audit.record(
                self.conn,
                job_id,
                AuditKind::LlmCall,
                serde_json::json!({"chunk_index": index, "attempt": attempt}),
            );

            match reconstructor.reconstruct(
                &chunk,
                total_chunks,
                skeleton,
                &context,
                &job.params,
            ) {
                Ok(outcome) => {
                    delta_store::write_chunk(
                        self.conn,
                        job_id,
                        index,
                        &outcome.text,
                        outcome.words,
                        outcome.status == EnforcementStatus::Flagged,
                        &outcome.delta,
                    )?;
                    self.audit.record(
                        self.conn,
                        job_id,
                        AuditKind::DbUpdate,
                        serde_json::json!({"chunk_index": index, "write": "chunk_complete"}),
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    tracing::warn!(job_id, index, attempt, error = %e, "Chunk reconstruction failed");
                    self.audit.record(
                        self.conn,
                        job_id,
                        AuditKind::Error,
                        serde_json::json!({"chunk_index": index, "attempt": attempt, "error": e.to_string()}),
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::ChunkFailed {
            index,
            attempts: CHUNK_RETRIES + 1,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }

    // ── Terminal transitions ────────────────────────────────

    fn fail(&mut self, job_id: &str, start: Instant, error: &str) -> JobStatus {
        tracing::error!(job_id, error, "Job failed");
        if let Err(e) = job_repo::set_job_error(self.conn, job_id, error) {
            tracing::error!(job_id, error = %e, "Could not persist failure state");
        }
        self.audit.record(
            self.conn,
            job_id,
            AuditKind::Error,
            serde_json::json!({"error": error, "elapsed_secs": start.elapsed().as_secs()}),
        );
        self.hub.broadcast(
            job_id,
            StreamMessage::JobFailed {
                job_id: job_id.to_string(),
                error: error.to_string(),
            },
        );
        JobStatus::Failed
    }

    fn abort_job(&mut self, job_id: &str, total_chunks: u32) -> JobStatus {
        let chunks = chunk_repo::list_chunks(self.conn, job_id).unwrap_or_default();
        let complete: Vec<_> = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Complete)
            .collect();
        let partial_output = complete
            .iter()
            .filter_map(|c| c.output_text.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n");

        self.transition(job_id, JobStatus::Aborted);
        self.audit.record(
            self.conn,
            job_id,
            AuditKind::JobCompleted,
            serde_json::json!({"aborted": true, "completed_chunks": complete.len()}),
        );
        self.hub.broadcast(
            job_id,
            StreamMessage::JobAborted {
                job_id: job_id.to_string(),
                completed_chunks: complete.len() as u32,
                total_chunks,
                word_count: count_words(&partial_output),
                partial_output,
            },
        );

        tracing::info!(job_id, completed = complete.len(), "Job aborted");
        JobStatus::Aborted
    }

    // ── Broadcast helpers ───────────────────────────────────

    fn transition(&mut self, job_id: &str, status: JobStatus) {
        if let Err(e) = job_repo::update_job_status(self.conn, job_id, status) {
            tracing::warn!(job_id, status = status.as_str(), error = %e, "Status write failed; continuing");
        }
        self.audit.record(
            self.conn,
            job_id,
            AuditKind::DbUpdate,
            serde_json::json!({"status": status.as_str()}),
        );
    }

    fn progress(&mut self, job_id: &str, phase: &str, message: &str, start: Instant) {
        self.hub.broadcast(
            job_id,
            StreamMessage::Progress {
                job_id: job_id.to_string(),
                phase: phase.into(),
                message: message.into(),
                completed_chunks: None,
                total_chunks: None,
                words_processed: None,
                target_words: None,
                projected_final: None,
                time_elapsed: Some(start.elapsed().as_secs()),
                estimated_remaining: None,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn progress_with_stats(
        &mut self,
        job_id: &str,
        completed: u32,
        total: u32,
        words: u32,
        projected: u32,
        start: Instant,
        job: &Job,
    ) {
        let elapsed = start.elapsed().as_secs();
        let estimated_remaining = if completed > 0 {
            Some(elapsed / u64::from(completed) * u64::from(total - completed))
        } else {
            None
        };
        self.hub.broadcast(
            job_id,
            StreamMessage::Progress {
                job_id: job_id.to_string(),
                phase: "chunk_processing".into(),
                message: format!("{completed}/{total} chunks complete"),
                completed_chunks: Some(completed),
                total_chunks: Some(total),
                words_processed: Some(words),
                target_words: Some(job.length.target_mid),
                projected_final: Some(projected),
                time_elapsed: Some(elapsed),
                estimated_remaining,
            },
        );
    }

    /// Every 10 chunks from index 19 onward, project the final word
    /// count and warn on a shortfall above 25%.
    fn maybe_warn_shortfall(&mut self, job_id: &str, index: u32, projected: u32, target: u32) {
        if index < WARNING_START_INDEX || (index - WARNING_START_INDEX) % WARNING_INTERVAL != 0 {
            return;
        }
        if projected >= target || target == 0 {
            return;
        }
        let shortfall = (target - projected) * 100 / target;
        if shortfall >= SHORTFALL_WARNING_PERCENT {
            self.hub.broadcast(
                job_id,
                StreamMessage::Warning {
                    job_id: job_id.to_string(),
                    message: format!(
                        "Projected final length {projected} words is {shortfall}% short of the {target}-word target"
                    ),
                    projected_final: projected,
                    target_words: target,
                    shortfall,
                },
            );
        }
    }
}

fn wire_status(status: EnforcementStatus) -> ChunkWireStatus {
    match status {
        EnforcementStatus::OnTarget => ChunkWireStatus::OnTarget,
        EnforcementStatus::PassedAfterRetry => ChunkWireStatus::PassedAfterRetry,
        EnforcementStatus::Flagged => ChunkWireStatus::Flagged,
    }
}
