//! Shared application state.
//!
//! `CoreState` is built once at startup and shared via `Arc` between
//! the axum surface, job worker threads, and the background sweeper.
//! Workers open their own database connections from `db_path`; the
//! stream hub, job registry, and audit logger are process-wide.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::config::{self, PacingConfig};
use crate::db::{self, DatabaseError};
use crate::llm::CompletionClient;
use crate::pipeline::controller::JobController;
use crate::pipeline::expansion::ExpansionEngine;
use crate::pipeline::registry::JobRegistry;
use crate::stream::{StreamHub, StreamMessage, GENERATION_CHANNEL};

pub struct CoreState {
    pub db_path: PathBuf,
    pub llm: Arc<dyn CompletionClient>,
    pub hub: Arc<StreamHub>,
    pub registry: Arc<JobRegistry>,
    pub audit: AuditLogger,
    pub pacing: PacingConfig,
    pub model: String,
}

impl CoreState {
    /// Production state: configured paths, Ollama provider, default
    /// pacing.
    pub fn new() -> Self {
        Self::with_parts(
            config::database_path(),
            Arc::new(crate::llm::OllamaClient::from_env()),
            PacingConfig::default(),
        )
    }

    /// Assemble state from explicit parts (tests inject stub LLMs, a
    /// temp database path, and disabled pacing).
    pub fn with_parts(
        db_path: PathBuf,
        llm: Arc<dyn CompletionClient>,
        pacing: PacingConfig,
    ) -> Self {
        let hub = Arc::new(StreamHub::new());
        Self {
            db_path,
            llm,
            audit: AuditLogger::new(hub.clone()),
            hub,
            registry: Arc::new(JobRegistry::new()),
            pacing,
            model: config::model_name(),
        }
    }

    /// Open a fresh connection to the job database.
    pub fn open_db(&self) -> Result<rusqlite::Connection, DatabaseError> {
        db::open_database(&self.db_path)
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the worker thread that drives one job to a terminal state.
///
/// Blocking by design: the LLM client and rusqlite are synchronous, so
/// each job gets a dedicated OS thread instead of a tokio task.
pub fn spawn_job_worker(state: Arc<CoreState>, job_id: String) {
    std::thread::spawn(move || {
        let mut conn = match state.open_db() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Worker could not open database");
                state.hub.broadcast(
                    &job_id,
                    StreamMessage::Error {
                        message: format!("worker startup failed: {e}"),
                    },
                );
                return;
            }
        };

        let mut controller = JobController::new(
            &mut conn,
            state.llm.as_ref(),
            &state.hub,
            &state.audit,
            &state.registry,
            &state.pacing,
            state.model.clone(),
        );

        match controller.run(&job_id) {
            Ok(status) => {
                tracing::info!(job_id, status = status.as_str(), "Worker finished");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Worker did not run");
                state.hub.broadcast(
                    &job_id,
                    StreamMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
    });
}

/// Spawn the worker thread that drives one expansion-engine run.
pub fn spawn_generation_worker(state: Arc<CoreState>, instructions: String) {
    std::thread::spawn(move || {
        let engine = ExpansionEngine::new(
            state.llm.as_ref(),
            &state.model,
            &state.pacing,
            state.hub.clone(),
        );
        match engine.run(&instructions) {
            Ok(result) => {
                tracing::info!(
                    generation_id = %result.id,
                    sections = result.sections.len(),
                    final_words = result.final_words,
                    "Generation finished"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Generation failed");
                state.hub.broadcast(
                    GENERATION_CHANNEL,
                    StreamMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedClient;

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("reweave-test-{}.db", uuid::Uuid::new_v4()))
    }

    #[test]
    fn with_parts_wires_shared_hub() {
        let state = CoreState::with_parts(
            temp_db_path(),
            Arc::new(ScriptedClient::always("x")),
            PacingConfig::disabled(),
        );
        // The audit logger and the state share one hub: an audit entry
        // reaches subscribers of the state's hub.
        let (_, mut rx) = state.hub.subscribe("audit:job-x");
        let conn = state.open_db().unwrap();
        crate::db::repository::job::insert_job(
            &conn,
            &crate::db::repository::job::tests::sample_job("job-x"),
        )
        .unwrap();
        state.audit.record(
            &conn,
            "job-x",
            crate::models::AuditKind::JobStarted,
            serde_json::json!({}),
        );
        assert!(rx.try_recv().is_ok());
        drop(conn);
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[test]
    fn open_db_runs_migrations() {
        let state = CoreState::with_parts(
            temp_db_path(),
            Arc::new(ScriptedClient::always("x")),
            PacingConfig::disabled(),
        );
        let conn = state.open_db().unwrap();
        let tables = crate::db::count_tables(&conn).unwrap();
        assert!(tables >= 5);
        drop(conn);
        let _ = std::fs::remove_file(&state.db_path);
    }
}
