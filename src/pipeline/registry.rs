//! Active-jobs registry — process-wide map preventing duplicate
//! runners and carrying the cooperative abort flag.
//!
//! Lifecycle: insert on start, remove on terminal state. Exactly one
//! controller runs per job at a time; a second start or a resume of an
//! actively-running job is rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::PipelineError;

/// Per-job runtime state while a worker is active.
pub struct ActiveJob {
    pub abort: Arc<AtomicBool>,
    pub started_at: Instant,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, ActiveJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker for `job_id`. Returns the job's abort flag, or
    /// `AlreadyRunning` if a worker is active.
    pub fn try_register(&self, job_id: &str) -> Result<Arc<AtomicBool>, PipelineError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| PipelineError::AlreadyRunning(job_id.to_string()))?;

        if jobs.contains_key(job_id) {
            return Err(PipelineError::AlreadyRunning(job_id.to_string()));
        }

        let abort = Arc::new(AtomicBool::new(false));
        jobs.insert(
            job_id.to_string(),
            ActiveJob {
                abort: abort.clone(),
                started_at: Instant::now(),
            },
        );
        Ok(abort)
    }

    /// Remove a job on terminal state.
    pub fn remove(&self, job_id: &str) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.remove(job_id);
        }
    }

    /// Set the abort flag. Immediate; the worker honours it at the next
    /// chunk boundary. Returns whether the job was running.
    pub fn request_abort(&self, job_id: &str) -> bool {
        match self.jobs.read() {
            Ok(jobs) => match jobs.get(job_id) {
                Some(active) => {
                    active.abort.store(true, Ordering::SeqCst);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .map(|jobs| jobs.contains_key(job_id))
            .unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
