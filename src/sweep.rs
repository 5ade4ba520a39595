//! Periodic garbage collection of terminal jobs.
//!
//! Jobs sitting in `complete` or `aborted` for longer than 24 hours are
//! deleted; chunks, stitch results, and audit events cascade with them.
//! Failed jobs are kept so they stay resumable.

use std::sync::Arc;
use std::time::Duration;

use crate::core_state::CoreState;
use crate::db::repository::job as job_repo;
use crate::db::DatabaseError;

/// Sweep cadence: every 15 minutes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Retention for terminal jobs.
pub const RETENTION_HOURS: i64 = 24;

/// Start the background sweeper thread. Runs for the lifetime of the
/// process.
pub fn start_sweeper(state: Arc<CoreState>) {
    std::thread::spawn(move || {
        tracing::info!(
            interval_secs = SWEEP_INTERVAL.as_secs(),
            retention_hours = RETENTION_HOURS,
            "Job sweeper started"
        );
        loop {
            std::thread::sleep(SWEEP_INTERVAL);
            match sweep_once(&state) {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, "Swept terminal jobs"),
                Err(e) => tracing::warn!(error = %e, "Sweep pass failed"),
            }
        }
    });
}

/// One sweep pass. Separated from the loop for tests.
pub fn sweep_once(state: &CoreState) -> Result<usize, DatabaseError> {
    let conn = state.open_db()?;
    job_repo::sweep_terminal_jobs(&conn, RETENTION_HOURS)
}
