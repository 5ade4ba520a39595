//! Audit logging — append-only event trail per job, persisted and
//! fanned out to live audit-stream observers.
//!
//! Audit writes are non-critical by contract: a failed append is logged
//! and the job continues.

use std::sync::Arc;

use rusqlite::Connection;

use crate::db::repository::audit as audit_repo;
use crate::models::{AuditEvent, AuditKind};
use crate::stream::{audit_channel, StreamHub, StreamMessage};

pub struct AuditLogger {
    hub: Arc<StreamHub>,
}

impl AuditLogger {
    pub fn new(hub: Arc<StreamHub>) -> Self {
        Self { hub }
    }

    /// Append one event with the next per-job sequence number, then
    /// fan it out to audit observers. Returns the sequence on success.
    pub fn record(
        &self,
        conn: &Connection,
        job_id: &str,
        kind: AuditKind,
        payload: serde_json::Value,
    ) -> Option<u64> {
        let sequence = match audit_repo::next_sequence(conn, job_id) {
            Ok(seq) => seq,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Audit sequence lookup failed; skipping event");
                return None;
            }
        };

        let event = AuditEvent {
            job_id: job_id.to_string(),
            sequence,
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            payload,
        };

        if let Err(e) = audit_repo::insert_event(conn, &event) {
            tracing::warn!(job_id, sequence, error = %e, "Audit append failed; continuing");
            return None;
        }

        self.hub
            .broadcast(&audit_channel(job_id), StreamMessage::Entry { entry: event });
        Some(sequence)
    }

    /// Signal end of a job's audit stream to live observers.
    pub fn close_stream(&self, job_id: &str) {
        self.hub
            .broadcast(&audit_channel(job_id), StreamMessage::Completed {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::job::{insert_job, tests::sample_job};

    #[test]
    fn record_persists_with_monotonic_sequence() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();
        let logger = AuditLogger::new(Arc::new(StreamHub::new()));

        let s1 = logger
            .record(&conn, "job-1", AuditKind::JobStarted, serde_json::json!({}))
            .unwrap();
        let s2 = logger
            .record(&conn, "job-1", AuditKind::LlmCall, serde_json::json!({"chunk": 0}))
            .unwrap();

        assert_eq!(s1, 1);
        assert_eq!(s2, 2);

        let events = audit_repo::list_events(&conn, "job-1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, AuditKind::LlmCall);
    }

    #[test]
    fn record_fans_out_to_audit_channel() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();
        let hub = Arc::new(StreamHub::new());
        let logger = AuditLogger::new(hub.clone());

        let (_, mut rx) = hub.subscribe(&audit_channel("job-1"));
        logger.record(&conn, "job-1", AuditKind::DbInsert, serde_json::json!({}));

        let message = rx.try_recv().unwrap();
        let StreamMessage::Entry { entry } = message else {
            panic!("expected audit entry, got {message:?}");
        };
        assert_eq!(entry.kind, AuditKind::DbInsert);
        assert_eq!(entry.sequence, 1);
    }

    #[test]
    fn close_stream_emits_completed() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();
        let hub = Arc::new(StreamHub::new());
        let logger = AuditLogger::new(hub.clone());

        let (_, mut rx) = hub.subscribe(&audit_channel("job-1"));
        logger.close_stream("job-1");

        assert_eq!(rx.try_recv().unwrap(), StreamMessage::Completed {});
    }

    #[test]
    fn failed_append_is_soft() {
        // No job row: the foreign key rejects the insert, record returns
        // None, nothing panics.
        let conn = open_memory_database().unwrap();
        let logger = AuditLogger::new(Arc::new(StreamHub::new()));
        let result = logger.record(&conn, "ghost", AuditKind::Error, serde_json::json!({}));
        assert!(result.is_none());
    }
}
