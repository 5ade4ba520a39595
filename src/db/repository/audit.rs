use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::{AuditEvent, AuditKind};

/// Next sequence number for a job's audit stream (1-based, contiguous).
pub fn next_sequence(conn: &Connection, job_id: &str) -> Result<u64, DatabaseError> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM audit_events WHERE job_id = ?1",
        params![job_id],
        |row| row.get(0),
    )?;
    Ok(max as u64 + 1)
}

/// Append one event. `(job_id, sequence)` uniqueness is enforced by the
/// primary key; a duplicate insert is a hard error, never an overwrite.
pub fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_events (job_id, sequence, timestamp, kind, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.job_id,
            event.sequence as i64,
            event.timestamp,
            event.kind.as_str(),
            event.payload.to_string(),
        ],
    )?;
    Ok(())
}

/// Full audit history of a job in sequence order.
pub fn list_events(conn: &Connection, job_id: &str) -> Result<Vec<AuditEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT job_id, sequence, timestamp, kind, payload
         FROM audit_events WHERE job_id = ?1 ORDER BY sequence ASC",
    )?;
    let rows = stmt.query_map(params![job_id], |row| {
        let sequence: i64 = row.get(1)?;
        let kind_raw: String = row.get(3)?;
        let payload_raw: String = row.get(4)?;
        Ok(AuditEvent {
            job_id: row.get(0)?,
            sequence: sequence as u64,
            timestamp: row.get(2)?,
            kind: AuditKind::parse(&kind_raw).unwrap_or(AuditKind::Error),
            payload: serde_json::from_str(&payload_raw)
                .unwrap_or(serde_json::Value::Null),
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::job::{insert_job, tests::sample_job};

    fn event(job_id: &str, sequence: u64, kind: AuditKind) -> AuditEvent {
        AuditEvent {
            job_id: job_id.into(),
            sequence,
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            payload: serde_json::json!({"n": sequence}),
        }
    }

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();

        assert_eq!(next_sequence(&conn, "job-1").unwrap(), 1);
        insert_event(&conn, &event("job-1", 1, AuditKind::JobStarted)).unwrap();
        assert_eq!(next_sequence(&conn, "job-1").unwrap(), 2);
    }

    #[test]
    fn duplicate_sequence_rejected() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();

        insert_event(&conn, &event("job-1", 1, AuditKind::JobStarted)).unwrap();
        let err = insert_event(&conn, &event("job-1", 1, AuditKind::LlmCall));
        assert!(err.is_err(), "append-only log must reject duplicates");
    }

    #[test]
    fn sequences_are_per_job() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();
        insert_job(&conn, &sample_job("job-2")).unwrap();

        insert_event(&conn, &event("job-1", 1, AuditKind::JobStarted)).unwrap();
        assert_eq!(next_sequence(&conn, "job-2").unwrap(), 1);
    }

    #[test]
    fn history_is_ordered_and_complete() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();

        for seq in 1..=5 {
            insert_event(&conn, &event("job-1", seq, AuditKind::LlmCall)).unwrap();
        }

        let events = list_events(&conn, "job-1").unwrap();
        assert_eq!(events.len(), 5);
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.sequence, i as u64 + 1);
        }
    }

    #[test]
    fn events_cascade_with_job_deletion() {
        let conn = open_memory_database().unwrap();
        insert_job(&conn, &sample_job("job-1")).unwrap();
        insert_event(&conn, &event("job-1", 1, AuditKind::JobStarted)).unwrap();

        conn.execute("DELETE FROM jobs WHERE id = 'job-1'", []).unwrap();
        assert!(list_events(&conn, "job-1").unwrap().is_empty());
    }
}
