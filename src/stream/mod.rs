//! Stream hub — broadcast-only fan-out of job progress to observers.
//!
//! Observers subscribe to a channel (a job id, the `generation`
//! channel, or an `audit:<job id>` stream) and receive messages through
//! a bounded mpsc buffer. The hub is strictly live: late subscribers
//! recover state via the status query, not replay. Workers never block
//! on observers — an observer that cannot keep up within its buffer is
//! dropped and its connection closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{AuditEvent, StitchResult};

/// Bounded per-observer send buffer.
pub const OBSERVER_BUFFER: usize = 64;

/// Name of the channel carrying expansion-engine section events.
pub const GENERATION_CHANNEL: &str = "generation";

/// Channel name for a job's audit stream.
pub fn audit_channel(job_id: &str) -> String {
    format!("audit:{job_id}")
}

/// Wire status of a completed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkWireStatus {
    OnTarget,
    Retrying,
    PassedAfterRetry,
    Flagged,
}

/// Server→client message envelope: `{type, jobId, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    #[serde(rename_all = "camelCase")]
    JobStarted {
        job_id: String,
        total_chunks: u32,
        input_words: u32,
        target_words: u32,
        length_mode: String,
        length_ratio: f64,
    },
    #[serde(rename_all = "camelCase")]
    Outline {
        job_id: String,
        summary: String,
        sections: u32,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: String,
        phase: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed_chunks: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_chunks: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        words_processed: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_words: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        projected_final: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_elapsed: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_remaining: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ChunkComplete {
        job_id: String,
        chunk_index: u32,
        total_chunks: u32,
        chunk_text: String,
        actual_words: u32,
        target_words: u32,
        min_words: u32,
        max_words: u32,
        running_total: u32,
        projected_final: u32,
        status: ChunkWireStatus,
    },
    #[serde(rename_all = "camelCase")]
    Warning {
        job_id: String,
        message: String,
        projected_final: u32,
        target_words: u32,
        /// Percent shortfall against the target.
        shortfall: u32,
    },
    #[serde(rename_all = "camelCase")]
    JobComplete {
        job_id: String,
        final_output: String,
        final_word_count: u32,
        target_words: u32,
        stitch_result: StitchResult,
        time_elapsed: u64,
    },
    #[serde(rename_all = "camelCase")]
    JobFailed { job_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    JobAborted {
        job_id: String,
        completed_chunks: u32,
        total_chunks: u32,
        partial_output: String,
        word_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    SectionComplete {
        job_id: String,
        section_index: u32,
        total_sections: u32,
        name: String,
        section_text: String,
        actual_words: u32,
        target_words: u32,
        running_total: u32,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        job_id: String,
        final_output: String,
        final_word_count: u32,
        target_words: u32,
        time_elapsed: u64,
    },
    Error { message: String },

    // Audit stream envelope: history snapshot on subscribe, then live
    // entries until completion.
    History { entries: Vec<AuditEvent> },
    Entry { entry: AuditEvent },
    Completed {},
}

struct Observer {
    id: u64,
    tx: mpsc::Sender<StreamMessage>,
}

/// Fan-out hub. One instance per process, shared via `Arc`.
pub struct StreamHub {
    channels: RwLock<HashMap<String, Vec<Observer>>>,
    next_id: AtomicU64,
}

impl StreamHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to a channel. Returns the observer id (for
    /// unsubscribe) and the receiving end of the bounded buffer.
    pub fn subscribe(&self, channel: &str) -> (u64, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut channels) = self.channels.write() {
            channels
                .entry(channel.to_string())
                .or_default()
                .push(Observer { id, tx });
        }
        (id, rx)
    }

    pub fn unsubscribe(&self, channel: &str, observer_id: u64) {
        if let Ok(mut channels) = self.channels.write() {
            if let Some(observers) = channels.get_mut(channel) {
                observers.retain(|o| o.id != observer_id);
                if observers.is_empty() {
                    channels.remove(channel);
                }
            }
        }
    }

    /// Broadcast to every observer of a channel without blocking.
    ///
    /// An observer whose buffer is full (or whose receiver is gone) is
    /// dropped on the spot; its closed sender ends the connection task.
    /// Returns the number of observers that received the message.
    pub fn broadcast(&self, channel: &str, message: StreamMessage) -> usize {
        let Ok(mut channels) = self.channels.write() else {
            return 0;
        };
        let Some(observers) = channels.get_mut(channel) else {
            return 0;
        };

        let before = observers.len();
        observers.retain(|observer| match observer.tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(channel, observer = observer.id, "Observer buffer full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        let delivered = observers.len();

        if delivered < before {
            tracing::debug!(channel, dropped = before - delivered, "Observers dropped");
        }
        if observers.is_empty() {
            channels.remove(channel);
        }
        delivered
    }

    pub fn observer_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(channel).map(Vec::len))
            .unwrap_or(0)
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_msg(text: &str) -> StreamMessage {
        StreamMessage::Error {
            message: text.into(),
        }
    }

    #[test]
    fn subscribe_and_broadcast_delivers_in_order() {
        let hub = StreamHub::new();
        let (_, mut rx) = hub.subscribe("job-1");

        hub.broadcast("job-1", error_msg("one"));
        hub.broadcast("job-1", error_msg("two"));

        assert_eq!(rx.try_recv().unwrap(), error_msg("one"));
        assert_eq!(rx.try_recv().unwrap(), error_msg("two"));
    }

    #[test]
    fn channels_are_isolated() {
        let hub = StreamHub::new();
        let (_, mut rx_a) = hub.subscribe("job-a");
        let (_, mut rx_b) = hub.subscribe("job-b");

        hub.broadcast("job-a", error_msg("for a"));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_observers_is_noop() {
        let hub = StreamHub::new();
        assert_eq!(hub.broadcast("nobody", error_msg("x")), 0);
    }

    #[test]
    fn slow_observer_is_dropped_not_blocked() {
        let hub = StreamHub::new();
        let (_, mut rx) = hub.subscribe("job-1");

        // Fill the buffer without draining.
        for i in 0..OBSERVER_BUFFER {
            assert_eq!(hub.broadcast("job-1", error_msg(&format!("m{i}"))), 1);
        }
        // Overflow: the observer is dropped, the worker does not block.
        assert_eq!(hub.broadcast("job-1", error_msg("overflow")), 0);
        assert_eq!(hub.observer_count("job-1"), 0);

        // The buffered messages are still readable; the channel then ends.
        for _ in 0..OBSERVER_BUFFER {
            assert!(rx.try_recv().is_ok());
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_removes_observer() {
        let hub = StreamHub::new();
        let (_, rx) = hub.subscribe("job-1");
        drop(rx);

        assert_eq!(hub.broadcast("job-1", error_msg("x")), 0);
        assert_eq!(hub.observer_count("job-1"), 0);
    }

    #[test]
    fn unsubscribe_removes_observer() {
        let hub = StreamHub::new();
        let (id, _rx) = hub.subscribe("job-1");
        assert_eq!(hub.observer_count("job-1"), 1);

        hub.unsubscribe("job-1", id);
        assert_eq!(hub.observer_count("job-1"), 0);
    }

    #[test]
    fn multiple_observers_all_receive() {
        let hub = StreamHub::new();
        let (_, mut rx1) = hub.subscribe("job-1");
        let (_, mut rx2) = hub.subscribe("job-1");

        assert_eq!(hub.broadcast("job-1", error_msg("both")), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn envelope_serializes_with_type_and_job_id() {
        let msg = StreamMessage::JobStarted {
            job_id: "job-1".into(),
            total_chunks: 3,
            input_words: 3000,
            target_words: 3000,
            length_mode: "preserve".into(),
            length_ratio: 1.0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "job_started");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["totalChunks"], 3);
        assert_eq!(json["lengthMode"], "preserve");
    }

    #[test]
    fn chunk_complete_serializes_status() {
        let msg = StreamMessage::ChunkComplete {
            job_id: "j".into(),
            chunk_index: 2,
            total_chunks: 5,
            chunk_text: "text".into(),
            actual_words: 990,
            target_words: 1000,
            min_words: 850,
            max_words: 1150,
            running_total: 2990,
            projected_final: 4980,
            status: ChunkWireStatus::PassedAfterRetry,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chunk_complete");
        assert_eq!(json["status"], "passed_after_retry");
        assert_eq!(json["chunkIndex"], 2);
    }

    #[test]
    fn progress_omits_absent_fields() {
        let msg = StreamMessage::Progress {
            job_id: "j".into(),
            phase: "skeleton_extraction".into(),
            message: "extracting outline".into(),
            completed_chunks: None,
            total_chunks: None,
            words_processed: None,
            target_words: None,
            projected_final: None,
            time_elapsed: None,
            estimated_remaining: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("completedChunks"));
        assert!(json.contains("\"phase\":\"skeleton_extraction\""));
    }
}
