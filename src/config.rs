use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Reweave";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input size bounds (words). Shorter documents are rejected before a
/// job is created; longer ones likewise.
pub const MIN_INPUT_WORDS: u32 = 501;
pub const MAX_INPUT_WORDS: u32 = 50_000;

/// Get the application data directory (~/Reweave on all platforms).
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(APP_NAME)
}

/// Path of the SQLite database file.
pub fn database_path() -> PathBuf {
    app_data_dir().join("reweave.db")
}

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> &'static str {
    "reweave=info"
}

/// Socket address the API server binds, from `REWEAVE_BIND`.
pub fn bind_addr() -> SocketAddr {
    std::env::var("REWEAVE_BIND")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| "127.0.0.1:8787".parse().expect("default bind addr"))
}

/// Generation model name, from `REWEAVE_MODEL`.
pub fn model_name() -> String {
    std::env::var("REWEAVE_MODEL").unwrap_or_else(|_| "llama3.1:8b".to_string())
}

// ═══════════════════════════════════════════════════════════
// Pacing — rate-limit smoothing pauses
// ═══════════════════════════════════════════════════════════

/// Pauses between LLM calls. Not correctness-critical — they smooth
/// request bursts against the provider — so tests disable them.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Pause between continuation attempts within a chunk.
    pub continuation_pause: Duration,
    /// Bounds of the pause between chunks.
    pub chunk_pause_min: Duration,
    pub chunk_pause_max: Duration,
    /// Whether retry backoff sleeps are honoured.
    pub backoff_enabled: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            continuation_pause: Duration::from_millis(300),
            chunk_pause_min: Duration::from_millis(500),
            chunk_pause_max: Duration::from_millis(2000),
            backoff_enabled: true,
        }
    }
}

impl PacingConfig {
    /// All pauses zeroed; used by tests and local stub runs.
    pub fn disabled() -> Self {
        Self {
            continuation_pause: Duration::ZERO,
            chunk_pause_min: Duration::ZERO,
            chunk_pause_max: Duration::ZERO,
            backoff_enabled: false,
        }
    }

    /// Deterministic inter-chunk pause within [min, max], spread by
    /// chunk index so consecutive chunks do not land on the same delay.
    pub fn chunk_pause(&self, chunk_index: u32) -> Duration {
        let span = self
            .chunk_pause_max
            .saturating_sub(self.chunk_pause_min)
            .as_millis() as u64;
        if span == 0 {
            return self.chunk_pause_min;
        }
        let offset = (u64::from(chunk_index) * 359) % (span + 1);
        self.chunk_pause_min + Duration::from_millis(offset)
    }

    /// Skeleton-extraction backoff: exponential, base 1s, capped at 30s.
    pub fn skeleton_backoff(&self, attempt: u32) -> Duration {
        if !self.backoff_enabled {
            return Duration::ZERO;
        }
        let secs = 1u64.checked_shl(attempt).unwrap_or(30).min(30);
        Duration::from_secs(secs)
    }

    /// Chunk retry backoff: 2s, 5s, 15s.
    pub fn chunk_backoff(&self, attempt: u32) -> Duration {
        if !self.backoff_enabled {
            return Duration::ZERO;
        }
        match attempt {
            0 => Duration::from_secs(2),
            1 => Duration::from_secs(5),
            _ => Duration::from_secs(15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Reweave"));
    }

    #[test]
    fn input_bounds_match_protocol() {
        assert_eq!(MIN_INPUT_WORDS, 501);
        assert_eq!(MAX_INPUT_WORDS, 50_000);
    }

    #[test]
    fn disabled_pacing_is_all_zero() {
        let pacing = PacingConfig::disabled();
        assert_eq!(pacing.continuation_pause, Duration::ZERO);
        assert_eq!(pacing.chunk_pause(7), Duration::ZERO);
        assert_eq!(pacing.skeleton_backoff(2), Duration::ZERO);
        assert_eq!(pacing.chunk_backoff(1), Duration::ZERO);
    }

    #[test]
    fn chunk_pause_stays_within_bounds() {
        let pacing = PacingConfig::default();
        for index in 0..100 {
            let pause = pacing.chunk_pause(index);
            assert!(pause >= pacing.chunk_pause_min);
            assert!(pause <= pacing.chunk_pause_max);
        }
    }

    #[test]
    fn skeleton_backoff_caps_at_30s() {
        let pacing = PacingConfig::default();
        assert_eq!(pacing.skeleton_backoff(0), Duration::from_secs(1));
        assert_eq!(pacing.skeleton_backoff(1), Duration::from_secs(2));
        assert_eq!(pacing.skeleton_backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn chunk_backoff_ladder() {
        let pacing = PacingConfig::default();
        assert_eq!(pacing.chunk_backoff(0), Duration::from_secs(2));
        assert_eq!(pacing.chunk_backoff(1), Duration::from_secs(5));
        assert_eq!(pacing.chunk_backoff(2), Duration::from_secs(15));
    }
}
