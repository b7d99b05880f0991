//! Scheduler diagnostics
//!
//! Bounded bookkeeping the scheduler keeps per system: a deduplication
//! window for externally-reported failures, a capped error history, and a
//! profiling sample ring. All of it is in-process state read back through
//! the scheduler's admin surface; nothing here exports metrics.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How long identical failure reports are suppressed after first emission
pub(crate) const DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Maximum retained error records per system
pub(crate) const ERROR_HISTORY_CAP: usize = 100;

/// Maximum retained profiling samples per system
pub(crate) const PROFILE_SAMPLE_CAP: usize = 60;

/// One recorded system failure
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    /// The report text, `"{system name}: {panic message}"`
    pub message: String,
    /// When the failure (or its latest coalesced repeat) happened
    pub timestamp: Instant,
}

/// Suppresses repeated identical failure reports within a rolling window.
///
/// The window starts at the first report after a reset; once more than
/// [`DEDUP_WINDOW`] has passed since the window started, the seen-set resets
/// and previously suppressed messages report again.
#[derive(Default)]
pub(crate) struct ErrorDedup {
    window_start: Option<Instant>,
    seen: FxHashSet<String>,
}

impl ErrorDedup {
    /// Record a report; returns `true` when it should be emitted
    pub(crate) fn note(&mut self, report: &str, now: Instant) -> bool {
        let expired = self
            .window_start
            .map_or(true, |start| now.duration_since(start) > DEDUP_WINDOW);
        if expired {
            self.window_start = Some(now);
            self.seen.clear();
        }
        self.seen.insert(report.to_string())
    }
}

/// Bounded per-system error history with consecutive-identical coalescing
#[derive(Default)]
pub(crate) struct ErrorLog {
    records: VecDeque<ErrorRecord>,
}

impl ErrorLog {
    /// Append a failure, coalescing into the previous record when the
    /// message is identical (updating its timestamp instead of duplicating)
    pub(crate) fn push(&mut self, message: &str, now: Instant) {
        if let Some(last) = self.records.back_mut() {
            if last.message == message {
                last.timestamp = now;
                return;
            }
        }
        self.records.push_back(ErrorRecord {
            message: message.to_string(),
            timestamp: now,
        });
        if self.records.len() > ERROR_HISTORY_CAP {
            self.records.pop_front();
        }
    }

    pub(crate) fn records(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }
}

/// Fixed-size ring of the most recent profiling samples
#[derive(Default)]
pub(crate) struct SampleRing {
    samples: VecDeque<Duration>,
}

impl SampleRing {
    pub(crate) fn push(&mut self, sample: Duration) {
        if self.samples.len() == PROFILE_SAMPLE_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub(crate) fn clear(&mut self) {
        self.samples.clear();
    }

    pub(crate) fn samples(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_suppresses_within_window() {
        let mut dedup = ErrorDedup::default();
        let t0 = Instant::now();

        assert!(dedup.note("boom", t0));
        assert!(!dedup.note("boom", t0 + Duration::from_secs(1)));
        assert!(!dedup.note("boom", t0 + Duration::from_secs(9)));

        // Different message within the window still reports.
        assert!(dedup.note("crash", t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_dedup_window_resets() {
        let mut dedup = ErrorDedup::default();
        let t0 = Instant::now();

        assert!(dedup.note("boom", t0));
        assert!(!dedup.note("boom", t0 + Duration::from_secs(5)));
        assert!(dedup.note("boom", t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_error_log_coalesces_consecutive() {
        let mut log = ErrorLog::default();
        let t0 = Instant::now();

        log.push("boom", t0);
        log.push("boom", t0 + Duration::from_secs(1));
        log.push("crash", t0 + Duration::from_secs(2));
        log.push("boom", t0 + Duration::from_secs(3));

        let records = log.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "boom");
        assert_eq!(records[0].timestamp, t0 + Duration::from_secs(1));
        assert_eq!(records[1].message, "crash");
        assert_eq!(records[2].message, "boom");
    }

    #[test]
    fn test_error_log_caps_at_limit() {
        let mut log = ErrorLog::default();
        let t0 = Instant::now();

        for i in 0..(ERROR_HISTORY_CAP + 10) {
            log.push(&format!("error {i}"), t0);
        }

        let records = log.records();
        assert_eq!(records.len(), ERROR_HISTORY_CAP);
        // Oldest dropped first.
        assert_eq!(records[0].message, "error 10");
    }

    #[test]
    fn test_sample_ring_overwrites_oldest() {
        let mut ring = SampleRing::default();
        for i in 0..(PROFILE_SAMPLE_CAP + 5) {
            ring.push(Duration::from_micros(i as u64));
        }

        let samples = ring.samples();
        assert_eq!(samples.len(), PROFILE_SAMPLE_CAP);
        assert_eq!(samples[0], Duration::from_micros(5));

        ring.clear();
        assert!(ring.samples().is_empty());
    }
}
