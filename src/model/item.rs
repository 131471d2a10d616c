//! Work items handed to the queue
//!
//! An item owns its payload exclusively: the manifest reader builds it, the
//! queue holds it while pending, and exactly one worker processes it.

use super::section::TransferSection;
use crate::config::TransferConfig;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Per-item tuning passed to the copy tool and the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tunables {
    /// TCP buffer size in bytes (0 = tool default)
    pub tcp_buffer_size: u32,
    /// Parallel data streams (>= 1)
    pub streams: u32,
    /// Maximum attempts per pair (>= 1)
    pub retries: u32,
    /// Sleep before the first attempt
    pub initial: Duration,
    /// Base of the exponential back-off for later attempts
    pub backoff: Duration,
}

impl Tunables {
    /// Create tunables, lifting `streams` and `retries` to at least one
    pub fn new(
        tcp_buffer_size: u32,
        streams: u32,
        retries: u32,
        initial: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            tcp_buffer_size,
            streams: streams.max(1),
            retries: retries.max(1),
            initial,
            backoff,
        }
    }

    /// Take the run-wide defaults from the configuration
    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.tcp_buffer_size,
            config.streams,
            config.retries,
            config.initial,
            config.backoff,
        )
    }

    /// Delay before `attempt` (1-based): `initial` first, then `backoff * 2^(n-2)`
    pub fn delay_before(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.initial, self.backoff)
    }

    /// Whether tuning flags are passed on `attempt`; the last of several
    /// attempts runs with tool defaults
    pub fn tuned_attempt(&self, attempt: u32) -> bool {
        self.retries == 1 || attempt < self.retries
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(0, 1, 3, Duration::ZERO, Duration::from_secs(5))
    }
}

/// Exponential back-off schedule
pub fn backoff_delay(attempt: u32, initial: Duration, backoff: Duration) -> Duration {
    if attempt <= 1 {
        return initial;
    }
    let exponent = (attempt - 2).min(31);
    backoff.saturating_mul(1u32 << exponent)
}

/// A temporary pair list for one from-file invocation
#[derive(Debug)]
pub struct BatchFile {
    file: NamedTempFile,
    /// Number of pairs written
    pub pairs: usize,
}

impl BatchFile {
    pub(crate) fn new(file: NamedTempFile, pairs: usize) -> Self {
        Self { file, pairs }
    }

    /// Location of the pair list on disk
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// What a work item asks the engine to do
#[derive(Debug)]
pub enum Payload {
    /// Per-pair transfers governed by a section policy
    Section(TransferSection),
    /// One bulk invocation reading its pairs from a file
    Batch(BatchFile),
}

/// One queued unit of work
#[derive(Debug)]
pub struct TransferItem {
    /// Work to perform
    pub payload: Payload,
    /// Tuning for this item
    pub tunables: Tunables,
    /// When the item was admitted to the queue
    pub queued_at: Instant,
    /// Time spent inside the engine
    pub processing: Duration,
}

impl TransferItem {
    /// Wrap a section
    pub fn section(section: TransferSection, tunables: Tunables) -> Self {
        Self::new(Payload::Section(section), tunables)
    }

    /// Wrap a batch file
    pub fn batch(batch: BatchFile, tunables: Tunables) -> Self {
        Self::new(Payload::Batch(batch), tunables)
    }

    fn new(payload: Payload, tunables: Tunables) -> Self {
        Self {
            payload,
            tunables,
            queued_at: Instant::now(),
            processing: Duration::ZERO,
        }
    }

    /// Human-readable label used in log lines
    pub fn label(&self) -> String {
        match &self.payload {
            Payload::Section(section) => section.lfn.clone(),
            Payload::Batch(batch) => batch.path().display().to_string(),
        }
    }

    /// Time between admission and now
    pub fn queue_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tunables_floor() {
        let t = Tunables::new(0, 0, 0, Duration::ZERO, Duration::ZERO);
        assert_eq!(t.streams, 1);
        assert_eq!(t.retries, 1);
    }

    #[test]
    fn test_backoff_schedule() {
        let initial = Duration::from_millis(100);
        let backoff = Duration::from_secs(5);
        assert_eq!(backoff_delay(1, initial, backoff), initial);
        assert_eq!(backoff_delay(2, initial, backoff), Duration::from_secs(5));
        assert_eq!(backoff_delay(3, initial, backoff), Duration::from_secs(10));
        assert_eq!(backoff_delay(4, initial, backoff), Duration::from_secs(20));
    }

    #[test]
    fn test_tuned_attempt() {
        let single = Tunables::new(0, 1, 1, Duration::ZERO, Duration::ZERO);
        assert!(single.tuned_attempt(1));

        let three = Tunables::new(0, 1, 3, Duration::ZERO, Duration::ZERO);
        assert!(three.tuned_attempt(1));
        assert!(three.tuned_attempt(2));
        assert!(!three.tuned_attempt(3));
    }

    proptest! {
        #[test]
        fn prop_backoff_non_decreasing(backoff_ms in 0u64..10_000, attempts in 2u32..20) {
            let backoff = Duration::from_millis(backoff_ms);
            let mut previous = backoff_delay(2, Duration::ZERO, backoff);
            for attempt in 3..=attempts {
                let next = backoff_delay(attempt, Duration::ZERO, backoff);
                prop_assert!(next >= previous);
                prop_assert_eq!(next, backoff * 2u32.pow(attempt - 2));
                previous = next;
            }
        }
    }
}
