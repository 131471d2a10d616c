//! Aggregate counters of the work queue

use serde::{Serialize, Serializer};
use std::time::Duration;

/// Counters updated under the queue lock
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    /// Worker threads started over the run
    pub threads_spawned: u64,
    /// Items admitted
    pub requests: u64,
    /// Items the engine reported successful
    pub successes: u64,
    /// Items that failed, including those lost to worker start failures
    pub failures: u64,
    /// Time spent inside the engine
    #[serde(serialize_with = "secs")]
    pub timesum: Duration,
    /// Time from admission to completion
    #[serde(serialize_with = "secs")]
    pub waitsum: Duration,
}

fn secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl QueueStats {
    /// Fold one finished item into the counters
    pub fn record(&mut self, success: bool, processing: Duration, in_queue: Duration) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.timesum += processing;
        self.waitsum += in_queue;
    }

    /// Items finished either way
    pub fn completed(&self) -> u64 {
        self.successes + self.failures
    }

    /// Mean engine time per request in seconds
    pub fn time_per_request(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.timesum.as_secs_f64() / self.requests as f64
        }
    }

    /// Requests per second of engine time
    pub fn spawn_rate(&self) -> f64 {
        let t = self.timesum.as_secs_f64();
        if t <= 1e-6 {
            0.0
        } else {
            self.requests as f64 / t
        }
    }

    /// Mean time in queue per request in seconds
    pub fn queue_time_per_request(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.waitsum.as_secs_f64() / self.requests as f64
        }
    }

    /// Time spent waiting for a worker rather than being processed
    pub fn pure_wait(&self) -> Duration {
        self.waitsum.saturating_sub(self.timesum)
    }

    /// Engine time over wall time; `None` if the run was too short to tell
    pub fn speed_up(&self, wall: Duration) -> Option<f64> {
        if wall <= Duration::from_millis(1) {
            None
        } else {
            Some(self.timesum.as_secs_f64() / wall.as_secs_f64())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_rates() {
        let mut stats = QueueStats {
            requests: 4,
            ..Default::default()
        };
        stats.record(true, Duration::from_secs(2), Duration::from_secs(3));
        stats.record(true, Duration::from_secs(2), Duration::from_secs(5));
        stats.record(false, Duration::from_secs(4), Duration::from_secs(4));
        stats.record(true, Duration::ZERO, Duration::ZERO);

        assert_eq!(stats.successes, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.completed(), 4);
        assert_eq!(stats.time_per_request(), 2.0);
        assert_eq!(stats.spawn_rate(), 0.5);
        assert_eq!(stats.queue_time_per_request(), 3.0);
        assert_eq!(stats.pure_wait(), Duration::from_secs(4));
        assert_eq!(stats.speed_up(Duration::from_secs(4)), Some(2.0));
        assert_eq!(stats.speed_up(Duration::from_micros(500)), None);
    }

    #[test]
    fn test_empty_rates() {
        let stats = QueueStats::default();
        assert_eq!(stats.time_per_request(), 0.0);
        assert_eq!(stats.spawn_rate(), 0.0);
    }

    #[test]
    fn test_json_seconds() {
        let stats = QueueStats {
            timesum: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["timesum"], 1.5);
        assert_eq!(json["requests"], 0);
    }
}
