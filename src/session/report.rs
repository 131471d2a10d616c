//! Completion report

use crate::engine::SectionReport;
use crate::error::Result;
use crate::queue::QueueStats;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Exit code of a run in which some transfer failed
pub const EXIT_TRANSFER_FAILED: i32 = 42;

/// Aggregate outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Queue counters
    pub stats: QueueStats,
    /// Wall-clock duration of the run
    #[serde(serialize_with = "secs")]
    pub wall: Duration,
    /// Engine time over wall time, when measurable
    pub speed_up: Option<f64>,
    /// Sections that did not succeed
    pub failed_sections: Vec<SectionReport>,
}

fn secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RunSummary {
    /// Build the summary of a finished run
    pub fn new(stats: QueueStats, wall: Duration, failed_sections: Vec<SectionReport>) -> Self {
        let speed_up = stats.speed_up(wall);
        Self {
            stats,
            wall,
            speed_up,
            failed_sections,
        }
    }

    /// True when no item failed
    pub fn all_succeeded(&self) -> bool {
        self.stats.failures == 0
    }

    /// Process exit code for the run
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            EXIT_TRANSFER_FAILED
        }
    }

    /// Comment lines for the text report; fewer lines as `quiet` grows
    pub fn text_lines(&self, quiet: i32) -> Vec<String> {
        let s = &self.stats;
        let mut lines = Vec::new();
        if quiet >= 2 {
            return lines;
        }
        lines.push(format!(
            "# {} threads, {} requests, {} successes, {} failures",
            s.threads_spawned, s.requests, s.successes, s.failures
        ));
        if quiet >= 1 {
            return lines;
        }
        lines.push(format!(
            "# {:.3} s for {} requests = {:.3} s per request, {:.1}/s spawn rate",
            s.timesum.as_secs_f64(),
            s.requests,
            s.time_per_request(),
            s.spawn_rate()
        ));
        lines.push(format!(
            "# {:.3} s in Q of which {:.3} s pure wait; {:.3} s Qtime per request",
            s.waitsum.as_secs_f64(),
            s.pure_wait().as_secs_f64(),
            s.queue_time_per_request()
        ));
        lines.push(match self.speed_up {
            Some(x) => format!("# {:.3} s wall time, speed-up of {:.1}", self.wall.as_secs_f64(), x),
            None => format!("# {:.3} s wall time, speed-up unknown", self.wall.as_secs_f64()),
        });
        lines
    }

    /// Pretty JSON document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
