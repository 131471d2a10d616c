//! Section execution
//!
//! One worker owns a section while it runs here. Sources are tried in
//! order; for each source every still eligible destination is attempted.
//! A pair's attempts follow the back-off schedule and stop at the first
//! terminal verdict.

use super::arbitrate::{Arbiter, Verdict};
use super::command::{display_argv, ToolCommand};
use super::runner::{ExitKind, Invoker, Outcome, SubprocessInvoker};
use super::url::{file_path, is_file_url};
use crate::error::TransferError;
use crate::model::{basename, BatchFile, Payload, SectionPolicy, Tunables, TransferItem, TransferSection};
use crate::queue::ItemHandler;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sleeps shorter than this are skipped
const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Outcome of one processed section
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    /// Logical file name
    pub lfn: String,
    /// Policy the section ran under
    pub policy: SectionPolicy,
    /// Final verdict for the section
    pub success: bool,
    /// Destinations that received the file
    pub destinations_done: usize,
    /// Destinations counted as failed
    pub destinations_failed: usize,
    /// Tool invocations and symlink attempts made
    pub attempts: u32,
    /// Last per-pair failure, when the section failed
    pub last_error: Option<TransferError>,
    /// Time spent on the section
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Executes queued items
pub struct Engine {
    command: ToolCommand,
    arbiter: Arbiter,
    invoker: Arc<dyn Invoker>,
    force_symlink: bool,
    failed: Mutex<Vec<SectionReport>>,
}

impl Engine {
    /// Create an engine running real child processes
    pub fn new(command: ToolCommand, arbiter: Arbiter) -> Self {
        Self {
            command,
            arbiter,
            invoker: Arc::new(SubprocessInvoker::default()),
            force_symlink: false,
            failed: Mutex::new(Vec::new()),
        }
    }

    /// Replace the process invoker
    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Replace existing destinations on the symlink path
    pub fn with_force_symlink(mut self, force: bool) -> Self {
        self.force_symlink = force;
        self
    }

    /// Argument builder in use
    pub fn command(&self) -> &ToolCommand {
        &self.command
    }

    /// Reports of failed sections so far
    pub fn take_failed_reports(&self) -> Vec<SectionReport> {
        match self.failed.lock() {
            Ok(mut failed) => std::mem::take(&mut *failed),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Run every eligible pair of `section` under its policy
    pub fn run_section(&self, section: &mut TransferSection, tunables: &Tunables) -> SectionReport {
        let start = Instant::now();
        let policy = section.policy;
        let mut attempts = 0;
        let mut any_success = false;
        let mut last_error = None;

        'sources: for si in 0..section.sources().len() {
            for di in 0..section.destinations().len() {
                if !section.destinations()[di].is_eligible(policy) {
                    continue;
                }
                let src = section.sources()[si].uri.clone();
                let dst = section.destinations()[di].uri.clone();
                let (verdict, tries) = self.transfer_pair(&src, &dst, tunables);
                attempts += tries;

                match verdict {
                    Verdict::Success => {
                        section.destination_mut(di).done = true;
                        any_success = true;
                        if policy != SectionPolicy::All || section.all_done() {
                            break 'sources;
                        }
                    }
                    Verdict::MissingSource => {
                        section.source_mut(si).missing = true;
                        last_error = verdict.into_error();
                        continue 'sources;
                    }
                    Verdict::ServerDown => {
                        warn!(destination = %dst, "destination refuses connections, skipping it");
                        section.destination_mut(di).unreachable = true;
                        last_error = verdict.into_error();
                    }
                    Verdict::Retry | Verdict::HardFail => {
                        last_error = verdict.into_error();
                    }
                }
            }
        }

        let success = match policy {
            SectionPolicy::Any => any_success,
            SectionPolicy::All => section.all_done(),
            SectionPolicy::Optional => any_success || section.all_sources_missing(),
        };
        let done = section.done_count();
        let failed = if policy == SectionPolicy::All || !success {
            section.destinations().len() - done
        } else {
            0
        };

        if success && !any_success {
            info!(lfn = %section.lfn, "all sources missing, optional section skipped");
        }
        SectionReport {
            lfn: section.lfn.clone(),
            policy,
            success,
            destinations_done: done,
            destinations_failed: failed,
            attempts,
            last_error: if success { None } else { last_error },
            elapsed: start.elapsed(),
        }
    }

    /// Attempt one pair until a terminal verdict or the attempts run out
    fn transfer_pair(&self, src: &str, dst: &str, tunables: &Tunables) -> (Verdict, u32) {
        if is_file_url(src) && is_file_url(dst) {
            pause(tunables.delay_before(1), 1);
            return (self.link_pair(src, dst), 1);
        }

        let name = basename(dst);
        for attempt in 1..=tunables.retries {
            pause(tunables.delay_before(attempt), attempt);

            let argv = self.command.pair(src, dst, tunables, attempt);
            debug!(worker = %worker_name(), attempt, "{}", display_argv(&argv));
            let start = Instant::now();
            let outcome = self.invoker.run(&argv);
            let elapsed = start.elapsed().as_secs_f64();
            let verdict = self.arbiter.judge(&outcome);
            log_attempt(attempt, &outcome, elapsed, name, verdict);

            if verdict.is_terminal() {
                return (verdict, attempt);
            }
        }
        (Verdict::Retry, tunables.retries)
    }

    fn link_pair(&self, src: &str, dst: &str) -> Verdict {
        let start = Instant::now();
        let result = match (file_path(src), file_path(dst)) {
            (Some(from), Some(to)) => full_symlink(&from, &to, self.force_symlink),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "malformed file URL")),
        };
        let elapsed = start.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                info!(worker = %worker_name(), attempt = 1, status = 0, elapsed, "\"{}\" linked", basename(dst));
                Verdict::Success
            }
            Err(e) => {
                warn!(worker = %worker_name(), attempt = 1, status = 1, elapsed, "\"{}\" {}", basename(dst), e);
                Verdict::HardFail
            }
        }
    }

    /// One from-file invocation; the tool's own restart handles retries
    pub fn run_batch(&self, batch: &BatchFile, tunables: &Tunables) -> bool {
        let argv = self.command.batch(batch.path(), tunables);
        debug!(worker = %worker_name(), attempt = 1, "{}", display_argv(&argv));
        let start = Instant::now();
        let outcome = self.invoker.run_streaming(&argv, &mut |line| {
            info!(
                worker = %worker_name(),
                elapsed = start.elapsed().as_secs_f64(),
                "{}",
                line
            );
        });
        let elapsed = start.elapsed().as_secs_f64();
        let ok = outcome.status == ExitKind::Exited(0);
        let label = batch.path().display();
        if ok {
            info!(worker = %worker_name(), status = 0, elapsed, pairs = batch.pairs, "\"{}\"", label);
        } else {
            warn!(
                worker = %worker_name(),
                status = outcome.code().unwrap_or(-1),
                signal = outcome.signal(),
                elapsed,
                pairs = batch.pairs,
                "\"{}\" failed",
                label
            );
        }
        ok
    }

    fn record_failure(&self, report: SectionReport) {
        match self.failed.lock() {
            Ok(mut failed) => failed.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
    }
}

impl ItemHandler for Engine {
    fn process(&self, item: &mut TransferItem) -> bool {
        let tunables = item.tunables;
        match &mut item.payload {
            Payload::Section(section) => {
                let report = self.run_section(section, &tunables);
                if report.success {
                    true
                } else {
                    warn!(
                        lfn = %report.lfn,
                        policy = %report.policy,
                        done = report.destinations_done,
                        failed = report.destinations_failed,
                        "section failed: {}",
                        report.last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
                    );
                    self.record_failure(report);
                    false
                }
            }
            Payload::Batch(batch) => self.run_batch(batch, &tunables),
        }
    }
}

fn worker_name() -> String {
    thread::current().name().unwrap_or("main").to_string()
}

fn pause(delay: Duration, attempt: u32) {
    if delay >= MIN_SLEEP {
        info!(worker = %worker_name(), attempt, "sleeping for {:.3} s", delay.as_secs_f64());
        thread::sleep(delay);
    }
}

fn log_attempt(attempt: u32, outcome: &Outcome, elapsed: f64, name: &str, verdict: Verdict) {
    let status = outcome.code().unwrap_or(-1);
    let signal = outcome.signal();
    if verdict == Verdict::Success {
        info!(worker = %worker_name(), attempt, status, signal, elapsed, "\"{}\" {}", name, outcome.output);
    } else {
        warn!(
            worker = %worker_name(),
            attempt,
            status,
            signal,
            elapsed,
            verdict = ?verdict,
            "\"{}\" {}",
            name,
            outcome.output
        );
    }
}

/// Create `to` as a symlink to `from`, creating parent directories
pub fn full_symlink(from: &Path, to: &Path, force: bool) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if force {
        match fs::remove_file(to) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    std::os::unix::fs::symlink(from, to)
}
