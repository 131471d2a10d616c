//! Routing of manifest sections into the queue or the batcher

use super::report::RunSummary;
use crate::batch::Batcher;
use crate::config::TransferConfig;
use crate::engine::{is_file_url, Engine};
use crate::error::{GridXferError, Result};
use crate::model::{TransferItem, TransferSection, Tunables};
use crate::queue::WorkQueue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// One run: sections in, summary out
pub struct TransferSession {
    queue: WorkQueue,
    engine: Arc<Engine>,
    batcher: Option<Batcher>,
    tunables: Tunables,
    started: Instant,
    rejected: u64,
}

impl TransferSession {
    /// Start a session; batching is used when the tool supports it and the
    /// configuration allows it
    pub fn new(config: &TransferConfig, engine: Arc<Engine>) -> Self {
        let tunables = Tunables::from_config(config);
        let queue = WorkQueue::new(config.parallel, config.queue_limit(), engine.clone());
        let batcher = (config.batching && engine.command().capabilities().supports_batching())
            .then(|| Batcher::new(config.parallel, config.placement, tunables));
        if config.batching && batcher.is_none() {
            debug!("copy tool cannot read pairs from a file, batching disabled");
        }
        Self::with_parts(queue, engine, batcher, tunables)
    }

    /// Assemble a session from prepared parts
    pub fn with_parts(
        queue: WorkQueue,
        engine: Arc<Engine>,
        batcher: Option<Batcher>,
        tunables: Tunables,
    ) -> Self {
        Self {
            queue,
            engine,
            batcher,
            tunables,
            started: Instant::now(),
            rejected: 0,
        }
    }

    /// Whether single pairs are being collected into batch files
    pub fn is_batching(&self) -> bool {
        self.batcher.is_some()
    }

    /// Hand one section to the batcher or the queue
    ///
    /// Sections without a source or destination, and worker start
    /// failures, are logged and counted as failures; only queue faults
    /// are returned.
    pub fn submit(&mut self, section: TransferSection) -> Result<()> {
        if let Err(e) = section.validate() {
            error!(lfn = %section.lfn, "rejecting section: {}", e);
            self.rejected += 1;
            return Ok(());
        }

        if let Some(batcher) = self.batcher.as_mut() {
            if section.is_single_pair() {
                let src = &section.sources()[0].uri;
                let dst = &section.destinations()[0].uri;
                if !(is_file_url(src) && is_file_url(dst)) {
                    match batcher.add(src, dst) {
                        Ok(_) => return Ok(()),
                        Err(e) => warn!(lfn = %section.lfn, "batching failed, queueing directly: {}", e),
                    }
                }
            }
        }

        let lfn = section.lfn.clone();
        match self.queue.add(TransferItem::section(section, self.tunables)) {
            Ok(()) => Ok(()),
            Err(e @ GridXferError::ThreadPool(_)) => {
                error!(lfn = %lfn, "unable to queue transfer: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Queue the batch files, wait for every worker and summarize
    pub fn finish(mut self) -> Result<RunSummary> {
        if let Some(batcher) = self.batcher.take() {
            for item in batcher.finish()? {
                let label = item.label();
                match self.queue.add(item) {
                    Ok(()) => {}
                    Err(e @ GridXferError::ThreadPool(_)) => {
                        error!("unable to queue batch {}: {}", label, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        let mut stats = self.queue.destroy()?;
        stats.requests += self.rejected;
        stats.failures += self.rejected;
        let wall = self.started.elapsed();
        Ok(RunSummary::new(stats, wall, self.engine.take_failed_reports()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Placement;
    use crate::engine::{Arbiter, ExitKind, Invoker, Outcome, ToolCommand};
    use crate::probe::Capabilities;
    use std::ffi::OsString;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        argvs: Mutex<Vec<Vec<String>>>,
    }

    impl Invoker for Recorder {
        fn run_streaming(&self, argv: &[OsString], _: &mut dyn FnMut(&str)) -> Outcome {
            let args: Vec<String> = argv.iter().map(|a| a.to_string_lossy().into_owned()).collect();
            let fail = args.iter().any(|a| a.contains("bad"));
            self.argvs.lock().unwrap().push(args);
            Outcome {
                status: ExitKind::Exited(if fail { 127 } else { 0 }),
                output: String::new(),
            }
        }
    }

    fn session(caps: Capabilities, batching: bool) -> (TransferSession, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let command = ToolCommand::new("guc", vec![], caps, true, 0);
        let engine = Arc::new(Engine::new(command, Arbiter::default()).with_invoker(recorder.clone()));
        let config = TransferConfig {
            parallel: 2,
            batching,
            placement: Placement::RoundRobin,
            retries: 1,
            ..Default::default()
        };
        (TransferSession::new(&config, engine), recorder)
    }

    fn uses_file_list(argv: &[String]) -> bool {
        argv.iter().any(|a| a == "-f")
    }

    #[test]
    fn test_without_from_file_no_batches() {
        let (mut session, recorder) = session(Capabilities::TCP_BS | Capabilities::RESTART, true);
        assert!(!session.is_batching());
        for n in 0..5 {
            session
                .submit(TransferSection::pair(format!("gsiftp://s/{}", n), format!("gsiftp://d/{}", n)))
                .unwrap();
        }
        let summary = session.finish().unwrap();
        assert_eq!(summary.stats.successes, 5);
        let argvs = recorder.argvs.lock().unwrap();
        assert_eq!(argvs.len(), 5);
        assert!(!argvs.iter().any(|a| uses_file_list(a)));
    }

    #[test]
    fn test_single_pairs_batched() {
        let (mut session, recorder) = session(Capabilities::GT40_FEATURES, true);
        assert!(session.is_batching());
        for n in 0..6 {
            session
                .submit(TransferSection::pair(format!("gsiftp://s/{}", n), format!("gsiftp://d/{}", n)))
                .unwrap();
        }
        let mut multi = TransferSection::new("m", crate::model::SectionPolicy::All);
        multi.add_source("gsiftp://s/m");
        multi.add_destination("gsiftp://d1/m");
        multi.add_destination("gsiftp://d2/m");
        session.submit(multi).unwrap();

        let summary = session.finish().unwrap();
        // two batch lists plus one section
        assert_eq!(summary.stats.requests, 3);
        assert_eq!(summary.stats.successes, 3);
        let argvs = recorder.argvs.lock().unwrap();
        assert_eq!(argvs.iter().filter(|a| uses_file_list(a)).count(), 2);
        assert_eq!(argvs.len(), 4);
    }

    #[test]
    fn test_batching_disabled_by_config() {
        let (session, _) = session(Capabilities::GT40_FEATURES, false);
        assert!(!session.is_batching());
    }

    #[test]
    fn test_file_pair_links_without_tool() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, "x").unwrap();
        let (mut session, recorder) = session(Capabilities::GT40_FEATURES, true);
        session
            .submit(TransferSection::pair(
                format!("file://{}", src.display()),
                format!("file://{}", dir.path().join("b").display()),
            ))
            .unwrap();
        let summary = session.finish().unwrap();
        assert_eq!(summary.stats.successes, 1);
        assert_eq!(summary.stats.failures, 0);
        assert!(recorder.argvs.lock().unwrap().is_empty());
        assert!(dir.path().join("b").is_symlink());
    }

    #[test]
    fn test_failures_reported() {
        let (mut session, _) = session(Capabilities::TCP_BS, true);
        session.submit(TransferSection::pair("gsiftp://s/ok", "gsiftp://d/ok")).unwrap();
        session.submit(TransferSection::pair("gsiftp://s/bad", "gsiftp://d/bad")).unwrap();
        let summary = session.finish().unwrap();
        assert_eq!(summary.exit_code(), 42);
        assert_eq!(summary.failed_sections.len(), 1);
        assert_eq!(summary.failed_sections[0].lfn, "bad");
    }

    #[test]
    fn test_incomplete_sections_fail() {
        let (mut session, recorder) = session(Capabilities::TCP_BS, true);
        let mut no_destination = TransferSection::new("nodst", crate::model::SectionPolicy::All);
        no_destination.add_source("gsiftp://s/nodst");
        let mut no_source = TransferSection::new("nosrc", crate::model::SectionPolicy::Optional);
        no_source.add_destination("gsiftp://d/nosrc");
        session.submit(no_destination).unwrap();
        session.submit(no_source).unwrap();
        session.submit(TransferSection::pair("gsiftp://s/ok", "gsiftp://d/ok")).unwrap();

        let summary = session.finish().unwrap();
        assert_eq!(summary.stats.requests, 3);
        assert_eq!(summary.stats.successes, 1);
        assert_eq!(summary.stats.failures, 2);
        assert_eq!(summary.exit_code(), 42);
        assert_eq!(recorder.argvs.lock().unwrap().len(), 1);
    }
}
