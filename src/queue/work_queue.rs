//! Bounded work queue with a self-sizing worker pool
//!
//! Admission goes through a bounded channel, so producers block while the
//! queue holds `limit` items. Workers are started lazily by `add()` when
//! announced items outnumber idle workers and the pool is below its cap,
//! and retire on their own after an idle timeout. `destroy()` closes the channel, lets the workers
//! drain what is left and waits until the last one has exited.

use super::stats::QueueStats;
use crate::error::{GridXferError, Result};
use crate::model::TransferItem;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Processes one item on a worker thread; returns success
pub trait ItemHandler: Send + Sync {
    /// Run the item to completion
    fn process(&self, item: &mut TransferItem) -> bool;
}

impl<F> ItemHandler for F
where
    F: Fn(&mut TransferItem) -> bool + Send + Sync,
{
    fn process(&self, item: &mut TransferItem) -> bool {
        self(item)
    }
}

/// Idle time before a worker retires; larger pools wait longer
pub fn default_idle_timeout(parallel: usize) -> Duration {
    let secs = 5 + parallel.min(55) as u64;
    Duration::from_secs(secs)
}

#[derive(Debug, Default)]
struct PoolState {
    count: usize,
    idle: usize,
    /// Items announced by `add` and not yet received by a worker
    waiting: usize,
    next_id: usize,
    stats: QueueStats,
}

struct Shared {
    state: Mutex<PoolState>,
    all_done: Condvar,
    receiver: Receiver<TransferItem>,
    handler: Arc<dyn ItemHandler>,
    idle_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        Ok(self.state.lock()?)
    }

    fn retire(&self, state: &mut PoolState) {
        state.count -= 1;
        if state.count == 0 {
            self.all_done.notify_all();
        }
    }
}

/// FIFO of transfer items served by up to `parallel` worker threads
pub struct WorkQueue {
    shared: Arc<Shared>,
    sender: Option<Sender<TransferItem>>,
    parallel: usize,
    limit: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `limit` pending items
    pub fn new(parallel: usize, limit: usize, handler: Arc<dyn ItemHandler>) -> Self {
        let parallel = parallel.max(1);
        Self::with_idle_timeout(parallel, limit, handler, default_idle_timeout(parallel))
    }

    /// Same as [`WorkQueue::new`] with an explicit worker idle timeout
    pub fn with_idle_timeout(
        parallel: usize,
        limit: usize,
        handler: Arc<dyn ItemHandler>,
        idle_timeout: Duration,
    ) -> Self {
        let limit = limit.max(1);
        let (sender, receiver) = bounded(limit);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                all_done: Condvar::new(),
                receiver,
                handler,
                idle_timeout,
            }),
            sender: Some(sender),
            parallel: parallel.max(1),
            limit,
        }
    }

    /// Worker cap
    pub fn parallel(&self) -> usize {
        self.parallel
    }

    /// Capacity of the pending list
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Items admitted but not yet picked up
    pub fn pending(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Live worker threads
    pub fn workers(&self) -> Result<usize> {
        Ok(self.shared.lock()?.count)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> Result<QueueStats> {
        Ok(self.shared.lock()?.stats.clone())
    }

    /// Admit `item`, blocking while the queue is full
    ///
    /// A worker is started whenever announced items outnumber idle
    /// workers. Fails if no worker could be started to serve the item,
    /// which is then counted as a failure.
    pub fn add(&self, item: TransferItem) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| GridXferError::queue("queue already destroyed"))?;

        {
            let mut state = self.shared.lock()?;
            state.stats.requests += 1;
            state.waiting += 1;
            if state.waiting > state.idle && state.count < self.parallel {
                let id = state.next_id;
                match self.spawn_worker(id) {
                    Ok(()) => {
                        state.next_id += 1;
                        state.count += 1;
                        state.stats.threads_spawned += 1;
                        trace!("started worker {}, {} live", id, state.count);
                    }
                    Err(e) if state.count > 0 => {
                        error!("{}; {} workers continue", e, state.count);
                    }
                    Err(e) => {
                        state.waiting -= 1;
                        state.stats.failures += 1;
                        return Err(e);
                    }
                }
            }
        }

        if sender.send(item).is_err() {
            let mut state = self.shared.lock()?;
            state.waiting = state.waiting.saturating_sub(1);
            state.stats.failures += 1;
            return Err(GridXferError::queue("queue receiver is gone"));
        }
        Ok(())
    }

    fn spawn_worker(&self, id: usize) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker_loop(&shared))
            .map(|_| ())
            .map_err(|e| GridXferError::ThreadPool(e.to_string()))
    }

    /// Close the queue and wait until every worker has exited
    pub fn destroy(mut self) -> Result<QueueStats> {
        self.sender = None;
        let mut state = self.shared.lock()?;
        while state.count > 0 {
            state = self
                .shared
                .all_done
                .wait(state)
                .map_err(|e| GridXferError::Shutdown(e.to_string()))?;
        }
        debug!(
            "all workers gone after {} requests",
            state.stats.requests
        );
        Ok(state.stats.clone())
    }
}

fn worker_loop(shared: &Shared) {
    if let Err(e) = serve(shared) {
        error!("worker stopped: {}", e);
        if let Ok(mut state) = shared.state.lock() {
            shared.retire(&mut state);
        }
    }
}

fn serve(shared: &Shared) -> Result<()> {
    loop {
        shared.lock()?.idle += 1;
        let received = shared.receiver.recv_timeout(shared.idle_timeout);
        let mut state = shared.lock()?;
        state.idle -= 1;

        match received {
            Ok(mut item) => {
                state.waiting = state.waiting.saturating_sub(1);
                drop(state);
                let start = Instant::now();
                let success = shared.handler.process(&mut item);
                item.processing = start.elapsed();
                let in_queue = item.queue_time();

                let mut state = shared.lock()?;
                state.stats.record(success, item.processing, in_queue);
            }
            Err(RecvTimeoutError::Timeout) => {
                // an announced item may not have been sent yet
                if state.waiting == 0 {
                    trace!("idle, retiring");
                    shared.retire(&mut state);
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.retire(&mut state);
                return Ok(());
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        // disconnect so detached workers drain and exit
        self.sender = None;
    }
}
