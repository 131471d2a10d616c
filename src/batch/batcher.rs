//! Pair coalescing into from-file batches
//!
//! Pairs are spread over one temporary list per worker. Each non-empty
//! list later becomes a single work item that runs the copy tool once in
//! from-file mode.

use crate::config::Placement;
use crate::engine::host;
use crate::error::{GridXferError, Result};
use crate::model::{BatchFile, TransferItem, Tunables};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tempfile::{Builder, NamedTempFile};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Default)]
struct Slot {
    writer: Option<BufWriter<NamedTempFile>>,
    pairs: usize,
}

/// Collects (source, destination) pairs into per-slot list files
pub struct Batcher {
    slots: Vec<Slot>,
    placement: Placement,
    next: usize,
    tunables: Tunables,
    dir: Option<PathBuf>,
}

impl Batcher {
    /// Create a batcher with `slots` lists (at least one)
    pub fn new(slots: usize, placement: Placement, tunables: Tunables) -> Self {
        Self {
            slots: (0..slots.max(1)).map(|_| Slot::default()).collect(),
            placement,
            next: 0,
            tunables,
            dir: None,
        }
    }

    /// Put list files into `dir` instead of the system temp directory
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Number of lists
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Pairs added so far
    pub fn pairs(&self) -> usize {
        self.slots.iter().map(|s| s.pairs).sum()
    }

    /// List index the next pair from `src` goes to
    pub fn slot_for(&mut self, src: &str) -> usize {
        let n = self.slots.len();
        match self.placement {
            Placement::RoundRobin => {
                let slot = self.next;
                self.next = (self.next + 1) % n;
                slot
            }
            Placement::SourceHost => (xxh3_64(host(src).as_bytes()) % n as u64) as usize,
        }
    }

    /// Append one pair; returns the list it went to
    pub fn add(&mut self, src: &str, dst: &str) -> Result<usize> {
        let index = self.slot_for(src);
        let dir = self.dir.clone();
        let slot = &mut self.slots[index];
        if slot.writer.is_none() {
            slot.writer = Some(BufWriter::new(create_list(dir)?));
        }
        if let Some(writer) = slot.writer.as_mut() {
            writeln!(writer, "{} {}", src, dst)
                .map_err(|e| GridXferError::io(writer.get_ref().path(), e))?;
        }
        slot.pairs += 1;
        Ok(index)
    }

    /// Close every non-empty list and wrap it as a work item
    pub fn finish(self) -> Result<Vec<TransferItem>> {
        let mut items = Vec::new();
        for (index, slot) in self.slots.into_iter().enumerate() {
            let Some(writer) = slot.writer else {
                continue;
            };
            let file = writer.into_inner().map_err(|e| {
                let (err, writer) = e.into_parts();
                GridXferError::io(writer.get_ref().path(), err)
            })?;
            debug!(
                "batch list {} holds {} pairs: {}",
                index,
                slot.pairs,
                file.path().display()
            );
            items.push(TransferItem::batch(BatchFile::new(file, slot.pairs), self.tunables));
        }
        Ok(items)
    }
}

fn create_list(dir: Option<PathBuf>) -> Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix("gridxfer-").suffix(".lst");
    match dir {
        Some(dir) => builder.tempfile_in(&dir).map_err(|e| GridXferError::io(dir, e)),
        None => builder
            .tempfile()
            .map_err(|e| GridXferError::io(std::env::temp_dir(), e)),
    }
}
