//! Shared in-memory session fixture.
//!
//! `RecordingSession` models a write-ahead store precisely enough to observe
//! the coordination contract: rows written under a live transaction become
//! durable only on commit, savepoint rollback truncates at the marker, and
//! every session call is journaled for ordering assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use atomique::{SavepointHandle, Session, TransactionHandle};
use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq)]
enum Entry {
    Row(String),
    Mark(SavepointHandle),
}

#[derive(Default)]
pub struct RecordingSession {
    next_tx: AtomicU64,
    next_sp: AtomicU64,
    live: Mutex<HashMap<TransactionHandle, Vec<Entry>>>,
    committed: Mutex<Vec<String>>,
    journal: Mutex<Vec<String>>,
    flushes: AtomicUsize,
    failing_commits: AtomicUsize,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a row under a live transaction, as application code would.
    pub fn write(&self, tx: TransactionHandle, row: &str) {
        let mut live = self.live.lock();
        if let Some(entries) = live.get_mut(&tx) {
            entries.push(Entry::Row(row.to_string()));
        }
        self.journal.lock().push(format!("write {tx} {row}"));
    }

    /// Make the next `n` commit calls fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    pub fn committed_rows(&self) -> Vec<String> {
        self.committed.lock().clone()
    }

    pub fn live_transactions(&self) -> usize {
        self.live.lock().len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn begin(&self) -> anyhow::Result<TransactionHandle> {
        let handle = TransactionHandle(self.next_tx.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().insert(handle, Vec::new());
        self.journal.lock().push(format!("begin {handle}"));
        Ok(handle)
    }

    async fn commit(&self, tx: TransactionHandle) -> anyhow::Result<()> {
        if self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("injected commit failure for {tx}");
        }
        let entries = self
            .live
            .lock()
            .remove(&tx)
            .ok_or_else(|| anyhow::anyhow!("commit of unknown transaction {tx}"))?;
        let mut committed = self.committed.lock();
        for entry in entries {
            if let Entry::Row(row) = entry {
                committed.push(row);
            }
        }
        self.journal.lock().push(format!("commit {tx}"));
        Ok(())
    }

    async fn rollback(&self, tx: TransactionHandle) -> anyhow::Result<()> {
        self.live
            .lock()
            .remove(&tx)
            .ok_or_else(|| anyhow::anyhow!("rollback of unknown transaction {tx}"))?;
        self.journal.lock().push(format!("rollback {tx}"));
        Ok(())
    }

    async fn flush(&self, tx: TransactionHandle) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push(format!("flush {tx}"));
        Ok(())
    }

    async fn begin_nested(
        &self,
        tx: TransactionHandle,
        name: &str,
    ) -> anyhow::Result<SavepointHandle> {
        let savepoint = SavepointHandle(self.next_sp.fetch_add(1, Ordering::SeqCst) + 1);
        let mut live = self.live.lock();
        let entries = live
            .get_mut(&tx)
            .ok_or_else(|| anyhow::anyhow!("savepoint under unknown transaction {tx}"))?;
        entries.push(Entry::Mark(savepoint));
        self.journal.lock().push(format!("savepoint {tx} {name}"));
        Ok(savepoint)
    }

    async fn release(
        &self,
        tx: TransactionHandle,
        savepoint: SavepointHandle,
    ) -> anyhow::Result<()> {
        let mut live = self.live.lock();
        let entries = live
            .get_mut(&tx)
            .ok_or_else(|| anyhow::anyhow!("release under unknown transaction {tx}"))?;
        let pos = entries
            .iter()
            .position(|e| *e == Entry::Mark(savepoint))
            .ok_or_else(|| anyhow::anyhow!("release of unknown savepoint under {tx}"))?;
        // The marker disappears; rows written inside stay with the parent.
        entries.remove(pos);
        self.journal.lock().push(format!("release {tx}"));
        Ok(())
    }

    async fn rollback_to(
        &self,
        tx: TransactionHandle,
        savepoint: SavepointHandle,
    ) -> anyhow::Result<()> {
        let mut live = self.live.lock();
        let entries = live
            .get_mut(&tx)
            .ok_or_else(|| anyhow::anyhow!("rollback_to under unknown transaction {tx}"))?;
        let pos = entries
            .iter()
            .position(|e| *e == Entry::Mark(savepoint))
            .ok_or_else(|| anyhow::anyhow!("rollback to unknown savepoint under {tx}"))?;
        entries.truncate(pos);
        self.journal.lock().push(format!("rollback_to {tx}"));
        Ok(())
    }
}
