//! Per-tablet candidate-file arena.
//!
//! The file list has a single mutation point: `commit`, which atomically
//! replaces a job's inputs with its output. Reads are snapshots, so a status
//! query sees either the pre- or post-compaction set, never a partial state.
//! Files claimed by an in-flight job are tracked in a reservation set so they
//! are never handed to a second concurrent job.

use std::collections::{BTreeMap, HashSet};

use async_lock::RwLock;

use crate::{file::CompactableFile, logging::tessera_log};

#[derive(Debug, Default)]
struct TabletFiles {
    live: BTreeMap<String, CompactableFile>,
    reserved: HashSet<String>,
}

/// Candidate-file state of one tablet.
#[derive(Debug)]
pub(crate) struct Tablet {
    table: String,
    files: RwLock<TabletFiles>,
}

impl Tablet {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            files: RwLock::new(TabletFiles::default()),
        }
    }

    /// Register a newly written file.
    pub(crate) async fn insert(&self, file: CompactableFile) {
        let mut guard = self.files.write().await;
        guard.live.insert(file.name().to_string(), file);
    }

    /// Snapshot of all live files, in name order.
    pub(crate) async fn snapshot(&self) -> Vec<CompactableFile> {
        self.files.read().await.live.values().cloned().collect()
    }

    /// Snapshot of live files not claimed by an in-flight job.
    pub(crate) async fn unreserved_snapshot(&self) -> Vec<CompactableFile> {
        let guard = self.files.read().await;
        guard
            .live
            .values()
            .filter(|file| !guard.reserved.contains(file.name()))
            .cloned()
            .collect()
    }

    /// Claim files for a job, all-or-nothing.
    ///
    /// Fails when any file is no longer live or is already claimed, which is
    /// how plans computed from stale snapshots are rejected.
    pub(crate) async fn try_reserve(&self, files: &[CompactableFile]) -> bool {
        let mut guard = self.files.write().await;
        let claimable = files.iter().all(|file| {
            guard.live.contains_key(file.name()) && !guard.reserved.contains(file.name())
        });
        if !claimable {
            return false;
        }
        for file in files {
            guard.reserved.insert(file.name().to_string());
        }
        true
    }

    /// Release a reservation without consuming the files.
    pub(crate) async fn release(&self, files: &[CompactableFile]) {
        let mut guard = self.files.write().await;
        for file in files {
            guard.reserved.remove(file.name());
        }
    }

    /// Atomically replace a job's inputs with its output.
    pub(crate) async fn commit(&self, inputs: &[CompactableFile], output: CompactableFile) {
        let mut guard = self.files.write().await;
        for file in inputs {
            guard.live.remove(file.name());
            guard.reserved.remove(file.name());
        }
        tessera_log!(
            log::Level::Debug,
            "files_replaced",
            "table={} inputs={} output={} live={}",
            self.table,
            inputs.len(),
            output.name(),
            guard.live.len() + 1
        );
        guard.live.insert(output.name().to_string(), output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> CompactableFile {
        CompactableFile::new(name, 10, None)
    }

    #[tokio::test]
    async fn snapshots_are_name_ordered() {
        let tablet = Tablet::new("t");
        tablet.insert(file("Fb")).await;
        tablet.insert(file("Fa")).await;
        tablet.insert(file("Ca")).await;
        let snapshot = tablet.snapshot().await;
        let names: Vec<&str> = snapshot.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["Ca", "Fa", "Fb"]);
    }

    #[tokio::test]
    async fn reservations_are_all_or_nothing() {
        let tablet = Tablet::new("t");
        tablet.insert(file("Fa")).await;
        tablet.insert(file("Fb")).await;

        assert!(tablet.try_reserve(&[file("Fa")]).await);
        // Fb is free but Fa is claimed: the whole reservation fails.
        assert!(!tablet.try_reserve(&[file("Fa"), file("Fb")]).await);
        assert!(tablet.try_reserve(&[file("Fb")]).await);

        tablet.release(&[file("Fa")]).await;
        assert!(tablet.try_reserve(&[file("Fa")]).await);
    }

    #[tokio::test]
    async fn missing_files_cannot_be_reserved() {
        let tablet = Tablet::new("t");
        tablet.insert(file("Fa")).await;
        assert!(!tablet.try_reserve(&[file("Fa"), file("Fgone")]).await);
        // The failed attempt must not leak a partial reservation.
        assert!(tablet.try_reserve(&[file("Fa")]).await);
    }

    #[tokio::test]
    async fn commit_replaces_inputs_with_the_output() {
        let tablet = Tablet::new("t");
        tablet.insert(file("Fa")).await;
        tablet.insert(file("Fb")).await;
        tablet.insert(file("Fc")).await;
        assert!(tablet.try_reserve(&[file("Fa"), file("Fb")]).await);

        tablet
            .commit(&[file("Fa"), file("Fb")], file("Cout"))
            .await;
        let snapshot = tablet.snapshot().await;
        let names: Vec<&str> = snapshot.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["Cout", "Fc"]);
        // Former inputs no longer hold reservations.
        assert!(tablet.try_reserve(&[file("Fc")]).await);
        assert!(tablet.try_reserve(&[file("Cout")]).await);
    }

    #[tokio::test]
    async fn unreserved_snapshot_excludes_claimed_files() {
        let tablet = Tablet::new("t");
        tablet.insert(file("Fa")).await;
        tablet.insert(file("Fb")).await;
        assert!(tablet.try_reserve(&[file("Fa")]).await);
        let unreserved = tablet.unreserved_snapshot().await;
        assert_eq!(unreserved.len(), 1);
        assert_eq!(unreserved[0].name(), "Fb");
        // The full snapshot still shows everything.
        assert_eq!(tablet.snapshot().await.len(), 2);
    }
}
