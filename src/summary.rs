//! Summary statistics access for selector plugins.
//!
//! Statistic computation lives outside this crate; selectors only consume
//! aggregates through the [`SummaryStore`] collaborator trait.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use crate::file::CompactableFile;

/// Aggregated statistics produced by one summarizer over a set of files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    summarizer: String,
    stats: BTreeMap<String, u64>,
}

impl Summary {
    /// Build a summary for the named summarizer.
    pub fn new(summarizer: impl Into<String>) -> Self {
        Self {
            summarizer: summarizer.into(),
            stats: BTreeMap::new(),
        }
    }

    /// Add a statistic, returning the summary for chaining.
    pub fn with_stat(mut self, name: impl Into<String>, value: u64) -> Self {
        self.stats.insert(name.into(), value);
        self
    }

    /// Identifier of the summarizer that produced these statistics.
    pub fn summarizer(&self) -> &str {
        &self.summarizer
    }

    /// Value of one statistic, defaulting to zero when absent.
    pub fn stat(&self, name: &str) -> u64 {
        self.stats.get(name).copied().unwrap_or(0)
    }

    /// All recorded statistics.
    pub fn stats(&self) -> &BTreeMap<String, u64> {
        &self.stats
    }

    fn absorb(&mut self, other: &Summary) {
        for (name, value) in &other.stats {
            *self.stats.entry(name.clone()).or_insert(0) += value;
        }
    }
}

/// Source of per-file summaries, aggregated on demand.
pub trait SummaryStore: Send + Sync {
    /// Aggregate summaries over `files`, keeping only summarizers accepted
    /// by `predicate`. Files with no recorded summaries contribute nothing.
    fn summaries(
        &self,
        files: &[CompactableFile],
        predicate: &dyn Fn(&str) -> bool,
    ) -> Vec<Summary>;
}

/// In-memory summary store useful for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct StaticSummaryStore {
    inner: Mutex<HashMap<String, Vec<Summary>>>,
}

impl StaticSummaryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a summary for one file.
    pub fn insert(&self, file: &str, summary: Summary) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.entry(file.to_string()).or_default().push(summary);
        }
    }
}

impl SummaryStore for StaticSummaryStore {
    fn summaries(
        &self,
        files: &[CompactableFile],
        predicate: &dyn Fn(&str) -> bool,
    ) -> Vec<Summary> {
        let mut aggregated: BTreeMap<String, Summary> = BTreeMap::new();
        let Ok(guard) = self.inner.lock() else {
            return Vec::new();
        };
        for file in files {
            let Some(entries) = guard.get(file.name()) else {
                continue;
            };
            for summary in entries {
                if !predicate(summary.summarizer()) {
                    continue;
                }
                aggregated
                    .entry(summary.summarizer().to_string())
                    .or_insert_with(|| Summary::new(summary.summarizer()))
                    .absorb(summary);
            }
        }
        aggregated.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_matching_summarizers_across_files() {
        let store = StaticSummaryStore::new();
        store.insert(
            "Fa",
            Summary::new("deletes").with_stat("deletes", 3).with_stat("total", 10),
        );
        store.insert(
            "Fb",
            Summary::new("deletes").with_stat("deletes", 1).with_stat("total", 5),
        );
        store.insert("Fb", Summary::new("lengths").with_stat("max", 9));

        let files = vec![
            CompactableFile::new("Fa", 1, None),
            CompactableFile::new("Fb", 1, None),
        ];
        let summaries = store.summaries(&files, &|id| id.contains("deletes"));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].stat("deletes"), 4);
        assert_eq!(summaries[0].stat("total"), 15);
    }

    #[test]
    fn unknown_files_contribute_nothing() {
        let store = StaticSummaryStore::new();
        let files = vec![CompactableFile::new("Fmissing", 1, None)];
        assert!(store.summaries(&files, &|_| true).is_empty());
    }
}
