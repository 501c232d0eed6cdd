//! Compaction selector contract and the built-in delete-ratio selector.

use std::collections::BTreeMap;

use crate::{
    error::{ConfigurationError, PluginRuntimeError},
    file::CompactableFile,
    summary::{Summary, SummaryStore},
};

/// Result of a selection: the subset of candidates to compact this round.
///
/// An empty selection means "do not compact this round".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    files: Vec<CompactableFile>,
}

impl Selection {
    /// Select the given files.
    pub fn new(files: Vec<CompactableFile>) -> Self {
        Self { files }
    }

    /// Select nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Selected files.
    pub fn files(&self) -> &[CompactableFile] {
        &self.files
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn into_files(self) -> Vec<CompactableFile> {
        self.files
    }
}

/// Read-only view a selector works against.
pub struct SelectionContext<'a> {
    available: &'a [CompactableFile],
    store: &'a dyn SummaryStore,
}

impl<'a> SelectionContext<'a> {
    pub(crate) fn new(available: &'a [CompactableFile], store: &'a dyn SummaryStore) -> Self {
        Self { available, store }
    }

    /// Files available for selection, in name order.
    pub fn available_files(&self) -> &[CompactableFile] {
        self.available
    }

    /// Aggregated summaries over `files`, filtered by summarizer identifier.
    pub fn summaries(
        &self,
        files: &[CompactableFile],
        predicate: impl Fn(&str) -> bool,
    ) -> Vec<Summary> {
        self.store.summaries(files, &predicate)
    }
}

/// Policy plugin narrowing candidates before planning.
pub trait CompactionSelector: Send + Sync + std::fmt::Debug {
    /// Parse plugin-specific options.
    fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), ConfigurationError>;

    /// Choose which of the available files to compact this round.
    fn select(&self, ctx: &SelectionContext<'_>) -> Result<Selection, PluginRuntimeError>;
}

/// Threshold option of [`DeleteRatioSelector`], a fraction in `[0.0, 1.0]`.
pub const OPT_THRESHOLD: &str = "threshold";

/// Summarizer identifier fragment the selector looks for.
pub const DELETES_SUMMARIZER: &str = "deletes";
/// Statistic counting logical delete markers.
pub const STAT_DELETES: &str = "deletes";
/// Statistic counting total entries.
pub const STAT_TOTAL: &str = "total";

/// Built-in selector compacting everything once deletes pile up.
///
/// Requires exactly one matching deletes summary over the available files;
/// selects all files when `deletes / total >= threshold`, else nothing.
#[derive(Debug, Default)]
pub struct DeleteRatioSelector {
    threshold: f64,
}

impl CompactionSelector for DeleteRatioSelector {
    fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), ConfigurationError> {
        let raw = super::require(options, OPT_THRESHOLD)?;
        let threshold: f64 = raw
            .parse()
            .map_err(|_| ConfigurationError::invalid(OPT_THRESHOLD, raw, "not a number"))?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigurationError::invalid(
                OPT_THRESHOLD,
                raw,
                "must be between 0.0 and 1.0",
            ));
        }
        self.threshold = threshold;
        Ok(())
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Result<Selection, PluginRuntimeError> {
        let summaries = ctx.summaries(ctx.available_files(), |id| id.contains(DELETES_SUMMARIZER));
        if summaries.len() == 1 {
            let summary = &summaries[0];
            let deletes = summary.stat(STAT_DELETES);
            let total = summary.stat(STAT_TOTAL);
            if total > 0 {
                let ratio = deletes as f64 / total as f64;
                if self.threshold <= ratio {
                    return Ok(Selection::new(ctx.available_files().to_vec()));
                }
            }
        }
        Ok(Selection::none())
    }
}

#[cfg(test)]
mod tests {
    use crate::summary::StaticSummaryStore;

    use super::*;

    fn selector(threshold: &str) -> DeleteRatioSelector {
        let options: BTreeMap<String, String> =
            [(OPT_THRESHOLD.to_string(), threshold.to_string())]
                .into_iter()
                .collect();
        let mut selector = DeleteRatioSelector::default();
        selector.init(&options).expect("init");
        selector
    }

    fn store_with_ratio(files: &[CompactableFile], deletes: u64, total: u64) -> StaticSummaryStore {
        let store = StaticSummaryStore::new();
        // Attach the aggregate to the first file; aggregation sums per file.
        store.insert(
            files[0].name(),
            Summary::new(DELETES_SUMMARIZER)
                .with_stat(STAT_DELETES, deletes)
                .with_stat(STAT_TOTAL, total),
        );
        store
    }

    fn files() -> Vec<CompactableFile> {
        vec![
            CompactableFile::new("Fa", 10, None),
            CompactableFile::new("Fb", 10, None),
        ]
    }

    #[test]
    fn selects_all_files_at_or_above_threshold() {
        let files = files();
        let store = store_with_ratio(&files, 40, 100);
        let ctx = SelectionContext::new(&files, &store);

        let selection = selector(".4").select(&ctx).expect("select");
        assert_eq!(selection.files().len(), 2);

        let selection = selector("0.25").select(&ctx).expect("select");
        assert_eq!(selection.files().len(), 2);
    }

    #[test]
    fn selects_nothing_below_threshold() {
        let files = files();
        let store = store_with_ratio(&files, 39, 100);
        let ctx = SelectionContext::new(&files, &store);
        let selection = selector(".4").select(&ctx).expect("select");
        assert!(selection.is_empty());
    }

    #[test]
    fn requires_exactly_one_matching_summary() {
        let files = files();
        let store = StaticSummaryStore::new();
        store.insert(
            files[0].name(),
            Summary::new("deletes-v1").with_stat(STAT_DELETES, 9).with_stat(STAT_TOTAL, 10),
        );
        store.insert(
            files[1].name(),
            Summary::new("deletes-v2").with_stat(STAT_DELETES, 9).with_stat(STAT_TOTAL, 10),
        );
        let ctx = SelectionContext::new(&files, &store);
        assert!(selector(".1").select(&ctx).expect("select").is_empty());
    }

    #[test]
    fn missing_summaries_select_nothing() {
        let files = files();
        let store = StaticSummaryStore::new();
        let ctx = SelectionContext::new(&files, &store);
        assert!(selector("0.0").select(&ctx).expect("select").is_empty());
    }

    #[test]
    fn threshold_must_be_a_fraction() {
        let mut selector = DeleteRatioSelector::default();
        let options: BTreeMap<String, String> =
            [(OPT_THRESHOLD.to_string(), "1.5".to_string())]
                .into_iter()
                .collect();
        assert!(matches!(
            selector.init(&options),
            Err(ConfigurationError::InvalidOption { .. })
        ));
        assert!(matches!(
            selector.init(&BTreeMap::new()),
            Err(ConfigurationError::MissingOption(_))
        ));
    }
}
