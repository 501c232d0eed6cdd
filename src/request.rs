//! Client-facing compaction request surface.

use std::{collections::BTreeMap, fmt};

use crate::{file::RowRange, plugin::PluginConfig};

/// Hint key that makes the built-in planner compact everything in one job.
pub const COMPACT_ALL_HINT: &str = "compact_all";
/// Hint key the dispatcher maps to a per-alias user service override.
pub const COMPACTION_TYPE_HINT: &str = "compaction_type";

/// Kind of a compaction attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompactionKind {
    /// Planner-initiated background maintenance.
    System,
    /// Explicitly requested; runs until one file remains unless cancelled.
    User,
}

impl CompactionKind {
    /// Parse a kind name case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

impl fmt::Display for CompactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Opaque requester-supplied key/value hints.
///
/// Components only interpret keys they recognize; absent keys never error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionHints {
    entries: BTreeMap<String, String>,
}

impl ExecutionHints {
    /// Empty hint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hint, returning the set for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Value of a hint, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Boolean hint; absent or unparsable values read as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

impl FromIterator<(String, String)> for ExecutionHints {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One entry of the iterator stack applied while merging.
///
/// Iterator semantics belong to the file-merging substrate; this crate only
/// carries the stack through to the [`crate::merge::FileMerger`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IteratorSpec {
    priority: i32,
    name: String,
    options: BTreeMap<String, String>,
}

impl IteratorSpec {
    /// Declare an iterator with its stack priority.
    pub fn new(priority: i32, name: impl Into<String>) -> Self {
        Self {
            priority,
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    /// Add an iterator option, returning the spec for chaining.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Stack priority; lower runs closer to the data.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Iterator identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterator options.
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }
}

/// A compaction request issued by a client.
#[derive(Clone, Debug, Default)]
pub struct CompactionRequest {
    pub(crate) hints: ExecutionHints,
    pub(crate) iterators: Vec<IteratorSpec>,
    pub(crate) row_range: Option<RowRange>,
    pub(crate) wait: bool,
    pub(crate) flush_first: bool,
    pub(crate) selector: Option<PluginConfig>,
    pub(crate) configurer: Option<PluginConfig>,
}

impl CompactionRequest {
    /// Request with defaults: no hints, whole tablet, asynchronous, no flush.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach execution hints.
    pub fn with_hints(mut self, hints: ExecutionHints) -> Self {
        self.hints = hints;
        self
    }

    /// Attach an iterator stack applied while merging.
    pub fn with_iterators(mut self, iterators: Vec<IteratorSpec>) -> Self {
        self.iterators = iterators;
        self
    }

    /// Restrict the request to candidates overlapping a row range.
    pub fn with_row_range(mut self, range: RowRange) -> Self {
        self.row_range = Some(range);
        self
    }

    /// Block the request call until a terminal state is reached.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Flush the write path before selecting candidates.
    pub fn with_flush_first(mut self, flush_first: bool) -> Self {
        self.flush_first = flush_first;
        self
    }

    /// Override the table's configured selector for this request.
    pub fn with_selector(mut self, selector: PluginConfig) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Override the table's configured configurer for this request.
    pub fn with_configurer(mut self, configurer: PluginConfig) -> Self {
        self.configurer = Some(configurer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_hints_read_as_false() {
        let hints = ExecutionHints::new();
        assert!(!hints.flag(COMPACT_ALL_HINT));
        assert!(hints.get(COMPACTION_TYPE_HINT).is_none());
    }

    #[test]
    fn boolean_hints_parse_case_insensitively() {
        let hints = ExecutionHints::new().with(COMPACT_ALL_HINT, "TRUE");
        assert!(hints.flag(COMPACT_ALL_HINT));
        let hints = ExecutionHints::new().with(COMPACT_ALL_HINT, "yes");
        assert!(!hints.flag(COMPACT_ALL_HINT));
    }

    #[test]
    fn kind_names_parse_case_insensitively() {
        assert_eq!(CompactionKind::parse("SYSTEM"), Some(CompactionKind::System));
        assert_eq!(CompactionKind::parse(" user "), Some(CompactionKind::User));
        assert_eq!(CompactionKind::parse("major"), None);
    }
}
