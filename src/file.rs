//! Candidate file descriptors shared across planning and execution.

use std::fmt;

use ulid::Ulid;

/// Generation tag for files produced by a memtable flush.
pub const FLUSH_TAG: char = 'F';
/// Generation tag for files produced by a compaction.
pub const COMPACTION_TAG: char = 'C';

/// Immutable descriptor of one on-disk candidate file.
///
/// Identity within a tablet is the file name. The first character of the
/// name is a provenance tag (`F` for flush output, `C` for compaction
/// output) that planners may use as a structural grouping key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompactableFile {
    name: String,
    size: u64,
    row_range: Option<RowRange>,
}

impl CompactableFile {
    /// Build a descriptor from an existing name.
    pub fn new(name: impl Into<String>, size: u64, row_range: Option<RowRange>) -> Self {
        Self {
            name: name.into(),
            size,
            row_range,
        }
    }

    /// Descriptor for a freshly flushed file, with a generated `F` name.
    pub fn flushed(size: u64, row_range: Option<RowRange>) -> Self {
        Self::new(format!("{}{}", FLUSH_TAG, Ulid::new()), size, row_range)
    }

    /// Descriptor for a compaction output, with a generated `C` name.
    pub fn compacted(size: u64, row_range: Option<RowRange>) -> Self {
        Self::new(format!("{}{}", COMPACTION_TAG, Ulid::new()), size, row_range)
    }

    /// File name; unique within the owning tablet.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Estimated size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Row range covered by the file; `None` covers the whole tablet.
    pub fn row_range(&self) -> Option<&RowRange> {
        self.row_range.as_ref()
    }

    /// Provenance tag, the first character of the name.
    pub fn generation_tag(&self) -> char {
        self.name.chars().next().unwrap_or(FLUSH_TAG)
    }

    /// Whether this file intersects the given row range.
    ///
    /// A file without a recorded range is assumed to cover the whole tablet.
    pub fn overlaps(&self, range: &RowRange) -> bool {
        match &self.row_range {
            Some(own) => own.overlaps(range),
            None => true,
        }
    }
}

impl fmt::Display for CompactableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}B)", self.name, self.size)
    }
}

/// Inclusive row bounds covered by a file or requested for a compaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRange {
    start: String,
    end: String,
}

impl RowRange {
    /// Build a range; bounds are inclusive and `start` must not exceed `end`.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        let (start, end) = (start.into(), end.into());
        debug_assert!(start <= end, "row range start must not exceed end");
        Self { start, end }
    }

    /// Inclusive first row.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Inclusive last row.
    pub fn end(&self) -> &str {
        &self.end
    }

    /// Whether two inclusive ranges intersect.
    pub fn overlaps(&self, other: &RowRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Aggregate the row range covered by a set of files.
///
/// Returns `None` (whole tablet) as soon as any input lacks a range.
pub(crate) fn merged_range(files: &[CompactableFile]) -> Option<RowRange> {
    let mut min: Option<&str> = None;
    let mut max: Option<&str> = None;
    for file in files {
        let range = file.row_range()?;
        min = Some(match min {
            Some(current) if current <= range.start() => current,
            _ => range.start(),
        });
        max = Some(match max {
            Some(current) if current >= range.end() => current,
            _ => range.end(),
        });
    }
    match (min, max) {
        (Some(min), Some(max)) => Some(RowRange::new(min, max)),
        _ => None,
    }
}
