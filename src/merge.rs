//! File materialization boundary.
//!
//! Byte-level merge I/O, codecs, and iterator evaluation live outside this
//! crate, behind [`FileMerger`]. The engine ships a simulated merger that
//! produces descriptor-level outputs, which is all the planning and dispatch
//! layers ever observe.

use std::{future::Future, pin::Pin};

use crate::{
    file::{merged_range, CompactableFile},
    plugin::configurer::OutputOverrides,
    request::IteratorSpec,
};

/// Everything a merger needs to materialize one compaction output.
#[derive(Clone, Debug)]
pub struct MergeRequest {
    /// Owning table, for observability.
    pub table: String,
    /// Input files to merge.
    pub files: Vec<CompactableFile>,
    /// Iterator stack applied while merging.
    pub iterators: Vec<IteratorSpec>,
    /// Output encoding overrides computed by the configurer.
    pub overrides: OutputOverrides,
}

/// Collaborator that merges input files into a single output file.
pub trait FileMerger: Send + Sync {
    /// Merge the request's inputs, returning the output descriptor.
    fn merge<'a>(
        &'a self,
        request: &'a MergeRequest,
    ) -> Pin<Box<dyn Future<Output = CompactableFile> + Send + 'a>>;
}

/// Default merger: no I/O, output size is the sum of the input sizes and the
/// row range is the union of the input ranges.
#[derive(Debug, Default)]
pub struct SimulatedMerger;

impl FileMerger for SimulatedMerger {
    fn merge<'a>(
        &'a self,
        request: &'a MergeRequest,
    ) -> Pin<Box<dyn Future<Output = CompactableFile> + Send + 'a>> {
        Box::pin(async move {
            let size = request.files.iter().map(CompactableFile::size).sum();
            CompactableFile::compacted(size, merged_range(&request.files))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::file::RowRange;

    use super::*;

    #[tokio::test]
    async fn simulated_output_sums_sizes_and_unions_ranges() {
        let request = MergeRequest {
            table: "t".to_string(),
            files: vec![
                CompactableFile::new("Fa", 30, Some(RowRange::new("a", "c"))),
                CompactableFile::new("Fb", 12, Some(RowRange::new("b", "k"))),
            ],
            iterators: Vec::new(),
            overrides: OutputOverrides::none(),
        };
        let output = SimulatedMerger.merge(&request).await;
        assert_eq!(output.size(), 42);
        assert_eq!(output.generation_tag(), 'C');
        let range = output.row_range().expect("range");
        assert_eq!(range.start(), "a");
        assert_eq!(range.end(), "k");
    }
}
