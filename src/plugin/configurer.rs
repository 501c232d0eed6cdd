//! Compaction configurer contract and the built-in compression configurer.

use std::collections::BTreeMap;

use crate::{
    error::{ConfigurationError, PluginRuntimeError},
    file::CompactableFile,
};

/// Output encoding overrides computed for a single compaction.
///
/// Applied only to the output of the compaction they were computed for;
/// table-level defaults are never mutated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputOverrides {
    compression: Option<String>,
}

impl OutputOverrides {
    /// No overrides: the output uses the table's defaults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Override the output's compression codec.
    pub fn with_compression(mut self, codec: impl Into<String>) -> Self {
        self.compression = Some(codec.into());
        self
    }

    /// The codec to use for the output, if overridden.
    pub fn compression(&self) -> Option<&str> {
        self.compression.as_deref()
    }
}

/// Policy plugin overriding output encoding based on input characteristics.
pub trait CompactionConfigurer: Send + Sync + std::fmt::Debug {
    /// Parse plugin-specific options.
    fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), ConfigurationError>;

    /// Compute overrides for the output of a compaction over `inputs`.
    fn configure(&self, inputs: &[CompactableFile]) -> Result<OutputOverrides, PluginRuntimeError>;
}

/// Byte threshold above which [`SizeCompressionConfigurer`] overrides the codec.
pub const OPT_LARGE_FILE_COMPRESSION_THRESHOLD: &str = "large.file.compression.threshold";
/// Codec applied by [`SizeCompressionConfigurer`] above the threshold.
pub const OPT_LARGE_FILE_COMPRESSION_CODEC: &str = "large.file.compression.codec";

/// Built-in configurer compressing outputs that would otherwise be large.
#[derive(Debug, Default)]
pub struct SizeCompressionConfigurer {
    threshold: u64,
    codec: String,
}

impl CompactionConfigurer for SizeCompressionConfigurer {
    fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), ConfigurationError> {
        self.threshold = super::parse_required(options, OPT_LARGE_FILE_COMPRESSION_THRESHOLD)?;
        self.codec = super::require(options, OPT_LARGE_FILE_COMPRESSION_CODEC)?.to_string();
        Ok(())
    }

    fn configure(&self, inputs: &[CompactableFile]) -> Result<OutputOverrides, PluginRuntimeError> {
        let total: u64 = inputs.iter().map(CompactableFile::size).sum();
        if total > self.threshold {
            Ok(OutputOverrides::none().with_compression(self.codec.clone()))
        } else {
            Ok(OutputOverrides::none())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configurer(threshold: u64) -> SizeCompressionConfigurer {
        let options: BTreeMap<String, String> = [
            (
                OPT_LARGE_FILE_COMPRESSION_THRESHOLD.to_string(),
                threshold.to_string(),
            ),
            (OPT_LARGE_FILE_COMPRESSION_CODEC.to_string(), "gz".to_string()),
        ]
        .into_iter()
        .collect();
        let mut configurer = SizeCompressionConfigurer::default();
        configurer.init(&options).expect("init");
        configurer
    }

    #[test]
    fn overrides_codec_only_above_threshold() {
        let inputs = vec![
            CompactableFile::new("Fa", 60_000, None),
            CompactableFile::new("Fb", 50_000, None),
        ];

        let overrides = configurer(100_000).configure(&inputs).expect("configure");
        assert_eq!(overrides.compression(), Some("gz"));

        let overrides = configurer(200_000).configure(&inputs).expect("configure");
        assert_eq!(overrides.compression(), None);
    }

    #[test]
    fn exact_threshold_keeps_table_default() {
        let inputs = vec![CompactableFile::new("Fa", 1_000, None)];
        let overrides = configurer(1_000).configure(&inputs).expect("configure");
        assert_eq!(overrides.compression(), None);
    }

    #[test]
    fn init_requires_both_options() {
        let mut configurer = SizeCompressionConfigurer::default();
        assert!(matches!(
            configurer.init(&BTreeMap::new()),
            Err(ConfigurationError::MissingOption(_))
        ));
    }
}
