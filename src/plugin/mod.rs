//! Plugin contracts and the configuration-driven plugin registry.
//!
//! Planners, selectors, and configurers are loaded by stable string
//! identifier from a registry of factories; there is no dynamic code loading.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::error::PluginLoadError;

/// Compaction planner contract and built-in planner.
pub mod planner;

/// Compaction selector contract and built-in selector.
pub mod selector;

/// Compaction configurer contract and built-in configurer.
pub mod configurer;

use configurer::CompactionConfigurer;
use planner::CompactionPlanner;
use selector::CompactionSelector;

/// Registry identifier of the built-in batch planner.
pub const BATCH_PLANNER: &str = "batch";
/// Registry identifier of the built-in delete-ratio selector.
pub const DELETE_RATIO_SELECTOR: &str = "delete-ratio";
/// Registry identifier of the built-in size-threshold compression configurer.
pub const SIZE_COMPRESSION_CONFIGURER: &str = "size-compression";

/// The three pluggable capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Produces compaction plans.
    Planner,
    /// Narrows candidates before planning.
    Selector,
    /// Overrides output encoding parameters.
    Configurer,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planner => write!(f, "CompactionPlanner"),
            Self::Selector => write!(f, "CompactionSelector"),
            Self::Configurer => write!(f, "CompactionConfigurer"),
        }
    }
}

/// A plugin identifier together with its option map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginConfig {
    id: String,
    options: BTreeMap<String, String>,
}

impl PluginConfig {
    /// Reference a plugin by registry identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            options: BTreeMap::new(),
        }
    }

    /// Add an option, returning the config for chaining.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Registry identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Options passed to the plugin's `init`.
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub(crate) fn from_options(
        options: &BTreeMap<String, String>,
        id_key: &str,
        opts_prefix: &str,
    ) -> Option<Self> {
        let id = options.get(id_key)?;
        let mut config = Self::new(id);
        for (key, value) in options {
            if let Some(stripped) = key.strip_prefix(opts_prefix) {
                config.options.insert(stripped.to_string(), value.clone());
            }
        }
        Some(config)
    }
}

type PlannerFactory = Box<dyn Fn() -> Box<dyn CompactionPlanner> + Send + Sync>;
type SelectorFactory = Box<dyn Fn() -> Box<dyn CompactionSelector> + Send + Sync>;
type ConfigurerFactory = Box<dyn Fn() -> Box<dyn CompactionConfigurer> + Send + Sync>;

/// Factory registry keyed by stable plugin identifier strings.
#[derive(Default)]
pub struct PluginRegistry {
    planners: HashMap<String, PlannerFactory>,
    selectors: HashMap<String, SelectorFactory>,
    configurers: HashMap<String, ConfigurerFactory>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_planner(BATCH_PLANNER, || {
            Box::new(planner::BatchPlanner::default())
        });
        registry.register_selector(DELETE_RATIO_SELECTOR, || {
            Box::new(selector::DeleteRatioSelector::default())
        });
        registry.register_configurer(SIZE_COMPRESSION_CONFIGURER, || {
            Box::new(configurer::SizeCompressionConfigurer::default())
        });
        registry
    }

    /// Register a planner factory under an identifier.
    pub fn register_planner<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn CompactionPlanner> + Send + Sync + 'static,
    {
        self.planners.insert(id.into(), Box::new(factory));
    }

    /// Register a selector factory under an identifier.
    pub fn register_selector<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn CompactionSelector> + Send + Sync + 'static,
    {
        self.selectors.insert(id.into(), Box::new(factory));
    }

    /// Register a configurer factory under an identifier.
    pub fn register_configurer<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn CompactionConfigurer> + Send + Sync + 'static,
    {
        self.configurers.insert(id.into(), Box::new(factory));
    }

    pub(crate) fn new_planner(&self, id: &str) -> Result<Box<dyn CompactionPlanner>, PluginLoadError> {
        self.planners.get(id).map(|f| f()).ok_or_else(|| PluginLoadError {
            kind: PluginKind::Planner,
            name: id.to_string(),
        })
    }

    pub(crate) fn new_selector(&self, id: &str) -> Result<Box<dyn CompactionSelector>, PluginLoadError> {
        self.selectors.get(id).map(|f| f()).ok_or_else(|| PluginLoadError {
            kind: PluginKind::Selector,
            name: id.to_string(),
        })
    }

    pub(crate) fn new_configurer(
        &self,
        id: &str,
    ) -> Result<Box<dyn CompactionConfigurer>, PluginLoadError> {
        self.configurers.get(id).map(|f| f()).ok_or_else(|| PluginLoadError {
            kind: PluginKind::Configurer,
            name: id.to_string(),
        })
    }
}

pub(crate) fn require<'a>(
    options: &'a BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str, crate::error::ConfigurationError> {
    options
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| crate::error::ConfigurationError::missing(key))
}

pub(crate) fn parse_required<T>(
    options: &BTreeMap<String, String>,
    key: &str,
) -> Result<T, crate::error::ConfigurationError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    let raw = require(options, key)?;
    raw.parse::<T>()
        .map_err(|err| crate::error::ConfigurationError::invalid(key, raw, err.to_string()))
}

pub(crate) fn parse_or<T>(
    options: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, crate::error::ConfigurationError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match options.get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| crate::error::ConfigurationError::invalid(key, raw, err.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failures_name_the_plugin_kind() {
        let registry = PluginRegistry::with_builtins();
        // A configurer id is not loadable as a selector, and vice versa.
        let err = registry
            .new_selector(SIZE_COMPRESSION_CONFIGURER)
            .expect_err("wrong capability");
        assert!(err.to_string().contains("could not load CompactionSelector"));

        let err = registry
            .new_configurer(DELETE_RATIO_SELECTOR)
            .expect_err("wrong capability");
        assert!(err.to_string().contains("could not load CompactionConfigurer"));

        let err = registry.new_planner("nope").expect_err("unknown planner");
        assert!(err.to_string().contains("could not load CompactionPlanner"));
    }

    #[test]
    fn builtins_resolve() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.new_planner(BATCH_PLANNER).is_ok());
        assert!(registry.new_selector(DELETE_RATIO_SELECTOR).is_ok());
        assert!(registry.new_configurer(SIZE_COMPRESSION_CONFIGURER).is_ok());
    }

    #[test]
    fn plugin_config_strips_option_prefix() {
        let mut options = BTreeMap::new();
        options.insert("compaction.selector".to_string(), "delete-ratio".to_string());
        options.insert(
            "compaction.selector.opts.threshold".to_string(),
            ".4".to_string(),
        );
        let config = PluginConfig::from_options(
            &options,
            "compaction.selector",
            "compaction.selector.opts.",
        )
        .expect("config");
        assert_eq!(config.id(), "delete-ratio");
        assert_eq!(config.options().get("threshold").map(String::as_str), Some(".4"));
    }
}
