//! Error taxonomy for the compaction engine.
//!
//! Each concern gets its own error type; `CompactionError` is the
//! attempt-level umbrella surfaced to requesters. Cancellation is not an
//! error, it is a terminal outcome.

use thiserror::Error;

use crate::{plugin::PluginKind, request::CompactionKind};

/// Malformed or missing plugin/service option discovered at `init` time.
///
/// Fatal to that service instantiation only; other services are unaffected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required option was absent.
    #[error("missing required option `{0}`")]
    MissingOption(String),
    /// An option was present but could not be parsed or was out of range.
    #[error("invalid value `{value}` for option `{key}`: {reason}")]
    InvalidOption {
        /// Option key as supplied in configuration.
        key: String,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// No service definition exists under the requested name.
    #[error("no compaction service named `{0}` is configured")]
    UnknownService(String),
}

impl ConfigurationError {
    pub(crate) fn missing(key: impl Into<String>) -> Self {
        Self::MissingOption(key.into())
    }

    pub(crate) fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOption {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A plugin identifier could not be resolved for the required capability.
///
/// The message names the plugin kind so callers can tell selector failures
/// from configurer or planner failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not load {kind} {name}")]
pub struct PluginLoadError {
    /// Which plugin capability failed to load.
    pub kind: PluginKind,
    /// The plugin identifier that failed to resolve.
    pub name: String,
}

/// No compaction service resolves for a (table, kind, hints) combination.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Neither a hint alias nor a per-kind/default service is configured.
    #[error("no compaction service is configured for table `{table}` and kind {kind}")]
    NoService {
        /// Table whose dispatch configuration was consulted.
        table: String,
        /// Kind of the compaction being dispatched.
        kind: CompactionKind,
    },
}

/// A planner emitted a structurally invalid plan.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A job referenced a file outside the planning call's candidates.
    #[error("job references file `{0}` that is not a candidate of this planning call")]
    NotACandidate(String),
    /// A file appeared in more than one job of the same plan.
    #[error("file `{0}` appears in more than one job of the plan")]
    OverlappingJobs(String),
    /// A job referenced an executor pool the service never declared.
    #[error("job references undeclared executor pool `{0}`")]
    UnknownPool(String),
}

/// Plugin code raised during execution.
///
/// Fatal to the attempt; the tablet file list is never mutated by a failed
/// selection or planning phase.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} runtime error: {message}")]
pub struct PluginRuntimeError {
    /// Which plugin capability raised.
    pub kind: PluginKind,
    /// Plugin-supplied failure description.
    pub message: String,
}

impl PluginRuntimeError {
    /// Planner-raised runtime error.
    pub fn planner(message: impl Into<String>) -> Self {
        Self {
            kind: PluginKind::Planner,
            message: message.into(),
        }
    }

    /// Selector-raised runtime error.
    pub fn selector(message: impl Into<String>) -> Self {
        Self {
            kind: PluginKind::Selector,
            message: message.into(),
        }
    }

    /// Configurer-raised runtime error.
    pub fn configurer(message: impl Into<String>) -> Self {
        Self {
            kind: PluginKind::Configurer,
            message: message.into(),
        }
    }
}

/// Attempt-level compaction error reported to the requester.
#[derive(Clone, Debug, Error)]
pub enum CompactionError {
    /// Service or plugin configuration was rejected at init time.
    #[error("compaction configuration error: {0}")]
    Config(#[from] ConfigurationError),
    /// A named plugin could not be loaded for the required capability.
    #[error(transparent)]
    PluginLoad(#[from] PluginLoadError),
    /// Dispatch resolved no service for this attempt.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Plugin code failed while the attempt was running.
    #[error(transparent)]
    PluginRuntime(#[from] PluginRuntimeError),
    /// The planner produced an invalid plan.
    #[error("planner produced an invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
    /// An executor pool shut down before the job could run.
    #[error("executor pool closed before the job could run")]
    PoolClosed,
    /// The named table does not exist.
    #[error("unknown table `{0}`")]
    UnknownTable(String),
    /// The named table already exists.
    #[error("table `{0}` already exists")]
    TableExists(String),
    /// Another user compaction is active for the table.
    #[error("a user compaction is already in progress for table `{0}`")]
    AlreadyRunning(String),
    /// The orchestrator went away before reporting a terminal state.
    #[error("compaction request channel closed")]
    ChannelClosed,
}
