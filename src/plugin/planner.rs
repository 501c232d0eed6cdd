//! Compaction planner contract and the built-in batch planner.

use std::{
    collections::{BTreeMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::{ConfigurationError, PlanError, PluginRuntimeError},
    file::CompactableFile,
    pool::{ExecutorManager, ExecutorPoolId},
    request::{CompactionKind, ExecutionHints, COMPACT_ALL_HINT},
};

/// Parameters for planner initialization.
///
/// Handed to [`CompactionPlanner::init`] once per service instantiation and
/// again on every reconfiguration of that service's options.
pub struct InitParameters<'a> {
    options: &'a BTreeMap<String, String>,
    executors: &'a mut ExecutorManager,
}

impl<'a> InitParameters<'a> {
    pub(crate) fn new(
        options: &'a BTreeMap<String, String>,
        executors: &'a mut ExecutorManager,
    ) -> Self {
        Self { options, executors }
    }

    /// Plugin-specific options with the `planner.opts.` prefix stripped.
    pub fn options(&self) -> &BTreeMap<String, String> {
        self.options
    }

    /// Manager used to declare the pools this planner will submit to.
    pub fn executor_manager(&mut self) -> &mut ExecutorManager {
        self.executors
    }
}

/// Parameters for one planning call.
pub struct PlanningParameters<'a> {
    kind: CompactionKind,
    candidates: &'a [CompactableFile],
    hints: &'a ExecutionHints,
}

impl<'a> PlanningParameters<'a> {
    pub(crate) fn new(
        kind: CompactionKind,
        candidates: &'a [CompactableFile],
        hints: &'a ExecutionHints,
    ) -> Self {
        Self {
            kind,
            candidates,
            hints,
        }
    }

    /// Kind of the compaction being planned.
    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    /// Candidate files for this round, in name order.
    pub fn candidates(&self) -> &[CompactableFile] {
        self.candidates
    }

    /// Requester-supplied hints.
    pub fn hints(&self) -> &ExecutionHints {
        self.hints
    }

    /// Builder that validates jobs against this call's candidates.
    pub fn plan_builder(&self) -> PlanBuilder<'a> {
        PlanBuilder::new(self.candidates)
    }
}

/// One unit of work: merge `files` into a single output on `executor`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionJob {
    priority: i16,
    executor: ExecutorPoolId,
    files: Vec<CompactableFile>,
}

impl CompactionJob {
    /// Priority relative to other jobs; informational for pool scheduling.
    pub fn priority(&self) -> i16 {
        self.priority
    }

    /// Pool the job must be submitted to.
    pub fn executor(&self) -> &ExecutorPoolId {
        &self.executor
    }

    /// Input files; disjoint from every other job of the same plan.
    pub fn files(&self) -> &[CompactableFile] {
        &self.files
    }
}

/// Ordered sequence of jobs produced by one planning call. May be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionPlan {
    jobs: Vec<CompactionJob>,
}

impl CompactionPlan {
    /// Plan with no jobs: nothing to do this round.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Jobs in submission order.
    pub fn jobs(&self) -> &[CompactionJob] {
        &self.jobs
    }

    /// Whether the plan carries no work.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn into_jobs(self) -> Vec<CompactionJob> {
        self.jobs
    }
}

/// Builder enforcing the plan invariants at construction time: every job's
/// files must come from the planning call's candidates, and a file may appear
/// in at most one job per plan.
pub struct PlanBuilder<'a> {
    candidates: &'a [CompactableFile],
    used: HashSet<String>,
    jobs: Vec<CompactionJob>,
}

impl<'a> PlanBuilder<'a> {
    fn new(candidates: &'a [CompactableFile]) -> Self {
        Self {
            candidates,
            used: HashSet::new(),
            jobs: Vec::new(),
        }
    }

    /// Append a job after validating its file set.
    pub fn add_job(
        &mut self,
        priority: i16,
        executor: ExecutorPoolId,
        files: Vec<CompactableFile>,
    ) -> Result<&mut Self, PlanError> {
        for file in &files {
            if !self.candidates.iter().any(|c| c.name() == file.name()) {
                return Err(PlanError::NotACandidate(file.name().to_string()));
            }
            if !self.used.insert(file.name().to_string()) {
                return Err(PlanError::OverlappingJobs(file.name().to_string()));
            }
        }
        self.jobs.push(CompactionJob {
            priority,
            executor,
            files,
        });
        Ok(self)
    }

    /// Finish the plan.
    pub fn build(self) -> CompactionPlan {
        CompactionPlan { jobs: self.jobs }
    }
}

/// Policy plugin deciding which candidates merge into which outputs.
pub trait CompactionPlanner: Send + Sync + std::fmt::Debug {
    /// Parse options and declare executor pools.
    fn init(&mut self, params: InitParameters<'_>) -> Result<(), ConfigurationError>;

    /// Produce a plan over the given candidates.
    ///
    /// Pure with respect to engine state: the same inputs against the same
    /// initialized planner yield an equivalent plan.
    fn make_plan(
        &self,
        params: &PlanningParameters<'_>,
    ) -> Result<CompactionPlan, PluginRuntimeError>;
}

impl From<PlanError> for PluginRuntimeError {
    fn from(err: PlanError) -> Self {
        PluginRuntimeError::planner(err.to_string())
    }
}

/// Built-in planner forming fixed-size batches within provenance groups.
///
/// Candidates are partitioned by generation tag so that flush files and
/// compaction outputs never merge together, which keeps the number of files
/// produced from a known number of flushes predictable. Within each group,
/// every full run of `filesPerCompaction` files (in name order) becomes one
/// job; leftovers wait for a future round. The `compact_all` hint bypasses
/// grouping and kind filtering with a single job over everything.
#[derive(Debug)]
pub struct BatchPlanner {
    files_per_compaction: usize,
    process_system: bool,
    process_user: bool,
    pools: Vec<ExecutorPoolId>,
    next_pool: AtomicUsize,
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self {
            files_per_compaction: 0,
            process_system: false,
            process_user: false,
            pools: Vec::new(),
            next_pool: AtomicUsize::new(0),
        }
    }
}

/// Option naming the number of pools the planner declares.
pub const OPT_EXECUTORS: &str = "executors";
/// Option naming the per-pool concurrency capacity.
pub const OPT_EXECUTOR_CAPACITY: &str = "executor.capacity";
/// Option naming the batch size.
pub const OPT_FILES_PER_COMPACTION: &str = "filesPerCompaction";
/// Option listing the kinds this planner processes, comma separated.
pub const OPT_PROCESS: &str = "process";

const DEFAULT_EXECUTOR_CAPACITY: usize = 2;

impl BatchPlanner {
    fn next_pool(&self) -> ExecutorPoolId {
        let index = self.next_pool.fetch_add(1, Ordering::Relaxed) % self.pools.len();
        self.pools[index].clone()
    }

    fn processes(&self, kind: CompactionKind) -> bool {
        match kind {
            CompactionKind::System => self.process_system,
            CompactionKind::User => self.process_user,
        }
    }
}

impl CompactionPlanner for BatchPlanner {
    fn init(&mut self, mut params: InitParameters<'_>) -> Result<(), ConfigurationError> {
        let options = params.options().clone();
        let executors: usize = super::parse_required(&options, OPT_EXECUTORS)?;
        if executors == 0 {
            return Err(ConfigurationError::invalid(
                OPT_EXECUTORS,
                "0",
                "at least one executor pool is required",
            ));
        }
        let capacity: usize =
            super::parse_or(&options, OPT_EXECUTOR_CAPACITY, DEFAULT_EXECUTOR_CAPACITY)?;
        let files_per_compaction: usize =
            super::parse_required(&options, OPT_FILES_PER_COMPACTION)?;
        if files_per_compaction == 0 {
            return Err(ConfigurationError::invalid(
                OPT_FILES_PER_COMPACTION,
                "0",
                "batch size must be positive",
            ));
        }

        let process = super::require(&options, OPT_PROCESS)?;
        let mut process_system = false;
        let mut process_user = false;
        for name in process.split(',') {
            match CompactionKind::parse(name) {
                Some(CompactionKind::System) => process_system = true,
                Some(CompactionKind::User) => process_user = true,
                None => {
                    return Err(ConfigurationError::invalid(
                        OPT_PROCESS,
                        process,
                        format!("unknown compaction kind `{}`", name.trim()),
                    ));
                }
            }
        }

        let mut pools = Vec::with_capacity(executors);
        for i in 0..executors {
            pools.push(
                params
                    .executor_manager()
                    .create_executor(&format!("e{i}"), capacity),
            );
        }

        self.files_per_compaction = files_per_compaction;
        self.process_system = process_system;
        self.process_user = process_user;
        self.pools = pools;
        Ok(())
    }

    fn make_plan(
        &self,
        params: &PlanningParameters<'_>,
    ) -> Result<CompactionPlan, PluginRuntimeError> {
        if params.candidates().is_empty() {
            return Ok(CompactionPlan::empty());
        }

        if params.hints().flag(COMPACT_ALL_HINT) {
            let mut builder = params.plan_builder();
            builder.add_job(1, self.next_pool(), params.candidates().to_vec())?;
            return Ok(builder.build());
        }

        if !self.processes(params.kind()) {
            return Ok(CompactionPlan::empty());
        }

        let mut groups: BTreeMap<char, Vec<CompactableFile>> = BTreeMap::new();
        for file in params.candidates() {
            groups
                .entry(file.generation_tag())
                .or_default()
                .push(file.clone());
        }

        let mut builder = params.plan_builder();
        for files in groups.values() {
            for batch in files.chunks_exact(self.files_per_compaction) {
                builder.add_job(1, self.next_pool(), batch.to_vec())?;
            }
        }
        Ok(builder.build())
    }
}
