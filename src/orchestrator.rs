//! Per-tablet compaction orchestration.
//!
//! One orchestration instance runs per (tablet, kind): a background system
//! loop driven by file arrivals, and user-requested runs that keep planning
//! until the scoped candidates converge to a single file or the request is
//! cancelled. Planning never holds the tablet file-list lock; only the
//! replace-inputs-with-output commit does.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{table_configurer, table_selector},
    dispatch,
    engine::{EngineInner, TableState},
    error::{CompactionError, PlanError, PluginRuntimeError},
    file::{CompactableFile, RowRange},
    logging::tessera_log,
    merge::MergeRequest,
    plugin::{
        configurer::OutputOverrides,
        planner::{CompactionPlan, PlanningParameters},
        selector::SelectionContext,
        PluginConfig,
    },
    request::{CompactionKind, CompactionRequest, ExecutionHints, IteratorSpec},
    service::ServiceState,
};

/// Observable state of one orchestration instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OrchestratorState {
    /// No compaction in progress.
    Idle = 0,
    /// Narrowing candidates through the selector.
    Selecting = 1,
    /// Asking the dispatched service's planner for a plan.
    Planning = 2,
    /// Jobs submitted; waiting for pools to finish them.
    Executing = 3,
    /// A user compaction reached a single remaining file.
    Converged = 4,
    /// The request was cancelled at a transition boundary.
    Cancelled = 5,
    /// A plugin or configuration failure ended the attempt.
    Failed = 6,
}

impl OrchestratorState {
    /// Whether this is a terminal state of a user request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Cancelled | Self::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Selecting,
            2 => Self::Planning,
            3 => Self::Executing,
            4 => Self::Converged,
            5 => Self::Cancelled,
            6 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Converged => "converged",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding an [`OrchestratorState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: OrchestratorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn set(&self, state: OrchestratorState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> OrchestratorState {
        OrchestratorState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Terminal outcome of a compaction request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The scoped candidates were reduced to a single file.
    Converged,
    /// The attempt ended without work: an empty selection, or the background
    /// loop drained all plannable work.
    Quiesced,
    /// The request was cancelled before convergence.
    Cancelled,
}

/// Background loop for system compactions of one tablet.
///
/// At most one instance runs per tablet; the caller owns the
/// `system_active`/`system_dirty` handshake that enforces it.
pub(crate) async fn run_system_loop(inner: Arc<EngineInner>, table: Arc<TableState>) {
    tessera_log!(log::Level::Trace, "system_loop_started", "table={}", table.name);
    loop {
        table.system_dirty.store(false, Ordering::SeqCst);
        let progressed = match system_round(&inner, &table).await {
            Ok(progressed) => progressed,
            Err(err) => {
                table.system_state.set(OrchestratorState::Failed);
                tessera_log!(
                    log::Level::Warn,
                    "system_round_failed",
                    "table={} error={err}",
                    table.name
                );
                false
            }
        };
        if progressed || table.system_dirty.load(Ordering::SeqCst) {
            continue;
        }
        table.system_active.store(false, Ordering::SeqCst);
        // A file may have arrived between the dirty check and the handoff;
        // reclaim the loop if nobody else did.
        if table.system_dirty.load(Ordering::SeqCst)
            && table
                .system_active
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            continue;
        }
        break;
    }
    tessera_log!(log::Level::Trace, "system_loop_stopped", "table={}", table.name);
}

async fn system_round(
    inner: &Arc<EngineInner>,
    table: &Arc<TableState>,
) -> Result<bool, CompactionError> {
    let hints = ExecutionHints::default();
    table.system_state.set(OrchestratorState::Selecting);
    let options = table.config.snapshot().await;
    let service_name = dispatch::resolve(&table.name, &options, CompactionKind::System, &hints)?;
    let service = inner.services.resolve(&service_name).await?;

    let available = table.tablet.unreserved_snapshot().await;
    if available.is_empty() {
        table.system_state.set(OrchestratorState::Idle);
        return Ok(false);
    }
    let candidates = match run_selector(inner, &options, None, &available)? {
        None => available,
        Some(files) => {
            if files.is_empty() {
                table.system_state.set(OrchestratorState::Idle);
                return Ok(false);
            }
            files
        }
    };

    table.system_state.set(OrchestratorState::Planning);
    let params = PlanningParameters::new(CompactionKind::System, &candidates, &hints);
    let plan = service.make_plan(&params)?;
    if plan.is_empty() {
        table.system_state.set(OrchestratorState::Idle);
        return Ok(false);
    }

    table.system_state.set(OrchestratorState::Executing);
    let context = AttemptContext {
        options: &options,
        iterators: &[],
        configurer: None,
    };
    let committed = execute_plan(inner, table, &service, plan, context).await?;
    table.system_state.set(OrchestratorState::Idle);
    Ok(committed > 0)
}

/// Drive one user compaction request to a terminal outcome.
pub(crate) async fn run_user(
    inner: Arc<EngineInner>,
    table: Arc<TableState>,
    request: CompactionRequest,
    cancel: CancellationToken,
    state: Arc<StateCell>,
) -> Result<Outcome, CompactionError> {
    if request.flush_first {
        for file in inner.flush.flush(&table.name).await {
            table.tablet.insert(file).await;
        }
        inner.nudge_system(&table);
    }

    loop {
        if cancel.is_cancelled() {
            state.set(OrchestratorState::Cancelled);
            return Ok(Outcome::Cancelled);
        }

        let scoped = filter_range(table.tablet.snapshot().await, request.row_range.as_ref());
        if scoped.len() <= 1 {
            state.set(OrchestratorState::Converged);
            return Ok(Outcome::Converged);
        }

        state.set(OrchestratorState::Selecting);
        let options = table.config.snapshot().await;
        let service_name =
            dispatch::resolve(&table.name, &options, CompactionKind::User, &request.hints)?;
        let service = inner.services.resolve(&service_name).await?;

        let available = filter_range(
            table.tablet.unreserved_snapshot().await,
            request.row_range.as_ref(),
        );
        let candidates = match run_selector(&inner, &options, request.selector.as_ref(), &available)?
        {
            None => available,
            Some(files) => {
                if files.is_empty() {
                    state.set(OrchestratorState::Idle);
                    return Ok(Outcome::Quiesced);
                }
                files
            }
        };

        if candidates.is_empty() {
            // Everything in scope is claimed by in-flight jobs.
            if wait_or_cancelled(&inner, &cancel).await {
                state.set(OrchestratorState::Cancelled);
                return Ok(Outcome::Cancelled);
            }
            continue;
        }

        state.set(OrchestratorState::Planning);
        let params = PlanningParameters::new(CompactionKind::User, &candidates, &request.hints);
        let plan = service.make_plan(&params)?;
        if plan.is_empty() {
            // Convergence is not reached, so keep asking the planner until
            // more files appear or the request is cancelled.
            if wait_or_cancelled(&inner, &cancel).await {
                state.set(OrchestratorState::Cancelled);
                return Ok(Outcome::Cancelled);
            }
            continue;
        }

        if cancel.is_cancelled() {
            state.set(OrchestratorState::Cancelled);
            return Ok(Outcome::Cancelled);
        }
        state.set(OrchestratorState::Executing);
        let context = AttemptContext {
            options: &options,
            iterators: &request.iterators,
            configurer: request.configurer.as_ref(),
        };
        let committed = execute_plan(&inner, &table, &service, plan, context).await?;
        if committed > 0 {
            inner.nudge_system(&table);
        } else if wait_or_cancelled(&inner, &cancel).await {
            // The plan lost every reservation race; back off before replanning.
            state.set(OrchestratorState::Cancelled);
            return Ok(Outcome::Cancelled);
        }
    }
}

async fn wait_or_cancelled(inner: &Arc<EngineInner>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(inner.options.replan_interval()) => false,
    }
}

fn filter_range(files: Vec<CompactableFile>, range: Option<&RowRange>) -> Vec<CompactableFile> {
    match range {
        None => files,
        Some(range) => files.into_iter().filter(|f| f.overlaps(range)).collect(),
    }
}

/// Run the applicable selector, if any.
///
/// `Ok(None)` means no selector is configured; `Ok(Some(files))` is the
/// (possibly empty) selection.
fn run_selector(
    inner: &Arc<EngineInner>,
    options: &BTreeMap<String, String>,
    request_override: Option<&PluginConfig>,
    available: &[CompactableFile],
) -> Result<Option<Vec<CompactableFile>>, CompactionError> {
    let Some(config) = request_override
        .cloned()
        .or_else(|| table_selector(options))
    else {
        return Ok(None);
    };
    let mut selector = inner.plugins.new_selector(config.id())?;
    selector.init(config.options())?;
    let ctx = SelectionContext::new(available, inner.summaries.as_ref());
    let selection = selector.select(&ctx)?;
    for file in selection.files() {
        if !available.iter().any(|c| c.name() == file.name()) {
            return Err(PluginRuntimeError::selector(format!(
                "selected file `{}` is not among the available files",
                file.name()
            ))
            .into());
        }
    }
    Ok(Some(selection.into_files()))
}

fn run_configurer(
    inner: &Arc<EngineInner>,
    options: &BTreeMap<String, String>,
    request_override: Option<&PluginConfig>,
    inputs: &[CompactableFile],
) -> Result<OutputOverrides, CompactionError> {
    let Some(config) = request_override
        .cloned()
        .or_else(|| table_configurer(options))
    else {
        return Ok(OutputOverrides::none());
    };
    let mut configurer = inner.plugins.new_configurer(config.id())?;
    configurer.init(config.options())?;
    Ok(configurer.configure(inputs)?)
}

struct AttemptContext<'a> {
    options: &'a BTreeMap<String, String>,
    iterators: &'a [IteratorSpec],
    configurer: Option<&'a PluginConfig>,
}

/// Submit a plan's jobs to their pools and commit each output as it lands.
///
/// Jobs whose files were claimed by a concurrent orchestration in the window
/// since planning are skipped; they will be replanned from fresher state.
/// Returns the number of committed jobs.
async fn execute_plan(
    inner: &Arc<EngineInner>,
    table: &Arc<TableState>,
    service: &Arc<ServiceState>,
    plan: CompactionPlan,
    context: AttemptContext<'_>,
) -> Result<usize, CompactionError> {
    let mut resolved = Vec::with_capacity(plan.jobs().len());
    for job in plan.into_jobs() {
        match service.pool(job.executor()) {
            Some(pool) => resolved.push((job, Arc::clone(pool))),
            None => {
                return Err(CompactionError::InvalidPlan(PlanError::UnknownPool(
                    job.executor().to_string(),
                )))
            }
        }
    }

    let mut pending = Vec::new();
    let mut submit_err = None;
    for (job, pool) in resolved {
        if !table.tablet.try_reserve(job.files()).await {
            tessera_log!(
                log::Level::Debug,
                "job_skipped",
                "table={} service={} files already claimed",
                table.name,
                service.name()
            );
            continue;
        }
        let files = job.files().to_vec();
        let overrides = match run_configurer(inner, context.options, context.configurer, &files) {
            Ok(overrides) => overrides,
            Err(err) => {
                table.tablet.release(&files).await;
                submit_err = Some(err);
                break;
            }
        };
        let merge = MergeRequest {
            table: table.name.clone(),
            files: files.clone(),
            iterators: context.iterators.to_vec(),
            overrides,
        };
        let (done_tx, done_rx) = oneshot::channel();
        let merger = Arc::clone(&inner.merger);
        tessera_log!(
            log::Level::Debug,
            "job_submitted",
            "table={} pool={} priority={} files={}",
            table.name,
            job.executor(),
            job.priority(),
            files.len()
        );
        let job_future = async move {
            let output = merger.merge(&merge).await;
            let _ = done_tx.send(output);
        };
        if let Err(err) = pool.submit(Box::pin(job_future)).await {
            table.tablet.release(&files).await;
            submit_err = Some(err);
            break;
        }
        pending.push((files, done_rx));
    }

    // Even on a submission error, already-running jobs finish and keep their
    // outputs; their inputs are consumed by the commit below.
    let mut committed = 0usize;
    let mut wait_err = None;
    let results = join_all(
        pending
            .into_iter()
            .map(|(files, rx)| async move { (files, rx.await) }),
    )
    .await;
    for (files, result) in results {
        match result {
            Ok(output) => {
                table.tablet.commit(&files, output).await;
                committed += 1;
            }
            Err(_) => {
                table.tablet.release(&files).await;
                wait_err = Some(CompactionError::PoolClosed);
            }
        }
    }

    if let Some(err) = submit_err.or(wait_err) {
        return Err(err);
    }
    Ok(committed)
}
