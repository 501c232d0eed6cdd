//! Compaction engine facade: tables, requests, and live configuration.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_lock::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{TableConfig, TableOptions},
    error::CompactionError,
    file::{CompactableFile, RowRange},
    logging::tessera_log,
    merge::{FileMerger, SimulatedMerger},
    orchestrator::{self, OrchestratorState, Outcome, StateCell},
    plugin::PluginRegistry,
    request::{CompactionKind, CompactionRequest},
    service::ServiceRegistry,
    summary::{StaticSummaryStore, SummaryStore},
    tablet::Tablet,
};

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    replan_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            replan_interval: Duration::from_millis(15),
        }
    }
}

impl EngineOptions {
    /// Delay between planning attempts of a pending user compaction.
    pub fn with_replan_interval(self, replan_interval: Duration) -> Self {
        Self { replan_interval }
    }

    pub(crate) fn replan_interval(&self) -> Duration {
        self.replan_interval
    }
}

/// Write-path collaborator invoked for `flush_first` requests.
pub trait FlushHook: Send + Sync {
    /// Flush pending writes of `table`, returning any files produced.
    fn flush<'a>(
        &'a self,
        table: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompactableFile>> + Send + 'a>>;
}

/// Default flush hook: nothing buffered, nothing produced.
#[derive(Debug, Default)]
pub struct NoopFlush;

impl FlushHook for NoopFlush {
    fn flush<'a>(
        &'a self,
        _table: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompactableFile>> + Send + 'a>> {
        Box::pin(async { Vec::new() })
    }
}

pub(crate) struct TableState {
    pub(crate) name: String,
    pub(crate) config: TableConfig,
    pub(crate) tablet: Tablet,
    pub(crate) system_active: AtomicBool,
    pub(crate) system_dirty: AtomicBool,
    pub(crate) system_state: Arc<StateCell>,
    user: Mutex<Option<UserHandle>>,
}

struct UserHandle {
    cancel: CancellationToken,
    state: Arc<StateCell>,
}

impl UserHandle {
    /// A request is settled once it reached a terminal state or quiesced
    /// back to idle; a settled slot may be taken by the next request.
    fn is_settled(&self) -> bool {
        let state = self.state.get();
        state.is_terminal() || state == OrchestratorState::Idle
    }
}

pub(crate) struct EngineInner {
    pub(crate) options: EngineOptions,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) services: ServiceRegistry,
    pub(crate) summaries: Arc<dyn SummaryStore>,
    pub(crate) merger: Arc<dyn FileMerger>,
    pub(crate) flush: Arc<dyn FlushHook>,
    tables: RwLock<HashMap<String, Arc<TableState>>>,
}

impl EngineInner {
    /// Mark the tablet dirty and make sure a system loop is running.
    pub(crate) fn nudge_system(self: &Arc<Self>, table: &Arc<TableState>) {
        table.system_dirty.store(true, Ordering::SeqCst);
        if table
            .system_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tokio::spawn(orchestrator::run_system_loop(
                Arc::clone(self),
                Arc::clone(table),
            ));
        }
    }
}

/// Handle to an issued compaction request.
#[derive(Debug)]
pub struct CompactionTicket {
    state: Arc<StateCell>,
    cancel: CancellationToken,
    done: flume::Receiver<Result<Outcome, CompactionError>>,
}

impl CompactionTicket {
    /// Current state of the orchestration.
    pub fn state(&self) -> OrchestratorState {
        self.state.get()
    }

    /// Request cooperative cancellation; takes effect at the next
    /// state-machine transition boundary. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome, propagating the terminal error.
    pub async fn wait(&self) -> Result<Outcome, CompactionError> {
        match self.done.recv_async().await {
            Ok(result) => result,
            // The outcome was already consumed (e.g. by a wait=true request);
            // reconstruct it from the terminal state.
            Err(_) => match self.state.get() {
                OrchestratorState::Converged => Ok(Outcome::Converged),
                OrchestratorState::Cancelled => Ok(Outcome::Cancelled),
                OrchestratorState::Idle => Ok(Outcome::Quiesced),
                _ => Err(CompactionError::ChannelClosed),
            },
        }
    }
}

/// The compaction planning and dispatch engine.
///
/// One instance serves many tables; each table currently maps to a single
/// tablet whose candidate files the engine tracks.
#[derive(Clone)]
pub struct CompactionEngine {
    inner: Arc<EngineInner>,
}

impl CompactionEngine {
    /// Engine with default collaborators: an in-memory summary store, the
    /// simulated merger, and a no-op flush hook.
    pub fn new(options: EngineOptions, plugins: PluginRegistry) -> Self {
        Self::with_collaborators(
            options,
            plugins,
            Arc::new(StaticSummaryStore::new()),
            Arc::new(SimulatedMerger),
            Arc::new(NoopFlush),
        )
    }

    /// Engine with explicit collaborator implementations.
    pub fn with_collaborators(
        options: EngineOptions,
        plugins: PluginRegistry,
        summaries: Arc<dyn SummaryStore>,
        merger: Arc<dyn FileMerger>,
        flush: Arc<dyn FlushHook>,
    ) -> Self {
        let plugins = Arc::new(plugins);
        Self {
            inner: Arc::new(EngineInner {
                options,
                services: ServiceRegistry::new(Arc::clone(&plugins)),
                plugins,
                summaries,
                merger,
                flush,
                tables: RwLock::new(HashMap::new()),
            }),
        }
    }

    async fn table(&self, name: &str) -> Result<Arc<TableState>, CompactionError> {
        self.inner
            .tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CompactionError::UnknownTable(name.to_string()))
    }

    /// Create a table with its initial compaction options.
    pub async fn create_table(
        &self,
        name: &str,
        options: TableOptions,
    ) -> Result<(), CompactionError> {
        let mut guard = self.inner.tables.write().await;
        if guard.contains_key(name) {
            return Err(CompactionError::TableExists(name.to_string()));
        }
        guard.insert(
            name.to_string(),
            Arc::new(TableState {
                name: name.to_string(),
                config: TableConfig::new(options),
                tablet: Tablet::new(name),
                system_active: AtomicBool::new(false),
                system_dirty: AtomicBool::new(false),
                system_state: Arc::new(StateCell::new(OrchestratorState::Idle)),
                user: Mutex::new(None),
            }),
        );
        tessera_log!(log::Level::Info, "table_created", "table={name}");
        Ok(())
    }

    /// Set one option of a compaction service, creating the service on first
    /// use. Takes effect on the next planning cycle; in-flight jobs finish
    /// under the configuration they were planned with.
    pub async fn set_service_option(&self, service: &str, key: &str, value: &str) {
        self.inner
            .services
            .config()
            .set_option(service, key, value)
            .await;
        tessera_log!(
            log::Level::Info,
            "service_option_set",
            "service={service} key={key} value={value}"
        );
    }

    /// Define (or redefine) a compaction service wholesale.
    pub async fn define_service(&self, service: &str, options: BTreeMap<String, String>) {
        self.inner.services.config().define(service, options).await;
        tessera_log!(log::Level::Info, "service_defined", "service={service}");
    }

    /// Change one table option at runtime.
    pub async fn set_table_option(
        &self,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CompactionError> {
        let table = self.table(table).await?;
        table.config.set_option(key, value).await;
        Ok(())
    }

    /// Register a freshly flushed file and wake the system orchestrator.
    pub async fn add_file(
        &self,
        table: &str,
        size: u64,
        row_range: Option<RowRange>,
    ) -> Result<CompactableFile, CompactionError> {
        let table = self.table(table).await?;
        let file = CompactableFile::flushed(size, row_range);
        table.tablet.insert(file.clone()).await;
        self.inner.nudge_system(&table);
        Ok(file)
    }

    /// Status query: the table's current candidate files.
    ///
    /// The snapshot is taken atomically with respect to compaction commits,
    /// so it never shows a half-applied replacement.
    pub async fn candidate_files(
        &self,
        table: &str,
    ) -> Result<Vec<CompactableFile>, CompactionError> {
        let table = self.table(table).await?;
        Ok(table.tablet.snapshot().await)
    }

    /// Issue a compaction request.
    ///
    /// User requests run until the scoped candidates converge to one file or
    /// the request is cancelled. System requests wake the background loop and
    /// resolve once it drains. `wait=true` blocks until the terminal state
    /// and propagates the terminal error.
    pub async fn request_compaction(
        &self,
        table: &str,
        kind: CompactionKind,
        request: CompactionRequest,
    ) -> Result<CompactionTicket, CompactionError> {
        let table = self.table(table).await?;
        let wait = request.wait;
        let ticket = match kind {
            CompactionKind::System => self.request_system(&table),
            CompactionKind::User => self.request_user(&table, request).await?,
        };
        if wait {
            ticket.wait().await?;
        }
        Ok(ticket)
    }

    fn request_system(&self, table: &Arc<TableState>) -> CompactionTicket {
        self.inner.nudge_system(table);
        let (done_tx, done_rx) = flume::bounded(1);
        let inner = Arc::clone(&self.inner);
        let table = Arc::clone(table);
        let state = Arc::clone(&table.system_state);
        tokio::spawn(async move {
            loop {
                if !table.system_active.load(Ordering::SeqCst)
                    && !table.system_dirty.load(Ordering::SeqCst)
                {
                    break;
                }
                tokio::time::sleep(inner.options.replan_interval()).await;
            }
            let _ = done_tx.send(Ok(Outcome::Quiesced));
        });
        CompactionTicket {
            state,
            cancel: CancellationToken::new(),
            done: done_rx,
        }
    }

    async fn request_user(
        &self,
        table: &Arc<TableState>,
        request: CompactionRequest,
    ) -> Result<CompactionTicket, CompactionError> {
        let mut guard = table.user.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_settled() {
                return Err(CompactionError::AlreadyRunning(table.name.clone()));
            }
        }
        let cancel = CancellationToken::new();
        let state = Arc::new(StateCell::new(OrchestratorState::Selecting));
        *guard = Some(UserHandle {
            cancel: cancel.clone(),
            state: Arc::clone(&state),
        });
        drop(guard);

        let (done_tx, done_rx) = flume::bounded(1);
        let inner = Arc::clone(&self.inner);
        let table_for_task = Arc::clone(table);
        let state_for_task = Arc::clone(&state);
        let cancel_for_task = cancel.clone();
        tokio::spawn(async move {
            let table_name = table_for_task.name.clone();
            let result = orchestrator::run_user(
                inner,
                table_for_task,
                request,
                cancel_for_task,
                Arc::clone(&state_for_task),
            )
            .await;
            if let Err(err) = &result {
                state_for_task.set(OrchestratorState::Failed);
                tessera_log!(
                    log::Level::Warn,
                    "user_compaction_failed",
                    "table={table_name} error={err}"
                );
            }
            let _ = done_tx.send(result);
        });
        Ok(CompactionTicket {
            state,
            cancel,
            done: done_rx,
        })
    }

    /// Cancel the table's active user compaction, if any.
    ///
    /// Cooperative and idempotent: cancelling an already-finished request, or
    /// a table with no request at all, is a no-op.
    pub async fn cancel_compaction(&self, table: &str) -> Result<(), CompactionError> {
        let table = self.table(table).await?;
        if let Some(handle) = table.user.lock().await.as_ref() {
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// State of the most recent user compaction request, if one was issued.
    pub async fn user_compaction_state(
        &self,
        table: &str,
    ) -> Result<Option<OrchestratorState>, CompactionError> {
        let table = self.table(table).await?;
        let state = table.user.lock().await.as_ref().map(|h| h.state.get());
        Ok(state)
    }
}
