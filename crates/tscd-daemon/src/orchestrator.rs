//! Watch Orchestrator - one compiler session per project, one query surface
//!
//! The orchestrator is the only writer of diagnostic buckets. Every session
//! event lands in the store first. A file's bucket is written through to the
//! cache once the session moves on to another file, the pass completes, or a
//! query needs it. While a file is still being filled its cache key is
//! absent, so store and cache never disagree on a key they both hold.
//!
//! Everything runs on the caller's thread: feed session events in with
//! [`WatchOrchestrator::handle_event`] from the same loop that serves
//! queries.

use crate::session::{
    CompilerSession, EventReceiver, EventSender, PhaseSignal, SessionEvent, SessionFactory,
};
use crate::store::DiagnosticStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tscd_core::{
    normalize_path, now_millis, CacheStats, Diagnostic, DiagnosticCache, DiagnosticCount,
    DiagnosticsResult, IgnoreFilter, ProjectConfig, TscdError, WatchConfig, WatchMode, Workspace,
};

/// Lifecycle of one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Idle,
    Starting,
    Watching,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    Inactive,
    Active,
    Stopped,
}

/// Published to subscribers whenever a project finishes a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub project_id: String,
    pub project_name: String,
    pub errors: usize,
    pub warnings: usize,
    pub completed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub id: String,
    pub name: String,
    pub state: ProjectState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    pub active: bool,
    pub mode: WatchMode,
    pub watched_projects: usize,
    pub watched_files: usize,
    pub last_compilation: Option<u64>,
    pub projects: Vec<ProjectStatus>,
}

pub struct WatchOrchestrator {
    workspace: Workspace,
    filter: IgnoreFilter,
    factory: Box<dyn SessionFactory>,
    sessions: BTreeMap<String, Box<dyn CompilerSession>>,
    states: BTreeMap<String, ProjectState>,
    store: DiagnosticStore,
    cache: DiagnosticCache,
    state: OrchestratorState,
    last_compilation: Option<u64>,
    /// (project, file) whose bucket has not been written to the cache yet
    staged: Option<(String, PathBuf)>,
    events: EventSender,
    subscribers: Vec<mpsc::UnboundedSender<PassSummary>>,
}

impl WatchOrchestrator {
    /// Build an orchestrator and the receiving end of its session events.
    pub fn new(
        workspace: Workspace,
        config: &WatchConfig,
        factory: Box<dyn SessionFactory>,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let filter = IgnoreFilter::new(&workspace.root, &config.ignore_patterns);

        let mut store = DiagnosticStore::new();
        let mut states = BTreeMap::new();
        for project in &workspace.projects {
            store.register(project.id.clone());
            states.insert(project.id.clone(), ProjectState::Idle);
        }

        let orchestrator = Self {
            workspace,
            filter,
            factory,
            sessions: BTreeMap::new(),
            states,
            store,
            cache: DiagnosticCache::new(config.cache_size_mb),
            state: OrchestratorState::Inactive,
            last_compilation: None,
            staged: None,
            events,
            subscribers: Vec::new(),
        };

        (orchestrator, receiver)
    }

    /// Replace the cache (sizing and TTL)
    pub fn with_cache(mut self, cache: DiagnosticCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Sender that feeds this orchestrator's event queue
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn project_state(&self, project_id: &str) -> Option<ProjectState> {
        self.states.get(project_id).copied()
    }

    /// Open a session for every watchable project.
    ///
    /// Ignored projects stay idle. A missing config or a failed open puts
    /// that project in `Error` and the rest carry on. Returns the number of
    /// projects now watching.
    pub fn start(&mut self) -> usize {
        if self.state == OrchestratorState::Active {
            debug!("Orchestrator already active");
            return self.sessions.len();
        }
        self.state = OrchestratorState::Active;

        for project in &self.workspace.projects {
            if self.filter.is_ignored(&project.config_path) {
                info!("Ignoring project {} ({})", project.name, project.id);
                continue;
            }

            if !project.config_exists() {
                let err = TscdError::configuration(
                    &project.name,
                    format!("{} not found", project.config_path.display()),
                );
                warn!("Skipping project: {}", err);
                self.states.insert(project.id.clone(), ProjectState::Error);
                continue;
            }

            self.states.insert(project.id.clone(), ProjectState::Starting);
            match self.factory.open(project, self.events.clone()) {
                Ok(session) => {
                    info!("Watching {} ({})", project.name, project.config_path.display());
                    self.sessions.insert(project.id.clone(), session);
                    self.states.insert(project.id.clone(), ProjectState::Watching);
                }
                Err(e) => {
                    warn!("Failed to start session for {}: {:#}", project.name, e);
                    self.states.insert(project.id.clone(), ProjectState::Error);
                }
            }
        }

        info!(
            "Watching {}/{} project(s)",
            self.sessions.len(),
            self.workspace.projects.len()
        );
        self.sessions.len()
    }

    /// Close every session. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.state != OrchestratorState::Active && self.sessions.is_empty() {
            return;
        }

        for (id, mut session) in std::mem::take(&mut self.sessions) {
            if let Err(e) = session.close() {
                warn!("Failed to close session for {}: {:#}", id, e);
            }
            self.states.insert(id, ProjectState::Stopped);
        }

        self.state = OrchestratorState::Stopped;
        info!("Orchestrator stopped");
    }

    /// Receive a `PassSummary` for every completed pass, in order per project
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PassSummary> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        if !self.store.contains(event.project_id()) {
            warn!("Dropping event for unknown project {}", event.project_id());
            return;
        }

        match event {
            SessionEvent::Diagnostic {
                project_id,
                diagnostic,
            } => self.on_diagnostic(&project_id, diagnostic),
            SessionEvent::PhaseChange {
                project_id,
                message,
            } => self.on_phase_change(&project_id, &message),
            SessionEvent::Exited { project_id } => self.on_session_exit(&project_id),
        }
    }

    /// Store a diagnostic, replacing the file's bucket if it came from an
    /// older pass. The bucket reaches the cache when it is flushed.
    pub fn on_diagnostic(&mut self, project_id: &str, mut diagnostic: Diagnostic) {
        let Some(root) = self.project(project_id).map(|p| p.root.clone()) else {
            warn!("Dropping diagnostic for unknown project {}", project_id);
            return;
        };

        diagnostic.file = normalize_path(&diagnostic.file, &root);
        let is_staged = self
            .staged
            .as_ref()
            .is_some_and(|(id, file)| id == project_id && *file == diagnostic.file);

        if !is_staged {
            self.flush_staged();
            self.cache.delete(project_id, &diagnostic.file);
            self.staged = Some((project_id.to_string(), diagnostic.file.clone()));
        }
        self.store.insert(project_id, diagnostic);
    }

    /// Write the staged bucket through to the cache
    fn flush_staged(&mut self) {
        let Some((project_id, file)) = self.staged.take() else {
            return;
        };
        if let Some(bucket) = self.store.file(&project_id, &file) {
            self.cache.set(&project_id, &file, bucket.to_vec());
        }
    }

    /// A session died without being asked to. Its last diagnostics stay
    /// queryable; the project is reported as `Error`.
    pub fn on_session_exit(&mut self, project_id: &str) {
        let Some(mut session) = self.sessions.remove(project_id) else {
            debug!("{}: session already closed", project_id);
            return;
        };
        if let Err(e) = session.close() {
            debug!("Failed to clean up session for {}: {:#}", project_id, e);
        }

        self.flush_staged();
        self.states.insert(project_id.to_string(), ProjectState::Error);
        warn!("Compiler session for {} exited; diagnostics are frozen", project_id);
    }

    pub fn on_phase_change(&mut self, project_id: &str, message: &str) {
        match PhaseSignal::classify(message) {
            PhaseSignal::PassStarted => {
                debug!("{}: {}", project_id, message);
                self.store.begin_pass(project_id);
            }
            PhaseSignal::PassCompleted => self.complete_pass(project_id),
            PhaseSignal::Other => debug!("{}: {}", project_id, message),
        }
    }

    fn complete_pass(&mut self, project_id: &str) {
        self.flush_staged();
        let Some(pruned) = self.store.complete_pass(project_id) else {
            warn!("Pass completed for unknown project {}", project_id);
            return;
        };
        for file in &pruned {
            self.cache.delete(project_id, file);
        }

        let completed_at = now_millis();
        self.last_compilation = Some(completed_at);

        let totals = self.store.project_totals(project_id).unwrap_or_default();
        let summary = PassSummary {
            project_id: project_id.to_string(),
            project_name: self
                .project(project_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| project_id.to_string()),
            errors: totals.errors,
            warnings: totals.warnings,
            completed_at,
        };

        info!(
            "{}: pass complete, {} error(s), {} warning(s)",
            summary.project_name, summary.errors, summary.warnings
        );
        self.subscribers.retain(|tx| tx.send(summary.clone()).is_ok());
    }

    /// Every diagnostic in every project
    pub fn get_all_diagnostics(&self) -> DiagnosticsResult {
        DiagnosticsResult::new("all", self.store.all_diagnostics(), false)
    }

    /// Cache-only lookup across every project namespace. A miss is an empty
    /// result, never a scan of the store.
    pub fn get_file_diagnostics(&mut self, path: &Path) -> DiagnosticsResult {
        self.flush_staged();
        let file = self.resolve(path);
        let source = file.display().to_string();

        match self.cache.lookup_file(self.store.project_ids(), &file) {
            Some(diagnostics) => DiagnosticsResult::new(source, diagnostics, true),
            None => DiagnosticsResult::empty(source),
        }
    }

    /// `None` when no project has that name (or id)
    pub fn get_package_diagnostics(&self, name: &str) -> Option<DiagnosticsResult> {
        let project = self
            .workspace
            .projects
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.project(name))?;

        let diagnostics = self.store.project_diagnostics(&project.id).unwrap_or_default();
        Some(DiagnosticsResult::new(name, diagnostics, false))
    }

    /// Any error at all, or in one file (answered from the cache)
    pub fn has_errors(&mut self, path: Option<&Path>) -> bool {
        match path {
            Some(path) => {
                self.flush_staged();
                let file = self.resolve(path);
                self.cache
                    .lookup_file(self.store.project_ids(), &file)
                    .is_some_and(|diagnostics| diagnostics.iter().any(Diagnostic::is_error))
            }
            None => self.store.has_errors(),
        }
    }

    pub fn get_diagnostic_count(&self) -> DiagnosticCount {
        self.store.totals().into()
    }

    /// Forget one file everywhere; returns whether anything was removed
    pub fn clear_file_diagnostics(&mut self, path: &Path) -> bool {
        self.flush_staged();
        let file = self.resolve(path);
        let removed = self.store.remove_file(&file);

        let ids: Vec<String> = self.store.project_ids().map(String::from).collect();
        for id in &ids {
            self.cache.delete(id, &file);
        }

        debug!("Cleared {} from {} project(s)", file.display(), removed.len());
        !removed.is_empty()
    }

    pub fn clear_all_diagnostics(&mut self) {
        self.staged = None;
        self.store.clear();
        self.cache.clear();
        debug!("Cleared all diagnostics");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn status(&self) -> WatchStatus {
        WatchStatus {
            active: self.state == OrchestratorState::Active,
            mode: self.workspace.mode(),
            watched_projects: self.sessions.len(),
            watched_files: self.sessions.values().map(|s| s.watched_files()).sum(),
            last_compilation: self.last_compilation,
            projects: self
                .workspace
                .projects
                .iter()
                .map(|p| ProjectStatus {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    state: self.states.get(&p.id).copied().unwrap_or(ProjectState::Idle),
                })
                .collect(),
        }
    }

    /// Check that every cached bucket matches the store
    pub fn verify_consistency(&self) -> tscd_core::Result<()> {
        for (key, cached) in self.cache.entries() {
            let stored = self.store.file(&key.project, &key.file);
            if stored != Some(cached) {
                return Err(TscdError::Invariant(format!(
                    "cache entry {} disagrees with the store",
                    key.render()
                )));
            }
        }
        Ok(())
    }

    fn project(&self, project_id: &str) -> Option<&ProjectConfig> {
        self.workspace.projects.iter().find(|p| p.id == project_id)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        normalize_path(path, &self.workspace.root)
    }
}

impl Drop for WatchOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
