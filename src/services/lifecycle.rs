use super::cleanup::{CleanupCoordinator, CleanupReport};
use super::project_name::ProjectNameAllocator;
use super::readiness::ReadinessWaiter;
use super::state_file::{STATE_FILE_EXTENSION, StateFilePublisher};
use super::ComposeService;
use crate::domain::error::Result;
use crate::domain::{
    Clock, ComposeConfig, ComposeRuntime, ComposeState, EnvError, ProjectName, Scope, ScopeRequest,
    WaitConfig,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Ready,
    TearingDown,
    Stopped,
    /// Entry failed. Only `exit_scope` leaves this state.
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Ready => "READY",
            Self::TearingDown => "TEARING_DOWN",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one scope instance owns between entry and exit.
///
/// Returned by `enter_scope` and handed back to `exit_scope`; nothing about a
/// scope instance lives anywhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeContext {
    state: LifecycleState,
    stack_name: String,
    scope: Scope,
    project: Option<ProjectName>,
    compose_files: Vec<PathBuf>,
    compose_state: Option<ComposeState>,
    state_file: Option<PathBuf>,
}

impl ScopeContext {
    pub fn idle(stack_name: impl Into<String>, scope: Scope) -> Self {
        Self {
            state: LifecycleState::Idle,
            stack_name: stack_name.into(),
            scope,
            project: None,
            compose_files: Vec::new(),
            compose_state: None,
            state_file: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn project(&self) -> Option<&ProjectName> {
        self.project.as_ref()
    }

    /// Files the environment was started from; teardown reuses them.
    pub fn compose_files(&self) -> &[PathBuf] {
        &self.compose_files
    }

    /// Present only while the environment is up.
    pub fn compose_state(&self) -> Option<&ComposeState> {
        self.compose_state.as_ref()
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(
            stack = %self.stack_name,
            from = %self.state,
            to = %next,
            "lifecycle transition"
        );
        self.state = next;
    }
}

/// A failed `enter_scope`. The environment has already been cleaned up once;
/// `context` is in `FAILED` and may still be passed to `exit_scope`.
#[derive(Debug, Error)]
#[error("entering scope for stack '{}' failed", .context.stack_name)]
pub struct EnterScopeError {
    pub source: EnvError,
    pub context: ScopeContext,
    pub cleanup: CleanupReport,
}

impl EnterScopeError {
    pub fn kind(&self) -> &EnvError {
        &self.source
    }

    pub fn into_parts(self) -> (EnvError, ScopeContext) {
        (self.source, self.context)
    }
}

/// Sequences allocate, start, wait and publish on entry and cleanup on exit.
///
/// Holds no per-scope state, so one coordinator can serve any number of
/// concurrent scope instances.
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    allocator: ProjectNameAllocator,
    compose: Arc<ComposeService>,
    waiter: ReadinessWaiter,
    publisher: StateFilePublisher,
    cleanup: CleanupCoordinator,
}

impl LifecycleCoordinator {
    pub fn new(runtime: Arc<dyn ComposeRuntime>, clock: Arc<dyn Clock>) -> Self {
        let compose = Arc::new(ComposeService::new(runtime));
        Self {
            allocator: ProjectNameAllocator::new(clock.clone()),
            waiter: ReadinessWaiter::new(compose.clone(), clock.clone()),
            publisher: StateFilePublisher::new(clock),
            cleanup: CleanupCoordinator::new(compose.clone()),
            compose,
        }
    }

    pub fn compose(&self) -> &ComposeService {
        &self.compose
    }

    /// Brings up a fresh environment for one scope instance.
    ///
    /// Any failure after the project name is allocated triggers a cleanup of
    /// that project before the error is returned.
    pub fn enter_scope(
        &self,
        request: &ScopeRequest,
    ) -> std::result::Result<ScopeContext, EnterScopeError> {
        let mut context = ScopeContext::idle(&request.stack_name, request.scope);
        context.transition(LifecycleState::Starting);

        let project =
            self.allocator
                .allocate(&request.stack_name, request.scope, request.discriminator.as_slice());
        let state_file = request
            .state_dir
            .join(format!("{}.{STATE_FILE_EXTENSION}", project.as_str()));
        context.project = Some(project.clone());
        context.compose_files = request.compose_files.clone();
        context.state_file = Some(state_file.clone());

        info!(
            stack = %request.stack_name,
            scope = %request.scope,
            project = %project,
            "entering scope"
        );

        match self.bring_up(request, &project, &state_file) {
            Ok(compose_state) => {
                context.compose_state = Some(compose_state);
                context.transition(LifecycleState::Ready);
                info!(project = %project, state_file = ?state_file, "environment ready");
                Ok(context)
            }
            Err(source) => {
                error!(project = %project, error = %source, "scope entry failed, cleaning up");
                let cleanup =
                    self.cleanup
                        .cleanup(&project, &request.compose_files, Some(&state_file));
                context.transition(LifecycleState::Failed);
                Err(EnterScopeError {
                    source,
                    context,
                    cleanup,
                })
            }
        }
    }

    fn bring_up(
        &self,
        request: &ScopeRequest,
        project: &ProjectName,
        state_file: &Path,
    ) -> Result<ComposeState> {
        let config = ComposeConfig::new(
            request.compose_files.clone(),
            project.as_str(),
            &request.stack_name,
        );
        let compose_state = self.compose.start(&config)?;

        let wait = WaitConfig::new(
            project.as_str(),
            request.services.clone(),
            request.timeout,
            request.poll_interval,
            request.target,
        )
        .compose_files(request.compose_files.clone());
        self.waiter.await_ready(&wait)?;

        self.publisher
            .publish(&compose_state, request.scope, state_file)?;
        Ok(compose_state)
    }

    /// Tears the scope down. Never fails: cleanup problems are logged and
    /// returned in the report. Contexts that never started anything are a no-op.
    pub fn exit_scope(&self, mut context: ScopeContext) -> CleanupReport {
        let project = match (context.state, context.project.take()) {
            (LifecycleState::Idle | LifecycleState::Stopped, _) | (_, None) => {
                debug!(stack = %context.stack_name, state = %context.state, "nothing to tear down");
                return CleanupReport::default();
            }
            (_, Some(project)) => project,
        };

        if context.state == LifecycleState::Failed {
            debug!(project = %project, "repeating cleanup after failed entry");
        }
        context.transition(LifecycleState::TearingDown);
        context.compose_state = None;

        let report = self.cleanup.cleanup(
            &project,
            &context.compose_files,
            context.state_file.as_deref(),
        );
        for warning in &report.warnings {
            warn!(project = %project, %warning, "teardown warning");
        }

        context.transition(LifecycleState::Stopped);
        info!(project = %project, "scope exited");
        report
    }

    /// Cleans up a project that is not tracked by any live context, e.g. one
    /// left running by an earlier process.
    pub fn teardown(
        &self,
        project: &ProjectName,
        compose_files: &[PathBuf],
        state_file: Option<&Path>,
    ) -> CleanupReport {
        self.cleanup.cleanup(project, compose_files, state_file)
    }

    /// Like `enter_scope`, but the environment is torn down when the guard drops.
    pub fn enter_guarded(
        &self,
        request: &ScopeRequest,
    ) -> std::result::Result<EnvironmentGuard, EnterScopeError> {
        let context = self.enter_scope(request)?;
        Ok(EnvironmentGuard {
            coordinator: self.clone(),
            context: Some(context),
        })
    }
}

/// Exits its scope on drop, including during a panic unwinding out of a test.
#[derive(Debug)]
pub struct EnvironmentGuard {
    coordinator: LifecycleCoordinator,
    context: Option<ScopeContext>,
}

impl EnvironmentGuard {
    pub fn context(&self) -> Option<&ScopeContext> {
        self.context.as_ref()
    }

    pub fn project(&self) -> Option<&ProjectName> {
        self.context.as_ref().and_then(ScopeContext::project)
    }

    pub fn compose_state(&self) -> Option<&ComposeState> {
        self.context.as_ref().and_then(ScopeContext::compose_state)
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.context.as_ref().and_then(ScopeContext::state_file)
    }

    /// Exits now and returns the report instead of discarding it on drop.
    pub fn finish(mut self) -> CleanupReport {
        match self.context.take() {
            Some(context) => self.coordinator.exit_scope(context),
            None => CleanupReport::default(),
        }
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.coordinator.exit_scope(context);
        }
    }
}
