mod cleanup;
mod compose_service;
mod lifecycle;
pub mod project_name;
mod readiness;
mod state_file;

pub use cleanup::{CleanupCoordinator, CleanupReport, CleanupWarning};
pub use compose_service::ComposeService;
pub use lifecycle::{
    EnterScopeError, EnvironmentGuard, LifecycleCoordinator, LifecycleState, ScopeContext,
};
pub use project_name::ProjectNameAllocator;
pub use readiness::ReadinessWaiter;
pub use state_file::{
    STATE_FILE_ENV, STATE_FILE_EXTENSION, StateFile, StateFilePublisher, StateFileService, remove_state_files,
};
