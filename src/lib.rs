pub mod domain;
pub mod infra;
pub mod services;

// Public so integration tests and downstream test suites can drive the
// lifecycle against fakes.
pub mod test_support;

pub use domain::{
    ComposeRuntime, ComposeState, EnvError, ProjectName, Scope, ScopeRequest, ServiceStatus,
    TargetStatus,
};
pub use infra::{DockerComposeAdapter, SystemClock, SystemProcessRunner};
pub use services::{
    CleanupReport, EnterScopeError, EnvironmentGuard, LifecycleCoordinator, LifecycleState,
    ScopeContext, StateFile,
};
