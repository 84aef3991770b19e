mod command;
mod compose;
pub mod error;
mod scope;
mod status;
pub mod traits;

pub use command::{CommandOutput, CommandSpec, DEFAULT_COMMAND_TIMEOUT};
pub use compose::{ComposeConfig, ComposeState, PortMapping, ProjectName, Scope, ServiceInfo};
pub use error::{EnvError, UnreadyService};
pub use scope::{DEFAULT_POLL_INTERVAL, DEFAULT_STATE_DIR, DEFAULT_WAIT_TIMEOUT, ScopeRequest};
pub use status::{ServiceStatus, TargetStatus, WaitConfig};
pub use traits::{Clock, ComposeRuntime, ContainerFilter, ProcessRunner};
