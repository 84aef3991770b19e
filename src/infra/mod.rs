pub mod clock;
pub mod compose_adapter;
pub mod compose_file;
pub mod compose_ps;
pub mod config;
pub mod process;

pub use clock::SystemClock;
pub use compose_adapter::{COMPOSE_PROJECT_LABEL, ComposeCommand, DockerComposeAdapter};
pub use process::SystemProcessRunner;
