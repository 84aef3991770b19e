use crate::domain::error::Result;
use crate::domain::{CommandOutput, CommandSpec, EnvError, ProcessRunner};
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_STEP: Duration = Duration::from_millis(10);
/// How long pipes may keep draining after the child exits at its deadline.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Runs commands on the host with `std::process`, enforcing `CommandSpec::timeout`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display_line(), "running");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| EnvError::CommandSpawn {
            program: spec.program.clone(),
            source,
        })?;

        // Pipes are drained on their own threads so a chatty child cannot
        // block on a full pipe while we poll for exit.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + spec.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    return Err(EnvError::CommandSpawn {
                        program: spec.program.clone(),
                        source,
                    });
                }
            }

            if Instant::now() >= deadline {
                warn!(command = %spec.display_line(), timeout = ?spec.timeout, "killing command after timeout");
                let _ = child.kill();
                let _ = child.wait();
                return Err(EnvError::CommandTimeout {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                });
            }

            thread::sleep(POLL_STEP);
        };

        // A grandchild holding the pipes open must not keep us past the deadline.
        let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
        let output = CommandOutput {
            exit_code: status.code(),
            stdout: collect(stdout, drain_until),
            stderr: collect(stderr, drain_until),
        };

        debug!(
            command = %spec.display_line(),
            exit_code = ?output.exit_code,
            "finished"
        );

        Ok(output)
    }
}

/// Output read so far plus a signal sent once the pipe hits EOF.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

fn drain<R>(pipe: Option<R>) -> Option<Drain>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = buf.clone();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
            let _ = tx.send(());
        });
        Drain { buf, done }
    })
}

/// Waits for EOF until `until`, then returns whatever was read. A reader still
/// blocked after that is left detached.
fn collect(drain: Option<Drain>, until: Instant) -> String {
    let Some(drain) = drain else {
        return String::new();
    };
    let _ = drain
        .done
        .recv_timeout(until.saturating_duration_since(Instant::now()));
    let buf = drain.buf.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&buf).into_owned()
}
