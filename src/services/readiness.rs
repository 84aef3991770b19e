use super::ComposeService;
use crate::domain::error::Result;
use crate::domain::{Clock, EnvError, ServiceStatus, UnreadyService, WaitConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Blocks the calling thread until every configured service reaches the target status.
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    compose: Arc<ComposeService>,
    clock: Arc<dyn Clock>,
}

impl ReadinessWaiter {
    pub fn new(compose: Arc<ComposeService>, clock: Arc<dyn Clock>) -> Self {
        Self { compose, clock }
    }

    /// Polls every `poll_interval` until all services satisfy `config.target`.
    ///
    /// The deadline is checked before each round, so the last round may start
    /// up to one interval before `timeout`. The first round always runs.
    /// Query errors count as "not ready yet" and keep the previous status.
    pub fn await_ready(&self, config: &WaitConfig) -> Result<()> {
        let started = self.clock.now();
        let mut last: Vec<(String, ServiceStatus)> = config
            .services
            .iter()
            .map(|s| (s.clone(), ServiceStatus::NotFound))
            .collect();

        info!(
            project = %config.project_name,
            services = ?config.services,
            target = %config.target,
            timeout = ?config.timeout,
            "waiting for services"
        );

        let mut rounds: u32 = 0;
        loop {
            let elapsed = self.clock.now().duration_since(started);
            if rounds > 0 && elapsed >= config.timeout {
                let unready: Vec<UnreadyService> = last
                    .iter()
                    .filter(|(_, status)| !config.target.is_satisfied_by(*status))
                    .map(|(name, status)| UnreadyService {
                        name: name.clone(),
                        last_status: *status,
                    })
                    .collect();

                warn!(
                    project = %config.project_name,
                    rounds,
                    unready = ?unready.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
                    "readiness timed out"
                );

                return Err(EnvError::Timeout {
                    project: config.project_name.clone(),
                    target: config.target.to_string(),
                    timeout: config.timeout,
                    unready,
                });
            }

            rounds += 1;
            let mut all_ready = true;

            for (service, status) in last.iter_mut() {
                match self
                    .compose
                    .query_status(&config.project_name, &config.compose_files, service)
                {
                    Ok(observed) => *status = observed,
                    Err(e) => {
                        warn!(project = %config.project_name, service = %service, error = %e, "status query failed");
                    }
                }

                if !config.target.is_satisfied_by(*status) {
                    all_ready = false;
                }
            }

            if all_ready {
                info!(
                    project = %config.project_name,
                    rounds,
                    elapsed = ?self.clock.now().duration_since(started),
                    "services ready"
                );
                return Ok(());
            }

            debug!(project = %config.project_name, rounds, "not ready yet");
            self.clock.sleep(config.poll_interval);
        }
    }
}
