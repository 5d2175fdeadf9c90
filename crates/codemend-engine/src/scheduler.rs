//! Background scheduler that drives the agent pipeline.
//!
//! The durable store IS the queue: the skip-locked claim is the
//! dequeue, so no separate broker is needed. A fixed worker pool caps
//! concurrency so neither the execution service nor the LLM provider
//! gets overwhelmed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::agent::AgentLoop;
use crate::service::JobService;

/// Scheduler tunables; defaults follow the platform contract.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between claim attempts.
    pub tick: Duration,
    /// Delay between stall-reclamation sweeps.
    pub reap_interval: Duration,
    /// Concurrent agent loops; each worker runs one step at a time.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(2),
            reap_interval: Duration::from_secs(60),
            workers: 4,
        }
    }
}

/// Handles for the two periodic drivers.
pub struct SchedulerHandles {
    pub claimer: JoinHandle<()>,
    pub reaper: JoinHandle<()>,
}

/// Periodic driver: one claim per tick into a bounded worker pool, plus
/// the stall-reclamation sweep on its own timer.
pub struct StepScheduler {
    jobs: Arc<JobService>,
    agent: Arc<AgentLoop>,
    pool: Arc<Semaphore>,
    config: SchedulerConfig,
}

impl StepScheduler {
    pub fn new(jobs: Arc<JobService>, agent: Arc<AgentLoop>, config: SchedulerConfig) -> Self {
        Self {
            jobs,
            agent,
            pool: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
        }
    }

    /// Spawn the claim loop and the reaper loop onto the runtime.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandles {
        let claimer = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.tick);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    scheduler.tick().await;
                }
            })
        };
        let reaper = {
            let scheduler = self;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    match scheduler.jobs.reclaim_stalled().await {
                        Ok(0) => {}
                        Ok(count) => warn!(count, "reclaimed stalled steps"),
                        Err(e) => error!(error = %e, "stall reclamation failed"),
                    }
                }
            })
        };
        SchedulerHandles { claimer, reaper }
    }

    /// One tick: claim at most one PENDING step and dispatch it.
    ///
    /// The claim only happens when a worker slot is free, so a claimed
    /// step never sits heartbeat-less in a queue waiting for a worker.
    async fn tick(&self) {
        let Ok(permit) = self.pool.clone().try_acquire_owned() else {
            debug!("worker pool saturated, skipping tick");
            return;
        };

        let worker_id = generate_worker_id();
        let claimed = match self.jobs.claim_next_step(&worker_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(error = %e, "claim failed");
                return;
            }
        };
        let Some(step) = claimed else {
            return;
        };

        let jobs = self.jobs.clone();
        let agent = self.agent.clone();
        tokio::spawn(async move {
            let mut failed = step.clone();
            if let Err(e) = agent.run(step).await {
                // The loop handles its own failures; anything escaping it
                // still funnels into fail_step so the pool stays alive.
                error!(step_id = %failed.id, error = %e, "unhandled error in agent loop");
                if let Err(fail_err) = jobs
                    .fail_step(&mut failed, &format!("unhandled error: {e}"))
                    .await
                {
                    error!(step_id = %failed.id, error = %fail_err, "could not fail step");
                }
            }
            drop(permit);
        });
    }
}

/// A fresh short worker identifier per tick.
pub fn generate_worker_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_short_and_unique() {
        let a = generate_worker_id();
        let b = generate_worker_id();
        assert!(a.starts_with("worker-"));
        assert_eq!(a.len(), "worker-".len() + 8);
        assert_ne!(a, b);
    }
}
