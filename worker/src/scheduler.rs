//! Runs `WORKER_CONCURRENCY` independent pop-plan-project loops plus a
//! monitor task that logs queue depth, and ties them to a shared
//! cancellation token so the process can drain and exit cleanly on a
//! signal (spec §4, §7).

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::event;
use crate::planner::{self, PendingLog};
use graph_queue::Queue;
use graph_store::db::{project_batch, FriendPair, ResolvedBatch};
use graph_store::{ConnectionPool, IdentityCache};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EMPTY_POP_BACKOFF: Duration = Duration::from_millis(50);
const POP_ERROR_BACKOFF: Duration = Duration::from_millis(200);
const MONITOR_INTERVAL_MIN: Duration = Duration::from_secs(2);
const MONITOR_INTERVAL_MAX: Duration = Duration::from_secs(5);

pub struct Scheduler {
    config: Arc<WorkerConfig>,
    pool: ConnectionPool,
    identity_cache: Arc<IdentityCache>,
    queue: Queue,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: Arc<WorkerConfig>,
        pool: ConnectionPool,
        identity_cache: Arc<IdentityCache>,
        queue: Queue,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, pool, identity_cache, queue, cancel }
    }

    /// Spawns the configured number of worker loops plus a monitor
    /// task, and waits for all of them to finish (either the queue
    /// stays dry under cancellation or a task errors out).
    pub async fn run(self) -> miette::Result<()> {
        let mut handles = Vec::with_capacity(self.config.worker_concurrency + 1);

        handles.push(tokio::spawn(monitor_task(self.queue.clone(), self.cancel.clone())));

        for worker_id in 0..self.config.worker_concurrency {
            let worker = WorkerLoop {
                worker_id,
                config: self.config.clone(),
                pool: self.pool.clone(),
                identity_cache: self.identity_cache.clone(),
                queue: self.queue.clone(),
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        for handle in handles {
            handle.await.map_err(|err| miette::miette!("worker task panicked: {err}"))??;
        }

        Ok(())
    }
}

async fn monitor_task(mut queue: Queue, cancel: CancellationToken) -> miette::Result<()> {
    loop {
        // Randomized within the window so N workers' monitor tasks (if a
        // future revision runs more than one) don't log in lockstep.
        use rand::Rng;
        let interval = rand::thread_rng().gen_range(MONITOR_INTERVAL_MIN..MONITOR_INTERVAL_MAX);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match queue.queue_length().await {
                    Ok(len) => info!("queue depth: {len}"),
                    Err(err) => warn!("failed to read queue depth: {err}"),
                }
            }
            _ = cancel.cancelled() => {
                debug!("monitor task exiting");
                return Ok(());
            }
        }
    }
}

struct WorkerLoop {
    worker_id: usize,
    config: Arc<WorkerConfig>,
    pool: ConnectionPool,
    identity_cache: Arc<IdentityCache>,
    queue: Queue,
    cancel: CancellationToken,
}

impl WorkerLoop {
    async fn run(mut self) -> miette::Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                debug!("worker {} exiting on cancellation", self.worker_id);
                return Ok(());
            }

            let raw_items = tokio::select! {
                result = self.queue.pop_batch(self.config.batch_size) => result,
                _ = self.cancel.cancelled() => {
                    debug!("worker {} exiting on cancellation", self.worker_id);
                    return Ok(());
                }
            };

            let raw_items = match raw_items {
                Ok(items) => items,
                Err(err) => {
                    error!("worker {} failed to pop batch: {err}", self.worker_id);
                    tokio::time::sleep(POP_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if raw_items.is_empty() {
                tokio::time::sleep(EMPTY_POP_BACKOFF).await;
                continue;
            }

            debug!("worker {} popped {} items", self.worker_id, raw_items.len());

            let events: Vec<_> = raw_items.iter().filter_map(|raw| event::decode(raw)).collect();
            let skipped = raw_items.len() - events.len();
            if skipped > 0 {
                warn!("worker {} dropped {} malformed events", self.worker_id, skipped);
            }

            if events.is_empty() {
                continue;
            }

            let plan = planner::plan(&events);
            let processed = events.len();

            let pool = self.pool.clone();
            let identity_cache = self.identity_cache.clone();
            let max_retries = self.config.max_retries;

            let outcome = tokio::task::spawn_blocking(move || {
                project_plan(&pool, &identity_cache, plan, max_retries)
            })
            .await
            .map_err(|err| miette::miette!("batch projection task panicked: {err}"))?;

            match outcome {
                Ok(()) => info!("worker {} committed batch of {} events", self.worker_id, processed),
                Err(err) => {
                    error!("worker {} failed to commit batch: {err}", self.worker_id);
                    tokio::time::sleep(POP_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

fn project_plan(
    pool: &ConnectionPool,
    identity_cache: &IdentityCache,
    plan: planner::BatchPlan,
    max_retries: u32,
) -> Result<(), WorkerError> {
    let mut conn = pool.get()?;

    identity_cache.refresh_if_stale(&mut conn)?;

    let names: HashSet<String> = plan.names;
    let ids = identity_cache.ensure_users_exist(&mut conn, &names, max_retries)?;

    let batch = ResolvedBatch {
        referrals: plan
            .referrals
            .iter()
            .map(|(referrer, referred)| (ids[referrer], ids[referred]))
            .collect(),
        friend_events: plan
            .friend_events
            .iter()
            .map(|ev| (FriendPair::canonicalize(ids[&ev.user1_name], ids[&ev.user2_name]), ev.is_add))
            .collect(),
        logs: plan.logs.into_iter().map(|log: PendingLog| log.resolve(&ids)).collect(),
    };

    project_batch(&mut conn, &batch)?;
    Ok(())
}
