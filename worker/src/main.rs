mod config;
mod error;
mod event;
mod planner;
mod scheduler;

use config::WorkerConfig;
use graph_queue::Queue;
use graph_store::{get_pool, migrations, Connection, IdentityCache, PgConnection};
use log::info;
use miette::IntoDiagnostic;
use scheduler::Scheduler;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = Arc::new(WorkerConfig::config().into_diagnostic()?);

    info!("running pending migrations");
    migrations::run_migrations().into_diagnostic()?;

    let pool = get_pool(config.worker_concurrency as u32 + 1).into_diagnostic()?;

    let identity_cache = {
        let mut conn =
            PgConnection::establish(&graph_store::database_url_from_environment())
                .into_diagnostic()?;
        Arc::new(IdentityCache::connect(&mut conn).into_diagnostic()?)
    };

    let queue = Queue::connect(&config.redis_url(), config.queue_name.clone())
        .await
        .into_diagnostic()?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_for_shutdown(cancel.clone()));

    info!(
        "starting {} worker loops against queue {:?}",
        config.worker_concurrency, config.queue_name
    );

    let scheduler = Scheduler::new(config, pool, identity_cache, queue, cancel);
    scheduler.run().await
}

/// Cancels the shared token on SIGINT or SIGTERM so worker loops can
/// finish their in-flight batch and exit instead of being killed
/// mid-transaction.
async fn watch_for_shutdown(cancel: CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            log::error!("failed to install SIGTERM handler: {err}");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    cancel.cancel();
}
