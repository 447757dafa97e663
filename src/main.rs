use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use secret_exchange::collection::{Collection, MemoryCollection, SegmentCollection};
use secret_exchange::config::Config;
use secret_exchange::manager::{self, SystemProfile};
use secret_exchange::server::ExchangeServer;
use secret_exchange::store::RecordStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
    .with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,secret_exchange=info")),
    )
    .with_target(false)
    .with_level(true)
    .init();

    let config = Config::parse();
    let profile = SystemProfile::detect();

    info!(
        cores = profile.logical_cores,
        worker_threads = profile.worker_threads,
        strict_durability = profile.strict_durability || config.strict_durability,
        "system profile"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .enable_all()
    .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(config, profile)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(config: Config, profile: SystemProfile) -> Result<(), Box<dyn std::error::Error>> {
    // The store handle is built once here and shared by every request.
    let collection: Arc<dyn Collection> = match &config.data {
        Some(path) => {
            let strict = profile.strict_durability || config.strict_durability;
            let segment = Arc::new(SegmentCollection::open(path, strict).await?);
            if let Some(interval) = config.compact_interval() {
                manager::start_compaction_task(Arc::clone(&segment), interval);
            }
            segment
        }
        None => {
            warn!("no --data path given, records are kept in memory only");
            Arc::new(MemoryCollection::new())
        }
    };

    let store = RecordStore::new(collection).with_retry_policy(config.retry_policy());
    let server = ExchangeServer::new(store);

    server
        .run(config.addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c, running until killed");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await?;

    Ok(())
}
