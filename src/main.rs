use capmcd::bmc::{ClientProvider, RedfishAdapter};
use capmcd::config::load_config;
use capmcd::dispatch::Dispatcher;
use capmcd::jobs::WorkerPool;
use capmcd::server::{AppState, Server};
use capmcd::{Cli, QUEUE_DEPTH_PER_WORKER};

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let mut logger = SimpleLogger::new().env();
    if args.debug {
        logger = logger.with_level(LevelFilter::Debug);
    }
    logger.init()?;

    let config = Arc::new(load_config(args.config.as_deref())?);
    let ca_pem = args.read_ca_bundle()?;
    let clients = Arc::new(ClientProvider::new(
        Duration::from_secs(args.client_timeout_secs),
        ca_pem.as_deref(),
    )?);

    let workers = args.workers.unwrap_or(config.capmc.action_max_workers);
    let pool = Arc::new(WorkerPool::new(workers, workers * QUEUE_DEPTH_PER_WORKER));
    pool.start();

    if args.simulate_only {
        info!("Simulation mode: no requests will be sent to hardware");
    }
    let adapter = RedfishAdapter::new(Arc::clone(&clients), config, args.simulate_only);
    let dispatcher = Dispatcher::new(Arc::clone(&pool), adapter);

    if let Some(path) = args.ca_bundle.clone() {
        tokio::spawn(async move {
            let Ok(mut hangup) = signal(SignalKind::hangup()) else {
                error!("Unable to watch for SIGHUP, CA bundle will not be reloaded");
                return;
            };
            while hangup.recv().await.is_some() {
                info!("SIGHUP: reloading CA bundle from {}", path.display());
                let rotated = match tokio::fs::read(&path).await {
                    Ok(pem) => clients.rotate(Some(&pem)).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = rotated {
                    error!("CA bundle reload failed, keeping current client: {e}");
                }
            }
        });
    }

    let server = Server::new(&args.listen_address, AppState { dispatcher })?;
    server
        .run(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await?;

    pool.stop();
    Ok(())
}
