use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shelf_core::Config;
use shelf_ingest::{HttpFetcher, IngestWorker, Pacer, PacingProfile, RateBudget, WorkerSettings};
use shelf_queue::Reaper;
use shelf_server::{build_router, db, AppState};

#[derive(Parser, Debug)]
#[command(name = "shelf-server", version, about = "Paced metadata ingestion service")]
struct Cli {
    /// Use in-memory stores even when PostgreSQL is configured.
    #[arg(long)]
    memory: bool,

    /// Serve the API without the ingestion worker.
    #[arg(long)]
    no_worker: bool,

    /// Do not run the retention sweeper.
    #[arg(long)]
    no_reaper: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    shelf_core::config::load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    let pool = if cli.memory {
        info!("--memory given, using in-memory stores");
        None
    } else {
        db::init_pg_pool(&config.postgres).await?
    };
    let state = Arc::new(AppState::from_config(&config, pool)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if !cli.no_worker {
        let fetcher = HttpFetcher::new(
            &config.ingest.fetcher_url,
            Duration::from_secs(config.ingest.fetcher_timeout_secs),
        )?;
        let settings = WorkerSettings::from_config(&config.ingest).map_err(anyhow::Error::msg)?;
        let profile = PacingProfile::from_config(&config.pacing);
        let budget = Arc::new(RateBudget::new(profile.fetch_interval));
        let worker = IngestWorker::new(
            state.worker_deps(Arc::new(fetcher)),
            settings,
            budget,
            Pacer::new(profile),
        );
        tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    if !cli.no_reaper {
        let reaper = Reaper::new(state.jobs.clone(), state.notifier.clone(), &config.retention);
        tasks.push(tokio::spawn(reaper.run(shutdown_rx.clone())));
    }

    let backend = state.backend;
    let app = build_router(state, &config.server.cors_origin);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, backend, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    info!("stopped");
    Ok(())
}
