use anyhow::Context;
use fillbook::{
    api, config::Config, db::init_db, CsvExecutionSource, Orchestrator, Rebuilder, Repository,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;

    let repo = Repository::new(pool);
    let rebuilder = Rebuilder::new(
        repo.clone(),
        Arc::new(config.multipliers.clone()),
        config.ordering_tolerance_ms,
    );
    let orchestrator = Arc::new(Orchestrator::new(repo.clone(), rebuilder));

    // Each argument is an executions CSV to import before serving.
    for path in std::env::args().skip(1) {
        let source = CsvExecutionSource::new(&path);
        let run = orchestrator
            .import_and_rebuild(&source)
            .await
            .with_context(|| format!("Import of {} failed", path))?;
        info!(
            source = %path,
            accepted = run.import.accepted,
            duplicates = run.import.duplicates,
            malformed = run.import.malformed.len(),
            rebuilt = run.rebuilds.rebuilt.len(),
            failed = run.rebuilds.failed.len(),
            "Import finished"
        );
    }

    // Catch up partitions left behind by an interrupted run.
    let summary = orchestrator
        .rebuild_all()
        .await
        .context("Startup rebuild failed")?;
    for failure in &summary.failed {
        warn!(
            account = %failure.account,
            instrument = %failure.instrument,
            error = %failure.error,
            "Partition left at its previous state"
        );
    }

    let app = api::create_router(api::AppState::new(Arc::new(repo), orchestrator));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
