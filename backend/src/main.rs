use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use bus_spy::{
    AppState,
    config::{SimulationConfig, parse_profile},
    create_router,
    database::Database,
    memory::MemoryStore,
    models::SeedData,
    scheduler::Simulator,
    sms::AlertChannel,
    speed::SpeedProfile,
    store::{AlertSink, Store},
};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simulated city buses with SMS arrival alerts.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "0.0.0.0:5000")]
    listen: SocketAddr,

    /// Keep everything in memory instead of using DATABASE_URL
    #[arg(long)]
    demo: bool,

    /// Routes and buses to load (defaults to the bundled network)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Milliseconds between simulation ticks
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Ticks needed to cross one segment between stops
    #[arg(long)]
    steps_per_segment: Option<u32>,

    /// Speed profile: dynamic, paced or constant:<m/s>
    #[arg(long, value_parser = parse_profile)]
    profile: Option<SpeedProfile>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bus_spy=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = SimulationConfig::from_env()?;
    if let Some(ms) = args.tick_ms {
        config.tick_interval = Duration::from_millis(ms);
    }
    if let Some(steps) = args.steps_per_segment {
        config.steps_per_segment = steps;
    }
    if let Some(profile) = args.profile {
        config.speed.profile = profile;
    }
    config.validate()?;

    let seed = match &args.seed {
        Some(path) => SeedData::from_file(path)?,
        None => SeedData::bundled()?,
    };
    let alerts = Arc::new(AlertChannel::from_env()?);

    let database_url = std::env::var("DATABASE_URL").ok();
    match database_url {
        Some(url) if !args.demo => {
            let db = Database::connect(&url).await?;
            db.migrate().await?;
            db.seed(&seed).await?;
            run(Arc::new(db), alerts, config, args.listen).await
        }
        _ => {
            tracing::info!("running in demo mode with an in-memory store");
            // Only the density window needs history.
            let store = MemoryStore::with_retention(config.density_window * 2);
            store.load_seed(seed);
            run(Arc::new(store), alerts, config, args.listen).await
        }
    }
}

async fn run<S: Store, A: AlertSink + 'static>(
    store: Arc<S>,
    alerts: Arc<A>,
    config: SimulationConfig,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut simulator = Simulator::new(Arc::clone(&store), alerts, config);
    simulator.start_all().await?;

    let app = create_router(AppState { store }).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("starting bus_spy on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    simulator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
