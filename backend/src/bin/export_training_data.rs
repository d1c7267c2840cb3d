use std::path::PathBuf;

use bus_spy::{database::Database, export::export_history};
use chrono::{Local, Utc};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Export the stored location history as ETA and density training CSVs"
)]
struct Args {
    /// Directory that receives eta_dataset.csv and density_dataset.csv
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// PostgreSQL URL (falls back to DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Derive hour and weekday features in UTC instead of local time
    #[arg(long)]
    utc: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let db = match &args.database_url {
        Some(url) => Database::connect(url).await?,
        None => Database::new().await?,
    };

    let summary = if args.utc {
        export_history(&db, &Utc, &args.out_dir).await?
    } else {
        export_history(&db, &Local, &args.out_dir).await?
    };

    tracing::info!(
        "wrote {} rows to {:?} and {} rows to {:?}",
        summary.eta_rows,
        summary.eta_path,
        summary.density_rows,
        summary.density_path
    );
    Ok(())
}
