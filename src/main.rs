use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ringcom::cli;
use ringcom::launcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringcom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings()?;

    info!(
        "Launching {} processes for {}s",
        settings.process_count,
        settings.running_time.as_secs()
    );
    let reports = launcher::launch(settings).await?;

    for report in reports {
        match (&report.rank, &report.error) {
            (Some(rank), None) => info!(
                "{} (rank {}/{}) finished={} won_race={:?}",
                report.name, rank, report.group_size, report.finished, report.won_race
            ),
            (_, Some(error)) => info!("{} failed: {}", report.name, error),
            (None, None) => info!("{} never obtained a rank", report.name),
        }
    }

    Ok(())
}
