use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rideshard::{
    Coordinator, CoordinatorConfig, DEFAULT_LIST_LIMIT, PgConnector, RideFilter, RideStatus,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rideshard")]
#[command(about = "Operate geo-partitioned ride shards")]
struct Cli {
    /// JSON configuration file. Defaults to the built-in regions, configured
    /// from the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the health of every region
    Status,
    /// Look a ride up in every region
    Get { ride_id: Uuid },
    /// List rides, newest first
    List {
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long)]
        driver: Option<Uuid>,
        #[arg(long)]
        status: Option<RideStatus>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Delete a ride from whichever region holds it
    Delete { ride_id: Uuid },
    /// Run the health monitor until Ctrl+C
    Monitor,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rideshard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Monitor => monitor(config).await,
        command => {
            let coordinator = Coordinator::connect_without_monitor(
                config,
                Arc::new(PgConnector::default()),
            )
            .await
            .context("start coordinator")?;
            let outcome = run_command(&coordinator, command).await;
            coordinator.shutdown().await?;
            outcome
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CoordinatorConfig> {
    match path {
        Some(path) => CoordinatorConfig::from_json_file(path)
            .with_context(|| format!("load configuration from '{}'", path.display())),
        None => CoordinatorConfig::from_env().context("load configuration from environment"),
    }
}

async fn run_command(coordinator: &Coordinator, command: Command) -> Result<()> {
    match command {
        Command::Status => print_json(&coordinator.connection_status().await),
        Command::Get { ride_id } => match coordinator.get(ride_id).await? {
            Some(ride) => print_json(&ride),
            None => bail!("ride {} not found", ride_id),
        },
        Command::List {
            region,
            user,
            driver,
            status,
            limit,
        } => {
            let mut filter = RideFilter::default().limit(limit);
            if let Some(region) = region {
                coordinator.ensure_region(&region)?;
                filter = filter.region(region);
            }
            if let Some(user) = user {
                filter = filter.user(user);
            }
            if let Some(driver) = driver {
                filter = filter.driver(driver);
            }
            if let Some(status) = status {
                filter = filter.status(status);
            }
            print_json(&coordinator.list(filter).await?)
        }
        Command::Delete { ride_id } => {
            if coordinator.delete(ride_id).await? {
                println!("deleted {}", ride_id);
                Ok(())
            } else {
                bail!("ride {} not found", ride_id)
            }
        }
        Command::Monitor => bail!("monitor is not a one-shot command"),
    }
}

async fn monitor(config: CoordinatorConfig) -> Result<()> {
    let interval = config.health_check_interval_duration();
    let coordinator = Coordinator::connect(config, Arc::new(PgConnector::default()))
        .await
        .context("start coordinator")?;

    let mut ticker = tokio::time::interval(interval);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupt received");
                break;
            }
            _ = ticker.tick() => {
                for status in coordinator.connection_status().await {
                    info!(region = %status.region, health = %status.health, "region status");
                }
            }
        }
    }

    coordinator.shutdown().await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
