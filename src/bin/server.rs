use clap::{Parser, Subcommand};
use hopwatch::db::entities::measurement;
use hopwatch::db::store::SeaOrmStore;
use hopwatch::measurement::MeasurementControl;
use hopwatch::reports;
use hopwatch::server::config::AppConfig;
use hopwatch::server::core_services::Engine;
use hopwatch::version::VERSION;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the measurement engine until Ctrl-C (default)
    Serve,
    /// Add a measurement
    Create {
        target: String,
        /// Echo requests per cycle (1-100)
        #[arg(short = 'n', long, default_value_t = 5)]
        count: i32,
        /// Minutes between cycles
        #[arg(short, long, default_value_t = 5)]
        frequency: i32,
    },
    Stop { id: Uuid },
    Restart { id: Uuid },
    Delete { id: Uuid },
    List,
    /// Print chart series, the latest path and recent alerts as JSON
    Show {
        id: Uuid,
        #[arg(long, default_value_t = 1)]
        hours: u32,
    },
}

fn init_logging(log_dir: &str) {
    // File: JSON, daily rotation
    let file_appender = rolling::daily(log_dir, "hopwatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

fn summary(m: &measurement::Model) -> String {
    let last_poll = m
        .last_poll_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{} {} status={} packets={} every={}m last_poll={}",
        m.id, m.target, m.status, m.packet_count, m.frequency_minutes, last_poll
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };
    init_logging(&config.log_dir);

    let store = Arc::new(SeaOrmStore::connect(&config.database_url).await?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(store, &config).await?,
        Command::Create {
            target,
            count,
            frequency,
        } => {
            let created = MeasurementControl::detached(store)
                .create(&target, count, frequency)
                .await?;
            println!("{}", summary(&created));
        }
        Command::Stop { id } => {
            let stopped = MeasurementControl::detached(store).stop(id).await?;
            println!("{}", summary(&stopped));
        }
        Command::Restart { id } => {
            let restarted = MeasurementControl::detached(store).restart(id).await?;
            println!("{}", summary(&restarted));
        }
        Command::Delete { id } => {
            MeasurementControl::detached(store).delete(id).await?;
            println!("{id} deleted");
        }
        Command::List => {
            for m in store.list_measurements().await? {
                println!("{}", summary(&m));
            }
        }
        Command::Show { id, hours } => show(&store, id, hours).await?,
    }

    Ok(())
}

async fn serve(
    store: Arc<SeaOrmStore>,
    config: &AppConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Starting hopwatch, version: {}", VERSION);
    let engine = Engine::build(store, config)?;

    let registered = engine.scheduler.house_keeping().await?;
    info!(registered, "Startup recovery complete.");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let reconcile_handle = config.reconcile_interval().map(|period| {
        let scheduler = engine.scheduler.clone();
        tokio::spawn(async move { scheduler.run_reconcile_loop(period, shutdown_rx).await })
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C, shutting down.");
    }
    info!("Shutting down.");

    shutdown_tx.send(()).ok();
    if let Some(handle) = reconcile_handle
        && let Err(e) = handle.await
    {
        error!(error = %e, "Reconcile loop ended abnormally.");
    }
    engine.scheduler.shutdown();
    Ok(())
}

async fn show(
    store: &SeaOrmStore,
    id: Uuid,
    hours: u32,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use hopwatch::db::store::{MeasurementStore, StoreError};

    let measurement = store
        .get_measurement(id)
        .await?
        .ok_or(StoreError::NotFound(id))?;
    let results = store.list_results(id).await?;
    let alerts = store.list_alerts(id).await?;

    let latest = results.last();
    let last_alerting = results.iter().rev().find(|result| result.alerting);
    let alert_details = match (last_alerting, latest) {
        (Some(alerting), Some(latest)) => Some(reports::alert_details(alerting, latest)),
        _ => None,
    };

    let report = serde_json::json!({
        "measurement": measurement,
        "series": reports::combined_series(&results, measurement.frequency_minutes, hours),
        "trace_graph": latest.map(reports::trace_graph),
        "alerts": alerts,
        "alert_details": alert_details,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
