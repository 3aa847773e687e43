use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uripool::config::Config;
use uripool::net::TcpConnectionFactory;
use uripool::{ConnectionHandle, HealthChecker, PoolRegistry};

#[derive(Parser, Debug)]
#[command(name = "uripool")]
#[command(about = "Per-destination TCP connection pool exerciser", long_about = None)]
#[command(version)]
struct Args {
    /// Destinations to borrow from (host:port or tcp://host:port)
    destinations: Vec<String>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long)]
    log_level: Option<String>,

    /// Borrow/restore rounds per destination
    #[arg(long, default_value_t = 3)]
    rounds: usize,

    /// Print per-destination metrics as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Also print Prometheus text exposition
    #[cfg(feature = "metrics")]
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle config generation
    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        println!("Edit the file and run: uripool --config {:?} <host:port>...", config_path);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format)?;

    info!("uripool v{} starting", env!("CARGO_PKG_VERSION"));
    if args.config.is_none() {
        info!("No configuration file specified, using defaults");
    }

    #[cfg(feature = "metrics")]
    uripool::pool::exporter::init();

    let registry = Arc::new(PoolRegistry::new(
        Arc::new(TcpConnectionFactory::new()),
        config.pool.clone(),
    ));

    let checker = HealthChecker::from_settings(Arc::clone(&registry), &config.health);
    if config.health.enabled {
        checker.start();
    }

    tokio::select! {
        _ = exercise(&registry, &args.destinations, args.rounds) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    checker.stop().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&registry.metrics().snapshots())?);
    } else {
        println!("{}", registry.metrics().summary());
    }

    #[cfg(feature = "metrics")]
    if args.prometheus {
        print!("{}", uripool::pool::exporter::render());
    }

    Ok(())
}

async fn exercise(
    registry: &PoolRegistry<TcpConnectionFactory>,
    destinations: &[String],
    rounds: usize,
) {
    for round in 1..=rounds {
        for uri in destinations {
            match registry.borrow_default(uri).await {
                Ok(token) => {
                    info!(
                        round,
                        uri = %uri,
                        local = %token.handle().local_address_label(),
                        "Borrowed connection"
                    );
                    if let Err(e) = registry.restore(token).await {
                        error!(uri = %uri, error = %e, "Restore failed");
                    }
                }
                Err(e) => {
                    warn!(
                        round,
                        uri = %uri,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Borrow failed"
                    );
                }
            }
        }
    }

    for (uri, status) in registry.status().await {
        info!(
            uri = %uri,
            live = status.live,
            borrowable = status.borrowable,
            outstanding = status.outstanding,
            "Pool status"
        );
    }
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| uripool::PoolError::Config(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    Ok(())
}
