use anyhow::Result;
use camhub::{
    ApiServer, CamhubConfig, CameraRegistry, EventBus, IngestMetrics, MjpegHttpOpener,
    NullDetector, ObjectDetector, SnapshotStore,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "camhub")]
#[command(about = "Multi-camera ingest hub with motion detection and live streaming")]
#[command(version)]
#[command(long_about = "A camera ingest hub that pulls or accepts video frames from \
heterogeneous sources, keeps a bounded recent-frame buffer per camera, runs motion \
detection with optional deep-inference escalation, and exposes registration, push \
ingestion, frame retrieval and live MJPEG streaming over HTTP.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camhub.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the service")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting camhub v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CamhubConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    let bus = EventBus::new(config.events.bus_capacity);
    let metrics = Arc::new(
        IngestMetrics::new().map_err(|e| anyhow::anyhow!("Failed to build metrics: {}", e))?,
    );
    let snapshots = Arc::new(SnapshotStore::new(64));
    let detector: Option<Arc<dyn ObjectDetector>> = if config.inference.enabled {
        Some(Arc::new(NullDetector))
    } else {
        None
    };

    let registry = Arc::new(CameraRegistry::new(
        config.clone(),
        bus,
        metrics,
        snapshots,
        Arc::new(MjpegHttpOpener::new()),
        None,
        detector,
    ));

    let server = ApiServer::new(
        config.server.clone(),
        config.stream.clone(),
        Arc::clone(&registry),
    );

    tokio::select! {
        result = server.start() => {
            error!("API server exited unexpectedly");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    registry.stop_all().await;
    info!("camhub stopped");

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camhub={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
        None => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let config = CamhubConfig::default();
    println!("# camhub configuration file");
    println!("# Default values for all available options");
    println!();
    println!("{}", config.to_toml()?);
    Ok(())
}
