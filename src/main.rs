use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use lanserve::{Ack, ServerConfig, ServerLifecycle, TracingReporter};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lanserve")]
#[command(about = "Share a local folder over HTTP on the local network")]
#[command(version)]
struct Cli {
    /// Folder to serve
    #[arg(short, long, env = "LANSERVE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Port to listen on [default: 1234]
    #[arg(short, long, env = "LANSERVE_PORT")]
    port: Option<u16>,

    /// Address to bind to [default: 0.0.0.0]
    #[arg(short, long, env = "LANSERVE_BIND")]
    bind: Option<IpAddr>,

    /// Log every request
    #[arg(short, long, env = "LANSERVE_VERBOSE")]
    verbose: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "LANSERVE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load config from file if provided, otherwise use defaults
    let mut config = if let Some(config_path) = &cli.config {
        ServerConfig::from_file(config_path)?
    } else {
        ServerConfig::default()
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    config.verbose_logging |= cli.verbose;

    // Initialize tracing
    let filter = if config.verbose_logging {
        "lanserve=debug,tower_http=debug"
    } else {
        "lanserve=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let lifecycle = ServerLifecycle::new(config, TracingReporter);
    let server = lifecycle.start(&cli.root).await?;

    println!("Serving at {}", server.url());
    println!("Folder: {}", server.root_directory.display());
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");

    if let Ack::Stopped { forced_connections } = lifecycle.stop().await {
        if forced_connections > 0 {
            println!("Closed {} unfinished connection(s).", forced_connections);
        }
    }

    Ok(())
}
