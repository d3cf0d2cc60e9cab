//! Historian server daemon.
//!
//! # Usage
//!
//! ```bash
//! # Serve the databases listed in a configuration file
//! historiand --config /etc/historian/historiand.toml
//!
//! # Override the port and log verbosely
//! historiand --config historiand.toml --port 38500 -v
//!
//! # Show the effective configuration and exit
//! historiand --config historiand.toml --print-config
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use historiandb::net::{Server, ServerConfig};

/// Historian server daemon
#[derive(Parser, Debug)]
#[command(
    name = "historiand",
    version,
    about = "Time-series historian server",
    long_about = "Serves historian archives over TCP.\n\n\
                  Databases, storage paths and cache sizes come from the configuration file."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", env = "HISTORIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Host address to bind to (overrides the configuration file)
    #[arg(short = 'H', long, env = "HISTORIAN_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides the configuration file)
    #[arg(short = 'p', long, env = "HISTORIAN_PORT")]
    port: Option<u16>,

    /// Accept read-only sessions only
    #[arg(long)]
    read_only: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "HISTORIAN_LOG_LEVEL")]
    log_level: String,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let server = Server::bind(config).context("Failed to start server")?;
    info!(
        addr = %server.local_addr()?,
        databases = ?server.database_names(),
        version = env!("CARGO_PKG_VERSION"),
        "historiand ready"
    );
    server.run().context("Server stopped with an error")?;
    Ok(())
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_new(format!("historiandb={level},historiand={level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = if let Some(path) = &args.config {
        ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?
    } else {
        ServerConfig::default()
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.read_only {
        config.read_only = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
