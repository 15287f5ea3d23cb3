//! MUDitM proxy binary.
//!
//! # Commands
//!
//! - (none) - run the proxy
//! - `check-config` - validate configuration and print the effective TOML

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use muditm::{config::Config, proxy::ProxyServer};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Parser)]
#[command(name = "muditm")]
#[command(about = "MUD in the Middle - telnet proxy with TLS and MCCP2 termination", long_about = None)]
struct Cli {
    /// Config file (default: $MUDITM_CONFIG, user config dir, /etc/muditm.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging; also serves a single connection in the foreground
    #[arg(short, long, global = true)]
    debug: bool,

    /// Serve one connection, then exit
    #[arg(long)]
    once: bool,

    /// JSON log lines
    #[arg(long, global = true)]
    json: bool,

    /// Print the proxy name and exit
    #[arg(short = 'v', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print it as TOML
    CheckConfig,
}

fn init_logging(config: &Config, debug: bool, json: bool) -> anyhow::Result<()> {
    let log_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let writer = match &config.proxy.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.proxy.log_file.is_none());

    if json || config.proxy.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", muditm::proxy_name());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(Commands::CheckConfig) = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if cli.once || cli.debug {
        config.proxy.once = true;
    }

    init_logging(&config, cli.debug, cli.json)?;
    tracing::info!("Starting {}", muditm::proxy_name());

    let server = ProxyServer::new(config)?;
    server.run().await?;
    Ok(())
}
