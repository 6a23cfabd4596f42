//! hived: the hivegrid daemon.
//!
//! Single binary that assembles the cluster subsystems:
//! - Node registry, health polling and discovery
//! - Job queue and dispatcher
//! - Telemetry collector
//! - REST API + Prometheus endpoint
//!
//! # Usage
//!
//! ```text
//! hived run --config cluster.toml --log-format json --export-on-exit metrics.json
//! hived check --config cluster.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use hivegrid_core::ClusterConfig;

#[derive(Parser)]
#[command(name = "hived", about = "hivegrid cluster daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher, telemetry collector and API server.
    Run {
        /// Cluster configuration file (TOML).
        #[arg(long, short)]
        config: PathBuf,

        /// Override `cluster.api_port`.
        #[arg(long)]
        port: Option<u16>,

        /// Log output format.
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,

        /// Write retained metrics here on shutdown (`.csv` for CSV, else JSON).
        #[arg(long)]
        export_on_exit: Option<PathBuf>,
    },

    /// Validate a configuration file and print the parsed result.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            log_format,
            export_on_exit,
        } => {
            init_tracing(log_format);
            let cluster = ClusterConfig::from_file(&config)?;
            daemon::run(cluster, port, export_on_exit).await
        }
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hived=debug,hivegrid=debug"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }
}

fn check(path: &std::path::Path) -> anyhow::Result<()> {
    let config = ClusterConfig::from_file(path)?;
    let nodes = config.configured_nodes();
    let enabled = nodes.iter().filter(|n| n.enabled).count();

    println!("{} OK", path.display());
    println!("  nodes: {} ({enabled} enabled)", nodes.len());
    for node in &nodes {
        println!(
            "    {:<20} {:<24} model={} max_concurrent={}{}",
            node.id,
            node.address(),
            node.model,
            node.max_concurrent,
            if node.enabled { "" } else { " (disabled)" }
        );
    }
    println!(
        "  discovery: {}",
        if config.cluster.discovery.enabled {
            config.cluster.discovery.scan_range.as_str()
        } else {
            "off"
        }
    );
    println!();
    print!("{}", config.to_toml_string()?);
    Ok(())
}
