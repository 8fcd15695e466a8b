//! Command line front end for the Art-Net engine
//!
//! Usage:
//!   artnetctl --manifest device_manifest.json listen
//!   artnetctl poll
//!   artnetctl ping esp-stage -c 20
//!
//! RUST_LOG takes precedence over --log-level.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use artnet_core::event::{Callback, Condition, SubscribeOptions};
use artnet_core::network::NodeStatus;
use artnet_core::{Config, DeviceManifest, Error, NetworkManager, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON device manifest
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Local address to bind to, overrides the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print every event until interrupted
    Listen {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Run one poll cycle and list known nodes
    Poll,
    /// Measure round-trip times to a node
    Ping {
        /// Node name or ip[:port]
        target: String,
        #[arg(short = 'c', long, default_value = "10")]
        count: u32,
        /// Per-ping timeout in milliseconds
        #[arg(short = 't', long, default_value = "1000")]
        timeout: u64,
    },
    /// Send an ArtCommand
    Command {
        text: String,
        /// Node name or ip[:port]; broadcast when omitted
        #[arg(long)]
        target: Option<String>,
    },
    /// Send an ArtDmx frame
    Dmx {
        /// Fixture name or universe number
        universe: String,
        values: Vec<u8>,
        /// Node name or ip[:port]; broadcast when omitted
        #[arg(long)]
        target: Option<String>,
    },
    /// Broadcast an ArtTrigger
    Trigger {
        key: u8,
        subkey: u8,
        data: String,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    let manifest = args.manifest.as_ref().map(DeviceManifest::load).transpose()?;

    let manager = NetworkManager::start(config, manifest).await?;

    match args.command {
        Cmd::Listen { json } => listen(&manager, json).await?,
        Cmd::Poll => {
            manager.poll_now().await?;
            for node in manager.nodes().read().nodes() {
                let addr = node
                    .addr()
                    .map_or_else(|| "-".to_string(), |addr| addr.to_string());
                println!("{:<20} {:<22} {}", node.name, addr, node.status);
            }
        }
        Cmd::Ping {
            target,
            count,
            timeout,
        } => {
            let report = manager
                .ping(&target, count, Duration::from_millis(timeout))
                .await?;
            println!("{}", report);
        }
        Cmd::Command { text, target } => {
            manager.send_command(&text, target.as_deref()).await?;
        }
        Cmd::Dmx {
            universe,
            values,
            target,
        } => match target {
            Some(target) => {
                let universe: u16 = universe
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid universe '{}'", universe)))?;
                let target = manager.resolve(&target)?;
                manager
                    .transport()
                    .send_dmx(universe, 0, &values, Some(target))
                    .await?;
            }
            None => manager.send_dmx(&universe, &values).await?,
        },
        Cmd::Trigger { key, subkey, data } => {
            manager
                .transport()
                .send_trigger(key, subkey, data.as_bytes())
                .await?;
        }
    }

    // Let retransmissions go out before the runtime shuts down
    if manager.fixtures().next().is_some() {
        let config = manager.config();
        tokio::time::sleep(config.retransmit_interval * config.retransmit_count).await;
    }
    Ok(())
}

async fn listen(manager: &NetworkManager, json: bool) -> Result<()> {
    manager.event_bus().subscribe(
        Condition::any(),
        Callback::sync_with_event(move |event| {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("Failed to encode event: {}", e),
                }
            } else {
                println!("{}", event);
            }
        }),
        SubscribeOptions::parallel().label("printer"),
    )?;

    let nodes = manager.nodes().clone();
    info!("Listening, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let connected = nodes
        .read()
        .nodes()
        .iter()
        .filter(|node| matches!(node.status, NodeStatus::Connected(_)))
        .count();
    info!("Shutting down with {} connected nodes", connected);
    Ok(())
}
