//! Tether - single-link connection manager
//!
//! Listens on every configured service variant, optionally dials a peer,
//! forwards stdin lines over the live link and prints link events.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether::{
    config::ConfigManager, event, transport::TcpTransport, ConnectionManager, LinkEvent,
    ShutdownCoordinator, VariantKind,
};

/// CLI arguments for Tether
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether - single-link connection lifecycle manager")]
#[command(version)]
#[command(long_about = "
Tether - single-link connection lifecycle manager

Keeps exactly one duplex link alive at a time. Listens on the secure and
insecure service endpoints, optionally dials a peer, forwards stdin lines to
the connected peer and prints every link event on stdout.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  TETHER_READ_CHUNK_SIZE   - Bytes per read call
  TETHER_FRAME_CAPACITY    - Maximum inbound line length
  TETHER_PACE_INTERVAL     - Pause between reads (e.g., 0ms, 50ms)
  TETHER_DIAL_TIMEOUT      - Outbound connect timeout (e.g., 12s)
  TETHER_SECURE_UUID       - Secure service UUID
  TETHER_INSECURE_UUID     - Insecure service UUID
  TETHER_SECURE_BIND       - Secure endpoint address
  TETHER_INSECURE_BIND     - Insecure endpoint address
  TETHER_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "tether.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Peer to dial once listening (host:port)
    #[arg(long, help = "Peer address to connect to")]
    pub connect: Option<String>,

    /// Dial using the insecure service variant
    #[arg(long, help = "Use the insecure service when connecting")]
    pub insecure: bool,

    /// Secure endpoint address (overrides config file)
    #[arg(long, help = "Secure endpoint address (e.g., 127.0.0.1:7301)")]
    pub secure_bind: Option<String>,

    /// Insecure endpoint address (overrides config file)
    #[arg(long, help = "Insecure endpoint address (e.g., 127.0.0.1:7302)")]
    pub insecure_bind: Option<String>,

    /// Dial timeout in seconds
    #[arg(long, help = "Dial timeout in seconds")]
    pub dial_timeout: Option<u64>,

    /// Print events as JSON lines
    #[arg(long, help = "Print events as JSON lines")]
    pub json: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting Tether v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.log_level.as_deref(),
        args.secure_bind.as_deref(),
        args.insecure_bind.as_deref(),
        args.dial_timeout,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        for service in &config.services {
            info!(
                "  {} service: {} ({}) on {}",
                service.kind,
                service.name,
                service.uuid,
                config.transport.bind_addr(service.kind)
            );
        }
        info!("  Read chunk size: {} bytes", config.link.read_chunk_size);
        info!("  Frame capacity: {} bytes", config.link.frame_capacity);
        info!("  Dial timeout: {:?}", config.link.dial_timeout);
        return Ok(());
    }

    let shutdown_timeout = config.link.shutdown_timeout;
    let shutdown_coordinator = ShutdownCoordinator::new(shutdown_timeout);
    let transport = Arc::new(TcpTransport::from_config(&config.transport));
    let (events_tx, mut events_rx) = event::channel();

    let manager = ConnectionManager::new(Arc::new(config), transport, Arc::new(events_tx));
    manager.start();

    if let Some(peer) = args.connect.as_deref() {
        let variant = if args.insecure {
            VariantKind::Insecure
        } else {
            VariantKind::Secure
        };
        manager
            .connect(peer, variant)
            .with_context(|| format!("Failed to start dialing {}", peer))?;
    }

    let json_output = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            print_event(&event, json_output);
        }
    });

    let input_manager = manager.clone();
    let mut input_shutdown = shutdown_coordinator.subscribe();
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = input_shutdown.recv() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !input_manager.send(format!("{}\n", line)).await {
                            warn!("Not connected, dropped input line");
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, no more outbound data");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        }
    });

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    if let Err(e) = input.await {
        warn!("Input task ended abnormally: {}", e);
    }
    shutdown_coordinator
        .shutdown_connection_manager(&manager)
        .await?;

    // The printer ends once the last event sender is gone
    drop(manager);
    if tokio::time::timeout(shutdown_timeout, printer).await.is_err() {
        warn!("Event printer did not finish within {:?}", shutdown_timeout);
    }

    info!("Shutdown complete");
    Ok(())
}

fn print_event(event: &LinkEvent, json_output: bool) {
    if json_output {
        println!("{}", event.to_json());
        return;
    }

    match event {
        LinkEvent::RoleChanged(role) => println!("* {}", role),
        LinkEvent::PeerIdentified(name) => println!("* connected to {}", name),
        LinkEvent::InboundFrame(bytes) => print!("< {}", String::from_utf8_lossy(bytes)),
        LinkEvent::OutboundAck(bytes) => print!("> {}", String::from_utf8_lossy(bytes)),
        LinkEvent::Notice(message) => println!("! {}", message),
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or("info")
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
