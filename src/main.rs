//! Udprelay - UDP relay with per-client flows
//!
//! This is the main entry point for the Udprelay application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use udprelay::config::{load_config, Config, ProxyConfig};
use udprelay::helper::{
    DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_RESOLVE_INTERVAL_SECS,
};
use udprelay::UdpProxy;

/// Udprelay - relay UDP clients to a single upstream
#[derive(Parser, Debug)]
#[command(name = "udprelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (runs every [[proxy]] in it)
    #[arg(short, long, conflicts_with_all = ["upstream_host", "upstream_port"])]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Upstream host name or IP
    #[arg(long)]
    upstream_host: Option<String>,

    /// Upstream port
    #[arg(long)]
    upstream_port: Option<u16>,

    /// Maximum datagram size in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Idle timeout for client flows in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    idle_timeout: u64,

    /// Upstream re-resolution interval in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_RESOLVE_INTERVAL_SECS)]
    resolve_interval: u64,

    /// Log every packet including its payload
    #[arg(long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

impl Args {
    /// Build the relay list from either the config file or the inline flags
    fn into_config(self) -> Result<Config> {
        if let Some(path) = &self.config {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            return Ok(config);
        }

        let (Some(host), Some(port)) = (self.upstream_host, self.upstream_port) else {
            bail!("either --config or both --upstream-host and --upstream-port are required");
        };

        let mut proxy = ProxyConfig::new(self.bind, self.port, host, port);
        proxy.max_datagram_size = self.buffer_size;
        proxy.idle_timeout = self.idle_timeout;
        proxy.resolve_interval = self.resolve_interval;
        proxy.debug = self.debug;
        proxy.validate().context("Invalid relay arguments")?;

        Ok(Config {
            proxies: vec![proxy],
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    info!("Udprelay v{}", udprelay::VERSION);
    let config = args.into_config()?;
    if config.proxies.is_empty() {
        bail!("No relays configured");
    }

    // Start every relay; the first failure stops the ones already running
    let mut proxies = Vec::with_capacity(config.proxies.len());
    for proxy_config in config.proxies {
        let target = proxy_config.upstream_target();
        let proxy = UdpProxy::new(proxy_config);
        match proxy.start().await {
            Ok(local) => {
                info!("Relaying {} -> {}", local, target);
                proxies.push(proxy);
            }
            Err(e) => {
                if e.is_startup_failure() {
                    error!("Relay to {} could not start: {}", target, e);
                } else {
                    error!("Relay to {} failed while starting: {}", target, e);
                }
                for proxy in &proxies {
                    proxy.close().await;
                }
                return Err(e.into());
            }
        }
    }

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to setup SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        let _ = shutdown_tx.send(true);
    });

    let _ = shutdown_rx.recv().await;

    for proxy in &proxies {
        proxy.close().await;
    }
    info!("All relays stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
