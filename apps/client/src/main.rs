//! Streamcast Client - standalone headless client.
//!
//! Either connects directly to `--server`, or probes `--candidate` addresses
//! with `streamcast_core::transport::client::discover` and connects to the
//! first reply. Registers a mock decode/presenter pipeline for the
//! subscribed stream so the receive loop has somewhere to deliver frames -
//! there is no real video/audio presentation here, only the wiring a host
//! embedding the library would replace with its own `VideoDecodeEngine`/
//! `VideoPresenter`.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use streamcast_core::{
    discover, AvSynchronizer, ClientTransport, DatagramSocket, DiscoveryDecision, NoopEventEmitter, SyncConfig,
    TaskSpawner, TokioSpawner, VideoReceiverPipeline,
};
use streamcast_engines::{MockVideoDecodeEngine, MockVideoPresenter, StreamId};
use tokio::signal;

use crate::config::ClientConfig;

/// Streamcast Client - headless remote-desktop streaming client.
#[derive(Parser, Debug)]
#[command(name = "streamcast-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "STREAMCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Server address to connect to directly, e.g. `192.168.1.10:49400`.
    #[arg(short, long, env = "STREAMCAST_SERVER_ADDR")]
    server: Option<SocketAddr>,

    /// Candidate address to probe with DISCOVERY when `--server` is not
    /// given. May be repeated.
    #[arg(long = "candidate")]
    candidates: Vec<SocketAddr>,

    /// Shared session passphrase (overrides config file).
    #[arg(long, env = "STREAMCAST_PASSPHRASE")]
    passphrase: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("streamcast-client v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ClientConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(passphrase) = args.passphrase {
        config.passphrase = passphrase;
    }

    let server_addr = if let Some(server) = args.server {
        server
    } else if !config.server_addr.is_empty() {
        config.server_addr.parse().context("invalid server_addr in configuration")?
    } else if !args.candidates.is_empty() {
        discover_server(&args.candidates, &config).await?
    } else {
        bail!("no server address given: pass --server, set server_addr in the config file, or pass one or more --candidate addresses for discovery");
    };

    let core_config = config.to_core_config();
    core_config.validate().map_err(anyhow::Error::msg).context("invalid configuration")?;

    let socket = DatagramSocket::bind(unspecified_addr()).await.context("failed to bind UDP socket")?;

    let (transport, hello) = ClientTransport::connect(
        socket,
        server_addr,
        core_config,
        config.device_id.clone(),
        &config.role,
        config.platform.clone(),
        None,
        Arc::new(NoopEventEmitter),
    )
    .await
    .context("failed to connect to server")?;

    log::info!("connected to \"{}\" ({} streams advertised)", hello.server_name, hello.streams.len());

    let stream_id = StreamId(config.stream_id);
    let sync = Arc::new(AvSynchronizer::new(SyncConfig::default()));
    transport.register_video_pipeline(
        stream_id,
        VideoReceiverPipeline::new(
            stream_id,
            Box::new(MockVideoDecodeEngine::new(false)),
            Box::new(MockVideoPresenter::new()),
            sync,
        ),
    );

    let spawner = TokioSpawner::current();
    transport.spawn(&spawner);
    transport.subscribe(stream_id).await.context("failed to subscribe to stream")?;

    log::info!("subscribed to stream {stream_id:?}, streaming until interrupted");

    shutdown_signal().await;

    log::info!("shutdown signal received, stopping transport");
    transport.request_stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    log::info!("shutdown complete");
    Ok(())
}

/// An ephemeral-port bind address on all interfaces.
fn unspecified_addr() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
}

/// Probes `candidates` for a server and returns the first responder's
/// address, logging every reply seen along the way.
async fn discover_server(candidates: &[SocketAddr], config: &ClientConfig) -> Result<SocketAddr> {
    let socket = DatagramSocket::bind(unspecified_addr()).await.context("failed to bind discovery socket")?;

    let mut first = None;
    discover(
        &socket,
        candidates,
        &config.device_id,
        Duration::from_millis(config.discovery_window_ms),
        |response, peer| {
            log::info!("discovered \"{}\" at {peer} ({} streams)", response.server_name, response.streams.len());
            if first.is_none() {
                first = Some(peer);
            }
            DiscoveryDecision::Abort
        },
    )
    .await
    .context("discovery failed")?;

    first.ok_or_else(|| anyhow::anyhow!("no server responded to discovery within {}ms", config.discovery_window_ms))
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
