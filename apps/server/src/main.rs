//! Streamcast Server - standalone headless server.
//!
//! Binds a UDP socket, advertises a demo video stream, and accepts viewer/
//! controller sessions through `streamcast_core::ServerTransport`. There is
//! no GUI and no real capture/encode pipeline wired in - this binary exists
//! to exercise the transport/session/protocol stack end to end; a host
//! embedding the library supplies real `CaptureSource`/`VideoEncodeEngine`
//! implementations and calls `publish_video_frame`/`publish_audio_frame`
//! from its own capture loop.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use streamcast_core::protocol::message::Resolution;
use streamcast_core::transport::server::{AllowAllConnections, AllowAllDiscovery};
use streamcast_core::{DatagramSocket, NoopEventEmitter, ServerTransport, StreamDescriptor, TaskSpawner, TokioSpawner};
use streamcast_engines::StreamId;
use tokio::signal;

use crate::config::ServerConfig;

/// Streamcast Server - headless remote-desktop streaming server.
#[derive(Parser, Debug)]
#[command(name = "streamcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "STREAMCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "STREAMCAST_BIND_PORT")]
    port: Option<u16>,

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

    log::info!("streamcast-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(passphrase) = args.passphrase {
        config.passphrase = passphrase;
    }

    let core_config = config.to_core_config();
    core_config.validate().map_err(anyhow::Error::msg).context("invalid configuration")?;

    let bind_addr = std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), config.bind_port);
    let socket = DatagramSocket::bind(bind_addr).await.context("failed to bind UDP socket")?;
    let local_addr = socket.local_addr()?;
    log::info!("listening on {local_addr}");

    let transport = std::sync::Arc::new(ServerTransport::new(
        socket,
        core_config,
        config.server_name.clone(),
        Box::new(AllowAllConnections),
        Box::new(AllowAllDiscovery),
        None,
        std::sync::Arc::new(NoopEventEmitter),
    ));

    transport.advertise_stream(StreamDescriptor {
        id: StreamId::DEFAULT,
        codec: config.video_codec.clone(),
        resolution: Resolution { w: config.video_width, h: config.video_height },
        fps: config.video_fps,
    });

    let spawner = TokioSpawner::current();
    transport.spawn(&spawner);

    log::info!("server transport started, advertising stream {:?} ({})", StreamId::DEFAULT, config.video_codec);

    shutdown_signal().await;

    log::info!("shutdown signal received, stopping transport");
    transport.request_stop();

    // Give the receive/session loops a moment to observe the cancellation
    // before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    log::info!("shutdown complete");
    Ok(())
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
