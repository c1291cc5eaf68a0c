//! Posecast - Motion Capture Relay
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use posecast::{avatar::Scene, config::Config, error::ReceiverError, web::WebServer, AppState};

/// Posecast - relay VMC, Facemotion3D and MediaPipe tracking to browser viewers
#[derive(Parser, Debug)]
#[command(name = "posecast", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Receiver to start with (overrides config)
    #[arg(short, long)]
    receiver: Option<String>,

    /// VMC UDP listen address (overrides config)
    #[arg(long)]
    vmc_listen: Option<String>,

    /// Facemotion3D TCP listen address (overrides config)
    #[arg(long)]
    fm3d_listen: Option<String>,

    /// Facemotion3D device IP (overrides config)
    #[arg(long)]
    fm3d_device: Option<String>,

    /// HTTP API listen address (overrides config)
    #[arg(long)]
    api_listen: Option<String>,

    /// Model pushes per second (overrides config)
    #[arg(long)]
    update_frequency: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", posecast::NAME, posecast::VERSION);

    let config = load_config(&args)?;

    info!("Active receiver: {}", config.receiver.active);
    info!("VMC listen: {}", config.vmc.listen);
    info!(
        "Facemotion3D listen: {} (device {})",
        config.facemotion3d.listen,
        config.facemotion3d.device_addr()
    );
    info!("MediaPipe web listen: {}", config.mediapipe_web.listen);

    let scene = match Scene::load_or_create(&config.paths.scene_file) {
        Ok(scene) => scene,
        Err(e) => {
            warn!("Using default scene: {}", e);
            Scene::default()
        }
    };

    let state = AppState::with_default_receivers(config.clone(), scene);

    // A bad receiver name is not fatal; the API can pick one later.
    // A receiver that cannot bind its socket is.
    match state.receivers.start(&config.receiver.active).await {
        Ok(()) => {}
        Err(e @ ReceiverError::NotFound(_)) => {
            warn!("Could not start receiver {}: {}", config.receiver.active, e);
        }
        Err(e) => {
            error!("Could not start receiver {}: {}", config.receiver.active, e);
            return Err(e.into());
        }
    }

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_state.shutdown();
    });

    let server = WebServer::new(Arc::clone(&state), &config.http);
    let result = server.run().await;

    // Release receiver sockets before exiting
    state.shutdown();
    state.receivers.stop().await;

    if let Err(e) = result {
        error!("HTTP server error: {}", e);
        return Err(e.into());
    }

    info!("Posecast stopped");
    Ok(())
}

/// Load the config file, apply CLI overrides, and validate
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    if let Some(ref receiver) = args.receiver {
        config.receiver.active = receiver.clone();
    }
    if let Some(ref addr) = args.vmc_listen {
        config.vmc.listen = addr.clone();
    }
    if let Some(ref addr) = args.fm3d_listen {
        config.facemotion3d.listen = addr.clone();
    }
    if let Some(ref ip) = args.fm3d_device {
        config.facemotion3d.device_ip = ip.clone();
    }
    if let Some(ref addr) = args.api_listen {
        config.http.listen = addr.clone();
    }
    if let Some(frequency) = args.update_frequency {
        config.http.model_update_frequency = frequency;
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
