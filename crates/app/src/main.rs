mod cli;
mod control;
mod error;
mod html;
mod server;
mod stream;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use crossbeam_channel::select;
use tracing::{error, info, warn};

use crate::{
    cli::AssistantConfig,
    control::{
        ControlSurface,
        analysis::{AnalysisClient, EchoAnalysisClient, HttpAnalysisClient},
        detection::LabelFile,
    },
    server::{ServerState, spawn_http_server},
    stream::{CaptureExit, FrameBuffer, spawn_capture_loop},
};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    telemetry::init_tracing();
    let config = AssistantConfig::from_env()?;
    if telemetry::init_metrics_recorder().is_none() {
        warn!("continuing without /metrics");
    }

    let frames = Arc::new(FrameBuffer::new());
    let capture = {
        let source = config.source.clone();
        let size = (config.width, config.height);
        let fps = config.target_fps();
        spawn_capture_loop(
            move || video_ingest::open_device(&source, size, fps),
            frames.clone(),
            config.capture_settings(),
        )
        .context("Failed to spawn capture thread")?
    };

    let client: Arc<dyn AnalysisClient> = match &config.analysis_url {
        Some(url) => {
            info!(%url, "forwarding messages to analysis service");
            Arc::new(HttpAnalysisClient::new(url.clone(), config.analysis_timeout)?)
        }
        None => {
            info!("no analysis service configured, replying locally");
            Arc::new(EchoAnalysisClient)
        }
    };
    let control = Arc::new(ControlSurface::new(
        client,
        config.analysis_timeout,
        LabelFile::new(&config.label_file),
        config.prompt.clone(),
        frames.clone(),
    ));

    let server = spawn_http_server(
        SocketAddr::new(config.bind, config.port),
        ServerState {
            frames: frames.clone(),
            control,
        },
    )?;
    info!(
        source = %config.source,
        addr = %server.local_addr(),
        "vision assistant ready"
    );

    let (signal_tx, signal_rx) = crossbeam_channel::bounded::<()>(1);
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    }) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }

    select! {
        recv(signal_rx) -> _ => info!("shutdown requested"),
        recv(server.exited()) -> _ => error!("HTTP server exited unexpectedly"),
    }

    match capture.stop() {
        CaptureExit::Stopped => info!("capture stopped"),
        CaptureExit::DeviceUnavailable(err) => info!("capture never started: {err}"),
        CaptureExit::DeviceLost(err) => info!("capture had already ended: {err}"),
        CaptureExit::Panicked => error!("capture thread panicked"),
    }
    server.stop();
    info!("shutdown complete");
    Ok(())
}
