//! Actix Web server exposing the video feed, chat endpoints and status.
//!
//! The server runs its own runtime on a dedicated thread so the capture
//! thread never shares an executor with request handling. Signal handling is
//! left to the binary, which stops capture before the server.

use std::{net::SocketAddr, sync::Arc, thread};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, bail};
use crossbeam_channel::Receiver;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::{
    control::ControlSurface,
    error::AppError,
    html::index::render_index,
    stream::{FrameBuffer, StreamSession, session::MULTIPART_CONTENT_TYPE},
    telemetry,
};

const RESET_MESSAGE: &str = "Contexto reiniciado. Puedes comenzar una nueva conversación.";

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) frames: Arc<FrameBuffer>,
    pub(crate) control: Arc<ControlSurface>,
}

/// Handle for the HTTP server thread.
pub(crate) struct HttpServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    exited: Receiver<()>,
    local_addr: SocketAddr,
}

impl HttpServerHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fires once the server thread is about to exit.
    pub(crate) fn exited(&self) -> &Receiver<()> {
        &self.exited
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("HTTP server thread panicked");
            }
        }
    }
}

/// Register every route. Callers supply `web::Data<ServerState>`.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::InvalidInput(format!("Cuerpo de la petición inválido: {err}")).into()
    }))
    .route("/", web::get().to(index_route))
    .route("/video_feed", web::get().to(video_feed))
    .route("/frame.jpg", web::get().to(frame_handler))
    .route("/send_message", web::post().to(send_message))
    .route("/new_prompt", web::post().to(new_prompt))
    .route("/get_conversation", web::get().to(get_conversation))
    .route("/status", web::get().to(status_handler))
    .route("/metrics", web::get().to(metrics_handler));
}

/// Spawn the server thread and wait until it is bound.
pub(crate) fn spawn_http_server(addr: SocketAddr, state: ServerState) -> Result<HttpServerHandle> {
    let state = web::Data::new(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::io::Result<SocketAddr>>(1);
    let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(1);

    let handle = thread::Builder::new()
        .name("assistant-http".into())
        .spawn(move || {
            let result = actix_web::rt::System::new().block_on(async move {
                let server = match HttpServer::new(move || {
                    App::new().app_data(state.clone()).configure(configure)
                })
                .disable_signals()
                .shutdown_timeout(5)
                .bind(addr)
                {
                    Ok(server) => server,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return Ok(());
                    }
                };
                let bound = server.addrs().first().copied().unwrap_or(addr);
                let server = server.run();
                let _ = ready_tx.send(Ok(bound));

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            });
            if let Err(err) = result {
                error!("HTTP server error: {err}");
            }
            let _ = exit_tx.send(());
        })
        .context("Failed to spawn HTTP server thread")?;

    let local_addr = match ready_rx.recv() {
        Ok(Ok(bound)) => bound,
        Ok(Err(err)) => {
            let _ = handle.join();
            return Err(err).with_context(|| format!("Failed to bind HTTP server on {addr}"));
        }
        Err(_) => {
            let _ = handle.join();
            bail!("HTTP server thread exited before binding {addr}");
        }
    };
    info!(%local_addr, "HTTP server listening");

    Ok(HttpServerHandle {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
        exited: exit_rx,
        local_addr,
    })
}

async fn index_route(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(render_index(state.frames.is_active()))
}

/// Stream the camera as MJPEG. Answers with an empty body once capture has
/// ended so clients do not hang on a dead feed.
async fn video_feed(state: web::Data<ServerState>) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    response
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE));

    if state.frames.is_closed() {
        debug!("video feed requested while capture is inactive");
        return response.body(Bytes::new());
    }

    let session = StreamSession::new(state.frames.clone());
    debug!(session = session.id(), "opening video feed");
    response.streaming(session.into_stream())
}

/// Return the latest JPEG. 204 before the first frame, 503 once capture has
/// ended without ever producing one.
async fn frame_handler(state: web::Data<ServerState>) -> Result<HttpResponse, AppError> {
    match state.frames.read() {
        Some(snapshot) => Ok(HttpResponse::Ok()
            .insert_header(("X-Frame-Version", snapshot.version.to_string()))
            .content_type("image/jpeg")
            .body(snapshot.jpeg)),
        None if state.frames.is_closed() => Err(AppError::DeviceUnavailable),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

#[derive(Deserialize)]
struct MessageRequest {
    #[serde(default)]
    message: String,
}

async fn send_message(
    state: web::Data<ServerState>,
    body: web::Json<MessageRequest>,
) -> Result<HttpResponse, AppError> {
    let messages = state.control.send_message(&body.message).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "messages": messages,
    })))
}

async fn new_prompt(state: web::Data<ServerState>) -> HttpResponse {
    state.control.reset_conversation();
    HttpResponse::Ok().json(json!({
        "status": "success",
        "message": RESET_MESSAGE,
    }))
}

async fn get_conversation(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.control.conversation())
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    let detection = state.control.detection();
    HttpResponse::Ok().json(json!({
        "camera_active": state.frames.is_active(),
        "frame_version": state.frames.version(),
        "detecting": detection.detecting,
        "target_classes": detection.target_classes,
        "analysis_prompt": detection.analysis_prompt,
        "last_message_at": state.control.last_activity().map(|at| at.to_rfc3339()),
    }))
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
