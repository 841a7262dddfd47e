//! Web front-end: write scenes from a narrative, render illustrations and
//! browse them.

use std::num::NonZeroU16;
use std::sync::Arc;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::sync::{RwLock, watch};
use tower_http::services::ServeDir;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::constants::SESSION_IDLE_MINUTES;
use crate::openai::{ImageRenderer, SceneWriter};

pub(crate) mod flash;
mod images;
mod prelude;
mod views;
pub(crate) mod workspace;

use images::scene_image_handler;
use views::{
    gallery_handler, generate_all_handler, generate_scene_handler, generate_scenes_handler,
    home_handler, reset_handler, scenes_json_handler,
};
use workspace::{BatchStatus, Workspace};

#[derive(Clone)]
pub(crate) struct AppState {
    config: Arc<AppConfig>,
    writer: Arc<dyn SceneWriter>,
    renderer: Arc<dyn ImageRenderer>,
    workspace: Arc<RwLock<Workspace>>,
    batch: Arc<watch::Sender<BatchStatus>>,
}

impl AppState {
    fn new(
        config: AppConfig,
        writer: Arc<dyn SceneWriter>,
        renderer: Arc<dyn ImageRenderer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            writer,
            renderer,
            workspace: Arc::new(RwLock::new(Workspace::default())),
            batch: Arc::new(watch::Sender::new(BatchStatus::default())),
        }
    }
}

async fn styles_handler() -> impl IntoResponse {
    const STYLES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/static/styles.css"));
    ([(CONTENT_TYPE, "text/css")], STYLES)
}

fn create_router(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            SESSION_IDLE_MINUTES,
        )));

    Router::new()
        .route("/", get(home_handler))
        .route("/scenes", post(generate_scenes_handler))
        .route("/scenes.json", get(scenes_json_handler))
        .route("/images/scene", post(generate_scene_handler))
        .route("/images/all", post(generate_all_handler))
        .route("/images/{index}", get(scene_image_handler))
        .route("/gallery", get(gallery_handler))
        .route("/reset", post(reset_handler))
        .route("/static/styles.css", get(styles_handler))
        .nest_service("/files", ServeDir::new(&state.config.output_dir))
        .layer(session_layer)
        .with_state(state)
}

/// Runs the web front-end until the listener fails or ctrl-c arrives.
pub async fn setup_server(
    listen_addr: &str,
    port: NonZeroU16,
    config: AppConfig,
    writer: Arc<dyn SceneWriter>,
    renderer: Arc<dyn ImageRenderer>,
) -> Result<(), anyhow::Error> {
    tokio::fs::create_dir_all(&config.output_dir).await?;
    tokio::fs::create_dir_all(&config.scenes_dir).await?;
    let app = create_router(AppState::new(config, writer, renderer));

    let addr = format!("{listen_addr}:{port}");
    info!("Starting server on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {err}");
            }
        })
        .await
    {
        error!("Server error: {err}");
    }
    Ok(())
}
