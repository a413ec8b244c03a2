pub mod app_state;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod pages;
pub mod playback;
pub mod provisioner;
mod routes;

use axum::Router;
use axum::extract::Extension;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use app_state::AppState;
pub use channel::{ChannelName, ChannelRegistry, Mp4Flags, TaskDescriptor};
pub use config::{Config, DeploymentConfig};
pub use engine::{EngineConfig, EngineSettings, EngineSnapshot, EngineTask, MediaEngine, TaskListEngine};
pub use error::{ConfigError, EngineError, ProvisionError};
pub use pages::Pages;
pub use playback::{PlaybackUrls, resolve};
pub use provisioner::{ChannelProvisioner, Provisioned};

/// Starts the engine and serves the channel front door and the media root
/// until either listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config).await?;
    state.engine.start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(routes::index))
        .route("/channel/{name}", get(routes::channel_page))
        .route("/api/channel/{name}", get(routes::channel_info))
        .route("/api/channels", get(routes::list_channels))
        .route("/api/engine", get(routes::engine_state))
        .layer(axum::middleware::from_fn(middleware::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors.clone())
        .layer(Extension(state.clone()));

    // Packaged HLS/DASH output, written by the engine
    let media_app = Router::new()
        .fallback_service(ServeDir::new(state.media_root()))
        .layer(axum::middleware::from_fn(middleware::log_request_errors))
        .layer(cors);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    info!("Channel API listening on {http_addr}");
    let http_listener = TcpListener::bind(&http_addr).await?;

    let video_addr = format!("0.0.0.0:{}", config.video_port);
    info!("Media delivery listening on {video_addr}");
    let video_listener = TcpListener::bind(&video_addr).await?;

    tokio::select! {
        result = axum::serve(http_listener, app) => result?,
        result = axum::serve(video_listener, media_app) => result?,
    }

    Ok(())
}
