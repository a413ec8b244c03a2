use crate::AppState;
use crate::channel::ChannelName;
use crate::engine::EngineSnapshot;
use crate::error::ProvisionError;
use crate::playback::PlaybackUrls;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use handlebars::RenderError;
use serde::Serialize;
use tracing::error;

#[derive(Serialize)]
pub(crate) struct ChannelResponse {
    pub(crate) channel: String,
    pub(crate) created: bool,
    #[serde(flatten)]
    pub(crate) urls: PlaybackUrls,
}

#[derive(Serialize)]
pub(crate) struct ChannelListResponse {
    pub(crate) channels: Vec<String>,
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

pub(crate) async fn index(Extension(state): Extension<AppState>) -> Response {
    html_page(StatusCode::OK, state.pages.render_index())
}

/// Provisions the channel if needed and renders its player page.
pub(crate) async fn channel_page(
    Extension(state): Extension<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    match provision(&state, &name).await {
        Ok((channel, _, urls)) => html_page(StatusCode::OK, state.pages.render_player(&channel, &urls)),
        Err(err) => {
            let status = err.status_code();
            html_page(status, state.pages.render_error(status, &public_message(&err)))
        }
    }
}

fn html_page(status: StatusCode, rendered: Result<String, RenderError>) -> Response {
    match rendered {
        Ok(body) => (status, Html(body)).into_response(),
        Err(error) => {
            error!(%error, "Failed to render page");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[axum::debug_handler]
pub(crate) async fn channel_info(
    Extension(state): Extension<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    match provision(&state, &name).await {
        Ok((channel, created, urls)) => (
            StatusCode::OK,
            Json(ChannelResponse {
                channel: channel.to_string(),
                created,
                urls,
            }),
        )
            .into_response(),
        Err(err) => (
            err.status_code(),
            Json(ErrorResponse {
                error: public_message(&err),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn list_channels(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let channels = state.provisioner.registry().list().await;
    (StatusCode::OK, Json(ChannelListResponse { channels }))
}

pub(crate) async fn engine_state(Extension(state): Extension<AppState>) -> Json<EngineSnapshot> {
    Json(state.engine.snapshot())
}

async fn provision(
    state: &AppState,
    name: &str,
) -> Result<(ChannelName, bool, PlaybackUrls), ProvisionError> {
    let channel = ChannelName::parse(name)?;
    let provisioned = state
        .provisioner
        .provision_channel(&channel)
        .await
        .inspect_err(|error| error!(%channel, %error, "Failed to provision channel"))?;
    let urls = state.resolve(&channel);
    Ok((channel, provisioned.created, urls))
}

/// Server-side faults are logged, not echoed back.
fn public_message(err: &ProvisionError) -> String {
    match err {
        ProvisionError::InvalidChannelName(_) => err.to_string(),
        ProvisionError::DirectoryCreationFailure { .. } => "Failed to prepare channel storage".into(),
        ProvisionError::EngineRegistrationFailure { .. } | ProvisionError::Interrupted(_) => {
            "Failed to register channel".into()
        }
    }
}
