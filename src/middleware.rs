use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, warn};

/// Raw `{name}` segment of a channel route, before validation
fn channel_from_path(path: &str) -> Option<&str> {
    let rest = path
        .strip_prefix("/api/channel/")
        .or_else(|| path.strip_prefix("/channel/"))?;
    let name = rest.split('/').next().unwrap_or_default();
    (!name.is_empty()).then_some(name)
}

/// Logs failed requests, tagged with the channel they targeted.
pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri().clone();
    let method = req.method().clone();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let channel = channel_from_path(uri.path()).unwrap_or("-");

    if status.is_client_error() {
        warn!(%method, %uri, %status, channel, elapsed_ms, "Client error");
    } else if status.is_server_error() {
        error!(%method, %uri, %status, channel, elapsed_ms, "Server error");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_channel_segment() {
        assert_eq!(channel_from_path("/channel/teamA"), Some("teamA"));
        assert_eq!(channel_from_path("/api/channel/teamA"), Some("teamA"));
        assert_eq!(channel_from_path("/channel/%2E%2E"), Some("%2E%2E"));
        assert_eq!(channel_from_path("/channel/teamA/extra"), Some("teamA"));
    }

    #[test]
    fn other_routes_have_no_channel() {
        for path in ["/", "/api/channels", "/api/engine", "/channel/", "/teamA/index.m3u8"] {
            assert_eq!(channel_from_path(path), None, "{path}");
        }
    }
}
