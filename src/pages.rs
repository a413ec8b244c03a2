//! HTML pages served by the front door
//!
//! Rendered with Handlebars, which HTML-escapes every `{{value}}`.

use crate::channel::ChannelName;
use crate::playback::PlaybackUrls;
use anyhow::anyhow;
use axum::http::StatusCode;
use handlebars::{Handlebars, RenderError};
use serde::Serialize;
use std::sync::Arc;

const INDEX: &str = "index";
const PLAYER: &str = "player";
const ERROR: &str = "error";

#[derive(Serialize)]
struct PlayerPage<'a> {
    channel: &'a str,
    ingest_url: &'a str,
    manifest_url: &'a str,
}

#[derive(Serialize)]
struct ErrorPage<'a> {
    status: u16,
    reason: &'a str,
    message: &'a str,
}

/// Registered page templates
#[derive(Clone)]
pub struct Pages {
    handlebars: Arc<Handlebars<'static>>,
}

impl Pages {
    pub fn new() -> anyhow::Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        handlebars
            .register_template_string(INDEX, INDEX_TEMPLATE)
            .map_err(|e| anyhow!("Failed to register index template: {e}"))?;
        handlebars
            .register_template_string(PLAYER, PLAYER_TEMPLATE)
            .map_err(|e| anyhow!("Failed to register player template: {e}"))?;
        handlebars
            .register_template_string(ERROR, ERROR_TEMPLATE)
            .map_err(|e| anyhow!("Failed to register error template: {e}"))?;

        Ok(Self {
            handlebars: Arc::new(handlebars),
        })
    }

    pub fn render_index(&self) -> Result<String, RenderError> {
        self.handlebars.render(INDEX, &())
    }

    pub fn render_player(
        &self,
        channel: &ChannelName,
        urls: &PlaybackUrls,
    ) -> Result<String, RenderError> {
        let data = PlayerPage {
            channel: channel.as_str(),
            ingest_url: &urls.ingest_url,
            manifest_url: &urls.manifest_url,
        };
        self.handlebars.render(PLAYER, &data)
    }

    pub fn render_error(&self, status: StatusCode, message: &str) -> Result<String, RenderError> {
        let data = ErrorPage {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Error"),
            message,
        };
        self.handlebars.render(ERROR, &data)
    }
}

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Live channels</title>
</head>
<body>
  <h1>Live channels</h1>
  <p>Open <code>/channel/{name}</code> to create a channel and watch it.</p>
  <p>Names may use letters, digits, <code>_</code> and <code>-</code>.</p>
</body>
</html>
"#;

const PLAYER_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Channel {{channel}}</title>
  <link href="https://vjs.zencdn.net/7.2.3/video-js.css" rel="stylesheet" />
</head>
<body>
  <h1>Channel {{channel}}</h1>
  <p>Publish to <code id="ingest-url">{{ingest_url}}</code></p>
  <video
    id="player"
    class="video-js vjs-default-skin"
    width="1024"
    height="600"
    controls>
    <source type="application/x-mpegURL" src="{{manifest_url}}" />
  </video>
  <script src="https://vjs.zencdn.net/7.2.3/video.js"></script>
  <script>
    var player = videojs("player");
    player.play();
  </script>
</body>
</html>
"#;

const ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>{{status}} {{reason}}</title>
</head>
<body>
  <h1>{{status}} {{reason}}</h1>
  <p>{{message}}</p>
</body>
</html>
"#;
