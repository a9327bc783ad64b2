//! The development server: serves the staging tree and pushes
//! [`ReloadEvent`](crate::reload::ReloadEvent)s to connected browsers over
//! server-sent events. Served HTML pages get a small client script injected
//! that listens for those events and either swaps stylesheets in place or
//! reloads the page.

use crate::build::shutdown_signal;
use crate::reload::{AssetKind, Reloader};
use crate::step::Context;
use async_stream::stream;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use std::convert::Infallible;
use std::fmt;
use std::future::IntoFuture;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

pub const EVENTS_PATH: &str = "/__sitepipe/events";
pub const CLIENT_PATH: &str = "/__sitepipe/client.js";

const CLIENT_SCRIPT: &str = r#"(function () {
  var injectCss = __INJECT_CSS__;
  var source = new EventSource("__EVENTS_PATH__");
  source.addEventListener("reload", function (message) {
    var event = JSON.parse(message.data);
    if (injectCss && event.kind === "__STYLESHEET__") {
      var links = document.querySelectorAll('link[rel="stylesheet"]');
      for (var i = 0; i < links.length; i++) {
        var url = new URL(links[i].href);
        url.searchParams.set("t", Date.now());
        links[i].href = url.toString();
      }
      return;
    }
    window.location.reload();
  });
})();
"#;

#[derive(Clone)]
struct ServerState {
    root: Arc<PathBuf>,
    reloader: Reloader,
    client: Arc<String>,
}

/// Builds the router serving `root`.
pub fn router(root: PathBuf, reloader: Reloader, inject_css: bool) -> Router {
    let state = ServerState {
        root: Arc::new(root.clone()),
        reloader,
        client: Arc::new(client_script(inject_css)),
    };
    Router::new()
        .route(EVENTS_PATH, get(events))
        .route(CLIENT_PATH, get(client))
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .layer(middleware::from_fn_with_state(state.clone(), inject_client))
        .with_state(state)
}

/// Serves the staging tree until Ctrl-C.
pub async fn serve(ctx: Context) -> Result<()> {
    let config = &ctx.config;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr.as_str())
        .await
        .map_err(|err| Error::Bind {
            addr: addr.clone(),
            err,
        })?;
    info!(
        url = %format!("http://{}/", addr),
        root = %config.public_directory.display(),
        "serving"
    );

    let app = router(
        config.public_directory.clone(),
        ctx.reloader.clone(),
        config.server.inject_css,
    );
    // Open event streams never finish on their own, so shutdown drops the
    // server instead of draining connections.
    tokio::select! {
        result = axum::serve(listener, app).into_future() => result.map_err(Error::Serve),
        _ = shutdown_signal() => Ok(()),
    }
}

pub fn client_script(inject_css: bool) -> String {
    CLIENT_SCRIPT
        .replace("__INJECT_CSS__", if inject_css { "true" } else { "false" })
        .replace("__EVENTS_PATH__", EVENTS_PATH)
        .replace("__STYLESHEET__", kind_name(AssetKind::Stylesheet))
}

fn kind_name(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Page => "page",
        AssetKind::Stylesheet => "stylesheet",
        AssetKind::Script => "script",
        AssetKind::Image => "image",
        AssetKind::Font => "font",
    }
}

async fn client(State(state): State<ServerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        state.client.as_str().to_owned(),
    )
}

async fn events(State(state): State<ServerState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = state.reloader.subscribe();
    debug!("browser connected");

    let stream = stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event("reload").data(json));
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "browser lagged, some reload events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}

// Serves HTML pages itself so it can inject the client script; everything
// else falls through to the static file service.
async fn inject_client(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let path = match html_path(&state.root, request.uri().path()) {
        Some(path) => path,
        None => return next.run(request).await,
    };
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(inject(&html)).into_response(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => next.run(request).await,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "reading page");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Maps a request path to the HTML file it would serve, if it names one.
/// Directory requests map to their `index.html`. Paths that try to escape
/// `root` or need percent-decoding map to nothing and are left to the static
/// file service.
pub fn html_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    if request_path.contains('%') {
        return None;
    }
    let relative = Path::new(request_path.trim_start_matches('/'));
    if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    if request_path.ends_with('/') {
        return Some(root.join(relative).join("index.html"));
    }
    match relative.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm") => {
            Some(root.join(relative))
        }
        _ => None,
    }
}

/// Inserts the client `<script>` just before `</body>`, or appends it when
/// the page has no closing body tag.
pub fn inject(html: &str) -> String {
    let tag = format!(r#"<script src="{}" async></script>"#, CLIENT_PATH);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(i) => format!("{}{}{}", &html[..i], tag, &html[i..]),
        None => format!("{}{}", html, tag),
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for the development server.
#[derive(Debug)]
pub enum Error {
    /// Returned when the listen address can't be bound.
    Bind { addr: String, err: io::Error },

    /// Returned when the server stops with an I/O error.
    Serve(io::Error),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Bind { addr, err } => write!(f, "Binding '{}': {}", addr, err),
            Error::Serve(err) => write!(f, "Serving: {}", err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind { addr: _, err } => Some(err),
            Error::Serve(err) => Some(err),
        }
    }
}
