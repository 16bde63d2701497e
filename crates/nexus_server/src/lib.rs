//! Development server.
//!
//! Serves the latest [`BuildResult`] from memory and streams hot updates to
//! browsers over server-sent events. The server is itself the scheduler's
//! [`BuildReporter`] and [`HotUpdateTransport`].

mod client;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use nexus_engine::loaders::mime_for_path;
use nexus_engine::{
    ArtifactKind, BuildConfig, BuildError, BuildReporter, BuildResult, BuildSession, BuildTrigger,
    FileStore, HotUpdate, HotUpdateTransport, OsFileStore, TracingReporter, WatchScheduler,
};
use parking_lot::RwLock;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Once};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use client::HMR_CLIENT_JS;

pub const HMR_PATH: &str = "/__nexus_hmr";
pub const CLIENT_PATH: &str = "/__nexus/client.js";

static INIT: Once = Once::new();

/// Install the `fmt` subscriber, filtered by `RUST_LOG`. Only the first call
/// has an effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Pushed to every connected browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// JSON `{"updates": [{module_id, code}, ...]}`.
    Update(String),
    BuildError(String),
}

impl ServerEvent {
    fn into_sse(self) -> Event {
        match self {
            ServerEvent::Update(data) => Event::default().event("update").data(data),
            ServerEvent::BuildError(message) => Event::default().event("build-error").data(message),
        }
    }
}

struct Inner {
    latest: RwLock<Option<Arc<BuildResult>>>,
    events: broadcast::Sender<ServerEvent>,
    public_path: String,
    html_file: String,
}

#[derive(Clone)]
pub struct DevServer {
    inner: Arc<Inner>,
}

impl DevServer {
    pub fn new(config: &BuildConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let html_file = config
            .output
            .html
            .as_ref()
            .map(|h| h.filename.clone())
            .unwrap_or_else(|| "index.html".to_string());
        Self {
            inner: Arc::new(Inner {
                latest: RwLock::new(None),
                events,
                public_path: config.output.public_path.clone(),
                html_file,
            }),
        }
    }

    pub fn latest(&self) -> Option<Arc<BuildResult>> {
        self.inner.latest.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(HMR_PATH, get(hmr_stream))
            .route(CLIENT_PATH, get(client_script))
            .fallback(serve_artifact)
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Artifact name for a request path.
    fn artifact_name<'a>(&'a self, path: &'a str) -> &'a str {
        let file = path
            .strip_prefix(self.inner.public_path.as_str())
            .or_else(|| path.strip_prefix('/'))
            .unwrap_or(path);
        if file.is_empty() {
            &self.inner.html_file
        } else {
            file
        }
    }
}

impl BuildReporter for DevServer {
    fn on_build_started(&self, trigger: &BuildTrigger) {
        TracingReporter.on_build_started(trigger);
    }

    fn on_build_finished(&self, result: &BuildResult) {
        TracingReporter.on_build_finished(result);
        *self.inner.latest.write() = Some(Arc::new(result.clone()));
    }

    fn on_build_failed(&self, error: &BuildError) {
        TracingReporter.on_build_failed(error);
        let _ = self.inner.events.send(ServerEvent::BuildError(error.to_string()));
    }
}

impl HotUpdateTransport for DevServer {
    fn push(&self, updates: &[HotUpdate]) {
        let payload = serde_json::json!({ "updates": updates }).to_string();
        tracing::debug!("Pushing {} hot updates", updates.len());
        // No subscribers is not an error.
        let _ = self.inner.events.send(ServerEvent::Update(payload));
    }
}

async fn hmr_stream(State(server): State<DevServer>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(server.subscribe())
        .filter_map(|event| event.ok().map(|e| Ok::<_, Infallible>(e.into_sse())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript")], HMR_CLIENT_JS)
}

async fn serve_artifact(State(server): State<DevServer>, uri: Uri) -> Response {
    let Some(result) = server.latest() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "initial build in progress").into_response();
    };
    let file = server.artifact_name(uri.path());

    match result.artifact(file) {
        Some(artifact) if artifact.kind == ArtifactKind::Html => {
            let document = String::from_utf8_lossy(&artifact.bytes);
            html_response(with_client(&document))
        }
        Some(artifact) => {
            let mime = mime_for_path(Path::new(file));
            ([(header::CONTENT_TYPE, mime)], Body::from(artifact.bytes.clone())).into_response()
        }
        None if file == server.inner.html_file => html_response(fallback_document(&server, &result)),
        None => (StatusCode::NOT_FOUND, format!("{file} not found")).into_response(),
    }
}

fn html_response(document: String) -> Response {
    ([(header::CONTENT_TYPE, "text/html")], document).into_response()
}

fn with_client(document: &str) -> String {
    let tag = format!("<script src=\"{CLIENT_PATH}\"></script>\n");
    let mut out = document.to_string();
    match out.rfind("</body>") {
        Some(index) => out.insert_str(index, &tag),
        None => out.push_str(&tag),
    }
    out
}

/// Page loading every entry when the build emits no HTML.
fn fallback_document(server: &DevServer, result: &BuildResult) -> String {
    let mut scripts = String::new();
    let mut seen = std::collections::HashSet::new();
    for file in result.manifest.entries.values().flatten() {
        if seen.insert(file) {
            scripts.push_str(&format!(
                "<script src=\"{}{}\"></script>\n",
                server.inner.public_path, file
            ));
        }
    }
    with_client(&format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n</head>\n<body>\n{scripts}</body>\n</html>\n"
    ))
}

/// Build `config` from disk, watch its root and serve the result on `port`
/// until Ctrl-C.
pub async fn start_dev_server(config: BuildConfig, port: u16) -> anyhow::Result<()> {
    init_tracing();

    let root = config.root.clone();
    let store: Arc<dyn FileStore> = Arc::new(OsFileStore);
    let server = DevServer::new(&config);
    let session = BuildSession::new(config, store.clone());
    let (handle, task) =
        WatchScheduler::new(session, Arc::new(server.clone()), Arc::new(server.clone())).spawn();
    let _watch = handle.watch(store.as_ref(), &[root.clone()])?;

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Nexus dev server listening on http://{}", addr);
    tracing::info!("Serving root: {}", root.display());

    axum::serve(listener, server.router())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    handle.stop();
    task.await?;
    Ok(())
}
