use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use nexus_engine::{
    BuildConfig, BuildReporter, BuildSession, HotUpdate, HotUpdateTransport, HtmlOptions,
    MemoryFileStore,
};
use nexus_server::{DevServer, ServerEvent};
use std::sync::Arc;
use tower::ServiceExt;

fn config() -> BuildConfig {
    BuildConfig::development("/app").entry("main", "./src/index.js")
}

async fn built(config: BuildConfig) -> nexus_engine::BuildResult {
    let store = Arc::new(MemoryFileStore::with_files([
        ("/app/src/index.js", "import { greet } from './greet';\ngreet();\n"),
        ("/app/src/greet.js", "export function greet() { return 'hi'; }\n"),
    ]));
    let mut session = BuildSession::new(config, store);
    session.build().await.expect("build")
}

async fn get(server: &DevServer, path: &str) -> axum::response::Response {
    server
        .router()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unavailable_before_first_build() {
    let server = DevServer::new(&config());
    let response = get(&server, "/main.js").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_serves_latest_artifacts() {
    let server = DevServer::new(&config());
    server.on_build_finished(&built(config()).await);

    let response = get(&server, "/main.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/javascript");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("__nexus_register__(\"/src/greet.js\""));
    assert!(text.ends_with("__nexus_require__(\"/src/index.js\");\n"));

    let missing = get(&server, "/nope.js").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_index_gets_hmr_client() {
    // No HTML configured: a page is synthesized from the manifest.
    let server = DevServer::new(&config());
    server.on_build_finished(&built(config()).await);
    let body = to_bytes(get(&server, "/").await.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("<script src=\"/main.js\"></script>"));
    assert!(html.contains("<script src=\"/__nexus/client.js\"></script>"));

    // Emitted HTML is served with the client injected.
    let mut with_html = config();
    with_html.output.html = Some(HtmlOptions {
        filename: "index.html".into(),
        template: Some("<html><body><div id=\"root\"></div></body></html>".into()),
    });
    let server = DevServer::new(&with_html);
    server.on_build_finished(&built(with_html).await);
    let body = to_bytes(get(&server, "/index.html").await.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("<div id=\"root\"></div><script src=\"/main.js\"></script>"));
    assert!(html.contains("/__nexus/client.js"));

    let client = get(&server, "/__nexus/client.js").await;
    assert_eq!(client.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_hot_updates_are_broadcast() {
    let server = DevServer::new(&config());
    let mut events = server.subscribe();

    server.push(&[HotUpdate {
        module_id: "/src/greet.js".into(),
        code: "__nexus_register__(\"/src/greet.js\", {}, function () {});".into(),
    }]);

    match events.recv().await.unwrap() {
        ServerEvent::Update(payload) => {
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(value["updates"][0]["module_id"], "/src/greet.js");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_hmr_endpoint_is_event_stream() {
    let server = DevServer::new(&config());
    let response = get(&server, "/__nexus_hmr").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
}
