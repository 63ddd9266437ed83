#![cfg(feature = "reqwest-client")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use streampath::error::{FetchError, TransportError};
use streampath::{PathFetcher, RequestOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

const DATA_CHUNKS: usize = 20;
const INTERVAL: Duration = Duration::from_millis(25);

#[derive(Clone, Default)]
struct Feed {
    sent: Arc<AtomicUsize>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `{"start":"here",` then one `"dataN": {...},` member per interval, then `"end":"here"}`.
async fn slow_document(State(feed): State<Feed>) -> impl IntoResponse {
    let chunks = futures::stream::unfold(0usize, move |n| {
        let sent = feed.sent.clone();
        async move {
            let text = match n {
                0 => r#"{"start":"here","#.to_string(),
                n if n <= DATA_CHUNKS => {
                    tokio::time::sleep(INTERVAL).await;
                    let index = n - 1;
                    let member = json!({
                        "message": format!("Data chunk {index}"),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    });
                    format!(r#""data{index}":{member},"#)
                }
                n if n == DATA_CHUNKS + 1 => r#""end":"here"}"#.to_string(),
                _ => return None,
            };
            sent.fetch_add(1, Ordering::SeqCst);
            Some((Ok::<_, std::io::Error>(Bytes::from(text)), n + 1))
        }
    });
    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        Body::from_stream(chunks),
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not Found"})))
}

async fn spawn_server() -> (SocketAddr, Feed) {
    let feed = Feed::default();
    let app = Router::new()
        .route("/", get(slow_document))
        .route("/error", get(not_found))
        .with_state(feed.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, feed)
}

fn fetcher() -> PathFetcher<reqwest::Client> {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    PathFetcher::new(client)
}

fn url(addr: SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{addr}{path}")).unwrap()
}

#[tokio::test]
async fn finds_value_and_stops_the_server_early() {
    init_tracing();
    let (addr, feed) = spawn_server().await;

    let found = fetcher()
        .find(&url(addr, "/"), "data3", RequestOptions::default())
        .await
        .unwrap()
        .expect("data3 is in the document");
    assert_eq!(found["message"], "Data chunk 3");
    assert!(found["timestamp"].is_string());
    let sent_at_match = feed.sent.load(Ordering::SeqCst);

    // long enough for the whole document had the transfer kept going
    tokio::time::sleep(INTERVAL * DATA_CHUNKS as u32).await;
    let sent = feed.sent.load(Ordering::SeqCst);
    // one chunk may be in flight and one more written before the reset is seen
    assert!(
        sent <= sent_at_match + 2,
        "server kept streaming after the match: {sent_at_match} chunks at the match, {sent} later"
    );
    assert!(sent < DATA_CHUNKS + 2);
}

#[tokio::test]
async fn early_exit_beats_reading_the_whole_body() {
    init_tracing();
    let (addr, _feed) = spawn_server().await;
    let fetcher = fetcher();

    let start = Instant::now();
    let found = fetcher
        .find(&url(addr, "/"), "data3", RequestOptions::default())
        .await
        .unwrap();
    let early = start.elapsed();
    assert!(found.is_some());

    let start = Instant::now();
    let missing = fetcher
        .find(&url(addr, "/"), "nonexistent", RequestOptions::default())
        .await
        .unwrap();
    let full = start.elapsed();
    assert!(missing.is_none());

    assert!(
        early < full,
        "early exit took {early:?}, full read took {full:?}"
    );
    assert!(full >= INTERVAL * DATA_CHUNKS as u32);
}

#[tokio::test]
async fn missing_path_reads_to_the_end() {
    init_tracing();
    let (addr, feed) = spawn_server().await;

    let found = fetcher()
        .find(&url(addr, "/"), "nonexistent", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(found, None);
    assert_eq!(feed.sent.load(Ordering::SeqCst), DATA_CHUNKS + 2);
}

#[tokio::test]
async fn last_member_is_found() {
    init_tracing();
    let (addr, _feed) = spawn_server().await;

    let found = fetcher()
        .find(&url(addr, "/"), "end", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(found, Some(json!("here")));
}

#[tokio::test]
async fn http_error_status_is_reported_with_body() {
    init_tracing();
    let (addr, _feed) = spawn_server().await;

    let err = fetcher()
        .find(&url(addr, "/error"), "data3", RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), r#"HTTP error: 404 {"error":"Not Found"}"#);
}

#[tokio::test]
async fn connection_dropped_mid_body_is_a_transport_error() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await.unwrap();
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: application/json\r\n\
                  Transfer-Encoding: chunked\r\n\r\n\
                  10\r\n{\"start\":\"here\",\r\n",
            )
            .await
            .unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(INTERVAL).await;
        // dropped without the terminating chunk
    });

    let err = fetcher()
        .find(&url(addr, "/"), "data3", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::Transport(TransportError::Stream(_))),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher()
        .find(&url(addr, "/"), "data3", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::Transport(TransportError::Connect(_))),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn repeated_lookups_agree() {
    init_tracing();
    let (addr, _feed) = spawn_server().await;
    let fetcher = fetcher();

    let mut messages = Vec::new();
    for _ in 0..3 {
        let found = fetcher
            .find(&url(addr, "/"), "data1", RequestOptions::default())
            .await
            .unwrap()
            .unwrap();
        messages.push(found["message"].clone());
    }
    assert_eq!(messages, vec![json!("Data chunk 1"); 3]);
}

#[tokio::test]
async fn free_function_uses_a_default_client() {
    init_tracing();
    let (addr, _feed) = spawn_server().await;

    let found = streampath::fetch_and_find_path(
        &format!("http://{addr}/"),
        "data0.message",
        RequestOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(found, Some(json!("Data chunk 0")));
}

#[tokio::test]
async fn free_function_rejects_bad_urls() {
    let err = streampath::fetch_and_find_path("not a url", "a", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
}
