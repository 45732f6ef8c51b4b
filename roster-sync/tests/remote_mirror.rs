//! Remote mirror against a local stand-in for the object store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use roster_core::{Collection, Record};
use roster_sync::{PersistError, RemoteConfig, RemoteMirror, SnapshotStore};
use tokio::net::TcpListener;
use tokio::time::Duration;

type Objects = Arc<Mutex<HashMap<String, String>>>;

#[derive(Clone)]
struct Bucket {
    objects: Objects,
    delay: Duration,
}

async fn download(
    State(bucket): State<Bucket>,
    Path((name, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    tokio::time::sleep(bucket.delay).await;
    if headers.get("apikey").is_none() {
        return (StatusCode::UNAUTHORIZED, "missing apikey").into_response();
    }
    match bucket.objects.lock().get(&format!("{name}/{key}")) {
        Some(body) => body.clone().into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":"404","error":"not_found","message":"Object not found"}"#,
        )
            .into_response(),
    }
}

async fn upload(
    State(bucket): State<Bucket>,
    Path((name, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    tokio::time::sleep(bucket.delay).await;
    let path = format!("{name}/{key}");
    let upsert = headers.get("x-upsert").and_then(|v| v.to_str().ok()) == Some("true");
    let mut objects = bucket.objects.lock();
    if objects.contains_key(&path) && !upsert {
        return (StatusCode::CONFLICT, "Duplicate").into_response();
    }
    objects.insert(path, body);
    StatusCode::OK.into_response()
}

async fn start_bucket(delay: Duration) -> (String, Objects) {
    let objects = Objects::default();
    let app = Router::new()
        .route("/storage/v1/object/:bucket/:key", get(download).post(upload))
        .with_state(Bucket {
            objects: Arc::clone(&objects),
            delay,
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), objects)
}

fn mirror(base_url: String, timeout: Duration) -> RemoteMirror {
    RemoteMirror::new(RemoteConfig {
        base_url,
        api_key: "anon".to_string(),
        timeout,
        ..RemoteConfig::default()
    })
    .unwrap()
}

fn sample() -> Collection {
    let mut c = Collection::with_groups(["men", "women"]);
    c.push(Record {
        id: 1,
        name: "A".to_string(),
        group: "men".to_string(),
        rank: 1,
    });
    c
}

#[tokio::test]
async fn test_missing_object_loads_as_none() {
    let (base, _) = start_bucket(Duration::ZERO).await;
    let remote = mirror(base, Duration::from_secs(2));
    assert!(remote.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_then_load() {
    let (base, objects) = start_bucket(Duration::ZERO).await;
    let remote = mirror(base, Duration::from_secs(2));

    remote.save(&sample()).await.unwrap();
    // Second save overwrites thanks to x-upsert.
    let mut updated = sample();
    updated.push(Record {
        id: 2,
        name: "B".to_string(),
        group: "women".to_string(),
        rank: 1,
    });
    remote.save(&updated).await.unwrap();

    assert!(objects.lock().contains_key("roster/data-mirror.json"));
    assert_eq!(remote.load().await.unwrap(), Some(updated));
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let (base, _) = start_bucket(Duration::from_millis(500)).await;
    let remote = mirror(base, Duration::from_millis(100));

    let err = remote.save(&sample()).await.unwrap_err();
    assert!(matches!(err, PersistError::Timeout(_)), "got {err:?}");
    assert_eq!(err.kind(), "PersistError");
}

#[tokio::test]
async fn test_corrupt_object_is_parse_error() {
    let (base, objects) = start_bucket(Duration::ZERO).await;
    objects
        .lock()
        .insert("roster/data-mirror.json".to_string(), "{oops".to_string());
    let remote = mirror(base, Duration::from_secs(2));

    let err = remote.load().await.unwrap_err();
    assert_eq!(err.kind(), "ParseError");
}

#[tokio::test]
async fn test_unreachable_store_is_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = mirror(format!("http://{addr}"), Duration::from_secs(2));
    let err = remote.load().await.unwrap_err();
    assert!(matches!(err, PersistError::Http(_)), "got {err:?}");
}
