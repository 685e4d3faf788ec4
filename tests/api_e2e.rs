use actix_web::{App, HttpServer};
use reqwest::Client;
use serde_json::json;
use std::io::Write;
use std::net::TcpListener;
use tempfile::NamedTempFile;
use tokio::time::{sleep, Duration};
use vdbbench_mongodb::config::Settings;
use vdbbench_mongodb::{server, MemoryStore, MongoDb};

/// Find a free port by binding to port 0
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Settings written to and read back from a real file
fn settings(dim: usize) -> Settings {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[index]\nmetric_type = \"L2\"\npoll_interval_ms = 1\nready_timeout_secs = 5\n\n[collection]\ndim = {}",
        dim
    )
    .unwrap();
    Settings::from_file(file.path()).unwrap()
}

/// Start the HTTP surface on a free port backed by `store`
async fn start(store: &MemoryStore, dim: usize) -> (String, actix_web::dev::ServerHandle) {
    let port = free_port();
    let state = server::state(MongoDb::from_settings(store.clone(), &settings(dim)).unwrap());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(server::config::<MemoryStore>)
    })
    .bind(format!("127.0.0.1:{}", port))
    .unwrap()
    .run();
    let handle = server.handle();
    tokio::spawn(server);
    sleep(Duration::from_millis(200)).await;

    (format!("http://127.0.0.1:{}", port), handle)
}

#[actix_web::test]
async fn test_insert_optimize_and_search() {
    let store = MemoryStore::new().recording_pipelines();
    let (base, handle) = start(&store, 3).await;
    let client = Client::new();

    // --- Insert 4 vectors ---
    let resp = client
        .post(format!("{}/insert", base))
        .json(&json!({
            "ids": [1, 2, 3, 4],
            "vectors": [
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.9, 0.1, 0.0],
                [0.0, 0.0, 5.0]
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["inserted"], 4);

    // --- Build the index ---
    let resp = client.post(format!("{}/optimize", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    // --- Search: euclidean neighbours of [1, 0, 0] ---
    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({
            "queries": [
                {"vector": [1.0, 0.0, 0.0], "k": 3},
                {"vector": [1.0, 0.0, 0.0], "k": 3, "gt": 2}
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["ids"], json!([1, 3, 2]));
    assert_eq!(body["results"][1]["ids"], json!([3, 4]));

    // The request used an approximate query with the scaled candidate count
    let pipeline = store.last_pipeline().unwrap();
    let stage = pipeline[0].get_document("$vectorSearch").unwrap();
    assert_eq!(stage.get_i64("numCandidates").unwrap(), 60);

    handle.stop(true).await;
    assert_eq!(store.open_connections(), 0);
}

#[actix_web::test]
async fn test_search_before_optimize_is_empty() {
    let store = MemoryStore::new();
    let (base, handle) = start(&store, 2).await;
    let client = Client::new();

    client
        .post(format!("{}/insert", base))
        .json(&json!({ "ids": [1], "vectors": [[1.0, 0.0]] }))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({ "queries": [{"vector": [1.0, 0.0], "k": 5}] }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["results"][0]["ids"].as_array().unwrap().is_empty());

    handle.stop(true).await;
}

#[actix_web::test]
async fn test_mismatched_insert_is_rejected() {
    let store = MemoryStore::new();
    let (base, handle) = start(&store, 2).await;
    let client = Client::new();

    let resp = client
        .post(format!("{}/insert", base))
        .json(&json!({ "ids": [1, 2], "vectors": [[1.0, 0.0]] }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Length mismatch"));
    assert!(store.documents("vdb_bench", "vdb_bench_collection").is_empty());

    handle.stop(true).await;
}

#[actix_web::test]
async fn test_capabilities() {
    let store = MemoryStore::new();
    let (base, handle) = start(&store, 16).await;

    let body: serde_json::Value = Client::new()
        .get(format!("{}/capabilities", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["dim"], 16);
    assert_eq!(body["need_normalize_cosine"], false);
    assert_eq!(body["ready_to_load"], true);

    handle.stop(true).await;
}
