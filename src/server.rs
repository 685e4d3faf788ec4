//! REST API for the adapter.
//!
//! Lets a benchmark harness running in another process drive one adapter
//! over HTTP with JSON bodies. Every request opens its own session: the
//! handler connects, runs the operation and releases the connection before
//! responding. Requests are serialized on the shared adapter and run on the
//! blocking thread pool because the driver and index polling block.
//!
//! ## Endpoints
//!
//! - `POST /insert` - Bulk insert `{ids, vectors}`
//! - `POST /search` - Run `{queries: [{vector, k, gt?}]}`
//! - `POST /optimize` - Create the search index and wait until it is queryable
//! - `GET /capabilities` - Dimension and capability probes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actix_web::{App, HttpServer};
//! use vdbbench_mongodb::{server, MongoDb, MongoStore};
//! use vdbbench_mongodb::config::Settings;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let settings = Settings::from_toml("[collection]\ndim = 768").unwrap();
//!     let state = server::state(MongoDb::from_settings(MongoStore, &settings).unwrap());
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .app_data(state.clone())
//!             .configure(server::config::<MongoStore>)
//!     })
//!     .bind("0.0.0.0:7878")?
//!     .run()
//!     .await
//! }
//! ```

use crate::api::{Filter, VectorDb};
use crate::error::{Error, Result};
use crate::store::DocumentStore;
use crate::MongoDb;
use actix_web::{web, HttpResponse};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Adapter shared by all workers of the server.
pub type SharedDb<S> = web::Data<Mutex<MongoDb<S>>>;

pub fn state<S: DocumentStore>(db: MongoDb<S>) -> SharedDb<S> {
    web::Data::new(Mutex::new(db))
}

// --- Request structs ---

#[derive(Deserialize)]
struct InsertRequest {
    ids: Vec<i64>,
    vectors: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct Query {
    vector: Vec<f32>,
    k: usize,
    /// Only return ids greater than this
    #[serde(default)]
    gt: Option<i64>,
}

#[derive(Deserialize)]
struct SearchRequest {
    queries: Vec<Query>,
}

// --- Response structs ---

#[derive(Serialize)]
struct InsertResponse {
    inserted: usize,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultGroup>,
}

#[derive(Serialize)]
struct SearchResultGroup {
    ids: Vec<i64>,
}

#[derive(Serialize)]
struct OptimizeResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct CapabilitiesResponse {
    dim: usize,
    need_normalize_cosine: bool,
    ready_to_load: bool,
}

fn error_response(error: &Error) -> HttpResponse {
    warn!(error = %error, "Request failed");
    let body = serde_json::json!({ "error": error.to_string() });
    if error.is_caller_error() {
        HttpResponse::BadRequest().json(body)
    } else {
        HttpResponse::InternalServerError().json(body)
    }
}

/// Runs `op` inside a fresh session on the blocking pool.
async fn with_session<S, T, F>(state: SharedDb<S>, op: F) -> HttpResponse
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
    T: Serialize + Send + 'static,
    F: FnOnce(&mut MongoDb<S>) -> Result<T> + Send + 'static,
{
    let result = web::block(move || {
        let mut db = state.lock();
        let mut session = db.init()?;
        op(&mut session)
    })
    .await;

    match result {
        Ok(Ok(body)) => HttpResponse::Ok().json(body),
        Ok(Err(e)) => error_response(&e),
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() })),
    }
}

// --- Handlers ---

async fn insert_handler<S>(state: SharedDb<S>, body: web::Json<InsertRequest>) -> HttpResponse
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    let body = body.into_inner();
    with_session(state, move |db| {
        let inserted = db.insert_embeddings(&body.vectors, &body.ids)?;
        Ok(InsertResponse { inserted })
    })
    .await
}

async fn search_handler<S>(state: SharedDb<S>, body: web::Json<SearchRequest>) -> HttpResponse
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    let body = body.into_inner();
    with_session(state, move |db| {
        let results = body.queries
            .iter()
            .map(|query| {
                let filter = query.gt.map(Filter::IdGreaterThan);
                db.search_embedding(&query.vector, query.k, filter.as_ref())
                    .map(|ids| SearchResultGroup { ids })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SearchResponse { results })
    })
    .await
}

async fn optimize_handler<S>(state: SharedDb<S>) -> HttpResponse
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    with_session(state, |db| {
        db.optimize()?;
        Ok(OptimizeResponse { status: "ready" })
    })
    .await
}

async fn capabilities_handler<S>(state: SharedDb<S>) -> HttpResponse
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    let result = web::block(move || {
        let mut db = state.lock();
        CapabilitiesResponse {
            dim: db.dim(),
            need_normalize_cosine: db.need_normalize_cosine(),
            ready_to_load: db.ready_to_load().is_ok(),
        }
    })
    .await;

    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() })),
    }
}

pub fn config<S>(cfg: &mut web::ServiceConfig)
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    cfg.service(web::resource("/insert").route(web::post().to(insert_handler::<S>)))
       .service(web::resource("/search").route(web::post().to(search_handler::<S>)))
       .service(web::resource("/optimize").route(web::post().to(optimize_handler::<S>)))
       .service(web::resource("/capabilities").route(web::get().to(capabilities_handler::<S>)));
}
