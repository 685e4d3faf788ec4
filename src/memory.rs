//! In-process [`DocumentStore`].
//!
//! `MemoryStore` keeps collections, documents and search indexes in memory
//! and answers `$vectorSearch` by scanning every document. It follows the
//! Atlas rules that matter to the adapter:
//!
//! - `exact` and `numCandidates` are mutually exclusive, and
//!   `limit <= numCandidates <= 10000` for approximate queries
//! - filters may only reference fields declared as `filter` in the index
//! - a missing or still-building index yields no results
//!
//! Clones share state, so a test can hand one clone to the adapter and
//! inspect the other. Pipelines are only kept when recording is switched
//! on with [`MemoryStore::recording_pipelines`].

use crate::error::{Error, Result};
use crate::store::{Connection, DocumentStore, SearchIndexDefinition, SearchIndexStatus};
use crate::vector::Similarity;
use mongodb::bson::{oid::ObjectId, Bson, Document};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_CANDIDATES: i64 = 10_000;

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    collections: HashMap<(String, String), MemoryCollection>,
    open_connections: usize,
    connects: usize,
    build_polls: u32,
    fail_index_builds: bool,
    refuse_connections: bool,
    status_polls: usize,
    record_pipelines: bool,
    pipelines: Vec<Vec<Document>>,
}

#[derive(Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    search_indexes: Vec<MemorySearchIndex>,
    indexes: Vec<String>,
}

struct MemorySearchIndex {
    name: String,
    definition: Document,
    remaining_polls: u32,
    failed: bool,
}

impl MemorySearchIndex {
    fn queryable(&self) -> bool {
        !self.failed && self.remaining_polls == 0
    }

    fn status(&self) -> &'static str {
        if self.failed {
            "FAILED"
        } else if self.remaining_polls > 0 {
            "BUILDING"
        } else {
            "READY"
        }
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// New search indexes report `queryable: false` for this many status polls.
    pub fn with_index_build_polls(self, polls: u32) -> MemoryStore {
        self.state.lock().build_polls = polls;
        self
    }

    /// New search indexes report `status: FAILED` and never become queryable.
    pub fn with_failing_index_builds(self) -> MemoryStore {
        self.set_failing_index_builds(true);
        self
    }

    /// Applies to indexes created from now on.
    pub fn set_failing_index_builds(&self, failing: bool) {
        self.state.lock().fail_index_builds = failing;
    }

    /// Keep every pipeline passed to `aggregate` for [`pipelines`](Self::pipelines).
    pub fn recording_pipelines(self) -> MemoryStore {
        self.state.lock().record_pipelines = true;
        self
    }

    pub fn refusing_connections(self) -> MemoryStore {
        self.state.lock().refuse_connections = true;
        self
    }

    /// Connections currently held by callers.
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    /// Total number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of `list_search_indexes` calls served.
    pub fn status_polls(&self) -> usize {
        self.state.lock().status_polls
    }

    /// Every pipeline passed to `aggregate` while recording, oldest first.
    pub fn pipelines(&self) -> Vec<Vec<Document>> {
        self.state.lock().pipelines.clone()
    }

    pub fn last_pipeline(&self) -> Option<Vec<Document>> {
        self.state.lock().pipelines.last().cloned()
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.state.lock()
            .collections
            .get(&key(database, collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Regular (non-search) indexes, by field name.
    pub fn indexes(&self, database: &str, collection: &str) -> Vec<String> {
        self.state.lock()
            .collections
            .get(&key(database, collection))
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub fn search_index_definition(&self, database: &str, collection: &str, name: &str) -> Option<Document> {
        self.state.lock()
            .collections
            .get(&key(database, collection))?
            .search_indexes
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.definition.clone())
    }
}

fn key(database: &str, collection: &str) -> (String, String) {
    (database.to_string(), collection.to_string())
}

impl DocumentStore for MemoryStore {
    type Connection = MemoryConnection;

    fn connect(&self, _connection_string: &str, database: &str) -> Result<MemoryConnection> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(Error::Rejected("connection refused".to_string()));
        }
        state.open_connections += 1;
        state.connects += 1;

        Ok(MemoryConnection { state: Arc::clone(&self.state), database: database.to_string() })
    }
}

pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
    database: String,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.state.lock().open_connections -= 1;
    }
}

impl Connection for MemoryConnection {
    fn list_collection_names(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        let mut names: Vec<String> = state.collections
            .keys()
            .filter(|(db, _)| db == &self.database)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.state.lock().collections.remove(&key(&self.database, collection));
        Ok(())
    }

    fn create_search_index(&self, collection: &str, index: &SearchIndexDefinition) -> Result<String> {
        let mut state = self.state.lock();
        let (remaining_polls, failed) = (state.build_polls, state.fail_index_builds);
        let coll = state.collections.entry(key(&self.database, collection)).or_default();

        if coll.search_indexes.iter().any(|i| i.name == index.name) {
            return Err(Error::Rejected(format!("duplicate search index '{}'", index.name)));
        }
        coll.search_indexes.push(MemorySearchIndex {
            name: index.name.clone(),
            definition: index.definition.clone(),
            remaining_polls,
            failed,
        });
        Ok(index.name.clone())
    }

    fn list_search_indexes(&self, collection: &str) -> Result<Vec<SearchIndexStatus>> {
        let mut state = self.state.lock();
        state.status_polls += 1;

        let Some(coll) = state.collections.get_mut(&key(&self.database, collection)) else {
            return Ok(Vec::new());
        };

        let mut statuses = Vec::with_capacity(coll.search_indexes.len());
        for index in coll.search_indexes.iter_mut() {
            statuses.push(SearchIndexStatus {
                name: index.name.clone(),
                queryable: index.queryable(),
                status: Some(index.status().to_string()),
                definition: Some(index.definition.clone()),
            });
            index.remaining_polls = index.remaining_polls.saturating_sub(1);
        }
        Ok(statuses)
    }

    fn drop_search_index(&self, collection: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let coll = state.collections.get_mut(&key(&self.database, collection))
            .ok_or_else(|| Error::Rejected(format!("no collection '{}'", collection)))?;

        let before = coll.search_indexes.len();
        coll.search_indexes.retain(|i| i.name != name);
        if coll.search_indexes.len() == before {
            return Err(Error::Rejected(format!("no search index '{}'", name)));
        }
        Ok(())
    }

    fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        let mut state = self.state.lock();
        let coll = state.collections.entry(key(&self.database, collection)).or_default();
        if !coll.indexes.iter().any(|f| f == field) {
            coll.indexes.push(field.to_string());
        }
        Ok(())
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        let mut state = self.state.lock();
        let coll = state.collections.entry(key(&self.database, collection)).or_default();

        let count = documents.len();
        for mut document in documents {
            if !document.contains_key("_id") {
                document.insert("_id", ObjectId::new());
            }
            coll.documents.push(document);
        }
        Ok(count)
    }

    fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut state = self.state.lock();
        if state.record_pipelines {
            state.pipelines.push(pipeline.clone());
        }

        let Some(coll) = state.collections.get(&key(&self.database, collection)) else {
            return Ok(Vec::new());
        };
        run_pipeline(coll, &pipeline)
    }
}

// --- Pipeline evaluation ---

fn run_pipeline(coll: &MemoryCollection, pipeline: &[Document]) -> Result<Vec<Document>> {
    // Each row carries the score `$meta: "vectorSearchScore"` resolves to.
    let mut rows: Vec<(Document, f32)> = Vec::new();

    for (position, stage) in pipeline.iter().enumerate() {
        let (name, args) = single_entry(stage)?;

        match name {
            "$vectorSearch" => {
                if position != 0 {
                    return Err(Error::InvalidPipeline("$vectorSearch must be the first stage".to_string()));
                }
                let args = args.as_document()
                    .ok_or_else(|| Error::InvalidPipeline("$vectorSearch takes a document".to_string()))?;
                rows = vector_search(coll, args)?;
            }
            "$project" => {
                let args = args.as_document()
                    .ok_or_else(|| Error::InvalidPipeline("$project takes a document".to_string()))?;
                if position == 0 {
                    rows = all_rows(coll);
                }
                rows = rows.into_iter()
                    .map(|(doc, score)| project(&doc, score, args).map(|d| (d, score)))
                    .collect::<Result<_>>()?;
            }
            "$limit" => {
                let limit = as_i64(args)
                    .filter(|l| *l > 0)
                    .ok_or_else(|| Error::InvalidPipeline("$limit takes a positive integer".to_string()))?;
                if position == 0 {
                    rows = all_rows(coll);
                }
                rows.truncate(limit as usize);
            }
            other => return Err(Error::InvalidPipeline(format!("unsupported stage {}", other))),
        }
    }

    if pipeline.is_empty() {
        rows = all_rows(coll);
    }

    Ok(rows.into_iter().map(|(doc, _)| doc).collect())
}

fn all_rows(coll: &MemoryCollection) -> Vec<(Document, f32)> {
    coll.documents.iter().map(|d| (d.clone(), 0.0)).collect()
}

fn single_entry(stage: &Document) -> Result<(&str, &Bson)> {
    let mut entries = stage.iter();
    match (entries.next(), entries.next()) {
        (Some((name, args)), None) => Ok((name.as_str(), args)),
        _ => Err(Error::InvalidPipeline("a stage must have exactly one field".to_string())),
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn as_vector(value: &Bson) -> Option<Vec<f32>> {
    value.as_array()?
        .iter()
        .map(|v| as_f64(v).map(|x| x as f32))
        .collect()
}

struct VectorSearchArgs<'a> {
    index: &'a str,
    path: &'a str,
    query: Vec<f32>,
    limit: usize,
    filter: Option<&'a Document>,
}

fn parse_vector_search(args: &Document) -> Result<VectorSearchArgs<'_>> {
    let missing = |field: &str| Error::InvalidPipeline(format!("$vectorSearch requires '{}'", field));

    let index = args.get_str("index").map_err(|_| missing("index"))?;
    let path = args.get_str("path").map_err(|_| missing("path"))?;
    let query = args.get("queryVector")
        .and_then(as_vector)
        .ok_or_else(|| missing("queryVector"))?;
    let limit = args.get("limit")
        .and_then(as_i64)
        .filter(|l| *l > 0)
        .ok_or_else(|| missing("limit"))?;

    let exact = match args.get("exact") {
        None => false,
        Some(Bson::Boolean(b)) => *b,
        Some(_) => return Err(Error::InvalidPipeline("'exact' must be a boolean".to_string())),
    };
    let num_candidates = match args.get("numCandidates") {
        None => None,
        Some(value) => Some(as_i64(value)
            .ok_or_else(|| Error::InvalidPipeline("'numCandidates' must be an integer".to_string()))?),
    };

    match (exact, num_candidates) {
        (true, Some(_)) => {
            return Err(Error::InvalidPipeline("'numCandidates' is not allowed with 'exact: true'".to_string()));
        }
        (false, None) => {
            return Err(Error::InvalidPipeline("'numCandidates' is required for approximate search".to_string()));
        }
        (false, Some(n)) if n < limit || n > MAX_CANDIDATES => {
            return Err(Error::InvalidPipeline(format!(
                "'numCandidates' ({}) must be within limit ({})..={}", n, limit, MAX_CANDIDATES
            )));
        }
        _ => {}
    }

    let filter = match args.get("filter") {
        None => None,
        Some(Bson::Document(filter)) => Some(filter),
        Some(_) => return Err(Error::InvalidPipeline("'filter' must be a document".to_string())),
    };

    Ok(VectorSearchArgs { index, path, query, limit: limit as usize, filter })
}

/// Fields of an index definition: the vector field's similarity and
/// dimension plus the declared filter paths.
fn indexed_fields<'a>(definition: &'a Document, path: &str) -> Result<(Similarity, usize, Vec<&'a str>)> {
    let fields = definition.get_array("fields")
        .map_err(|_| Error::InvalidPipeline("index definition has no fields".to_string()))?;

    let mut vector = None;
    let mut filters = Vec::new();
    for field in fields.iter().filter_map(Bson::as_document) {
        match (field.get_str("type"), field.get_str("path")) {
            (Ok("vector"), Ok(p)) if p == path => {
                let similarity = field.get_str("similarity")
                    .ok()
                    .and_then(Similarity::parse)
                    .ok_or_else(|| Error::InvalidPipeline(format!("unknown similarity for '{}'", path)))?;
                let dim = field.get("numDimensions")
                    .and_then(as_i64)
                    .ok_or_else(|| Error::InvalidPipeline(format!("no numDimensions for '{}'", path)))?;
                vector = Some((similarity, dim as usize));
            }
            (Ok("filter"), Ok(p)) => filters.push(p),
            _ => {}
        }
    }

    let (similarity, dim) = vector
        .ok_or_else(|| Error::InvalidPipeline(format!("'{}' is not indexed as a vector", path)))?;
    Ok((similarity, dim, filters))
}

fn vector_search(coll: &MemoryCollection, args: &Document) -> Result<Vec<(Document, f32)>> {
    let args = parse_vector_search(args)?;

    let Some(index) = coll.search_indexes.iter().find(|i| i.name == args.index) else {
        return Ok(Vec::new());
    };
    if !index.queryable() {
        return Ok(Vec::new());
    }

    let (similarity, dim, filter_paths) = indexed_fields(&index.definition, args.path)?;
    if args.query.len() != dim {
        return Err(Error::DimensionMismatch { expected: dim, actual: args.query.len() });
    }
    if let Some(filter) = args.filter {
        for field in filter.keys() {
            if !filter_paths.contains(&field.as_str()) {
                return Err(Error::InvalidPipeline(format!("'{}' is not indexed as a filter", field)));
            }
        }
    }

    // Top-k by insertion into a sorted buffer
    let top_k = args.limit;
    let mut best: Vec<(usize, f32)> = Vec::with_capacity(top_k + 1);
    for (i, doc) in coll.documents.iter().enumerate() {
        let Some(stored) = doc.get(args.path).and_then(as_vector) else {
            continue;
        };
        if stored.len() != dim {
            continue;
        }
        if let Some(filter) = args.filter {
            if !matches_filter(doc, filter)? {
                continue;
            }
        }
        let Ok(score) = similarity.score(&stored, &args.query) else {
            continue;
        };

        let insert_index = best.partition_point(|&(_, s)| s >= score);
        if insert_index < top_k {
            best.insert(insert_index, (i, score));
            best.truncate(top_k);
        }
    }

    Ok(best.into_iter()
        .map(|(i, score)| (coll.documents[i].clone(), score))
        .collect())
}

fn matches_filter(doc: &Document, filter: &Document) -> Result<bool> {
    for (field, condition) in filter {
        let value = doc.get(field).and_then(as_f64);

        let conditions = match condition {
            Bson::Document(ops) => ops.clone(),
            other => {
                let mut eq = Document::new();
                eq.insert("$eq", other.clone());
                eq
            }
        };

        for (op, operand) in &conditions {
            let operand = as_f64(operand)
                .ok_or_else(|| Error::InvalidPipeline(format!("operand of {} must be numeric", op)))?;
            let Some(value) = value else {
                return Ok(false);
            };
            let ok = match op.as_str() {
                "$gt" => value > operand,
                "$gte" => value >= operand,
                "$lt" => value < operand,
                "$lte" => value <= operand,
                "$eq" => value == operand,
                other => return Err(Error::InvalidPipeline(format!("unsupported filter operator {}", other))),
            };
            if !ok {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn project(doc: &Document, score: f32, args: &Document) -> Result<Document> {
    let mut out = Document::new();

    let keep_id = !matches!(args.get("_id"), Some(Bson::Int32(0)) | Some(Bson::Int64(0)) | Some(Bson::Boolean(false)));
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }

    for (field, rule) in args {
        if field == "_id" {
            continue;
        }
        match rule {
            Bson::Document(expr) if expr.get_str("$meta").ok() == Some("vectorSearchScore") => {
                out.insert(field.as_str(), score as f64);
            }
            Bson::Int32(1) | Bson::Int64(1) | Bson::Boolean(true) => {
                if let Some(value) = doc.get(field) {
                    out.insert(field.as_str(), value.clone());
                }
            }
            _ => return Err(Error::InvalidPipeline(format!("unsupported projection for '{}'", field))),
        }
    }
    Ok(out)
}
