//! The database module
//! Translate benchmark lifecycle calls into MongoDB Atlas Vector Search calls

use crate::api::{Filter, VectorDb};
use crate::config::{CollectionConfig, MongoDbConfig, MongoDbIndexConfig, Settings};
use crate::error::{Error, Result};
use crate::store::{Connection, DocumentStore, SearchIndexDefinition};
use mongodb::bson::{doc, Bson, Document};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct MongoDb<S: DocumentStore> {
    store: S,
    dim: usize,
    db_config: MongoDbConfig,
    case_config: MongoDbIndexConfig,
    collection: CollectionConfig,
    drop_old: bool,
    conn: Option<S::Connection>,
}

impl<S: DocumentStore> MongoDb<S> {
    /// Creates an adapter for vectors of `dim` components.
    ///
    /// No connection is made until [`connect`](VectorDb::connect) or
    /// [`init`](VectorDb::init) is called. The dimension given here wins over
    /// `collection.dim`.
    ///
    /// # Examples
    ///
    /// ```
    /// use vdbbench_mongodb::{MemoryStore, MongoDb, VectorDb};
    /// use vdbbench_mongodb::config::{CollectionConfig, MongoDbConfig, MongoDbIndexConfig};
    ///
    /// let mut db = MongoDb::new(
    ///     MemoryStore::new(),
    ///     3,
    ///     MongoDbConfig::default(),
    ///     MongoDbIndexConfig::default(),
    ///     CollectionConfig::default(),
    /// );
    /// assert!(!db.is_connected());
    ///
    /// let mut session = db.init().unwrap();
    /// let inserted = session.insert_embeddings(&[vec![1.0, 0.0, 0.0]], &[7]).unwrap();
    /// assert_eq!(inserted, 1);
    /// ```
    pub fn new(
        store: S,
        dim: usize,
        db_config: MongoDbConfig,
        case_config: MongoDbIndexConfig,
        collection: CollectionConfig,
    ) -> MongoDb<S> {
        info!(
            db_config = ?db_config,
            index_params = %case_config.index_param(dim, &collection.vector_field, &collection.id_field),
            "MongoDB client config"
        );

        let drop_old = collection.drop_old;
        MongoDb { store, dim, db_config, case_config, collection, drop_old, conn: None }
    }

    /// Creates an adapter from loaded [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when no dimension is configured.
    pub fn from_settings(store: S, settings: &Settings) -> Result<MongoDb<S>> {
        settings.validate()?;
        Ok(MongoDb::new(
            store,
            settings.dim()?,
            settings.db.clone(),
            settings.index.clone(),
            settings.collection.clone(),
        ))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn collection_name(&self) -> &str {
        &self.collection.name
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&self) -> Result<&S::Connection> {
        self.conn.as_ref().ok_or(Error::NotConnected)
    }

    /// Creates the vector search index, waits until it is queryable and then
    /// adds a regular index on the id field.
    ///
    /// An index that already exists under the configured name is reused
    /// when its definition matches the configured dimension, metric and
    /// fields. A differing or `FAILED` index is dropped and built again.
    ///
    /// # Errors
    ///
    /// Every failure is logged and returned: store errors, a failed build,
    /// or [`Error::IndexNotReady`] when the ready timeout elapses.
    pub fn create_index(&mut self) -> Result<()> {
        self.try_create_index().inspect_err(|e| {
            error!(index = %self.case_config.index_name, error = %e, "Error creating index");
        })
    }

    fn try_create_index(&self) -> Result<()> {
        let conn = self.connection()?;
        let collection = self.collection.name.as_str();
        let name = self.case_config.index_name.as_str();
        let wanted = self.case_config.index_param(self.dim, &self.collection.vector_field, &self.collection.id_field);

        let existing = conn.list_search_indexes(collection)?
            .into_iter()
            .find(|index| index.name == name);

        let create = match existing {
            None => true,
            Some(index) if index.is_failed() => {
                warn!(index = name, "Rebuilding failed vector search index");
                self.remove_search_index(conn, name)?;
                true
            }
            Some(index) if index.definition.as_ref().is_some_and(|current| !same_definition(current, &wanted)) => {
                warn!(index = name, current = ?index.definition, wanted = %wanted, "Vector search index definition changed, rebuilding");
                self.remove_search_index(conn, name)?;
                true
            }
            Some(_) => {
                info!(index = name, "Vector search index already exists");
                false
            }
        };

        if create {
            conn.create_search_index(collection, &SearchIndexDefinition { name: name.to_string(), definition: wanted })?;
            info!(index = name, "Created vector search index");
        }

        self.wait_for_index_ready(name)?;

        conn.create_index(collection, &self.collection.id_field)?;
        info!(field = %self.collection.id_field, "Created index on id field");
        Ok(())
    }

    /// Drops `name` and waits until it no longer shows up in the listing.
    fn remove_search_index(&self, conn: &S::Connection, name: &str) -> Result<()> {
        let collection = self.collection.name.as_str();
        let (interval, timeout) = (self.case_config.poll_interval(), self.case_config.ready_timeout());
        let start = Instant::now();

        conn.drop_search_index(collection, name)?;
        while conn.list_search_indexes(collection)?.iter().any(|index| index.name == name) {
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(Error::IndexNotReady { name: name.to_string(), waited });
            }
            std::thread::sleep(interval.min(timeout - waited));
        }

        info!(index = name, "Dropped vector search index");
        Ok(())
    }

    /// Polls with the configured interval and timeout.
    pub fn wait_for_index_ready(&self, name: &str) -> Result<()> {
        self.wait_for_index_ready_with(name, self.case_config.poll_interval(), self.case_config.ready_timeout())
    }

    /// Polls `list_search_indexes` every `interval` until `name` reports
    /// itself queryable.
    ///
    /// # Errors
    ///
    /// * [`Error::IndexFailed`] as soon as the index reports `FAILED`
    /// * [`Error::IndexNotReady`] once `timeout` has elapsed
    pub fn wait_for_index_ready_with(&self, name: &str, interval: Duration, timeout: Duration) -> Result<()> {
        let conn = self.connection()?;
        let start = Instant::now();

        loop {
            let indexes = conn.list_search_indexes(&self.collection.name)?;
            if let Some(index) = indexes.iter().find(|index| index.name == name) {
                if index.queryable {
                    break;
                }
                if index.is_failed() {
                    return Err(Error::IndexFailed {
                        name: name.to_string(),
                        status: index.status.clone().unwrap_or_default(),
                    });
                }
                debug!(index = name, status = ?index.status, "Index not queryable yet");
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(Error::IndexNotReady { name: name.to_string(), waited });
            }
            std::thread::sleep(interval.min(timeout - waited));
        }

        info!(index = name, elapsed = ?start.elapsed(), "Index is ready");
        Ok(())
    }

    /// The aggregation pipeline for one query.
    ///
    /// Exact queries carry `exact: true`; approximate ones carry
    /// `numCandidates` from [`MongoDbIndexConfig::num_candidates`].
    pub fn search_pipeline(&self, query: &[f32], k: usize, filter: Option<&Filter>) -> Vec<Document> {
        let params = self.case_config.search_param();

        let mut vector_search = doc! {
            "index": self.case_config.index_name.as_str(),
            "path": self.collection.vector_field.as_str(),
            "queryVector": to_bson_vector(query),
            "limit": k as i64,
        };

        if params.exact {
            vector_search.insert("exact", true);
        } else {
            vector_search.insert("numCandidates", self.case_config.num_candidates(k) as i64);
        }

        if let Some(filter) = filter {
            info!(?filter, "Applying filter");
            match filter {
                Filter::IdGreaterThan(value) => {
                    let mut condition = Document::new();
                    condition.insert(self.collection.id_field.as_str(), doc! { "$gt": *value });
                    vector_search.insert("filter", condition);
                }
            }
        }

        let mut project = doc! { "_id": 0 };
        project.insert(self.collection.id_field.as_str(), 1);
        project.insert("score", doc! { "$meta": "vectorSearchScore" });

        vec![
            doc! { "$vectorSearch": vector_search },
            doc! { "$project": project },
        ]
    }

    fn document_id(&self, document: &Document) -> Result<i64> {
        match document.get(&self.collection.id_field) {
            Some(Bson::Int64(id)) => Ok(*id),
            Some(Bson::Int32(id)) => Ok(*id as i64),
            Some(Bson::Double(id)) if id.fract() == 0.0 => Ok(*id as i64),
            _ => Err(Error::UnexpectedDocument(format!(
                "no integer '{}' in {}", self.collection.id_field, document
            ))),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        Ok(())
    }
}

fn to_bson_vector(vector: &[f32]) -> Bson {
    Bson::Array(vector.iter().map(|&x| Bson::Double(x as f64)).collect())
}

/// `(type, path, numDimensions, similarity, quantization)` of one indexed field.
type FieldKey<'a> = (&'a str, &'a str, Option<i64>, Option<&'a str>, &'a str);

fn field_keys(definition: &Document) -> Option<Vec<FieldKey<'_>>> {
    let mut keys = definition.get_array("fields").ok()?
        .iter()
        .map(|field| {
            let field = field.as_document()?;
            let dimensions = match field.get("numDimensions") {
                Some(Bson::Int32(n)) => Some(*n as i64),
                Some(Bson::Int64(n)) => Some(*n),
                Some(Bson::Double(n)) => Some(*n as i64),
                _ => None,
            };
            Some((
                field.get_str("type").ok()?,
                field.get_str("path").ok()?,
                dimensions,
                field.get_str("similarity").ok(),
                field.get_str("quantization").unwrap_or("none"),
            ))
        })
        .collect::<Option<Vec<_>>>()?;
    keys.sort();
    Some(keys)
}

/// Field order and integer width do not matter; the server may report
/// either differently from what was sent.
fn same_definition(current: &Document, wanted: &Document) -> bool {
    match (field_keys(current), field_keys(wanted)) {
        (Some(current), Some(wanted)) => current == wanted,
        _ => false,
    }
}

impl<S: DocumentStore> VectorDb for MongoDb<S> {
    fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = self.store.connect(&self.db_config.connection_string, &self.db_config.database)?;

        if self.drop_old && conn.list_collection_names()?.contains(&self.collection.name) {
            info!(collection = %self.collection.name, "MongoDB client dropping old collection");
            conn.drop_collection(&self.collection.name)?;
        }
        self.drop_old = false;

        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(collection = %self.collection.name, "MongoDB connection released");
        }
    }

    fn need_normalize_cosine(&self) -> bool {
        false
    }

    fn insert_embeddings(&mut self, embeddings: &[Vec<f32>], ids: &[i64]) -> Result<usize> {
        let conn = self.connection()?;

        if embeddings.len() != ids.len() {
            return Err(Error::LengthMismatch { ids: ids.len(), vectors: embeddings.len() });
        }
        if embeddings.is_empty() {
            return Ok(0);
        }

        let mut documents = Vec::with_capacity(embeddings.len());
        for (id, embedding) in ids.iter().zip(embeddings) {
            self.check_dimension(embedding)?;

            let mut document = Document::new();
            document.insert(self.collection.id_field.as_str(), *id);
            document.insert(self.collection.vector_field.as_str(), to_bson_vector(embedding));
            documents.push(document);
        }

        let inserted = conn.insert_many(&self.collection.name, documents)?;
        debug!(count = inserted, collection = %self.collection.name, "Inserted embeddings");
        Ok(inserted)
    }

    fn search_embedding(&self, query: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<i64>> {
        let conn = self.connection()?;
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let results = conn.aggregate(&self.collection.name, self.search_pipeline(query, k, filter))?;
        results.iter().map(|document| self.document_id(document)).collect()
    }

    /// Atlas optimizes vector indexes itself; this only makes sure the
    /// index exists and is queryable.
    fn optimize(&mut self) -> Result<()> {
        self.create_index()
    }
}
