//! The seam between the adapter and the database driver.
//!
//! [`MongoStore`](crate::mongo::MongoStore) talks to a real deployment,
//! [`MemoryStore`](crate::memory::MemoryStore) answers in-process.

use crate::error::Result;
use mongodb::bson::Document;

/// Opens connections to a database.
pub trait DocumentStore {
    type Connection: Connection;

    fn connect(&self, connection_string: &str, database: &str) -> Result<Self::Connection>;
}

/// A live handle on one database. Dropping it releases the connection.
pub trait Connection {
    fn list_collection_names(&self) -> Result<Vec<String>>;

    fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Create a `vectorSearch` index. Returns the index name.
    fn create_search_index(&self, collection: &str, index: &SearchIndexDefinition) -> Result<String>;

    fn list_search_indexes(&self, collection: &str) -> Result<Vec<SearchIndexStatus>>;

    /// Start dropping a search index. The server removes it asynchronously.
    fn drop_search_index(&self, collection: &str, name: &str) -> Result<()>;

    /// Create an ascending single-field index.
    fn create_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Unordered bulk insert. Returns the number of documents written.
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize>;

    fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndexDefinition {
    pub name: String,
    pub definition: Document,
}

/// One entry of `listSearchIndexes`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndexStatus {
    pub name: String,
    pub queryable: bool,
    /// `PENDING`, `BUILDING`, `READY`, `FAILED`, ...
    pub status: Option<String>,
    /// `latestDefinition`
    pub definition: Option<Document>,
}

impl SearchIndexStatus {
    pub fn is_failed(&self) -> bool {
        self.status.as_deref() == Some("FAILED")
    }
}
