//! [`DocumentStore`] backed by the official MongoDB driver.

use crate::error::Result;
use crate::store::{Connection, DocumentStore, SearchIndexDefinition, SearchIndexStatus};
use mongodb::bson::{doc, Document};
use mongodb::sync::{Client, Collection, Database};
use mongodb::IndexModel;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct MongoStore;

impl DocumentStore for MongoStore {
    type Connection = MongoConnection;

    fn connect(&self, connection_string: &str, database: &str) -> Result<MongoConnection> {
        let client = Client::with_uri_str(connection_string)?;
        let db = client.database(database);
        // The driver connects lazily; ping so a bad URI fails here.
        db.run_command(doc! { "ping": 1 }).run()?;
        debug!(database, "Connected to MongoDB");
        Ok(MongoConnection { _client: client, db })
    }
}

pub struct MongoConnection {
    _client: Client,
    db: Database,
}

impl MongoConnection {
    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

impl Connection for MongoConnection {
    fn list_collection_names(&self) -> Result<Vec<String>> {
        Ok(self.db.list_collection_names().run()?)
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collection(collection).drop().run()?;
        Ok(())
    }

    fn create_search_index(&self, collection: &str, index: &SearchIndexDefinition) -> Result<String> {
        let reply = self.db.run_command(doc! {
            "createSearchIndexes": collection,
            "indexes": [{
                "name": index.name.as_str(),
                "type": "vectorSearch",
                "definition": index.definition.clone(),
            }],
        }).run()?;
        debug!(collection, ?reply, "createSearchIndexes");
        Ok(index.name.clone())
    }

    fn list_search_indexes(&self, collection: &str) -> Result<Vec<SearchIndexStatus>> {
        let cursor = self.collection(collection).list_search_indexes().run()?;
        let mut indexes = Vec::new();
        for entry in cursor {
            let entry = entry?;
            indexes.push(SearchIndexStatus {
                name: entry.get_str("name").unwrap_or_default().to_string(),
                queryable: entry.get_bool("queryable").unwrap_or(false),
                status: entry.get_str("status").ok().map(str::to_string),
                definition: entry.get_document("latestDefinition").ok().cloned(),
            });
        }
        Ok(indexes)
    }

    fn drop_search_index(&self, collection: &str, name: &str) -> Result<()> {
        self.db.run_command(doc! { "dropSearchIndex": collection, "name": name }).run()?;
        debug!(collection, index = name, "dropSearchIndex");
        Ok(())
    }

    fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        let mut keys = Document::new();
        keys.insert(field, 1);
        let model = IndexModel::builder().keys(keys).build();
        self.collection(collection).create_index(model).run()?;
        Ok(())
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        let result = self.collection(collection)
            .insert_many(documents)
            .ordered(false)
            .run()?;
        Ok(result.inserted_ids.len())
    }

    fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).aggregate(pipeline).run()?;
        let mut documents = Vec::new();
        for document in cursor {
            documents.push(document?);
        }
        Ok(documents)
    }
}
