//! # vdbbench-mongodb - MongoDB Atlas Vector Search for benchmark harnesses
//!
//! This crate adapts MongoDB Atlas Vector Search to the lifecycle a vector
//! database benchmark drives: connect, insert, build the index, search.
//! Documents are `{ id, vector }` pairs, the index is a `vectorSearch`
//! search index, and queries are `$vectorSearch` aggregation pipelines.
//!
//! The same adapter runs against a real deployment through [`MongoStore`]
//! or in-process through [`MemoryStore`].
//!
//! ## Example
//!
//! ```
//! use vdbbench_mongodb::{Filter, MemoryStore, MongoDb, VectorDb};
//! use vdbbench_mongodb::config::{CollectionConfig, MongoDbConfig, MongoDbIndexConfig};
//!
//! let index = MongoDbIndexConfig { poll_interval_ms: 1, ..Default::default() };
//! let mut db = MongoDb::new(
//!     MemoryStore::new(),
//!     3,
//!     MongoDbConfig::default(),
//!     index,
//!     CollectionConfig::default(),
//! );
//!
//! let mut session = db.init().unwrap();
//! session.insert_embeddings(
//!     &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.7, 0.7, 0.0]],
//!     &[1, 2, 3],
//! ).unwrap();
//! session.optimize().unwrap();
//!
//! let ids = session.search_embedding(&[1.0, 0.0, 0.0], 2, None).unwrap();
//! assert_eq!(ids, vec![1, 3]);
//!
//! let ids = session.search_embedding(&[1.0, 0.0, 0.0], 2, Some(&Filter::IdGreaterThan(1))).unwrap();
//! assert_eq!(ids, vec![3, 2]);
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod memory;
pub mod mongo;
pub mod server;
pub mod store;
pub mod vector;
mod db;

pub use api::{Filter, MetricType, Session, VectorDb};
pub use db::MongoDb;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use mongo::MongoStore;
