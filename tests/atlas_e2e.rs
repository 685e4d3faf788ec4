//! Lifecycle run against a real Atlas cluster.
//!
//! Needs a deployment with Atlas Search (Atlas or a local Atlas CLI
//! deployment) named by `MONGODB_URI`:
//!
//! ```text
//! MONGODB_URI="mongodb+srv://..." cargo test --test atlas_e2e -- --ignored --nocapture
//! ```

use std::time::Instant;
use vdbbench_mongodb::config::{CollectionConfig, MongoDbConfig, MongoDbIndexConfig};
use vdbbench_mongodb::{Filter, MetricType, MongoDb, MongoStore, VectorDb};

fn random_vector(dim: usize, seed: u64) -> Vec<f32> {
    // Simple LCG pseudo-random generator (no external dep needed)
    let mut state = seed;
    (0..dim)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            // Map to [-1.0, 1.0]
            ((state >> 33) as f32) / (u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

#[test]
#[ignore = "requires MONGODB_URI pointing at an Atlas Search deployment"]
fn test_atlas_lifecycle() {
    let uri = std::env::var("MONGODB_URI").expect("MONGODB_URI must be set");
    let dim = 64;
    let num_vectors = 2_000;
    let batch = 500;

    let db_config = MongoDbConfig { connection_string: uri, database: "vdb_bench_e2e".to_string() };
    let index = MongoDbIndexConfig {
        metric_type: MetricType::L2,
        poll_interval_ms: 2_000,
        ready_timeout_secs: 600,
        ..Default::default()
    };
    let collection = CollectionConfig { drop_old: true, ..Default::default() };
    let mut db = MongoDb::new(MongoStore, dim, db_config, index, collection);

    // Phase 1: load
    let start = Instant::now();
    {
        let mut session = db.init().unwrap();
        let ids: Vec<i64> = (0..num_vectors).collect();
        for chunk in ids.chunks(batch) {
            let vectors: Vec<Vec<f32>> = chunk.iter().map(|&i| random_vector(dim, i as u64)).collect();
            assert_eq!(session.insert_embeddings(&vectors, chunk).unwrap(), chunk.len());
        }
    }
    println!("Phase 1 - Insert {} vectors: {:.3}s", num_vectors, start.elapsed().as_secs_f64());

    // Phase 2: build the index
    let start = Instant::now();
    db.init().unwrap().optimize().unwrap();
    println!("Phase 2 - Index ready: {:.3}s", start.elapsed().as_secs_f64());

    // Phase 3: each stored vector finds itself first
    let session = db.init().unwrap();
    for i in [0_i64, 17, 1_234, num_vectors - 1] {
        let ids = session.search_embedding(&random_vector(dim, i as u64), 10, None).unwrap();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0], i);
    }

    // Phase 4: filtered search only returns larger ids
    let ids = session
        .search_embedding(&random_vector(dim, 3), 10, Some(&Filter::IdGreaterThan(1_000)))
        .unwrap();
    assert!(ids.iter().all(|&id| id > 1_000));
}
