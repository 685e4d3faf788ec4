use actix_web::{App, HttpServer};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use vdbbench_mongodb::config::Settings;
use vdbbench_mongodb::store::DocumentStore;
use vdbbench_mongodb::{server, Error, Filter, MemoryStore, MongoDb, MongoStore, Result, VectorDb};

#[derive(Parser, Debug)]
#[command(name = "vdbbench-mongodb")]
#[command(about = "Drive MongoDB Atlas Vector Search the way a benchmark harness does")]
#[command(version)]
pub struct Cli {
    /// TOML settings file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    #[arg(long, env = "MONGODB_URI", hide_env_values = true)]
    pub connection_string: Option<String>,

    #[arg(long)]
    pub database: Option<String>,

    #[arg(long)]
    pub collection: Option<String>,

    /// Vector dimension
    #[arg(long)]
    pub dim: Option<usize>,

    /// Drop an existing collection on connect
    #[arg(long)]
    pub drop_old: bool,

    /// Use the in-process store instead of a MongoDB deployment
    #[arg(long)]
    pub memory: bool,

    /// Runs the REPL when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:7878")]
        bind: String,
    },
    #[command(flatten)]
    Op(Operation),
}

/// Commands accepted both on the command line and in the REPL.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Operation {
    /// Insert one vector
    Insert {
        #[arg(allow_negative_numbers = true)]
        id: i64,
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        vector: Vec<f32>,
    },
    /// Bulk insert a JSON array of {"id", "vector"} records
    Load {
        path: PathBuf,
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },
    /// Search for the nearest ids
    Search {
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        vector: Vec<f32>,
        #[arg(long, visible_alias = "k_top", default_value_t = 5)]
        k_top: usize,
        /// Only return ids greater than this
        #[arg(long, allow_negative_numbers = true)]
        gt: Option<i64>,
    },
    /// Create the vector search index and wait until it is queryable
    Optimize,
    /// Show the capability probes
    Capabilities,
}

/// One REPL input line.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_subcommand = true)]
struct ReplLine {
    #[command(subcommand)]
    op: Operation,
}

#[derive(Deserialize)]
struct Record {
    id: i64,
    vector: Vec<f32>,
}

impl Cli {
    /// Settings from the config file with command-line overrides applied.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };

        if let Some(uri) = &self.connection_string {
            settings.db.connection_string = uri.clone();
        }
        if let Some(database) = &self.database {
            settings.db.database = database.clone();
        }
        if let Some(collection) = &self.collection {
            settings.collection.name = collection.clone();
        }
        if self.dim.is_some() {
            settings.collection.dim = self.dim;
        }
        if self.drop_old {
            settings.collection.drop_old = true;
        }

        settings.validate()?;
        Ok(settings)
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings()?;
    if cli.memory {
        run_with(MemoryStore::new(), &settings, cli.command)
    } else {
        run_with(MongoStore, &settings, cli.command)
    }
}

fn run_with<S>(store: S, settings: &Settings, command: Option<Command>) -> Result<()>
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    let mut db = MongoDb::from_settings(store, settings)?;

    match command {
        None => run_repl(&mut db),
        Some(Command::Serve { bind }) => serve(db, &bind),
        Some(Command::Op(op)) => {
            let mut session = db.init()?;
            execute(&mut *session, op)
        }
    }
}

fn serve<S>(db: MongoDb<S>, bind: &str) -> Result<()>
where
    S: DocumentStore + Send + 'static,
    S::Connection: Send,
{
    let state = server::state(db);
    info!(bind, "Serving HTTP API");

    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(server::config::<S>)
        })
        .bind(bind)?
        .run()
        .await
    })?;
    Ok(())
}

/// REPL mode - one session for the whole interactive run
fn run_repl<S: DocumentStore>(db: &mut MongoDb<S>) -> Result<()> {
    let mut session = db.init()?;

    println!("vdbbench-mongodb - collection '{}' ({} dimensions)", session.collection_name(), session.dim());
    println!("Type 'help' for commands, 'exit' or 'quit' to quit\n");

    loop {
        print!("vdbbench> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input == "exit" || input == "quit" {
            println!("Goodbye!");
            break;
        }

        if input == "help" {
            print_help();
            continue;
        }

        let op = match ReplLine::try_parse_from(input.split_whitespace()) {
            Ok(line) => line.op,
            Err(error) => {
                eprintln!("{}", error);
                continue;
            }
        };

        if let Err(error) = execute(&mut *session, op) {
            eprintln!("Error: {}", error);
        }
    }

    Ok(())
}

fn execute<D: VectorDb>(db: &mut D, op: Operation) -> Result<()> {
    match op {
        Operation::Insert { id, vector } => {
            let inserted = db.insert_embeddings(&[vector], &[id])?;
            println!("Inserted {} document(s)", inserted);
        }

        Operation::Load { path, batch_size } => {
            let inserted = load_file(db, &path, batch_size)?;
            println!("Loaded {} document(s) from '{}'", inserted, path.display());
        }

        Operation::Search { vector, k_top, gt } => {
            let filter = gt.map(Filter::IdGreaterThan);
            let ids = db.search_embedding(&vector, k_top, filter.as_ref())?;
            if ids.is_empty() {
                println!("No results found");
            } else {
                println!("Top {} results:", ids.len());
                for (rank, id) in ids.iter().enumerate() {
                    println!("{}. ID: {}", rank + 1, id);
                }
            }
        }

        Operation::Optimize => {
            db.optimize()?;
            println!("Vector search index is ready");
        }

        Operation::Capabilities => {
            println!("need_normalize_cosine: {}", db.need_normalize_cosine());
            println!("ready_to_load: {}", db.ready_to_load().is_ok());
        }
    }

    Ok(())
}

/// Bulk insert records from a JSON file in batches of `batch_size`.
fn load_file<D: VectorDb>(db: &mut D, path: &Path, batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig("batch size must be positive".to_string()));
    }

    let records: Vec<Record> = serde_json::from_reader(BufReader::new(File::open(path)?))?;

    let mut inserted = 0;
    for batch in records.chunks(batch_size) {
        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        let vectors: Vec<Vec<f32>> = batch.iter().map(|r| r.vector.clone()).collect();
        inserted += db.insert_embeddings(&vectors, &ids)?;
        info!(inserted, total = records.len(), "Loaded batch");
    }
    Ok(inserted)
}

fn print_help() {
    println!("Available commands:");
    println!("  insert <id> <v1> <v2> ...                 - Insert a vector");
    println!("  load <file.json> [--batch-size N]         - Bulk insert {{\"id\", \"vector\"}} records");
    println!("  search <v1> <v2> ... [--k-top N] [--gt ID] - Search for nearest ids (default k=5)");
    println!("  optimize                                  - Build the vector search index");
    println!("  capabilities                              - Show capability probes");
    println!("  help                                      - Show this help");
    println!("  exit, quit                                - Exit the program");
}
