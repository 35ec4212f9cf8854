use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use frbrizer_cluster::{BulkMode, BulkReport, ClusterError, ClusterService};
use frbrizer_core::{AppConfig, Database, ExitCode, Record};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "frbrizer",
    about = "Cluster bibliographic records into Works and Editions",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format. Also enabled by setting FRBRIZER_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import records from a JSON Lines file (one record per line).
    Import { file: String },

    /// Cluster the matched pool of one record into a Work.
    Cluster { id: String },

    /// Cluster pending records (or every record with --full).
    Bulk {
        #[arg(long)]
        full: bool,
        /// Parallel workers (defaults to worker.workers).
        #[arg(long)]
        workers: Option<usize>,
        /// Maximum records to pick up (defaults to worker.batch_limit).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show a Work with its editions.
    Work { id: String },

    /// Full-text search over Works.
    Search {
        query: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show catalog statistics.
    Stats,

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Write a default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let json_output = cli.json || std::env::var("FRBRIZER_JSON").as_deref() == Ok("1");

    let mut config = AppConfig::load()?;
    if let Ok(lib_path) = std::env::var("FRBRIZER_LIBRARY_PATH") {
        config.set_library_path(lib_path.into());
    }

    match cli.command {
        // ── Import ─────────────────────────────────────────────────────────

        Commands::Import { file } => {
            let db = open_db(&config)?;
            let (records, rejected) = read_records(Path::new(&file))?;
            let ids = db.upsert_records(&records)?;
            let dur = start.elapsed().as_millis();
            info!(imported = ids.len(), rejected = rejected.len(), "import finished");

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "imported": ids.len(), "rejected": rejected },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Imported {} records.", ids.len());
                for (line, reason) in &rejected {
                    eprintln!("  line {line}: {reason}");
                }
            }
        }

        // ── Cluster ────────────────────────────────────────────────────────

        Commands::Cluster { id } => {
            let uuid = parse_uuid(&id, json_output);
            let db = Arc::new(open_db(&config)?);
            let service = ClusterService::new(db, config);

            match service.cluster_record(&uuid) {
                Ok(outcome) => {
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":outcome,"meta":{"duration_ms":dur}}))?;
                    } else {
                        println!(
                            "Work {} ({}): {} records, {} editions, k={}",
                            outcome.work_id,
                            if outcome.created { "new" } else { "updated" },
                            outcome.record_count,
                            outcome.edition_count,
                            outcome.k,
                        );
                        for stale in &outcome.stale_work_ids {
                            println!("  merged and removed work {stale}");
                        }
                        if let Some(e) = &outcome.index_error {
                            eprintln!("  search index not updated: {e}");
                        }
                    }
                }
                Err(ClusterError::RecordNotFound(_)) => {
                    fail(json_output, "not_found", &format!("Record {id} not found"), ExitCode::NotFound)
                }
                Err(e) => fail(json_output, "cluster_failed", &e.to_string(), ExitCode::ClusterFailed),
            }
        }

        // ── Bulk ───────────────────────────────────────────────────────────

        Commands::Bulk { full, workers, limit } => {
            let mode = if full { BulkMode::Full } else { BulkMode::Incremental };
            let workers = workers.unwrap_or(config.worker.workers).max(1);
            if let Some(limit) = limit {
                config.worker.batch_limit = limit;
            }

            let db = Arc::new(open_db(&config)?);
            let purged = db.purge_expired_cache()?;
            if purged > 0 {
                info!(purged, "expired cache entries removed");
            }
            let service = Arc::new(ClusterService::new(db, config));
            let report = if workers == 1 {
                let service = Arc::clone(&service);
                tokio::task::spawn_blocking(move || service.cluster_bulk(mode))
                    .await
                    .context("bulk worker panicked")??
            } else {
                run_bulk(service, mode, workers).await?
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":report,"meta":{"duration_ms":dur}}))?;
            } else {
                println!(
                    "Clustered {} pools ({} skipped, {} failed).",
                    report.processed.len(),
                    report.skipped.len(),
                    report.failed.len()
                );
                for failure in &report.failed {
                    eprintln!("  {}: {}", failure.record_id, failure.error);
                }
            }
            if !report.failed.is_empty() {
                std::process::exit(ExitCode::ClusterFailed as i32);
            }
        }

        // ── Work ───────────────────────────────────────────────────────────

        Commands::Work { id } => {
            let uuid = parse_uuid(&id, json_output);
            let db = open_db(&config)?;
            match db.get_work(&uuid) {
                Ok(work) => {
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":work,"meta":{"duration_ms":dur}}))?;
                    } else {
                        println!("{} — {}", &work.id.to_string()[..8], work.title);
                        let authors: Vec<&str> = work.agents.iter().map(|a| a.name.as_str()).collect();
                        if !authors.is_empty() {
                            println!("  by {}", authors.join(", "));
                        }
                        for edition in &work.editions {
                            let year = edition
                                .publication_year
                                .map(|y| y.to_string())
                                .unwrap_or_else(|| "n.d.".to_string());
                            println!(
                                "  [{year:>4}] {publisher:<30} {place:<20} {records} records, {items} items",
                                publisher = edition.publisher.as_deref().unwrap_or("-"),
                                place = edition.place.as_deref().unwrap_or("-"),
                                records = edition.record_ids.len(),
                                items = edition.items.len(),
                            );
                        }
                    }
                }
                Err(e) if e.is_not_found() => {
                    fail(json_output, "not_found", &format!("Work {id} not found"), ExitCode::NotFound)
                }
                Err(e) => return Err(e.into()),
            }
        }

        // ── Search ─────────────────────────────────────────────────────────

        Commands::Search { query, limit } => {
            let db = open_db(&config)?;
            let results = db.search_works(&query, limit)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "items": results, "total": results.len(), "query": query },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if results.is_empty() {
                println!("No results for: {query}");
            } else {
                println!("Found {} results:", results.len());
                for work in &results {
                    println!(
                        "  {} — {} ({} editions)",
                        &work.id.to_string()[..8],
                        work.title,
                        work.edition_count
                    );
                }
            }
        }

        // ── Stats ──────────────────────────────────────────────────────────

        Commands::Stats => {
            let db = open_db(&config)?;
            let stats = db.stats()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":stats,"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Catalog statistics:");
                println!("  Records:          {}", stats.records);
                println!("  Pending records:  {}", stats.pending_records);
                println!("  Works:            {}", stats.works);
                println!("  Editions:         {}", stats.editions);
                println!("  Undated editions: {}", stats.undated_editions);
                println!("  Items:            {}", stats.items);
                println!("  Links:            {}", stats.links);
                println!("  Indexed works:    {}", stats.indexed_works);
            }
        }

        // ── Config ─────────────────────────────────────────────────────────

        Commands::Config { action } => {
            let dur = start.elapsed().as_millis();
            match action {
                ConfigAction::Show => {
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":config,"meta":{"duration_ms":dur}}))?;
                    } else {
                        for (k, v) in &config_key_values(&config) {
                            println!("{k} = {v}");
                        }
                    }
                }
                ConfigAction::Init { force } => {
                    let path = AppConfig::config_path();
                    if path.exists() && !force {
                        fail(
                            json_output,
                            "exists",
                            &format!("{} already exists (use --force to overwrite)", path.display()),
                            ExitCode::InvalidArgs,
                        );
                    }
                    AppConfig::default().save_to(&path)?;
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":{"path":path},"meta":{"duration_ms":dur}}))?;
                    } else {
                        println!("Wrote {}", path.display());
                    }
                }
            }
        }
    }

    Ok(())
}

// ─── Bulk workers ───────────────────────────────────────────────────────────

/// Splits `ids` into contiguous partitions, one blocking task each.
/// Splits the pending ids into one contiguous chunk per worker.
async fn run_bulk(service: Arc<ClusterService>, mode: BulkMode, workers: usize) -> Result<BulkReport> {
    let limit = service.config().worker.batch_limit;
    let ids = service
        .database()
        .list_record_ids(mode == BulkMode::Incremental, limit)?;
    let mut report = BulkReport::new(mode);
    if ids.is_empty() {
        return Ok(report);
    }

    let chunk_size = ids.len().div_ceil(workers);
    info!(records = ids.len(), workers, chunk_size, ?mode, "bulk clustering started");

    let handles: Vec<_> = ids
        .chunks(chunk_size)
        .map(|chunk| {
            let service = Arc::clone(&service);
            let chunk = chunk.to_vec();
            tokio::task::spawn_blocking(move || service.cluster_batch(&chunk, mode))
        })
        .collect();

    for handle in handles {
        report.merge(handle.await.context("bulk worker panicked")?);
    }
    Ok(report)
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn fail(json_output: bool, code: &str, message: &str, exit: ExitCode) -> ! {
    if json_output {
        println!("{}", serde_json::json!({"status":"error","error":code,"message":message}));
    } else {
        eprintln!("{message}");
    }
    std::process::exit(exit as i32);
}

fn parse_uuid(id: &str, json_output: bool) -> Uuid {
    Uuid::parse_str(id).unwrap_or_else(|_| {
        fail(json_output, "invalid_args", &format!("Invalid UUID: {id}"), ExitCode::InvalidArgs)
    })
}

fn open_db(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    Ok(Database::open(&db_path)?)
}

/// Records parsed from a JSON Lines file, plus `(line, reason)` for every
/// rejected line. Blank lines are ignored.
fn read_records(path: &Path) -> Result<(Vec<Record>, Vec<(usize, String)>)> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut records = Vec::new();
    let mut rejected = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(&line) {
            Ok(record) => match record.validate() {
                Ok(()) => records.push(record),
                Err(e) => rejected.push((index + 1, e.to_string())),
            },
            Err(e) => {
                warn!(line = index + 1, error = %e, "unparseable record skipped");
                rejected.push((index + 1, e.to_string()));
            }
        }
    }
    Ok((records, rejected))
}

fn config_key_values(config: &AppConfig) -> BTreeMap<&'static str, String> {
    let mut map = BTreeMap::new();
    map.insert("config_path", AppConfig::config_path().to_string_lossy().to_string());
    map.insert("library_path", config.library_path().to_string_lossy().to_string());
    map.insert("database_path", config.database_path().to_string_lossy().to_string());
    map.insert("matcher.batch_size", config.matcher.batch_size.to_string());
    map.insert("matcher.excluded_schemes", config.matcher.excluded_schemes.join(","));
    map.insert("matcher.max_pool_size", config.matcher.max_pool_size.to_string());
    map.insert("kmeans.seed", config.kmeans.seed.to_string());
    map.insert("kmeans.n_runs", config.kmeans.n_runs.to_string());
    map.insert("worker.workers", config.worker.workers.to_string());
    map.insert("worker.batch_limit", config.worker.batch_limit.to_string());
    map
}
