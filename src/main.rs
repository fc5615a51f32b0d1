mod checkpoint;
mod db;
mod export;
mod ingest;
mod normalize;
mod persister;
mod postprocess;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkpoint::{CheckpointStore, Source, SOURCES};

#[derive(Parser)]
#[command(
    name = "grocery_etl",
    about = "Normalization and checkpoint engine for grocery catalog data",
    version
)]
struct Cli {
    /// Directory holding the checkpoint, databases and reference files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the checkpoint and campaign database for a new run
    Init,
    /// Ingest one source's raw records (one JSON object per line)
    Ingest {
        /// Source catalog: continente, pingo_doce or auchan
        #[arg(value_parser = parse_source)]
        source: Source,
        /// Path to the raw records file
        records: PathBuf,
        /// Optional taxonomy file ({"category": ["sub", ...]}) to
        /// reconcile the checkpoint against before ingesting
        #[arg(long)]
        taxonomy: Option<PathBuf>,
    },
    /// Run the post-ingestion pass over the campaign database
    Postprocess,
    /// Report category/sub-category inconsistencies without changing data
    Verify,
    /// Export the product table to CSV
    Export {
        /// Output path (defaults to <data-dir>/products.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show per-source checkpoint progress
    Status,
    /// Show database statistics
    Stats,
}

fn parse_source(s: &str) -> Result<Source, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = DataPaths::new(&cli.data_dir);

    match cli.command {
        Command::Init => init(&paths),
        Command::Ingest {
            source,
            records,
            taxonomy,
        } => run_ingest(&paths, source, &records, taxonomy.as_deref()),
        Command::Postprocess => {
            let conn = open_campaign_db(&paths)?;
            postprocess::run(&conn, &paths.mapping, &paths.brands, &paths.report)?;
            Ok(())
        }
        Command::Verify => verify(&paths),
        Command::Export { out } => {
            let conn = open_campaign_db(&paths)?;
            let out = out.unwrap_or_else(|| paths.export.clone());
            export::export_csv(&conn, &out)?;
            Ok(())
        }
        Command::Status => status(&paths),
        Command::Stats => {
            let conn = open_campaign_db(&paths)?;
            let stats = db::get_stats(&conn)?;
            println!("stores:         {}", stats.stores);
            println!("products:       {}", stats.products);
            println!("discounted:     {}", stats.discounted);
            println!("missing brand:  {}", stats.missing_brand);
            Ok(())
        }
    }
}

/// Well-known file locations under the data directory.
struct DataPaths {
    data_dir: PathBuf,
    progress: PathBuf,
    mapping: PathBuf,
    brands: PathBuf,
    skip_list: PathBuf,
    report: PathBuf,
    registry: PathBuf,
    export: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        DataPaths {
            data_dir: data_dir.to_path_buf(),
            progress: data_dir.join("progress.json"),
            mapping: data_dir.join("category_mapping.json"),
            brands: data_dir.join("brands.csv"),
            skip_list: data_dir.join("skipped_products.txt"),
            report: data_dir.join("category_inconsistencies.txt"),
            registry: data_dir.join("registry.sqlite"),
            export: data_dir.join("products.csv"),
        }
    }
}

fn init(paths: &DataPaths) -> Result<()> {
    let mut checkpoint = CheckpointStore::load(&paths.progress)?;
    let db_path = checkpoint.ensure_database_path(&paths.data_dir)?;
    let conn = db::connect(&db_path)?;
    db::init_schema(&conn)?;
    info!("Campaign ready: database {}", db_path.display());
    Ok(())
}

fn run_ingest(
    paths: &DataPaths,
    source: Source,
    records: &Path,
    taxonomy: Option<&Path>,
) -> Result<()> {
    let mut checkpoint = CheckpointStore::load(&paths.progress)?;
    let db_path = checkpoint.ensure_database_path(&paths.data_dir)?;
    let conn = db::connect(&db_path)?;
    db::init_schema(&conn)?;

    ingest::run_ingest(
        &conn,
        &mut checkpoint,
        source,
        records,
        taxonomy,
        &paths.skip_list,
    )?;

    let known_total: usize = checkpoint.state.total_categories.values().sum();
    if known_total > 0 && checkpoint.is_run_complete() {
        finalize_campaign(paths, &mut checkpoint, &conn, &db_path)?;
    }
    Ok(())
}

/// All sources report completion: run the post-pass, export, register the
/// campaign and reset the checkpoint for the next one.
fn finalize_campaign(
    paths: &DataPaths,
    checkpoint: &mut CheckpointStore,
    conn: &rusqlite::Connection,
    db_path: &Path,
) -> Result<()> {
    info!("All sources complete — finalizing campaign");
    postprocess::run(conn, &paths.mapping, &paths.brands, &paths.report)?;
    export::export_csv(conn, &paths.export)?;

    let init_time: DateTime<Utc> = checkpoint
        .state
        .scraper_init_time
        .parse()
        .unwrap_or_else(|_| Utc::now());
    let elapsed = (Utc::now() - init_time).num_seconds().max(0) as u64;
    db::record_run(
        &paths.registry,
        &db::RunRecord {
            creation_date: init_time.format("%Y-%m-%d").to_string(),
            creation_time: init_time.format("%H:%M:%S").to_string(),
            run_time: format_duration(elapsed),
            scraped_items: checkpoint.state.scraped_items,
            products_count: db::count_products(conn)?,
            db_path: db_path.to_string_lossy().into_owned(),
        },
    )?;

    checkpoint.reset()?;
    info!("Campaign registered ({}) and checkpoint reset", format_duration(elapsed));
    Ok(())
}

fn verify(paths: &DataPaths) -> Result<()> {
    let conn = open_campaign_db(paths)?;
    let normalizer = normalize::taxonomy::CategoryNormalizer::load(&paths.mapping);
    let products = db::fetch_products(&conn)?;
    let samples: Vec<_> = products
        .iter()
        .map(|p| normalize::taxonomy::ProductSample {
            id: p.id,
            category: p.category.clone(),
            sub_category: p.sub_category.clone(),
            name: p.name.clone(),
            primary_price: p.primary_price,
        })
        .collect();
    let report = normalizer.verify_consistency(&samples);
    print!("{}", report.render());
    report.write_to(&paths.report)?;
    Ok(())
}

fn status(paths: &DataPaths) -> Result<()> {
    let checkpoint = CheckpointStore::load(&paths.progress)?;
    let state = &checkpoint.state;
    let database = if state.database_url.is_empty() {
        "(none)"
    } else {
        state.database_url.as_str()
    };
    let started = if state.scraper_init_time.is_empty() {
        "(not started)"
    } else {
        state.scraper_init_time.as_str()
    };
    println!("database:      {database}");
    println!("started:       {started}");
    println!("scraped items: {}", state.scraped_items);
    for source in SOURCES {
        let key = source.as_str();
        println!(
            "{:<12} {} / {} categories",
            key,
            state.scraped_categories.get(key).copied().unwrap_or(0),
            state.total_categories.get(key).copied().unwrap_or(0),
        );
    }
    Ok(())
}

fn open_campaign_db(paths: &DataPaths) -> Result<rusqlite::Connection> {
    let checkpoint = CheckpointStore::load(&paths.progress)?;
    let url = &checkpoint.state.database_url;
    anyhow::ensure!(
        !url.is_empty(),
        "no campaign database yet — run `init` or `ingest` first"
    );
    let conn = db::connect(Path::new(url)).with_context(|| format!("opening {url}"))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 05s");
        assert_eq!(format_duration(3723), "1h 02m 03s");
    }

    #[test]
    fn source_parsing_for_cli() {
        assert!(parse_source("pingo_doce").is_ok());
        assert!(parse_source("lidl").is_err());
    }
}
