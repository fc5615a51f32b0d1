use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, Source};
use crate::normalize::fields::{clean, RawRecord};
use crate::persister::BatchPersister;

#[derive(Debug, Default)]
pub struct IngestStats {
    pub inserted: u64,
    pub skipped: u64,
    pub already_scraped: u64,
    pub malformed: u64,
}

/// Stream one source's raw records (one JSON object per line) into the
/// database, advancing the checkpoint as sub-category groups complete.
///
/// Records arrive grouped by (category, sub_category); a group boundary
/// flushes the current batch and only then marks the finished sub-category
/// in the checkpoint, so progress never claims uncommitted rows.
pub fn run_ingest(
    conn: &Connection,
    checkpoint: &mut CheckpointStore,
    source: Source,
    records_path: &Path,
    taxonomy_path: Option<&Path>,
    skip_list: &Path,
) -> Result<IngestStats> {
    let taxonomy = match taxonomy_path {
        Some(path) => {
            let taxonomy = read_taxonomy(path)?;
            checkpoint.sync_taxonomy(source, &taxonomy)?;
            Some(taxonomy)
        }
        None => None,
    };

    let file = File::open(records_path)
        .with_context(|| format!("opening records {}", records_path.display()))?;
    let reader = BufReader::new(file);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
            .unwrap(),
    );

    let mut persister = BatchPersister::new(conn, skip_list);
    let mut stats = IngestStats::default();
    let mut current: Option<(String, String)> = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        pb.inc(1);

        let raw: RawRecord = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                stats.malformed += 1;
                warn!("Malformed record skipped: {e}");
                continue;
            }
        };
        let record = clean(&raw);

        if checkpoint.is_category_scraped(source, &record.category)
            || checkpoint.is_subcategory_scraped(source, &record.category, &record.sub_category)
        {
            stats.already_scraped += 1;
            continue;
        }

        let key = (record.category.clone(), record.sub_category.clone());
        if let Some(prev) = &current {
            if *prev != key {
                persister.flush()?;
                complete_group(checkpoint, source, prev, taxonomy.as_ref())?;
                pb.set_message(format!("({} > {})", key.0, key.1));
            }
        }
        current = Some(key);

        persister.process(record)?;
    }

    persister.flush()?;
    if let Some(last) = &current {
        complete_group(checkpoint, source, last, taxonomy.as_ref())?;
    }

    let summary = persister.close()?;
    stats.inserted = summary.inserted;
    stats.skipped = summary.skipped;
    checkpoint.add_scraped_items(stats.inserted)?;

    pb.finish_and_clear();
    info!(
        "{}: {} inserted, {} skipped, {} already scraped, {} malformed",
        source.as_str(),
        stats.inserted,
        stats.skipped,
        stats.already_scraped,
        stats.malformed
    );
    Ok(stats)
}

/// Without a taxonomy there is no authoritative sub-category list, so the
/// category itself can never be promoted to complete.
fn complete_group(
    checkpoint: &mut CheckpointStore,
    source: Source,
    group: &(String, String),
    taxonomy: Option<&BTreeMap<String, Vec<String>>>,
) -> Result<()> {
    let known: &[String] = taxonomy
        .and_then(|t| t.get(&group.0))
        .map(|subs| subs.as_slice())
        .unwrap_or(&[]);
    checkpoint.complete_subcategory(source, &group.0, &group.1, known)
}

fn read_taxonomy(path: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading taxonomy {}", path.display()))?;
    Ok(serde_json::from_str(&raw)
        .with_context(|| format!("parsing taxonomy {}", path.display()))?)
}

// ── Tests ──
