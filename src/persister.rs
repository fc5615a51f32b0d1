use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db;
use crate::normalize::fields::CleanRecord;

pub const BATCH_SIZE: usize = 1000;

/// Why a record never reached the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ZeroPrice,
    UnknownStore,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersistSummary {
    pub inserted: u64,
    pub skipped: u64,
}

/// Buffers cleaned records and writes them in transactional batches.
/// The buffer is cleared only after a successful commit, and skip-list
/// lines are appended only after the batch they belong to committed, so
/// a failed flush can be retried without duplicating either.
pub struct BatchPersister<'a> {
    conn: &'a Connection,
    skip_list: PathBuf,
    buffer: Vec<CleanRecord>,
    pending_skips: Vec<String>,
    summary: PersistSummary,
}

impl<'a> BatchPersister<'a> {
    pub fn new(conn: &'a Connection, skip_list: &Path) -> Self {
        BatchPersister {
            conn,
            skip_list: skip_list.to_path_buf(),
            buffer: Vec::with_capacity(BATCH_SIZE),
            pending_skips: Vec::new(),
            summary: PersistSummary::default(),
        }
    }

    /// Stage one record. Records missing either price are skipped up
    /// front; a full buffer triggers an implicit flush.
    pub fn process(&mut self, record: CleanRecord) -> Result<()> {
        if record.primary_price == 0.0 || record.secondary_price == 0.0 {
            self.skip(&record, SkipReason::ZeroPrice);
            return Ok(());
        }

        self.buffer.push(record);
        if self.buffer.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    fn skip(&mut self, record: &CleanRecord, reason: SkipReason) {
        debug!("Skipping '{}' from {}: {:?}", record.name, record.store, reason);
        self.pending_skips
            .push(format!("{} || {}", record.store, record.name));
        self.summary.skipped += 1;
    }

    /// Commit everything buffered in one transaction, then append the
    /// accumulated skip-list lines.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let mut store_ids: HashMap<String, Option<i64>> = HashMap::new();
            for record in &self.buffer {
                if !store_ids.contains_key(&record.store) {
                    let id = db::store_id(self.conn, &record.store)?;
                    if id.is_none() {
                        warn!("Unknown store '{}' — skipping its records", record.store);
                    }
                    store_ids.insert(record.store.clone(), id);
                }
            }

            let mut inserted = 0u64;
            let tx = self.conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO products (
                         store_id, category, sub_category, name, brand, quantity,
                         primary_price, primary_price_unit, before_discount_price,
                         has_discount, secondary_price, secondary_price_unit, image
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )?;
                for r in &self.buffer {
                    let Some(store_id) = store_ids[&r.store] else {
                        continue;
                    };
                    stmt.execute(rusqlite::params![
                        store_id,
                        r.category,
                        r.sub_category,
                        r.name,
                        r.brand,
                        r.quantity,
                        r.primary_price,
                        r.primary_price_unit,
                        if r.before_discount_price > 0.0 {
                            Some(r.before_discount_price)
                        } else {
                            None
                        },
                        r.has_discount,
                        r.secondary_price,
                        r.secondary_price_unit,
                        r.image,
                    ])?;
                    inserted += 1;
                }
            }
            tx.commit()?;

            // Only after the commit: account for the batch and drop it.
            for record in self.buffer.drain(..) {
                if store_ids[&record.store].is_none() {
                    self.pending_skips
                        .push(format!("{} || {}", record.store, record.name));
                    self.summary.skipped += 1;
                }
            }
            self.summary.inserted += inserted;
            debug!("Committed batch of {inserted} products");
        }

        self.write_skips()?;
        Ok(())
    }

    fn write_skips(&mut self) -> Result<()> {
        if self.pending_skips.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.skip_list.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.skip_list)
            .with_context(|| format!("opening skip list {}", self.skip_list.display()))?;
        for line in self.pending_skips.drain(..) {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Final flush; returns the run's totals.
    pub fn close(mut self) -> Result<PersistSummary> {
        self.flush()?;
        Ok(self.summary)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_products, init_schema};

    fn record(store: &str, name: &str, primary: f64, secondary: f64) -> CleanRecord {
        CleanRecord {
            store: store.into(),
            category: "mercearia".into(),
            sub_category: "arroz".into(),
            name: name.into(),
            brand: Some("cigala".into()),
            quantity: Some("1kg".into()),
            primary_price: primary,
            primary_price_unit: "un".into(),
            before_discount_price: 0.0,
            has_discount: false,
            secondary_price: secondary,
            secondary_price_unit: "kg".into(),
            image: String::new(),
        }
    }

    fn setup() -> (Connection, tempfile::TempDir) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        (conn, tempfile::tempdir().unwrap())
    }

    #[test]
    fn buffered_records_commit_on_close() {
        let (conn, dir) = setup();
        let skip = dir.path().join("skipped.txt");
        let mut persister = BatchPersister::new(&conn, &skip);

        for i in 0..5 {
            persister
                .process(record("auchan", &format!("arroz {i}"), 1.99, 1.99))
                .unwrap();
        }
        // Nothing committed before the flush.
        assert_eq!(count_products(&conn).unwrap(), 0);

        let summary = persister.close().unwrap();
        assert_eq!(summary.inserted, 5);
        assert_eq!(summary.skipped, 0);
        assert_eq!(count_products(&conn).unwrap(), 5);
        assert!(!skip.exists());
    }

    #[test]
    fn zero_price_goes_to_skip_list() {
        let (conn, dir) = setup();
        let skip = dir.path().join("skipped.txt");
        let mut persister = BatchPersister::new(&conn, &skip);

        persister.process(record("auchan", "sem preço", 0.0, 1.99)).unwrap();
        persister.process(record("auchan", "sem unitário", 1.99, 0.0)).unwrap();
        persister.process(record("auchan", "ok", 1.99, 1.99)).unwrap();
        let summary = persister.close().unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 2);
        let lines = std::fs::read_to_string(&skip).unwrap();
        assert!(lines.contains("auchan || sem preço"));
        assert!(lines.contains("auchan || sem unitário"));
    }

    #[test]
    fn unknown_store_is_skipped_not_inserted() {
        let (conn, dir) = setup();
        let skip = dir.path().join("skipped.txt");
        let mut persister = BatchPersister::new(&conn, &skip);

        persister.process(record("lidl", "produto estranho", 1.99, 1.99)).unwrap();
        persister.process(record("continente", "produto bom", 1.99, 1.99)).unwrap();
        let summary = persister.close().unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
        assert!(std::fs::read_to_string(&skip)
            .unwrap()
            .contains("lidl || produto estranho"));
    }
}
