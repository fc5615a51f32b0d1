use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::checkpoint::SOURCES;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stores (
            store_id   INTEGER PRIMARY KEY,
            store_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS products (
            id                    INTEGER PRIMARY KEY,
            store_id              INTEGER NOT NULL REFERENCES stores(store_id) ON DELETE CASCADE,
            category              TEXT NOT NULL,
            sub_category          TEXT,
            name                  TEXT NOT NULL,
            brand                 TEXT,
            quantity              TEXT,
            quantity_value        REAL,
            quantity_unit         TEXT CHECK(quantity_unit IN ('g','ml','un') OR quantity_unit IS NULL),
            quantity_items        INTEGER,
            quantity_total        REAL,
            primary_price         REAL NOT NULL,
            primary_price_unit    TEXT,
            before_discount_price REAL,
            has_discount          BOOLEAN NOT NULL DEFAULT 0,
            secondary_price       REAL,
            secondary_price_unit  TEXT,
            image                 TEXT,
            created_at            TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_products_store ON products(store_id);
        CREATE INDEX IF NOT EXISTS idx_products_category ON products(category, sub_category);
        ",
    )?;
    seed_stores(conn)?;
    Ok(())
}

/// The three sources are seeded once at database creation and never
/// mutated afterwards.
fn seed_stores(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO stores (store_name) VALUES (?1)")?;
    for source in SOURCES {
        stmt.execute([source.store_name()])?;
    }
    Ok(())
}

pub fn store_id(conn: &Connection, store_name: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT store_id FROM stores WHERE store_name = ?1")?;
    let mut rows = stmt.query([store_name])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// A stored product joined with its store name, as pulled for the
/// post-ingestion pass.
#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub id: i64,
    pub store: String,
    pub category: String,
    pub sub_category: String,
    pub name: String,
    pub brand: Option<String>,
    pub quantity: Option<String>,
    pub primary_price: f64,
    pub primary_price_unit: Option<String>,
    pub secondary_price: f64,
    pub secondary_price_unit: Option<String>,
}

pub fn fetch_products(conn: &Connection) -> Result<Vec<StoredProduct>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, s.store_name, p.category, COALESCE(p.sub_category,''), p.name,
                p.brand, p.quantity, p.primary_price, p.primary_price_unit,
                COALESCE(p.secondary_price, 0), p.secondary_price_unit
         FROM products p
         JOIN stores s ON s.store_id = p.store_id
         ORDER BY p.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredProduct {
                id: row.get(0)?,
                store: row.get(1)?,
                category: row.get(2)?,
                sub_category: row.get(3)?,
                name: row.get(4)?,
                brand: row.get(5)?,
                quantity: row.get(6)?,
                primary_price: row.get(7)?,
                primary_price_unit: row.get(8)?,
                secondary_price: row.get(9)?,
                secondary_price_unit: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One corrected row produced by the post-ingestion pass, keyed by primary
/// key. `brand == None` marks the row for deletion.
#[derive(Debug, Clone)]
pub struct ProductUpdate {
    pub id: i64,
    pub category: String,
    pub sub_category: String,
    pub brand: Option<String>,
    pub quantity: Option<String>,
    pub quantity_value: f64,
    pub quantity_unit: &'static str,
    pub quantity_items: i64,
    pub quantity_total: f64,
    pub primary_price: f64,
    pub primary_price_unit: Option<String>,
    pub secondary_price: f64,
    pub secondary_price_unit: Option<String>,
}

pub const UPDATE_BATCH_SIZE: usize = 1000;

/// Apply post-pass corrections in bounded transactional batches.
/// Returns (updated, deleted).
pub fn apply_updates(conn: &Connection, updates: &[ProductUpdate]) -> Result<(usize, usize)> {
    let mut updated = 0;
    let mut deleted = 0;

    for chunk in updates.chunks(UPDATE_BATCH_SIZE) {
        let tx = conn.unchecked_transaction()?;
        {
            let mut update_stmt = tx.prepare(
                "UPDATE products SET
                     category = ?2, sub_category = ?3, brand = ?4, quantity = ?5,
                     quantity_value = ?6, quantity_unit = ?7, quantity_items = ?8,
                     quantity_total = ?9, primary_price = ?10, primary_price_unit = ?11,
                     secondary_price = ?12, secondary_price_unit = ?13
                 WHERE id = ?1",
            )?;
            let mut delete_stmt = tx.prepare("DELETE FROM products WHERE id = ?1")?;

            for u in chunk {
                match &u.brand {
                    None => {
                        deleted += delete_stmt.execute([u.id])?;
                    }
                    Some(brand) => {
                        updated += update_stmt.execute(rusqlite::params![
                            u.id,
                            u.category,
                            u.sub_category,
                            brand,
                            u.quantity,
                            u.quantity_value,
                            u.quantity_unit,
                            u.quantity_items,
                            u.quantity_total,
                            u.primary_price,
                            u.primary_price_unit,
                            u.secondary_price,
                            u.secondary_price_unit,
                        ])?;
                    }
                }
            }
        }
        tx.commit()?;
    }

    Ok((updated, deleted))
}

// ── Stats ──

pub struct Stats {
    pub stores: usize,
    pub products: usize,
    pub discounted: usize,
    pub missing_brand: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let stores: usize = conn.query_row("SELECT COUNT(*) FROM stores", [], |r| r.get(0))?;
    let products: usize = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
    let discounted: usize = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE has_discount = 1",
        [],
        |r| r.get(0),
    )?;
    let missing_brand: usize = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE brand IS NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        stores,
        products,
        discounted,
        missing_brand,
    })
}

pub fn count_products(conn: &Connection) -> Result<usize> {
    Ok(conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?)
}

// ── Run registry ──

/// One row per completed campaign, kept in a separate registry database.
pub struct RunRecord {
    pub creation_date: String,
    pub creation_time: String,
    pub run_time: String,
    pub scraped_items: u64,
    pub products_count: usize,
    pub db_path: String,
}

pub fn record_run(registry_path: &Path, record: &RunRecord) -> Result<()> {
    let conn = connect(registry_path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            id             INTEGER PRIMARY KEY,
            creation_date  TEXT NOT NULL,
            creation_time  TEXT NOT NULL,
            run_time       TEXT NOT NULL,
            scraped_items  INTEGER NOT NULL,
            products_count INTEGER NOT NULL,
            db_path        TEXT NOT NULL
        );",
    )?;
    conn.execute(
        "INSERT INTO runs (creation_date, creation_time, run_time, scraped_items, products_count, db_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            record.creation_date,
            record.creation_time,
            record.run_time,
            record.scraped_items,
            record.products_count,
            record.db_path,
        ],
    )?;
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    pub fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn insert_product(conn: &Connection, name: &str, brand: Option<&str>) -> i64 {
        let store = store_id(conn, "auchan").unwrap().unwrap();
        conn.execute(
            "INSERT INTO products (store_id, category, sub_category, name, brand, primary_price)
             VALUES (?1, 'mercearia', 'arroz', ?2, ?3, 1.99)",
            rusqlite::params![store, name, brand],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn schema_seeds_three_stores() {
        let conn = test_conn();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.stores, 3);
        assert!(store_id(&conn, "pingo doce").unwrap().is_some());
        assert!(store_id(&conn, "lidl").unwrap().is_none());

        // Re-running the schema is idempotent.
        init_schema(&conn).unwrap();
        assert_eq!(get_stats(&conn).unwrap().stores, 3);
    }

    #[test]
    fn updates_rewrite_and_null_brand_deletes() {
        let conn = test_conn();
        let keep = insert_product(&conn, "arroz agulha 1kg", Some("cigala"));
        let gone = insert_product(&conn, "produto sem marca", None);

        let updates = vec![
            ProductUpdate {
                id: keep,
                category: "Mercearia".into(),
                sub_category: "Arroz e Massa".into(),
                brand: Some("cigala".into()),
                quantity: Some("1kg".into()),
                quantity_value: 1000.0,
                quantity_unit: "g",
                quantity_items: 1,
                quantity_total: 1000.0,
                primary_price: 1.99,
                primary_price_unit: Some("un".into()),
                secondary_price: 1.99,
                secondary_price_unit: Some("kg".into()),
            },
            ProductUpdate {
                id: gone,
                category: "Mercearia".into(),
                sub_category: "Arroz e Massa".into(),
                brand: None,
                quantity: None,
                quantity_value: 1.0,
                quantity_unit: "un",
                quantity_items: 1,
                quantity_total: 1.0,
                primary_price: 1.99,
                primary_price_unit: None,
                secondary_price: 1.99,
                secondary_price_unit: None,
            },
        ];

        let (updated, deleted) = apply_updates(&conn, &updates).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(deleted, 1);

        let rows = fetch_products(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, "Mercearia");
        assert_eq!(rows[0].quantity.as_deref(), Some("1kg"));
    }
}
