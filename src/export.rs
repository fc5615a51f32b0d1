use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

const HEADERS: [&str; 17] = [
    "store",
    "category",
    "sub_category",
    "name",
    "brand",
    "quantity",
    "quantity_value",
    "quantity_unit",
    "quantity_items",
    "quantity_total",
    "primary_price",
    "primary_price_unit",
    "before_discount_price",
    "has_discount",
    "secondary_price",
    "secondary_price_unit",
    "image",
];

/// Dump the product table to CSV for downstream analysis. Returns the
/// number of rows written.
pub fn export_csv(conn: &Connection, out: &Path) -> Result<usize> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("creating export {}", out.display()))?;
    writer.write_record(HEADERS)?;

    let mut stmt = conn.prepare(
        "SELECT s.store_name, p.category, COALESCE(p.sub_category, ''), p.name,
                COALESCE(p.brand, ''), COALESCE(p.quantity, ''),
                p.quantity_value, COALESCE(p.quantity_unit, ''), p.quantity_items,
                p.quantity_total, p.primary_price, COALESCE(p.primary_price_unit, ''),
                p.before_discount_price, p.has_discount, p.secondary_price,
                COALESCE(p.secondary_price_unit, ''), COALESCE(p.image, '')
         FROM products p
         JOIN stores s ON s.store_id = p.store_id
         ORDER BY p.id",
    )?;

    let mut rows = stmt.query([])?;
    let mut written = 0;
    while let Some(row) = rows.next()? {
        let quantity_value: Option<f64> = row.get(6)?;
        let quantity_items: Option<i64> = row.get(8)?;
        let quantity_total: Option<f64> = row.get(9)?;
        let before_discount: Option<f64> = row.get(12)?;
        let has_discount: bool = row.get(13)?;
        let secondary_price: Option<f64> = row.get(14)?;

        writer.write_record([
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            opt_num(quantity_value),
            row.get::<_, String>(7)?,
            quantity_items.map(|n| n.to_string()).unwrap_or_default(),
            opt_num(quantity_total),
            row.get::<_, f64>(10)?.to_string(),
            row.get::<_, String>(11)?,
            opt_num(before_discount),
            (has_discount as u8).to_string(),
            opt_num(secondary_price),
            row.get::<_, String>(15)?,
            row.get::<_, String>(16)?,
        ])?;
        written += 1;
    }

    writer.flush()?;
    info!("Exported {} products to {}", written, out.display());
    Ok(written)
}

fn opt_num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_schema, store_id};

    #[test]
    fn export_includes_header_and_store_names() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let store = store_id(&conn, "continente").unwrap().unwrap();
        conn.execute(
            "INSERT INTO products (store_id, category, sub_category, name, brand, quantity,
                                   quantity_value, quantity_unit, quantity_items, quantity_total,
                                   primary_price, has_discount, secondary_price)
             VALUES (?1, 'mercearia', 'arroz', 'arroz agulha', 'cigala', '1kg',
                     1000.0, 'g', 1, 1000.0, 1.99, 1, 1.99)",
            [store],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("products.csv");
        let written = export_csv(&conn, &out).unwrap();
        assert_eq!(written, 1);

        let text = std::fs::read_to_string(&out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("store,category,sub_category"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("continente,mercearia,arroz,arroz agulha,cigala,1kg"));
        assert!(row.contains(",1000,"));
        assert!(row.contains(",1,"));
    }
}
