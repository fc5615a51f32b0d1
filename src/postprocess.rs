use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::info;

use crate::checkpoint::Source;
use crate::db::{self, ProductUpdate, StoredProduct};
use crate::normalize::quantity::QuantityBrandExtractor;
use crate::normalize::standardize::{standardize, RawQuantity, StandardQuantity};
use crate::normalize::taxonomy::{CategoryNormalizer, ProductSample};

const PAR_CHUNK: usize = 500;

#[derive(Debug, Default)]
pub struct PostpassOutcome {
    pub updated: usize,
    pub deleted: usize,
    pub inconsistent_before: usize,
    pub inconsistent_after: usize,
}

/// The post-ingestion pass over the full product set: infer missing house
/// brands and quantities, standardize every quantity, reconcile the
/// taxonomy and write the remaining inconsistencies to a report. All
/// corrections land in bounded transactional batches.
pub fn run(
    conn: &Connection,
    mapping_path: &Path,
    brands_path: &Path,
    report_path: &Path,
) -> Result<PostpassOutcome> {
    let products = db::fetch_products(conn)?;
    info!("Post-pass over {} products", products.len());

    let normalizer = CategoryNormalizer::load(mapping_path);
    let extractor = QuantityBrandExtractor::load(brands_path, Source::Auchan.house_brand());

    let before = normalizer.verify_consistency(&samples(&products));
    if !before.is_consistent() {
        info!(
            "{} inconsistent category pairs before normalization",
            before.entries.len()
        );
    }

    // Pure per-row work: brand/quantity inference and standardization.
    let mut fixes: Vec<RowFix> = products
        .par_chunks(PAR_CHUNK)
        .flat_map_iter(|chunk| chunk.iter().map(|p| fix_row(p, &extractor)))
        .collect();

    // Taxonomy reconciliation, memoized per unique pair.
    let mut resolved: BTreeMap<(String, String), (String, String)> = BTreeMap::new();
    for fix in &mut fixes {
        let key = (fix.category.clone(), fix.sub_category.clone());
        let (category, sub_category) = resolved
            .entry(key)
            .or_insert_with_key(|(cat, sub)| {
                let (cat, sub) = normalizer.normalize(cat, sub);
                normalizer.apply_known_fixes(&cat, &sub)
            })
            .clone();
        fix.category = category;
        fix.sub_category = sub_category;
    }

    let updates: Vec<ProductUpdate> = fixes.iter().map(RowFix::to_update).collect();
    let (updated, deleted) = db::apply_updates(conn, &updates)?;
    info!("Post-pass applied: {updated} updated, {deleted} deleted");

    let after = normalizer.verify_consistency(&corrected_samples(&products, &fixes));
    after.write_to(report_path)?;
    if after.is_consistent() {
        info!("All category-subcategory pairs are consistent");
    } else {
        info!(
            "{} inconsistent pairs remain after normalization — see {}",
            after.entries.len(),
            report_path.display()
        );
    }

    Ok(PostpassOutcome {
        updated,
        deleted,
        inconsistent_before: before.entries.len(),
        inconsistent_after: after.entries.len(),
    })
}

/// One product's corrected fields, before taxonomy reconciliation.
struct RowFix {
    id: i64,
    category: String,
    sub_category: String,
    name: String,
    brand: Option<String>,
    quantity: Option<String>,
    std: StandardQuantity,
    primary_price: f64,
    primary_price_unit: Option<String>,
    secondary_price: f64,
    secondary_price_unit: Option<String>,
}

fn fix_row(product: &StoredProduct, extractor: &QuantityBrandExtractor) -> RowFix {
    let mut brand = product.brand.clone();
    let mut quantity = product.quantity.clone();

    // Only the house-brand catalog packs brand and quantity into the
    // product name; the other sources deliver them as fields.
    if product.store == Source::Auchan.store_name() && (brand.is_none() || quantity.is_none()) {
        let (extracted_quantity, extracted_brand) = extractor.extract(&product.name);
        if quantity.is_none() {
            quantity = extracted_quantity;
        }
        if brand.is_none() {
            brand = extracted_brand;
        }
    }

    let secondary_unit = product.secondary_price_unit.as_deref().unwrap_or("");
    let std = standardize(RawQuantity::from_field(quantity.as_deref()), secondary_unit);

    RowFix {
        id: product.id,
        category: product.category.clone(),
        sub_category: product.sub_category.clone(),
        name: product.name.clone(),
        brand,
        quantity,
        std,
        primary_price: product.primary_price,
        primary_price_unit: product.primary_price_unit.clone(),
        secondary_price: product.secondary_price,
        secondary_price_unit: product.secondary_price_unit.clone(),
    }
}

impl RowFix {
    fn to_update(&self) -> ProductUpdate {
        ProductUpdate {
            id: self.id,
            category: self.category.clone(),
            sub_category: self.sub_category.clone(),
            brand: self.brand.clone(),
            quantity: self.quantity.clone(),
            quantity_value: self.std.value,
            quantity_unit: self.std.unit.as_str(),
            quantity_items: self.std.items,
            quantity_total: self.std.total,
            primary_price: self.primary_price,
            primary_price_unit: self.primary_price_unit.clone(),
            secondary_price: self.secondary_price,
            secondary_price_unit: self.secondary_price_unit.clone(),
        }
    }
}

fn samples(products: &[StoredProduct]) -> Vec<ProductSample> {
    products
        .iter()
        .map(|p| ProductSample {
            id: p.id,
            category: p.category.clone(),
            sub_category: p.sub_category.clone(),
            name: p.name.clone(),
            primary_price: p.primary_price,
        })
        .collect()
}

/// Sample set as it will look after the updates land; deleted rows
/// (no brand) are excluded.
fn corrected_samples(products: &[StoredProduct], fixes: &[RowFix]) -> Vec<ProductSample> {
    fixes
        .iter()
        .zip(products)
        .filter(|(fix, _)| fix.brand.is_some())
        .map(|(fix, p)| ProductSample {
            id: fix.id,
            category: fix.category.clone(),
            sub_category: fix.sub_category.clone(),
            name: fix.name.clone(),
            primary_price: p.primary_price,
        })
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn setup() -> (Connection, tempfile::TempDir) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        (conn, tempfile::tempdir().unwrap())
    }

    fn insert(
        conn: &Connection,
        store: &str,
        name: &str,
        brand: Option<&str>,
        quantity: Option<&str>,
        secondary_unit: &str,
    ) -> i64 {
        let store_id = db::store_id(conn, store).unwrap().unwrap();
        conn.execute(
            "INSERT INTO products (store_id, category, sub_category, name, brand, quantity,
                                   primary_price, secondary_price, secondary_price_unit)
             VALUES (?1, 'mercearia', 'arroz', ?2, ?3, ?4, 1.99, 1.99, ?5)",
            rusqlite::params![store_id, name, brand, quantity, secondary_unit],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn mapping_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("category_mapping.json");
        std::fs::write(
            &path,
            r#"{
                "category_mapping": {"Mercearia": ["mercearia"]},
                "sub_category_mapping": {"Arroz e Massa": ["arroz", "massas"]},
                "category_subcategory_relationships": {"Mercearia": ["Arroz e Massa"]}
            }"#,
        )
        .unwrap();
        path
    }

    fn brands_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("brands.csv");
        std::fs::write(&path, "brand\nmimosa\ncigala\n").unwrap();
        path
    }

    #[test]
    fn house_catalog_rows_gain_brand_and_quantity() {
        let (conn, dir) = setup();
        insert(&conn, "auchan", "arroz cigala agulha 1 kg", None, None, "kg");
        insert(&conn, "auchan", "pão caseiro 400 g", None, None, "kg");
        insert(&conn, "pingo doce", "arroz do lidl", None, Some("500"), "kg");

        let outcome = run(
            &conn,
            &mapping_file(dir.path()),
            &brands_file(dir.path()),
            &dir.path().join("report.txt"),
        )
        .unwrap();
        // The pingo doce row has no brand and no extraction applies.
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.deleted, 1);

        let rows = db::fetch_products(&conn).unwrap();
        let cigala = rows.iter().find(|r| r.name.contains("cigala")).unwrap();
        assert_eq!(cigala.brand.as_deref(), Some("cigala"));
        assert_eq!(cigala.quantity.as_deref(), Some("1kg"));
        let house = rows.iter().find(|r| r.name.contains("pão")).unwrap();
        assert_eq!(house.brand.as_deref(), Some("auchan"));
    }

    #[test]
    fn quantities_standardized_and_taxonomy_reconciled() {
        let (conn, dir) = setup();
        let id = insert(&conn, "continente", "arroz agulha", Some("cigala"), Some("2x500g"), "kg");

        let report = dir.path().join("report.txt");
        run(&conn, &mapping_file(dir.path()), &brands_file(dir.path()), &report).unwrap();

        let (cat, sub, value, unit, items, total): (String, String, f64, String, i64, f64) = conn
            .query_row(
                "SELECT category, sub_category, quantity_value, quantity_unit,
                        quantity_items, quantity_total FROM products WHERE id = ?1",
                [id],
                |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
                },
            )
            .unwrap();
        assert_eq!(cat, "Mercearia");
        assert_eq!(sub, "Arroz e Massa");
        assert_eq!(value, 500.0);
        assert_eq!(unit, "g");
        assert_eq!(items, 2);
        assert_eq!(total, 1000.0);

        let text = std::fs::read_to_string(&report).unwrap();
        assert_eq!(text, "All category-subcategory pairs are consistent!");
    }
}
