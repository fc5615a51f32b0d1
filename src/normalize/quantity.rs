use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

/// Idiomatic multi-word quantity phrases checked before any pattern.
/// First match wins and short-circuits the cascade.
const SPECIAL_PHRASES: &[(&str, &str)] = &[
    ("uma dúzia", "12 un"),
    ("duas dúzias", "24 un"),
    ("três dúzias", "36 un"),
    ("meia dúzia", "6 un"),
];

const BARE_UNITS: &[&str] = &["kg", "g", "gr", "ml", "l", "cl"];

type TokenBuilder = fn(&Captures) -> String;

/// Ordered pattern cascade. The order is a contract: reordering changes
/// which family claims an ambiguous name, and the emitted token shapes
/// ("2x500g", "12un", ...) are consumed verbatim by the standardizer.
static CASCADE: LazyLock<Vec<(Regex, TokenBuilder)>> = LazyLock::new(|| {
    vec![
        // pack with unit count: "2 x 6 un"
        (
            Regex::new(r"(?i)(\d+)\s*x\s*(\d+)\s*un").unwrap(),
            (|c| format!("{}x{}un", &c[1], &c[2])) as TokenBuilder,
        ),
        // pack with net weight: "4 x 125 g (500 g)"
        (
            Regex::new(
                r"(?i)(\d+)\s*x\s*(\d+(?:[.,]\d+)?)\s*(g|gr|kg|ml|l|cl)\s*\((\d+(?:[.,]\d+)?)\s*(g|gr|kg|ml|l|cl)\)",
            )
            .unwrap(),
            |c| format!("{}x{}{}({}{})", &c[1], &c[2], &c[3], &c[4], &c[5]),
        ),
        // generic multi-pack: "6 x 1.5 l"
        (
            Regex::new(r"(?i)(\d+)\s*x\s*(\d+(?:[.,]\d+)?)\s*(g|gr|kg|ml|l|cl|un)").unwrap(),
            |c| format!("{}x{}{}", &c[1], &c[2], &c[3]),
        ),
        // plain weight/volume: "500 g"
        (
            Regex::new(r"(?i)(?:^|\s)(\d+(?:[.,]\d+)?)\s*(g|gr|kg|ml|l|cl)(?:\s|$)").unwrap(),
            |c| format!("{}{}", &c[1], &c[2]),
        ),
        // plain unit count: "12 unidades"
        (
            Regex::new(r"(?i)(\d+)\s*(unidades|und|un|par|doses|dúzia|dúzias|saquetas)").unwrap(),
            |c| format!("{}un", &c[1]),
        ),
        // trailing unit with no number: "... kg"
        (
            Regex::new(r"(?i)\s(kg|g|gr|ml|l|cl)\s*$").unwrap(),
            |c| format!("1{}", &c[1]),
        ),
    ]
});

/// Infers a quantity token and a brand from a free-text product name.
/// Used for the house-brand catalog, whose names pack both into the title.
pub struct QuantityBrandExtractor {
    brands: Vec<(String, Regex)>,
    house_brand: String,
}

impl QuantityBrandExtractor {
    /// Load the brand dictionary from a CSV file (header row, brand in the
    /// first column). Dictionary order is priority order. A missing or
    /// unreadable file degrades to an empty dictionary.
    pub fn load(brands_path: &Path, house_brand: &str) -> Self {
        let brands = match read_brands(brands_path) {
            Ok(brands) => brands,
            Err(e) => {
                warn!("Could not read brand dictionary {}: {}", brands_path.display(), e);
                Vec::new()
            }
        };
        Self::with_brands(brands, house_brand)
    }

    pub fn with_brands(brands: Vec<String>, house_brand: &str) -> Self {
        let brands = brands
            .into_iter()
            .filter(|b| !b.trim().is_empty())
            .map(|b| {
                let brand = b.trim().to_string();
                let pattern =
                    Regex::new(&format!(r"\b{}\b", regex::escape(&brand.to_lowercase()))).unwrap();
                (brand, pattern)
            })
            .collect();
        Self {
            brands,
            house_brand: house_brand.to_string(),
        }
    }

    /// Returns `(quantity_token, brand)`. Pure; never errors — a name that
    /// matches nothing yields `(None, house brand)`, and a recognized book
    /// yields no brand at all.
    pub fn extract(&self, name: &str) -> (Option<String>, Option<String>) {
        let name = name.to_lowercase();

        let mut quantity = SPECIAL_PHRASES
            .iter()
            .find(|(phrase, _)| name.contains(phrase))
            .map(|(_, token)| (*token).to_string());

        if quantity.is_none() {
            quantity = CASCADE
                .iter()
                .find_map(|(re, build)| re.captures(&name).map(|c| build(&c)));
        }

        if quantity.is_none() {
            quantity = BARE_UNITS
                .iter()
                .find(|unit| name.contains(&format!(" {unit}")))
                .map(|unit| format!("1{unit}"));
        }

        let brand = match self
            .brands
            .iter()
            .find(|(_, pattern)| pattern.is_match(&name))
        {
            Some((brand, _)) => Some(brand.clone()),
            None if name.contains("livro") => None,
            None => Some(self.house_brand.clone()),
        };

        (quantity, brand)
    }
}

fn read_brands(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut brands = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(brand) = record.get(0) {
            brands.push(brand.to_string());
        }
    }
    Ok(brands)
}

// ── Tests ──
