use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::price::{parse_price, PriceField};

static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s/€]+").unwrap());

/// One raw product record as delivered by a catalog collector, one JSON
/// object per line. Every field is optional; absent text fields default to
/// empty strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub store: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub primary_price: Option<PriceField>,
    #[serde(default)]
    pub primary_price_unit: String,
    #[serde(default)]
    pub secondary_price: Option<PriceField>,
    #[serde(default)]
    pub secondary_price_unit: String,
    #[serde(default)]
    pub before_discount_price: Option<PriceField>,
    #[serde(default)]
    pub img_lnk: String,
}

/// A record after field cleaning and price parsing, ready for batch
/// persistence. `before_discount_price == 0.0` means "no discount data".
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub store: String,
    pub category: String,
    pub sub_category: String,
    pub name: String,
    pub brand: Option<String>,
    pub quantity: Option<String>,
    pub primary_price: f64,
    pub primary_price_unit: String,
    pub before_discount_price: f64,
    pub has_discount: bool,
    pub secondary_price: f64,
    pub secondary_price_unit: String,
    pub image: String,
}

/// Collapse whitespace/slash/currency runs, trim and lowercase every text
/// field except the image link, parse the price fields and derive the
/// discount flag. Infallible: garbage in, defaults out.
pub fn clean(raw: &RawRecord) -> CleanRecord {
    let primary_price = parse_price(raw.primary_price.as_ref());
    let secondary_price = parse_price(raw.secondary_price.as_ref());
    let before_discount_price = parse_price(raw.before_discount_price.as_ref());

    CleanRecord {
        store: clean_text(&raw.store),
        category: clean_text(&raw.category),
        sub_category: clean_text(&raw.sub_category),
        name: clean_text(&raw.name),
        brand: raw.brand.as_deref().map(clean_text).filter(|b| !b.is_empty()),
        quantity: raw
            .quantity
            .as_deref()
            .map(clean_text)
            .filter(|q| !q.is_empty()),
        primary_price,
        primary_price_unit: standardize_price_unit(&clean_text(&raw.primary_price_unit)),
        before_discount_price,
        has_discount: before_discount_price > primary_price && primary_price > 0.0,
        secondary_price,
        secondary_price_unit: standardize_price_unit(&clean_text(&raw.secondary_price_unit)),
        image: raw.img_lnk.clone(),
    }
}

pub fn clean_text(value: &str) -> String {
    NOISE_RE
        .replace_all(value, " ")
        .trim()
        .to_lowercase()
}

const UNIT_ALIASES: &[(&str, &[&str])] = &[
    ("kg", &["kg", "kgm"]),
    ("lt", &["l", "ltr"]),
    ("metro", &["m", "mtr", "cm"]),
    ("dose", &["dos"]),
    ("un", &["ro", "un", "undefined", "unknown", "edt"]),
];

/// Map price-unit abbreviations from the three catalogs onto one vocabulary.
/// Unknown units pass through unchanged.
pub fn standardize_price_unit(unit: &str) -> String {
    for (standard, aliases) in UNIT_ALIASES {
        if aliases.contains(&unit) {
            return (*standard).to_string();
        }
    }
    unit.to_string()
}

// ── Tests ──
